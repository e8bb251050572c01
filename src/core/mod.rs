//! 核心编排层：错误与恢复、状态投影、会话监管、会话构建与宿主运行器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_llm_from_config, create_session_builder, SessionBuilder};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{create_agent, spawn_session, Command, SessionHandle};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{DesireView, SessionPhase, SessionSnapshot, SessionStatus};
