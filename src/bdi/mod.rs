//! BDI 推理引擎：信念、愿望、意图与主循环
//!
//! - **belief / desire / intention**：会话独占的三类状态
//! - **planner**：两阶段规划（WHAT → HOW）
//! - **executor**：每轮只执行 cursor 处的一步
//! - **hitl**：步骤失败后的人在回路状态机
//! - **reconsider**：每轮判断剩余计划是否仍然有效
//! - **cycle**：BdiSession 与 run_cycle

pub mod belief;
pub mod capability;
pub mod cycle;
pub mod desire;
pub mod events;
pub mod executor;
pub mod hitl;
pub mod intention;
pub mod mock;
pub mod planner;
pub mod reasoning;
pub mod reconsider;

pub use belief::{Belief, BeliefStore, HUMAN_GUIDANCE_SOURCE};
pub use capability::{CapabilityInfo, CapabilityProvider};
pub use cycle::{BdiSession, CycleReport, SessionOptions};
pub use desire::{Desire, DesireId, DesireRegistry, DesireStatus};
pub use events::{
    BdiEvent, ChannelSink, EventRecord, EventSink, FanoutSink, MemorySink, RetireReason, TracingSink,
};
pub use executor::{StepExecutor, StepOutcome};
pub use hitl::{
    apply_directive, ApplyOutcome, GuidanceAction, GuidanceDirective, HitlFlow, HitlMediator,
    HitlState, HitlStep, HumanChannel, HumanPrompt, HumanReply, Resolution,
};
pub use intention::{Intention, Step, StepKind, StepStatus};
pub use planner::{PlanOutcome, Planner};
pub use reasoning::{OutputSchema, Reasoner, ReasoningPrompt};
pub use reconsider::{ReconsiderVerdict, Reconsiderer};
