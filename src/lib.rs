//! BDI - Rust BDI 智能体推理引擎
//!
//! 模块划分：
//! - **bdi**: 信念 / 愿望 / 意图、两阶段规划、单步执行、人在回路、计划重审与主循环
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态投影、会话监管、会话构建、宿主运行器
//! - **human**: 控制台人类通道
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）及推理协作者
//! - **memory**: 会话快照持久化
//! - **tools**: 能力提供方（echo、文件系统、shell）与执行器

pub mod bdi;
pub mod config;
pub mod core;
pub mod human;
pub mod llm;
pub mod memory;
pub mod tools;

pub use crate::bdi::{BdiSession, SessionOptions};
pub use crate::core::AgentError;
