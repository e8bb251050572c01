//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 KeepPending / HaltStep / FallbackNoAction / AssumeValid / Abort。
//! 除 Abort 外，所有错误都不会终止会话。

use thiserror::Error;

/// BDI 循环中可能出现的错误（规划、工具、人类指导解析、计划重审、协作者结构化输出等）
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// 结构化计划输出在修复重试后仍不可用；Desire 保持 pending
    #[error("Plan generation failed for desire '{desire_id}': {reason}")]
    PlanGeneration { desire_id: String, reason: String },

    /// 能力调用耗尽重试预算
    #[error("Tool '{capability}' failed: {cause}")]
    ToolInvocation { capability: String, cause: String },

    /// 叙述型步骤由推理协作者判定为未完成
    #[error("Step '{step}' did not succeed: {cause}")]
    StepExecution { step: String, cause: String },

    /// 人类指导无法归类为固定动作
    #[error("Guidance interpretation failed: {0}")]
    GuidanceInterpretation(String),

    /// 计划有效性判断输出格式错误
    #[error("Reconsideration failed: {0}")]
    Reconsideration(String),

    /// 推理协作者返回的结构与期望 schema 不符（已用尽修复次数）
    #[error("Schema mismatch for '{schema}': {detail}")]
    Schema { schema: String, detail: String },

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Unknown desire: {0}")]
    UnknownDesire(String),

    /// Desire 状态迁移不在合法状态图内（属于宿主级故障）
    #[error("Invalid status transition for desire '{desire_id}': {from} -> {to}")]
    InvalidTransition {
        desire_id: String,
        from: String,
        to: String,
    },

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 错误类别短名，用于信念键与事件载荷（error.<kind>.<desire_id>）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::PlanGeneration { .. } => "plan_generation",
            AgentError::ToolInvocation { .. } => "tool_invocation",
            AgentError::StepExecution { .. } => "step_execution",
            AgentError::GuidanceInterpretation(_) => "guidance_interpretation",
            AgentError::Reconsideration(_) => "reconsideration",
            AgentError::Schema { .. } => "schema",
            AgentError::LlmError(_) => "llm",
            AgentError::UnknownDesire(_) => "unknown_desire",
            AgentError::InvalidTransition { .. } => "invalid_transition",
            AgentError::ConfigError(_) => "config",
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 不推进 Desire，下一轮重新规划
    KeepPending,
    /// 当前步骤标记失败，交给 HITL 或挂起
    HaltStep,
    /// 退回到最安全的无操作（COMMENT_NO_ACTION）
    FallbackNoAction,
    /// 视为计划仍然有效
    AssumeValid,
    /// 宿主级故障，终止本轮循环
    Abort,
}
