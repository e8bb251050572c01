//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 BDI 循环决定是保持 pending、挂起步骤、退回无操作、视为有效还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::PlanGeneration { .. } => RecoveryAction::KeepPending,
            AgentError::ToolInvocation { .. } | AgentError::StepExecution { .. } => {
                RecoveryAction::HaltStep
            }
            AgentError::GuidanceInterpretation(_) => RecoveryAction::FallbackNoAction,
            AgentError::Reconsideration(_) => RecoveryAction::AssumeValid,
            // 协作者层面的失败按发生阶段处理，调用方已将其包装为上面的具体类别；
            // 直接冒出来的 Schema / LLM 错误一律保守对待
            AgentError::Schema { .. } | AgentError::LlmError(_) => RecoveryAction::KeepPending,
            AgentError::UnknownDesire(_)
            | AgentError::InvalidTransition { .. }
            | AgentError::ConfigError(_) => RecoveryAction::Abort,
        }
    }

    /// 是否为会话级致命错误
    pub fn is_fatal(&self, err: &AgentError) -> bool {
        self.handle(err) == RecoveryAction::Abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_plan_generation() {
        let engine = RecoveryEngine::new();
        let err = AgentError::PlanGeneration {
            desire_id: "desire_1".to_string(),
            reason: "empty steps".to_string(),
        };
        assert_eq!(engine.handle(&err), RecoveryAction::KeepPending);
        assert!(!engine.is_fatal(&err));
    }

    #[test]
    fn test_recovery_tool_invocation() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ToolInvocation {
            capability: "read_file".to_string(),
            cause: "timeout".to_string(),
        };
        assert_eq!(engine.handle(&err), RecoveryAction::HaltStep);
    }

    #[test]
    fn test_recovery_guidance() {
        let engine = RecoveryEngine::new();
        let err = AgentError::GuidanceInterpretation("unparseable".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::FallbackNoAction);
    }

    #[test]
    fn test_recovery_reconsideration_assumes_valid() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Reconsideration("bad json".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::AssumeValid);
    }

    #[test]
    fn test_recovery_invalid_transition_is_fatal() {
        let engine = RecoveryEngine::new();
        let err = AgentError::InvalidTransition {
            desire_id: "d".to_string(),
            from: "satisfied".to_string(),
            to: "in_progress".to_string(),
        };
        assert!(engine.is_fatal(&err));
    }

    #[test]
    fn test_error_kind() {
        let err = AgentError::ToolInvocation {
            capability: "shell".to_string(),
            cause: "exit 1".to_string(),
        };
        assert_eq!(err.kind(), "tool_invocation");
        assert!(err.to_string().contains("shell"));
    }
}
