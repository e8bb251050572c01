//! 能力提供方接口：invoke(name, params) 与只读目录 list_actions()

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

/// 能力目录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
}

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// 调用能力；超时与重试由实现方负责，耗尽后返回 ToolInvocation
    async fn invoke(&self, name: &str, params: Value) -> Result<String, AgentError>;

    /// 可用能力目录
    fn list_actions(&self) -> Vec<CapabilityInfo>;
}

/// 目录的 prompt 文本
pub fn catalog_prompt(actions: &[CapabilityInfo]) -> String {
    if actions.is_empty() {
        return "No capabilities available; use narrative steps only.".to_string();
    }
    actions
        .iter()
        .map(|a| format!("- {}: {}\n  parameters: {}", a.name, a.description, a.parameters))
        .collect::<Vec<_>>()
        .join("\n")
}
