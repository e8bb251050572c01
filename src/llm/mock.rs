//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 读取 system 消息中的 `Schema: <name>` 标记，按期望结构给出一份合理的 JSON；
//! 也可以用 with_responses 预置回复，按顺序消费，用完后回到默认回答。

use std::collections::VecDeque;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    scripted: RwLock<VecDeque<String>>,
    calls: RwLock<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置回复（原样返回）
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripted: RwLock::new(responses.into_iter().map(Into::into).collect()),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// 已收到的请求
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }
}

/// 从 system 消息取 schema 名
fn schema_marker(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .filter(|m| m.role == Role::System)
        .flat_map(|m| m.content.lines())
        .find_map(|line| line.trim().strip_prefix("Schema: "))
        .map(str::trim)
}

fn default_answer(schema: Option<&str>) -> String {
    match schema {
        Some("sub_goals") => r#"{"sub_goals": ["Work towards the goal"]}"#,
        Some("steps") => {
            r#"{"steps": [{"description": "Describe the outcome for this sub-goal", "is_tool_call": false}]}"#
        }
        Some("narrative_outcome") => r#"{"output": "Mock result", "success": true}"#,
        Some("belief_extraction") => r#"{"beliefs": [], "explanation": "nothing new"}"#,
        Some("reconsider_verdict") => r#"{"valid": true}"#,
        Some("guidance_directive") => {
            r#"{"action": "RETRY_AS_IS", "belief_updates": [], "summary": "Retry the failed step"}"#
        }
        _ => "{}",
    }
    .to_string()
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut c) = self.calls.write() {
            c.push(messages.to_vec());
        }
        let scripted = self.scripted.write().ok().and_then(|mut q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| default_answer(schema_marker(messages))))
    }
}
