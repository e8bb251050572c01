//! 基于 LlmClient 的推理协作者
//!
//! system 消息 = 说明 + `Schema: <name>` + JSON Schema；user 消息 = 上下文。
//! 回复中提取 JSON（```json 代码块或首个 { 到末个 }），校验失败时把原回复与错误一起回传，最多修复 repair_attempts 次。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::bdi::reasoning::{OutputSchema, Reasoner, ReasoningPrompt};
use crate::core::AgentError;
use crate::llm::{LlmClient, Message};

pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
    repair_attempts: u32,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LlmClient>, repair_attempts: u32) -> Self {
        Self {
            llm,
            repair_attempts,
        }
    }

    fn system_message(prompt: &ReasoningPrompt, schema: &OutputSchema) -> Message {
        Message::system(format!(
            "{}\n\nRespond with a single JSON object and nothing else.\nSchema: {}\n```json\n{}\n```",
            prompt.instructions,
            schema.name,
            schema.schema_pretty()
        ))
    }
}

/// 从 LLM 输出中提取 JSON 片段
pub fn extract_json(output: &str) -> &str {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn parse_checked(output: &str, schema: &OutputSchema) -> Result<Value, String> {
    let json = extract_json(output);
    let value: Value = serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;
    schema.validate(&value)?;
    Ok(value)
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn propose(
        &self,
        prompt: &ReasoningPrompt,
        schema: &OutputSchema,
    ) -> Result<Value, AgentError> {
        let mut messages = vec![
            Self::system_message(prompt, schema),
            Message::user(prompt.context.clone()),
        ];
        tracing::debug!(schema = schema.name, context = %prompt.context, "Reasoning request");

        let mut last_error = String::new();
        for attempt in 0..=self.repair_attempts {
            let output = self
                .llm
                .complete(&messages)
                .await
                .map_err(AgentError::LlmError)?;
            match parse_checked(&output, schema) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(schema = schema.name, attempt, error = %e, "Structured output rejected");
                    messages.push(Message::assistant(output));
                    messages.push(Message::user(format!(
                        "Your answer was rejected: {e}\nReturn only a corrected JSON object matching the schema."
                    )));
                    last_error = e;
                }
            }
        }
        Err(AgentError::Schema {
            schema: schema.name.to_string(),
            detail: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdi::reconsider::ReconsiderVerdict;
    use crate::llm::MockLlmClient;

    fn verdict_schema() -> OutputSchema {
        OutputSchema::of::<ReconsiderVerdict>("reconsider_verdict")
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("Sure! {\"a\":1} hope that helps"), "{\"a\":1}");
        assert_eq!(extract_json("plain"), "plain");
    }

    #[tokio::test]
    async fn test_repairs_once_then_succeeds() {
        let llm = Arc::new(MockLlmClient::with_responses([
            "I think it is fine",
            "```json\n{\"valid\": false, \"reason\": \"stale\"}\n```",
        ]));
        let reasoner = LlmReasoner::new(llm.clone(), 1);
        let value = reasoner
            .propose(&ReasoningPrompt::new("judge", "ctx"), &verdict_schema())
            .await
            .unwrap();
        assert_eq!(value["valid"], false);
        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        // 修复请求带上了上一次的回复
        assert_eq!(calls[1].len(), 4);
        assert!(calls[0][0].content.contains("Schema: reconsider_verdict"));
    }

    #[tokio::test]
    async fn test_schema_error_after_repairs() {
        let llm = Arc::new(MockLlmClient::with_responses(["{\"valid\": \"maybe\"}", "nope"]));
        let err = LlmReasoner::new(llm, 1)
            .propose(&ReasoningPrompt::new("judge", "ctx"), &verdict_schema())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Schema { ref schema, .. } if schema == "reconsider_verdict"));
    }
}
