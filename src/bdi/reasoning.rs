//! 推理协作者接口：propose(上下文, 期望结构) → 结构化结果 | SchemaError
//!
//! 引擎只负责拼上下文和校验结构；真正的生成交给实现方（LlmReasoner / ScriptedReasoner）。

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::AgentError;

/// 一次推理请求：说明 + 上下文
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningPrompt {
    /// 做什么（system 侧）
    pub instructions: String,
    /// 信念、目标、步骤等上下文（user 侧）
    pub context: String,
}

impl ReasoningPrompt {
    pub fn new(instructions: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            context: context.into(),
        }
    }

    /// 附加一段修复提示（上一次输出不合法时）
    pub fn with_repair_note(&self, error: &str) -> Self {
        Self {
            instructions: self.instructions.clone(),
            context: format!(
                "{}\n\n## Previous attempt was rejected\n{}\nReturn a corrected answer.",
                self.context, error
            ),
        }
    }
}

/// 期望输出结构：名称 + JSON Schema + 校验函数
#[derive(Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: Value,
    validator: fn(&Value) -> Result<(), String>,
}

impl OutputSchema {
    /// 从 Rust 类型生成（schemars 出 schema，serde 反序列化做校验）
    pub fn of<T: JsonSchema + DeserializeOwned>(name: &'static str) -> Self {
        Self {
            name,
            schema: serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null),
            validator: validate_as::<T>,
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), String> {
        (self.validator)(value)
    }

    pub fn schema_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.schema).unwrap_or_default()
    }
}

impl std::fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSchema").field("name", &self.name).finish()
    }
}

fn validate_as<T: DeserializeOwned>(value: &Value) -> Result<(), String> {
    serde_json::from_value::<T>(value.clone())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// 推理协作者
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// 返回已通过 schema 校验的 JSON；实现方须至少支持一次结构修复重试
    async fn propose(
        &self,
        prompt: &ReasoningPrompt,
        schema: &OutputSchema,
    ) -> Result<Value, AgentError>;
}

/// propose 后直接反序列化为目标类型
pub async fn propose_as<T>(
    reasoner: &dyn Reasoner,
    prompt: &ReasoningPrompt,
    name: &'static str,
) -> Result<T, AgentError>
where
    T: JsonSchema + DeserializeOwned,
{
    let schema = OutputSchema::of::<T>(name);
    let value = reasoner.propose(prompt, &schema).await?;
    serde_json::from_value(value).map_err(|e| AgentError::Schema {
        schema: name.to_string(),
        detail: e.to_string(),
    })
}
