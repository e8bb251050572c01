//! 脚本化协作者（测试与离线运行用，无需 API）
//!
//! - ScriptedReasoner：按 schema 名排队返回 JSON，可为某个 schema 设置兜底回复
//! - ScriptedProvider：按能力名排队返回结果，默认成功
//! - ScriptedHuman：按顺序给出人类回复，用完即 Quit

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::bdi::capability::{CapabilityInfo, CapabilityProvider};
use crate::bdi::hitl::{HumanChannel, HumanPrompt, HumanReply};
use crate::bdi::reasoning::{OutputSchema, Reasoner, ReasoningPrompt};
use crate::core::AgentError;

/// 按 schema 名排队的推理协作者；不做内部修复，不合法的回复直接返回 Schema 错误
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    queues: RwLock<HashMap<String, VecDeque<Value>>>,
    fallbacks: RwLock<HashMap<String, Value>>,
    calls: RwLock<Vec<(String, ReasoningPrompt)>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条回复
    pub fn push(&self, schema: &str, value: Value) {
        if let Ok(mut q) = self.queues.write() {
            q.entry(schema.to_string()).or_default().push_back(value);
        }
    }

    /// 队列为空时使用的回复
    pub fn set_fallback(&self, schema: &str, value: Value) {
        if let Ok(mut f) = self.fallbacks.write() {
            f.insert(schema.to_string(), value);
        }
    }

    /// 已收到的请求：(schema 名, prompt)
    pub fn calls(&self) -> Vec<(String, ReasoningPrompt)> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, schema: &str) -> usize {
        self.calls().iter().filter(|(name, _)| name == schema).count()
    }

    fn next(&self, schema: &str) -> Option<Value> {
        let queued = self
            .queues
            .write()
            .ok()
            .and_then(|mut q| q.get_mut(schema).and_then(|queue| queue.pop_front()));
        queued.or_else(|| {
            self.fallbacks
                .read()
                .ok()
                .and_then(|f| f.get(schema).cloned())
        })
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn propose(
        &self,
        prompt: &ReasoningPrompt,
        schema: &OutputSchema,
    ) -> Result<Value, AgentError> {
        if let Ok(mut c) = self.calls.write() {
            c.push((schema.name.to_string(), prompt.clone()));
        }
        let value = self.next(schema.name).ok_or_else(|| AgentError::Schema {
            schema: schema.name.to_string(),
            detail: "no scripted response".to_string(),
        })?;
        schema.validate(&value).map_err(|detail| AgentError::Schema {
            schema: schema.name.to_string(),
            detail,
        })?;
        Ok(value)
    }
}

/// 脚本化能力提供方
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    actions: Vec<CapabilityInfo>,
    results: RwLock<HashMap<String, VecDeque<Result<String, String>>>>,
    invocations: RwLock<Vec<(String, Value)>>,
}

impl ScriptedProvider {
    pub fn with_actions(names: &[&str]) -> Self {
        Self {
            actions: names
                .iter()
                .map(|n| CapabilityInfo {
                    name: n.to_string(),
                    description: format!("scripted capability {n}"),
                    parameters: serde_json::json!({"type": "object"}),
                })
                .collect(),
            ..Default::default()
        }
    }

    /// 为某能力排入一次结果；未排入时默认返回 "ok"
    pub fn push(&self, name: &str, result: Result<&str, &str>) {
        if let Ok(mut r) = self.results.write() {
            r.entry(name.to_string())
                .or_default()
                .push_back(result.map(str::to_string).map_err(str::to_string));
        }
    }

    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.read().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CapabilityProvider for ScriptedProvider {
    async fn invoke(&self, name: &str, params: Value) -> Result<String, AgentError> {
        if let Ok(mut i) = self.invocations.write() {
            i.push((name.to_string(), params));
        }
        let next = self
            .results
            .write()
            .ok()
            .and_then(|mut r| r.get_mut(name).and_then(|q| q.pop_front()));
        match next {
            Some(Ok(out)) => Ok(out),
            Some(Err(cause)) => Err(AgentError::ToolInvocation {
                capability: name.to_string(),
                cause,
            }),
            None => Ok("ok".to_string()),
        }
    }

    fn list_actions(&self) -> Vec<CapabilityInfo> {
        self.actions.clone()
    }
}

/// 脚本化人类
#[derive(Debug, Default)]
pub struct ScriptedHuman {
    replies: RwLock<VecDeque<HumanReply>>,
    presented: RwLock<Vec<HumanPrompt>>,
}

impl ScriptedHuman {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RwLock::new(replies.into_iter().map(|s| HumanReply::Text(s.into())).collect()),
            presented: RwLock::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: HumanReply) {
        if let Ok(mut r) = self.replies.write() {
            r.push_back(reply);
        }
    }

    pub fn presented(&self) -> Vec<HumanPrompt> {
        self.presented.read().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HumanChannel for ScriptedHuman {
    async fn present(&self, prompt: &HumanPrompt) {
        if let Ok(mut p) = self.presented.write() {
            p.push(prompt.clone());
        }
    }

    async fn await_text(&self) -> HumanReply {
        self.replies
            .write()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or(HumanReply::Quit)
    }
}
