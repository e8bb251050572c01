//! 信念库：key → 事实，带来源与确定度
//!
//! 写入已存在的 key 会覆盖 value / certainty / source / observed_at。信念库归会话独占，外部不能直接修改。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 人类在 HITL 中提供的信息统一使用的来源
pub const HUMAN_GUIDANCE_SOURCE: &str = "human_guidance";

/// 单条信念
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub key: String,
    pub value: String,
    /// 确定度，取值 [0, 1]
    pub certainty: f64,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

/// 信念库（按 key 有序，便于稳定地拼 prompt）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeliefStore {
    beliefs: BTreeMap<String, Belief>,
}

impl BeliefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增或覆盖信念；certainty 会被钳制到 [0, 1]，NaN 视为 0
    pub fn upsert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        certainty: f64,
        source: impl Into<String>,
    ) -> &Belief {
        let key = key.into();
        let certainty = if certainty.is_nan() {
            0.0
        } else {
            certainty.clamp(0.0, 1.0)
        };
        let belief = Belief {
            key: key.clone(),
            value: value.into(),
            certainty,
            source: source.into(),
            observed_at: Utc::now(),
        };
        self.beliefs.insert(key.clone(), belief);
        &self.beliefs[&key]
    }

    pub fn get(&self, key: &str) -> Option<&Belief> {
        self.beliefs.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Belief> {
        self.beliefs.values()
    }

    pub fn len(&self) -> usize {
        self.beliefs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beliefs.is_empty()
    }

    /// 按 key 前缀查找，如 `error.` 取出所有错误记录
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Belief> + 'a {
        self.beliefs
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(_, b)| b)
    }

    /// 构建供推理协作者使用的 Prompt 片段
    pub fn to_prompt_section(&self) -> String {
        if self.beliefs.is_empty() {
            return "No beliefs recorded yet.".to_string();
        }
        self.beliefs
            .values()
            .map(|b| {
                format!(
                    "- {}: {} (Source: {}, Certainty: {:.2})",
                    b.key, b.value, b.source, b.certainty
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_overwrites() {
        let mut store = BeliefStore::new();
        store.upsert("repo_path", "/tmp/a", 0.5, "step 1");
        store.upsert("repo_path", "/tmp/b", 0.9, "step 2");
        assert_eq!(store.len(), 1);
        let b = store.get("repo_path").unwrap();
        assert_eq!(b.value, "/tmp/b");
        assert_eq!(b.source, "step 2");
        assert!((b.certainty - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_certainty_clamped() {
        let mut store = BeliefStore::new();
        assert_eq!(store.upsert("a", "x", 1.7, "s").certainty, 1.0);
        assert_eq!(store.upsert("b", "x", -0.2, "s").certainty, 0.0);
        assert_eq!(store.upsert("c", "x", f64::NAN, "s").certainty, 0.0);
    }

    #[test]
    fn test_prefix_lookup() {
        let mut store = BeliefStore::new();
        store.upsert("error.tool_invocation.desire_1", "boom", 1.0, "executor");
        store.upsert("error.reconsideration.desire_2", "bad", 1.0, "reconsider");
        store.upsert("file_exists", "true", 0.8, "step");
        assert_eq!(store.with_prefix("error.").count(), 2);
        assert_eq!(store.with_prefix("file").count(), 1);
    }

    #[test]
    fn test_prompt_section() {
        let mut store = BeliefStore::new();
        assert_eq!(store.to_prompt_section(), "No beliefs recorded yet.");
        store.upsert("network", "offline", 0.75, "ping");
        let section = store.to_prompt_section();
        assert!(section.contains("network: offline"));
        assert!(section.contains("0.75"));
    }
}
