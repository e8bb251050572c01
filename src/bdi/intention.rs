//! 意图：为某个 Desire 承诺的有序步骤序列
//!
//! cursor 只增不减；插入 / 替换类变更都落在 cursor 及其之后，已执行的前缀保持不变。

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bdi::desire::DesireId;

/// 步骤类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// 调用外部能力（工具）
    CapabilityCall,
    /// 交给推理协作者自由执行的描述性步骤
    Narrative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    pub kind: StepKind,
    pub capability: Option<String>,
    pub params: Option<Value>,
    pub status: StepStatus,
}

impl Step {
    pub fn narrative(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            kind: StepKind::Narrative,
            capability: None,
            params: None,
            status: StepStatus::Pending,
        }
    }

    pub fn capability_call(
        description: impl Into<String>,
        capability: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            description: description.into(),
            kind: StepKind::CapabilityCall,
            capability: Some(capability.into()),
            params: Some(params),
            status: StepStatus::Pending,
        }
    }
}

/// 推理协作者输出的步骤定义（Stage 2 与 HITL 新步骤共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepSpec {
    /// 具体怎么做（HOW）
    pub description: String,
    /// 是否调用能力
    #[serde(default)]
    pub is_tool_call: bool,
    /// 能力名，is_tool_call 为 true 时必填
    #[serde(default)]
    pub tool_name: Option<String>,
    /// 能力参数
    #[serde(default)]
    pub tool_params: Option<Value>,
}

impl From<StepSpec> for Step {
    fn from(spec: StepSpec) -> Self {
        match (spec.is_tool_call, spec.tool_name) {
            (true, Some(name)) => Step {
                description: spec.description,
                kind: StepKind::CapabilityCall,
                capability: Some(name),
                params: Some(spec.tool_params.unwrap_or_else(|| Value::Object(Default::default()))),
                status: StepStatus::Pending,
            },
            _ => Step::narrative(spec.description),
        }
    }
}

/// 对当前步骤的部分修改（MODIFY_CURRENT）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepPatch {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_params: Option<Value>,
}

impl StepPatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.tool_name.is_none() && self.tool_params.is_none()
    }
}

/// 一次步骤执行记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub description: String,
    pub success: bool,
    pub output: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intention {
    pub id: String,
    pub desire_id: DesireId,
    /// 高层意图（WHAT）
    pub description: String,
    /// Stage 1 产出的子目标
    pub sub_goals: Vec<String>,
    pub steps: Vec<Step>,
    pub cursor: usize,
    pub history: Vec<StepRecord>,
    /// 步骤失败且无人介入时挂起，不再前进
    pub halted: bool,
    /// 连续挂起的轮数
    pub halted_cycles: u32,
    pub created_at: DateTime<Utc>,
}

impl Intention {
    pub fn new(
        desire_id: impl Into<DesireId>,
        description: impl Into<String>,
        sub_goals: Vec<String>,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            desire_id: desire_id.into(),
            description: description.into(),
            sub_goals,
            steps,
            cursor: 0,
            history: Vec::new(),
            halted: false,
            halted_cycles: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    /// 最近 n 条执行记录
    pub fn recent_history(&self, n: usize) -> &[StepRecord] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn record(&mut self, index: usize, description: &str, success: bool, output: &str) {
        self.history.push(StepRecord {
            index,
            description: description.to_string(),
            success,
            output: output.to_string(),
            at: Utc::now(),
        });
    }

    /// 当前步骤成功：标记 done 并前进
    pub fn advance(&mut self) {
        if let Some(step) = self.steps.get_mut(self.cursor) {
            step.status = StepStatus::Done;
            self.cursor += 1;
        }
    }

    pub fn mark_failed(&mut self) {
        if let Some(step) = self.steps.get_mut(self.cursor) {
            step.status = StepStatus::Failed;
        }
    }

    /// 跳过当前步骤：cursor 前进，但步骤状态保持原样（不会变为 done）
    pub fn skip_current(&mut self) -> bool {
        if self.cursor < self.steps.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// 合并修改到当前步骤并重置为 pending
    pub fn modify_current(&mut self, patch: &StepPatch) -> bool {
        let Some(step) = self.steps.get_mut(self.cursor) else {
            return false;
        };
        if let Some(description) = &patch.description {
            step.description = description.clone();
        }
        if let Some(name) = &patch.tool_name {
            step.capability = Some(name.clone());
            step.kind = StepKind::CapabilityCall;
        }
        if let Some(params) = &patch.tool_params {
            step.params = Some(params.clone());
        }
        step.status = StepStatus::Pending;
        true
    }

    /// 用新步骤替换 cursor 处的步骤
    pub fn replace_current(&mut self, steps: Vec<Step>) -> bool {
        if self.cursor >= self.steps.len() {
            return false;
        }
        self.steps.splice(self.cursor..=self.cursor, steps);
        true
    }

    /// 在当前步骤之前插入（新步骤成为下一个执行的步骤）
    pub fn insert_before(&mut self, steps: Vec<Step>) {
        let at = self.cursor.min(self.steps.len());
        self.steps.splice(at..at, steps);
    }

    /// 在当前步骤之后插入
    pub fn insert_after(&mut self, steps: Vec<Step>) {
        let at = (self.cursor + 1).min(self.steps.len());
        self.steps.splice(at..at, steps);
    }

    /// 丢弃 cursor 起的剩余步骤并接上新步骤
    pub fn replace_remainder(&mut self, steps: Vec<Step>) {
        self.steps.truncate(self.cursor);
        self.steps.extend(steps);
    }

    /// 供推理协作者阅读的剩余步骤列表（序号从 1 开始，与全局步骤号一致）
    pub fn remaining_prompt(&self) -> String {
        if self.is_complete() {
            return "(no remaining steps)".to_string();
        }
        self.steps
            .iter()
            .enumerate()
            .skip(self.cursor)
            .map(|(i, s)| match (&s.kind, &s.capability) {
                (StepKind::CapabilityCall, Some(name)) => format!(
                    "{}. {} [capability: {} {}]",
                    i + 1,
                    s.description,
                    name,
                    s.params.as_ref().map(|p| p.to_string()).unwrap_or_default()
                ),
                _ => format!("{}. {}", i + 1, s.description),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 最近执行记录的文字版本
    pub fn history_prompt(&self, n: usize) -> String {
        let recent = self.recent_history(n);
        if recent.is_empty() {
            return "(no steps executed yet)".to_string();
        }
        recent
            .iter()
            .map(|r| {
                format!(
                    "- Step {} [{}] {}: {}",
                    r.index + 1,
                    if r.success { "ok" } else { "failed" },
                    r.description,
                    r.output
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_steps() -> Intention {
        Intention::new(
            "desire_1",
            "ship it",
            vec!["build".into()],
            vec![
                Step::narrative("a"),
                Step::capability_call("b", "echo", json!({"text": "b"})),
                Step::narrative("c"),
            ],
        )
    }

    #[test]
    fn test_advance_and_complete() {
        let mut i = three_steps();
        i.advance();
        i.advance();
        assert_eq!(i.cursor, 2);
        assert_eq!(i.steps[0].status, StepStatus::Done);
        i.advance();
        assert!(i.is_complete());
        // 完成后继续 advance 不会越界
        i.advance();
        assert_eq!(i.cursor, 3);
    }

    #[test]
    fn test_skip_keeps_status() {
        let mut i = three_steps();
        i.mark_failed();
        assert!(i.skip_current());
        assert_eq!(i.cursor, 1);
        assert_eq!(i.steps[0].status, StepStatus::Failed);
    }

    #[test]
    fn test_insert_and_replace_keep_cursor() {
        let mut i = three_steps();
        i.advance();
        i.insert_before(vec![Step::narrative("x")]);
        assert_eq!(i.cursor, 1);
        assert_eq!(i.current_step().unwrap().description, "x");
        i.insert_after(vec![Step::narrative("y")]);
        assert_eq!(i.steps[2].description, "y");
        i.replace_current(vec![Step::narrative("z1"), Step::narrative("z2")]);
        let names: Vec<_> = i.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(names, vec!["a", "z1", "z2", "y", "b", "c"]);
        assert_eq!(i.cursor, 1);
    }

    #[test]
    fn test_replace_remainder() {
        let mut i = three_steps();
        i.advance();
        i.replace_remainder(vec![Step::narrative("only")]);
        assert_eq!(i.steps.len(), 2);
        assert_eq!(i.cursor, 1);
        assert_eq!(i.current_step().unwrap().description, "only");
    }

    #[test]
    fn test_modify_current() {
        let mut i = three_steps();
        i.mark_failed();
        let patch = StepPatch {
            description: Some("read config".into()),
            tool_name: Some("read_file".into()),
            tool_params: Some(json!({"path": "a.toml"})),
        };
        assert!(i.modify_current(&patch));
        let step = i.current_step().unwrap();
        assert_eq!(step.kind, StepKind::CapabilityCall);
        assert_eq!(step.capability.as_deref(), Some("read_file"));
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn test_step_spec_conversion() {
        let tool: Step = StepSpec {
            description: "list".into(),
            is_tool_call: true,
            tool_name: Some("list_dir".into()),
            tool_params: None,
        }
        .into();
        assert_eq!(tool.kind, StepKind::CapabilityCall);
        assert_eq!(tool.params, Some(json!({})));

        // 声称调用工具但没给名字：退化为叙述型步骤
        let odd: Step = StepSpec {
            description: "think".into(),
            is_tool_call: true,
            tool_name: None,
            tool_params: None,
        }
        .into();
        assert_eq!(odd.kind, StepKind::Narrative);
    }

    #[test]
    fn test_recent_history_window() {
        let mut i = three_steps();
        for n in 0..7 {
            i.record(0, "a", n % 2 == 0, "out");
        }
        assert_eq!(i.recent_history(5).len(), 5);
        assert_eq!(i.recent_history(50).len(), 7);
    }
}
