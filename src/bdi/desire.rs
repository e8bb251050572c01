//! 愿望注册表：有序目标集合，带优先级与状态
//!
//! 状态图严格为 pending → in_progress → {satisfied, failed}；
//! {in_progress, failed} → pending 只能经由显式的 abort / reset，不允许静默回退。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

pub type DesireId = String;

/// Desire 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesireStatus {
    Pending,
    InProgress,
    Satisfied,
    Failed,
}

impl DesireStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesireStatus::Pending => "pending",
            DesireStatus::InProgress => "in_progress",
            DesireStatus::Satisfied => "satisfied",
            DesireStatus::Failed => "failed",
        }
    }

    /// 仍需要规划或执行的状态
    pub fn is_active(&self) -> bool {
        matches!(self, DesireStatus::Pending | DesireStatus::InProgress)
    }

    /// 前向迁移（不含 reset）
    fn can_advance_to(&self, to: DesireStatus) -> bool {
        matches!(
            (self, to),
            (DesireStatus::Pending, DesireStatus::InProgress)
                | (DesireStatus::InProgress, DesireStatus::Satisfied)
                | (DesireStatus::InProgress, DesireStatus::Failed)
        )
    }

    /// 显式 reset 允许的来源状态
    fn can_reset(&self) -> bool {
        matches!(self, DesireStatus::InProgress | DesireStatus::Failed)
    }
}

impl fmt::Display for DesireStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Desire {
    pub id: DesireId,
    pub text: String,
    pub priority: f64,
    pub status: DesireStatus,
    pub created_at: DateTime<Utc>,
    /// 进入 satisfied 的时间
    pub satisfied_at: Option<DateTime<Utc>>,
}

/// 一次状态迁移（供事件载荷使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DesireStatus,
    pub to: DesireStatus,
}

/// 愿望注册表：按插入顺序保存，任意时刻可插入 / 删除
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesireRegistry {
    desires: Vec<Desire>,
    next_index: usize,
}

impl DesireRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从目标文本批量创建（优先级 0.5，id 为 desire_1..n）
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for text in texts {
            registry.add(text, 0.5);
        }
        registry
    }

    /// 插入新目标，返回分配的 id
    pub fn add(&mut self, text: impl Into<String>, priority: f64) -> DesireId {
        self.next_index += 1;
        let id = format!("desire_{}", self.next_index);
        self.desires.push(Desire {
            id: id.clone(),
            text: text.into(),
            priority,
            status: DesireStatus::Pending,
            created_at: Utc::now(),
            satisfied_at: None,
        });
        id
    }

    pub fn remove(&mut self, id: &str) -> Result<Desire, AgentError> {
        let idx = self
            .desires
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| AgentError::UnknownDesire(id.to_string()))?;
        Ok(self.desires.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<&Desire> {
        self.desires.iter().find(|d| d.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Desire> {
        self.desires.iter()
    }

    pub fn len(&self) -> usize {
        self.desires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desires.is_empty()
    }

    /// pending / in_progress 的目标 id，按优先级降序（同优先级保持插入顺序）
    pub fn active_by_priority(&self) -> Vec<DesireId> {
        let mut active: Vec<&Desire> = self.desires.iter().filter(|d| d.status.is_active()).collect();
        active.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        active.into_iter().map(|d| d.id.clone()).collect()
    }

    /// 所有目标都已 satisfied 或 failed
    pub fn all_settled(&self) -> bool {
        self.desires.iter().all(|d| !d.status.is_active())
    }

    /// pending → in_progress
    pub fn activate(&mut self, id: &str) -> Result<Transition, AgentError> {
        self.advance(id, DesireStatus::InProgress)
    }

    /// in_progress → satisfied
    pub fn satisfy(&mut self, id: &str) -> Result<Transition, AgentError> {
        self.advance(id, DesireStatus::Satisfied)
    }

    /// in_progress → failed
    pub fn fail(&mut self, id: &str) -> Result<Transition, AgentError> {
        self.advance(id, DesireStatus::Failed)
    }

    /// {in_progress, failed} → pending；唯一的回退路径
    pub fn reset(&mut self, id: &str) -> Result<Transition, AgentError> {
        let desire = self.find_mut(id)?;
        let from = desire.status;
        if !from.can_reset() {
            return Err(invalid(id, from, DesireStatus::Pending));
        }
        desire.status = DesireStatus::Pending;
        desire.satisfied_at = None;
        Ok(Transition {
            from,
            to: DesireStatus::Pending,
        })
    }

    fn advance(&mut self, id: &str, to: DesireStatus) -> Result<Transition, AgentError> {
        let desire = self.find_mut(id)?;
        let from = desire.status;
        if !from.can_advance_to(to) {
            return Err(invalid(id, from, to));
        }
        desire.status = to;
        if to == DesireStatus::Satisfied {
            desire.satisfied_at = Some(Utc::now());
        }
        Ok(Transition { from, to })
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Desire, AgentError> {
        self.desires
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| AgentError::UnknownDesire(id.to_string()))
    }
}

fn invalid(id: &str, from: DesireStatus, to: DesireStatus) -> AgentError {
    AgentError::InvalidTransition {
        desire_id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    }
}
