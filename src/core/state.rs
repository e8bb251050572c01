//! 状态定义：SessionSnapshot（可持久化的完整状态）与 SessionStatus 投影
//!
//! 宿主只持有轻量的 SessionStatus（阶段、各 Desire 状态、错误）；完整状态由会话维护并投影出来。

use serde::{Deserialize, Serialize};

use crate::bdi::belief::BeliefStore;
use crate::bdi::desire::{DesireRegistry, DesireStatus};
use crate::bdi::intention::Intention;

/// snapshotState() 的产物：{beliefs, desires, intentions}
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub cycle: u64,
    pub beliefs: BeliefStore,
    pub desires: DesireRegistry,
    pub intentions: Vec<Intention>,
}

/// 宿主看到的「投影」状态，轻量且易于渲染
#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub cycle: u64,
    pub desires: Vec<DesireView>,
    pub live_intentions: usize,
    pub beliefs: usize,
    pub error_message: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            cycle: 0,
            desires: Vec::new(),
            live_intentions: 0,
            beliefs: 0,
            error_message: None,
        }
    }
}

/// 会话阶段（宿主投影用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Running,
    /// 所有 Desire 已满足或失败
    Settled,
    Stopped,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DesireView {
    pub id: String,
    pub text: String,
    pub priority: f64,
    pub status: DesireStatus,
    /// 活动意图的进度 (cursor, len)
    pub progress: Option<(usize, usize)>,
}

impl SessionSnapshot {
    /// 将完整快照与阶段/错误合并，得到宿主可渲染的 SessionStatus
    pub fn project(&self, phase: SessionPhase, error_message: Option<String>) -> SessionStatus {
        let desires = self
            .desires
            .iter()
            .map(|d| DesireView {
                id: d.id.clone(),
                text: d.text.clone(),
                priority: d.priority,
                status: d.status,
                progress: self
                    .intentions
                    .iter()
                    .find(|i| i.desire_id == d.id)
                    .map(|i| (i.cursor, i.steps.len())),
            })
            .collect();
        SessionStatus {
            phase,
            cycle: self.cycle,
            desires,
            live_intentions: self.intentions.len(),
            beliefs: self.beliefs.len(),
            error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdi::intention::Step;

    #[test]
    fn test_project_reports_progress() {
        let mut desires = DesireRegistry::new();
        let id = desires.add("write report", 0.5);
        desires.add("idle goal", 0.1);
        let mut intention = Intention::new(
            id.clone(),
            "write report",
            vec![],
            vec![Step::narrative("draft"), Step::narrative("polish")],
        );
        intention.advance();
        let snapshot = SessionSnapshot {
            cycle: 2,
            beliefs: BeliefStore::new(),
            desires,
            intentions: vec![intention],
        };
        let status = snapshot.project(SessionPhase::Running, None);
        assert_eq!(status.cycle, 2);
        assert_eq!(status.live_intentions, 1);
        assert_eq!(status.desires[0].progress, Some((1, 2)));
        assert_eq!(status.desires[1].progress, None);
    }
}
