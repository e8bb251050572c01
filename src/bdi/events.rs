//! 引擎事件：每次状态变更对应一条事件记录 `{type, timestamp, payload}`
//!
//! EventSink 只规定「发出」，不规定投递方式；ChannelSink 走 tokio mpsc，TracingSink 写日志，
//! MemorySink 供测试断言，FanoutSink 组合多个 Sink。

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bdi::belief::BeliefStore;
use crate::bdi::desire::DesireStatus;
use crate::bdi::hitl::HitlState;

/// 意图被移除的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    /// 所有步骤完成
    Completed,
    /// HITL 放弃或显式 reset
    Aborted,
    /// 重审判定计划失效
    Invalidated,
    /// 挂起超过上限，Desire 失败
    Failed,
    /// Desire 被删除
    Removed,
}

/// 引擎事件（payload 即各变体字段）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum BdiEvent {
    #[serde(rename = "cycle.started")]
    CycleStarted { cycle: u64 },
    #[serde(rename = "cycle.completed")]
    CycleCompleted {
        cycle: u64,
        steps_executed: usize,
        active_desires: usize,
        live_intentions: usize,
    },
    #[serde(rename = "desire.added")]
    DesireAdded {
        desire_id: String,
        text: String,
        priority: f64,
    },
    #[serde(rename = "desire.updated")]
    DesireUpdated {
        desire_id: String,
        from: DesireStatus,
        to: DesireStatus,
    },
    #[serde(rename = "desire.removed")]
    DesireRemoved { desire_id: String },
    #[serde(rename = "intention.created")]
    IntentionCreated {
        intention_id: String,
        desire_id: String,
        sub_goals: Vec<String>,
        steps: usize,
    },
    #[serde(rename = "intention.updated")]
    IntentionUpdated {
        intention_id: String,
        desire_id: String,
        change: String,
        cursor: usize,
        steps: usize,
    },
    #[serde(rename = "intention.retired")]
    IntentionRetired {
        intention_id: String,
        desire_id: String,
        reason: RetireReason,
    },
    #[serde(rename = "belief.updated")]
    BeliefUpdated {
        key: String,
        value: String,
        certainty: f64,
        source: String,
    },
    #[serde(rename = "step.completed")]
    StepCompleted {
        desire_id: String,
        intention_id: String,
        index: usize,
        description: String,
        output: String,
    },
    #[serde(rename = "step.failed")]
    StepFailed {
        desire_id: String,
        intention_id: String,
        index: usize,
        description: String,
        error: String,
    },
    #[serde(rename = "planning.skipped")]
    PlanningSkipped { desire_id: String, reason: String },
    #[serde(rename = "hitl.transition")]
    HitlTransition {
        desire_id: String,
        from: HitlState,
        to: HitlState,
    },
    #[serde(rename = "reconsideration.completed")]
    ReconsiderationCompleted {
        desire_id: String,
        intention_id: String,
        valid: bool,
        reason: Option<String>,
    },
    #[serde(rename = "error")]
    Error {
        kind: String,
        desire_id: Option<String>,
        message: String,
        recovery: String,
    },
}

impl BdiEvent {
    /// 事件类型名，与序列化后的 `type` 字段一致
    pub fn kind(&self) -> &'static str {
        match self {
            BdiEvent::CycleStarted { .. } => "cycle.started",
            BdiEvent::CycleCompleted { .. } => "cycle.completed",
            BdiEvent::DesireAdded { .. } => "desire.added",
            BdiEvent::DesireUpdated { .. } => "desire.updated",
            BdiEvent::DesireRemoved { .. } => "desire.removed",
            BdiEvent::IntentionCreated { .. } => "intention.created",
            BdiEvent::IntentionUpdated { .. } => "intention.updated",
            BdiEvent::IntentionRetired { .. } => "intention.retired",
            BdiEvent::BeliefUpdated { .. } => "belief.updated",
            BdiEvent::StepCompleted { .. } => "step.completed",
            BdiEvent::StepFailed { .. } => "step.failed",
            BdiEvent::PlanningSkipped { .. } => "planning.skipped",
            BdiEvent::HitlTransition { .. } => "hitl.transition",
            BdiEvent::ReconsiderationCompleted { .. } => "reconsideration.completed",
            BdiEvent::Error { .. } => "error",
        }
    }
}

/// 对外发布的事件记录
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    /// 原始事件，供进程内观察者匹配
    #[serde(skip)]
    pub event: BdiEvent,
}

impl EventRecord {
    pub fn new(event: BdiEvent) -> Self {
        let payload = serde_json::to_value(&event)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null);
        Self {
            kind: event.kind().to_string(),
            timestamp: Utc::now(),
            payload,
            event,
        }
    }
}

/// 事件出口
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);
}

/// 通过 mpsc 通道转发给宿主（UI / 传输层）
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EventRecord>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<EventRecord>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, record: EventRecord) {
        // 接收端已关闭时丢弃
        let _ = self.tx.send(record);
    }
}

/// 写入 tracing 日志
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, record: EventRecord) {
        match &record.event {
            BdiEvent::Error { .. } | BdiEvent::StepFailed { .. } => {
                tracing::warn!(event = %record.kind, payload = %record.payload, "bdi")
            }
            BdiEvent::BeliefUpdated { .. } | BdiEvent::HitlTransition { .. } => {
                tracing::debug!(event = %record.kind, payload = %record.payload, "bdi")
            }
            _ => tracing::info!(event = %record.kind, payload = %record.payload, "bdi"),
        }
    }
}

/// 内存收集，便于测试断言
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<RwLock<Vec<EventRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records().iter().filter(|r| r.kind == kind).count()
    }

    pub fn clear(&self) {
        if let Ok(mut r) = self.records.write() {
            r.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, record: EventRecord) {
        if let Ok(mut r) = self.records.write() {
            r.push(record);
        }
    }
}

/// 同一条记录分发给多个 Sink
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, record: EventRecord) {
        for sink in &self.sinks {
            sink.emit(record.clone());
        }
    }
}

/// 写入信念并发出 belief.updated
pub(crate) fn write_belief(
    beliefs: &mut BeliefStore,
    events: &dyn EventSink,
    key: &str,
    value: &str,
    certainty: f64,
    source: &str,
) {
    let belief = beliefs.upsert(key, value, certainty, source);
    events.emit(EventRecord::new(BdiEvent::BeliefUpdated {
        key: belief.key.clone(),
        value: belief.value.clone(),
        certainty: belief.certainty,
        source: belief.source.clone(),
    }));
}
