//! BDI 主循环：一次 run_cycle 按优先级遍历活动 Desire，每个 Desire 最多前进一步
//!
//! 每个 Desire 依次经过：规划（无活动意图时）→ 执行一步 →（失败时）HITL 或挂起 → 重审。
//! 会话独占 Belief / Desire / Intention，单任务顺序访问，不需要锁；停止信号只在两轮之间检查。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bdi::belief::BeliefStore;
use crate::bdi::capability::CapabilityProvider;
use crate::bdi::desire::{Desire, DesireId, DesireRegistry, DesireStatus, Transition};
use crate::bdi::events::{write_belief, BdiEvent, EventRecord, EventSink, RetireReason};
use crate::bdi::executor::{StepExecutor, StepOutcome};
use crate::bdi::hitl::{apply_directive, ApplyOutcome, HitlMediator, HumanChannel, Resolution};
use crate::bdi::intention::Intention;
use crate::bdi::planner::{PlanOutcome, Planner};
use crate::bdi::reasoning::Reasoner;
use crate::bdi::reconsider::Reconsiderer;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, SessionSnapshot, SessionSupervisor};

/// 会话参数（通常来自 [agent] / [reasoning] 配置）
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub enable_hitl: bool,
    /// 挂起意图存活多少轮后判定 Desire 失败；0 表示不自动失败
    pub halted_cycle_limit: u32,
    pub extract_beliefs: bool,
    pub history_window: usize,
    /// 传给 Stage 1 的策略指导
    pub guidance: Vec<String>,
    /// 规划输出语义校验失败（如未知能力）后的重试次数；结构修复由推理协作者负责
    pub plan_retries: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            enable_hitl: false,
            halted_cycle_limit: 3,
            extract_beliefs: true,
            history_window: 5,
            guidance: Vec::new(),
            plan_retries: 1,
        }
    }
}

/// 单轮结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub steps_executed: usize,
    pub active_desires: usize,
    pub live_intentions: usize,
    /// 停止信号已触发，本轮未执行
    pub stopped: bool,
}

/// 一个 BDI 会话
pub struct BdiSession {
    beliefs: BeliefStore,
    desires: DesireRegistry,
    intentions: BTreeMap<DesireId, Intention>,
    cycle: u64,
    reasoner: Arc<dyn Reasoner>,
    capabilities: Arc<dyn CapabilityProvider>,
    planner: Planner,
    executor: StepExecutor,
    reconsiderer: Reconsiderer,
    hitl: Option<HitlMediator>,
    recovery: RecoveryEngine,
    events: Arc<dyn EventSink>,
    supervisor: SessionSupervisor,
    options: SessionOptions,
}

impl BdiSession {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        capabilities: Arc<dyn CapabilityProvider>,
        events: Arc<dyn EventSink>,
        options: SessionOptions,
    ) -> Self {
        Self {
            beliefs: BeliefStore::new(),
            desires: DesireRegistry::new(),
            intentions: BTreeMap::new(),
            cycle: 0,
            planner: Planner::new(reasoner.clone(), capabilities.clone(), options.plan_retries),
            executor: StepExecutor::new(
                reasoner.clone(),
                capabilities.clone(),
                options.extract_beliefs,
                options.history_window,
            ),
            reconsiderer: Reconsiderer::new(reasoner.clone(), options.history_window),
            hitl: None,
            recovery: RecoveryEngine::new(),
            reasoner,
            capabilities,
            events,
            supervisor: SessionSupervisor::new(),
            options,
        }
    }

    /// 接入人类通道；仅当 enable_hitl 为 true 时失败才会转交 HITL
    pub fn with_human(mut self, human: Arc<dyn HumanChannel>) -> Self {
        self.hitl = Some(HitlMediator::new(
            self.reasoner.clone(),
            self.capabilities.clone(),
            human,
            self.options.history_window,
        ));
        self
    }

    pub fn with_supervisor(mut self, supervisor: SessionSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn beliefs(&self) -> &BeliefStore {
        &self.beliefs
    }

    pub fn desires(&self) -> &DesireRegistry {
        &self.desires
    }

    pub fn intention(&self, desire_id: &str) -> Option<&Intention> {
        self.intentions.get(desire_id)
    }

    pub fn intentions(&self) -> impl Iterator<Item = &Intention> {
        self.intentions.values()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn hitl_enabled(&self) -> bool {
        self.options.enable_hitl && self.hitl.is_some()
    }

    /// 请求停止：下一轮开始前生效，已派发的步骤会跑完
    pub fn request_stop(&self) {
        self.supervisor.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.supervisor.is_stopped()
    }

    /// injectDesire(text, priority)
    pub fn inject_desire(&mut self, text: impl Into<String>, priority: f64) -> DesireId {
        let text = text.into();
        let id = self.desires.add(text.clone(), priority);
        tracing::info!(desire = %id, priority, "Desire added");
        self.emit(BdiEvent::DesireAdded {
            desire_id: id.clone(),
            text,
            priority,
        });
        id
    }

    /// 显式 reset：{in_progress, failed} → pending，丢弃活动意图
    pub fn reset_desire(&mut self, id: &str) -> Result<(), AgentError> {
        let transition = self.desires.reset(id)?;
        if let Some(intention) = self.intentions.remove(id) {
            self.retire(&intention, RetireReason::Aborted);
        }
        self.emit_transition(id, transition);
        Ok(())
    }

    /// 删除目标及其活动意图
    pub fn remove_desire(&mut self, id: &str) -> Result<Desire, AgentError> {
        let desire = self.desires.remove(id)?;
        if let Some(intention) = self.intentions.remove(id) {
            self.retire(&intention, RetireReason::Removed);
        }
        self.emit(BdiEvent::DesireRemoved {
            desire_id: id.to_string(),
        });
        Ok(desire)
    }

    /// snapshotState() → {beliefs, desires, intentions}
    pub fn snapshot_state(&self) -> SessionSnapshot {
        SessionSnapshot {
            cycle: self.cycle,
            beliefs: self.beliefs.clone(),
            desires: self.desires.clone(),
            intentions: self.intentions.values().cloned().collect(),
        }
    }

    /// 从快照恢复；属于未知 Desire 的意图被丢弃
    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        self.cycle = snapshot.cycle;
        self.beliefs = snapshot.beliefs;
        self.desires = snapshot.desires;
        self.intentions.clear();
        for intention in snapshot.intentions {
            if self.desires.get(&intention.desire_id).is_none() {
                tracing::warn!(desire = %intention.desire_id, "Dropping intention of unknown desire");
                continue;
            }
            self.intentions.insert(intention.desire_id.clone(), intention);
        }
        tracing::info!(
            cycle = self.cycle,
            desires = self.desires.len(),
            intentions = self.intentions.len(),
            "Session restored"
        );
    }

    /// 运行直到所有 Desire 落定、停止信号触发或达到 max_cycles；返回实际执行的轮数
    pub async fn run_until_settled(&mut self, max_cycles: u32) -> Result<u32, AgentError> {
        let mut ran = 0;
        while ran < max_cycles && !self.desires.all_settled() {
            let report = self.run_cycle().await?;
            if report.stopped {
                break;
            }
            ran += 1;
        }
        Ok(ran)
    }

    /// runCycle()
    pub async fn run_cycle(&mut self) -> Result<CycleReport, AgentError> {
        if self.supervisor.is_stopped() {
            tracing::info!(cycle = self.cycle, "Stop requested, cycle not started");
            return Ok(CycleReport {
                cycle: self.cycle,
                steps_executed: 0,
                active_desires: self.desires.active_by_priority().len(),
                live_intentions: self.intentions.len(),
                stopped: true,
            });
        }

        self.cycle += 1;
        let cycle = self.cycle;
        tracing::info!(cycle, "Cycle started");
        self.emit(BdiEvent::CycleStarted { cycle });

        let mut steps_executed = 0;
        for id in self.desires.active_by_priority() {
            if self.advance_desire(&id).await? {
                steps_executed += 1;
            }
        }

        let report = CycleReport {
            cycle,
            steps_executed,
            active_desires: self.desires.active_by_priority().len(),
            live_intentions: self.intentions.len(),
            stopped: false,
        };
        self.emit(BdiEvent::CycleCompleted {
            cycle,
            steps_executed,
            active_desires: report.active_desires,
            live_intentions: report.live_intentions,
        });
        tracing::info!(cycle, steps_executed, active = report.active_desires, "Cycle completed");
        Ok(report)
    }

    /// 单个 Desire 的一轮：返回是否执行了步骤
    async fn advance_desire(&mut self, id: &str) -> Result<bool, AgentError> {
        let Some(desire) = self.desires.get(id).cloned() else {
            return Ok(false);
        };

        // 1. 规划
        let mut intention = match self.intentions.remove(id) {
            Some(intention) => intention,
            None => match self.plan(&desire).await? {
                Some(intention) => intention,
                None => return Ok(false),
            },
        };

        // 2. 执行一步（挂起的意图不前进）
        let mut executed = false;
        if intention.halted {
            intention.halted_cycles += 1;
            let limit = self.options.halted_cycle_limit;
            if limit > 0 && intention.halted_cycles >= limit {
                tracing::warn!(desire = %id, halted_cycles = intention.halted_cycles, "Halted intention exceeded limit, desire failed");
                let transition = self.desires.fail(id);
                let transition = self.check(id, transition, "cycle")?;
                self.emit_transition(id, transition);
                self.retire(&intention, RetireReason::Failed);
                return Ok(false);
            }
        } else {
            let outcome = self
                .executor
                .execute_step(&desire, &mut intention, &mut self.beliefs, self.events.as_ref())
                .await;
            match outcome {
                StepOutcome::Complete => {
                    self.complete(id, intention)?;
                    return Ok(false);
                }
                StepOutcome::Succeeded { .. } => {
                    executed = true;
                    if intention.is_complete() {
                        self.complete(id, intention)?;
                        return Ok(true);
                    }
                }
                StepOutcome::Failed { error, .. } => {
                    executed = true;
                    self.record_error(id, &error, "step_executor")?;
                    if !self.handle_failure(&desire, &mut intention, &error).await? {
                        return Ok(true);
                    }
                }
            }
        }

        // 3. 重审
        if self.reconsider(&desire, &intention).await? {
            self.intentions.insert(id.to_string(), intention);
        }
        Ok(executed)
    }

    /// 无活动意图时规划；成功则 Desire → in_progress
    async fn plan(&mut self, desire: &Desire) -> Result<Option<Intention>, AgentError> {
        match self
            .planner
            .plan(desire, &self.beliefs, &self.options.guidance)
            .await
        {
            Ok(PlanOutcome::Planned(intention)) => {
                self.emit(BdiEvent::IntentionCreated {
                    intention_id: intention.id.clone(),
                    desire_id: desire.id.clone(),
                    sub_goals: intention.sub_goals.clone(),
                    steps: intention.steps.len(),
                });
                if desire.status == DesireStatus::Pending {
                    let transition = self.desires.activate(&desire.id);
                    let transition = self.check(&desire.id, transition, "planner")?;
                    self.emit_transition(&desire.id, transition);
                }
                tracing::info!(desire = %desire.id, steps = intention.steps.len(), "Intention created");
                Ok(Some(intention))
            }
            Ok(PlanOutcome::Skipped { reason }) => {
                self.emit(BdiEvent::PlanningSkipped {
                    desire_id: desire.id.clone(),
                    reason,
                });
                Ok(None)
            }
            Err(e) => {
                self.record_error(&desire.id, &e, "planner")?;
                Ok(None)
            }
        }
    }

    /// 步骤失败：HITL 或挂起。返回意图是否仍然存活
    async fn handle_failure(
        &mut self,
        desire: &Desire,
        intention: &mut Intention,
        error: &AgentError,
    ) -> Result<bool, AgentError> {
        let result = match self.hitl.as_ref() {
            Some(mediator) if self.options.enable_hitl => {
                let context = mediator.build_context(desire, intention, &self.beliefs, error);
                Some(mediator.mediate(context, self.events.as_ref()).await)
            }
            _ => None,
        };

        let Some(result) = result else {
            self.halt(intention);
            return Ok(true);
        };
        for warning in &result.warnings {
            self.record_error(&desire.id, warning, "hitl")?;
        }

        match result.resolution {
            Resolution::Apply(directive) => {
                let outcome =
                    apply_directive(&directive, intention, &mut self.beliefs, self.events.as_ref());
                match outcome {
                    ApplyOutcome::Unchanged | ApplyOutcome::Mutated => {
                        intention.halted = false;
                        intention.halted_cycles = 0;
                        Ok(true)
                    }
                    ApplyOutcome::Completed => {
                        self.complete(&desire.id, intention.clone())?;
                        Ok(false)
                    }
                    ApplyOutcome::Aborted => {
                        self.abort(&desire.id, intention, RetireReason::Aborted)?;
                        Ok(false)
                    }
                }
            }
            Resolution::Cancelled => {
                tracing::info!(desire = %desire.id, "Guidance cancelled, intention halted");
                self.halt(intention);
                Ok(true)
            }
        }
    }

    /// 返回意图是否保留
    async fn reconsider(&mut self, desire: &Desire, intention: &Intention) -> Result<bool, AgentError> {
        match self
            .reconsiderer
            .reconsider(desire, intention, &self.beliefs)
            .await
        {
            Ok(verdict) => {
                self.emit(BdiEvent::ReconsiderationCompleted {
                    desire_id: desire.id.clone(),
                    intention_id: intention.id.clone(),
                    valid: verdict.valid,
                    reason: verdict.reason.clone(),
                });
                if verdict.valid {
                    return Ok(true);
                }
                tracing::info!(desire = %desire.id, reason = ?verdict.reason, "Intention invalidated");
                write_belief(
                    &mut self.beliefs,
                    self.events.as_ref(),
                    &format!("intention.{}.invalidated", desire.id),
                    verdict.reason.as_deref().unwrap_or("plan judged no longer appropriate"),
                    1.0,
                    "reconsideration",
                );
                self.abort(&desire.id, intention, RetireReason::Invalidated)?;
                Ok(false)
            }
            Err(e) => {
                // 输出格式错误：视为有效
                self.record_error(&desire.id, &e, "reconsideration")?;
                self.emit(BdiEvent::ReconsiderationCompleted {
                    desire_id: desire.id.clone(),
                    intention_id: intention.id.clone(),
                    valid: true,
                    reason: Some(format!("assumed valid: {e}")),
                });
                Ok(true)
            }
        }
    }

    /// 挂起意图；仅在状态实际改变时发出 intention.updated(halted)
    fn halt(&self, intention: &mut Intention) {
        if intention.halted {
            return;
        }
        intention.halted = true;
        intention.halted_cycles = 0;
        self.emit(BdiEvent::IntentionUpdated {
            intention_id: intention.id.clone(),
            desire_id: intention.desire_id.clone(),
            change: "halted".to_string(),
            cursor: intention.cursor,
            steps: intention.steps.len(),
        });
    }

    /// Desire → satisfied，意图退役
    fn complete(&mut self, id: &str, intention: Intention) -> Result<(), AgentError> {
        let transition = self.desires.satisfy(id);
        let transition = self.check(id, transition, "cycle")?;
        self.emit_transition(id, transition);
        self.retire(&intention, RetireReason::Completed);
        tracing::info!(desire = %id, "Desire satisfied");
        Ok(())
    }

    /// 意图退役，Desire → pending 等待重新规划
    fn abort(&mut self, id: &str, intention: &Intention, reason: RetireReason) -> Result<(), AgentError> {
        self.retire(intention, reason);
        let transition = self.desires.reset(id);
        let transition = self.check(id, transition, "cycle")?;
        self.emit_transition(id, transition);
        Ok(())
    }

    fn retire(&self, intention: &Intention, reason: RetireReason) {
        self.emit(BdiEvent::IntentionRetired {
            intention_id: intention.id.clone(),
            desire_id: intention.desire_id.clone(),
            reason,
        });
    }

    /// 状态迁移失败属于宿主级故障
    fn check(
        &mut self,
        id: &str,
        transition: Result<Transition, AgentError>,
        source: &str,
    ) -> Result<Transition, AgentError> {
        match transition {
            Ok(t) => Ok(t),
            Err(e) => {
                self.record_error(id, &e, source)?;
                Err(e)
            }
        }
    }

    /// 记录错误：写入信念 error.<kind>.<desire_id> 并发出 error 事件；仅 Abort 向上传播
    fn record_error(
        &mut self,
        desire_id: &str,
        err: &AgentError,
        source: &str,
    ) -> Result<RecoveryAction, AgentError> {
        let action = self.recovery.handle(err);
        tracing::warn!(desire = %desire_id, kind = err.kind(), recovery = ?action, error = %err, "Recovered error");
        write_belief(
            &mut self.beliefs,
            self.events.as_ref(),
            &format!("error.{}.{}", err.kind(), desire_id),
            &err.to_string(),
            1.0,
            source,
        );
        self.emit(BdiEvent::Error {
            kind: err.kind().to_string(),
            desire_id: Some(desire_id.to_string()),
            message: err.to_string(),
            recovery: format!("{action:?}"),
        });
        if action == RecoveryAction::Abort {
            return Err(err.clone());
        }
        Ok(action)
    }

    fn emit_transition(&self, id: &str, transition: Transition) {
        tracing::info!(desire = %id, from = %transition.from, to = %transition.to, "Desire status");
        self.emit(BdiEvent::DesireUpdated {
            desire_id: id.to_string(),
            from: transition.from,
            to: transition.to,
        });
    }

    fn emit(&self, event: BdiEvent) {
        self.events.emit(EventRecord::new(event));
    }
}
