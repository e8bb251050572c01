//! 人在回路（HITL）：步骤失败后把人类自由文本转成结构化的计划变更
//!
//! 状态机：BUILD_CONTEXT → AWAIT_GUIDANCE → INTERPRET → CONFIRM → APPLY，或随时取消进入 CANCELLED。
//! HitlFlow 只持有 `{state, pending_question}` 等数据，由宿主调用 `resume(reply)` 推进，不阻塞任何线程。
//! 人类提供的事实与计划变更正交：任何动作都可以携带 belief_updates，先写信念再改计划。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bdi::belief::{BeliefStore, HUMAN_GUIDANCE_SOURCE};
use crate::bdi::capability::{catalog_prompt, CapabilityProvider};
use crate::bdi::desire::Desire;
use crate::bdi::events::{write_belief, BdiEvent, EventRecord, EventSink};
use crate::bdi::intention::{Intention, Step, StepPatch, StepSpec};
use crate::bdi::reasoning::{propose_as, Reasoner, ReasoningPrompt};
use crate::core::AgentError;

pub const GUIDANCE_SCHEMA: &str = "guidance_directive";

const INTERPRET_INSTRUCTIONS: &str = "A BDI agent's plan step failed and a human has given free-text guidance. \
Classify the guidance into exactly one action: \
RETRY_AS_IS, MODIFY_CURRENT (changes to description / tool_name / tool_params), REPLACE_CURRENT_STEP (steps), \
INSERT_BEFORE (steps), INSERT_AFTER (steps), REPLACE_REMAINDER (steps), SKIP_CURRENT, ABORT_INTENTION, \
UPDATE_BELIEFS_AND_RETRY or COMMENT_NO_ACTION. \
Whatever the action, put every fact the human states into belief_updates. \
New capability steps must use the listed capabilities. Summarise your interpretation in `summary`. \
Use COMMENT_NO_ACTION when the guidance cannot be mapped to a plan change.";

/// HITL 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HitlState {
    BuildContext,
    AwaitGuidance,
    Interpret,
    Confirm,
    Apply,
    Cancelled,
}

/// 固定的计划变更词表（每个变体带上自己需要的载荷）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuidanceAction {
    #[serde(alias = "RETRY_CURRENT_AS_IS")]
    RetryAsIs,
    #[serde(alias = "MODIFY_CURRENT_AND_RETRY")]
    ModifyCurrent {
        #[serde(default)]
        changes: StepPatch,
    },
    #[serde(alias = "REPLACE_CURRENT_STEP_WITH_NEW")]
    ReplaceCurrentStep {
        #[serde(default)]
        steps: Vec<StepSpec>,
    },
    #[serde(alias = "INSERT_NEW_STEPS_BEFORE_CURRENT")]
    InsertBefore {
        #[serde(default)]
        steps: Vec<StepSpec>,
    },
    #[serde(alias = "INSERT_NEW_STEPS_AFTER_CURRENT")]
    InsertAfter {
        #[serde(default)]
        steps: Vec<StepSpec>,
    },
    #[serde(alias = "REPLACE_REMAINDER_OF_PLAN")]
    ReplaceRemainder {
        #[serde(default)]
        steps: Vec<StepSpec>,
    },
    #[serde(alias = "SKIP_CURRENT_STEP")]
    SkipCurrent,
    AbortIntention,
    UpdateBeliefsAndRetry,
    CommentNoAction,
}

impl GuidanceAction {
    pub fn label(&self) -> &'static str {
        match self {
            GuidanceAction::RetryAsIs => "RETRY_AS_IS",
            GuidanceAction::ModifyCurrent { .. } => "MODIFY_CURRENT",
            GuidanceAction::ReplaceCurrentStep { .. } => "REPLACE_CURRENT_STEP",
            GuidanceAction::InsertBefore { .. } => "INSERT_BEFORE",
            GuidanceAction::InsertAfter { .. } => "INSERT_AFTER",
            GuidanceAction::ReplaceRemainder { .. } => "REPLACE_REMAINDER",
            GuidanceAction::SkipCurrent => "SKIP_CURRENT",
            GuidanceAction::AbortIntention => "ABORT_INTENTION",
            GuidanceAction::UpdateBeliefsAndRetry => "UPDATE_BELIEFS_AND_RETRY",
            GuidanceAction::CommentNoAction => "COMMENT_NO_ACTION",
        }
    }
}

/// 人类提供的事实
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BeliefUpdate {
    pub name: String,
    pub value: String,
    /// 缺省为 1.0
    #[serde(default)]
    pub certainty: Option<f64>,
}

/// 解析后的指导
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GuidanceDirective {
    /// 动作标签与载荷平铺在顶层：`{"action": "INSERT_BEFORE", "steps": [...]}`
    #[serde(flatten)]
    pub action: GuidanceAction,
    #[serde(default)]
    pub belief_updates: Vec<BeliefUpdate>,
    /// 协作者对指导的理解
    #[serde(default)]
    pub summary: String,
}

impl GuidanceDirective {
    /// 最安全的无操作
    pub fn no_action(summary: impl Into<String>) -> Self {
        Self {
            action: GuidanceAction::CommentNoAction,
            belief_updates: Vec::new(),
            summary: summary.into(),
        }
    }

    /// CONFIRM 阶段展示给人类的确定性摘要
    pub fn describe(&self) -> String {
        let mut lines = vec![format!("Action: {}", self.action.label())];
        if !self.summary.is_empty() {
            lines.push(format!("Understanding: {}", self.summary));
        }
        match &self.action {
            GuidanceAction::ModifyCurrent { changes } => {
                if let Some(d) = &changes.description {
                    lines.push(format!("  - new description: {d}"));
                }
                if let Some(t) = &changes.tool_name {
                    lines.push(format!("  - new capability: {t}"));
                }
                if let Some(p) = &changes.tool_params {
                    lines.push(format!("  - new params: {p}"));
                }
            }
            GuidanceAction::ReplaceCurrentStep { steps }
            | GuidanceAction::InsertBefore { steps }
            | GuidanceAction::InsertAfter { steps }
            | GuidanceAction::ReplaceRemainder { steps } => {
                lines.push(format!("  - {} new step(s):", steps.len()));
                for (i, s) in steps.iter().enumerate() {
                    match &s.tool_name {
                        Some(t) if s.is_tool_call => lines.push(format!(
                            "    {}. {} ({} {})",
                            i + 1,
                            s.description,
                            t,
                            s.tool_params.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "{}".into())
                        )),
                        _ => lines.push(format!("    {}. {}", i + 1, s.description)),
                    }
                }
            }
            _ => {}
        }
        if !self.belief_updates.is_empty() {
            lines.push("  - beliefs to record:".to_string());
            for b in &self.belief_updates {
                lines.push(format!("    - {}: {}", b.name, b.value));
            }
        }
        lines.join("\n")
    }
}

/// 展示给人类的失败上下文（BUILD_CONTEXT 产物）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub desire_id: String,
    pub desire_text: String,
    pub intention_id: String,
    /// 从 1 开始
    pub step_number: usize,
    pub total_steps: usize,
    pub step_description: String,
    pub capability: Option<String>,
    pub params: Option<serde_json::Value>,
    pub error: String,
    pub beliefs: String,
    pub remaining_steps: String,
    pub recent_history: String,
    pub capabilities: String,
}

impl FailureContext {
    pub fn render(&self) -> String {
        format!(
            "## Failure\n- Desire {}: {}\n- Failed step ({}/{}): {}\n- Capability: {} {}\n- Error: {}\n\n## Current beliefs\n{}\n\n## Remaining steps\n{}\n\n## Recent history\n{}\n\n## Available capabilities\n{}",
            self.desire_id,
            self.desire_text,
            self.step_number,
            self.total_steps,
            self.step_description,
            self.capability.as_deref().unwrap_or("N/A"),
            self.params.as_ref().map(|p| p.to_string()).unwrap_or_default(),
            self.error,
            self.beliefs,
            self.remaining_steps,
            self.recent_history,
            self.capabilities
        )
    }
}

/// 呈现给人类的一次提问
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HumanPrompt {
    pub state: HitlState,
    pub question: String,
    pub context: FailureContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanReply {
    Text(String),
    Quit,
}

/// 人类通道：present 展示，await_text 等待回复
#[async_trait]
pub trait HumanChannel: Send + Sync {
    async fn present(&self, prompt: &HumanPrompt);
    async fn await_text(&self) -> HumanReply;
}

/// resume 的结果：继续提问或结束
#[derive(Debug, Clone, PartialEq)]
pub enum HitlStep {
    Ask(HumanPrompt),
    Resolved(Resolution),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Apply(GuidanceDirective),
    Cancelled,
}

enum ConfirmReply {
    Yes,
    Edit,
    Cancel,
    Unclear,
}

fn parse_confirm(text: &str) -> ConfirmReply {
    match text.trim().to_lowercase().as_str() {
        "y" | "yes" | "ok" | "confirm" => ConfirmReply::Yes,
        "e" | "edit" | "n" | "no" => ConfirmReply::Edit,
        "c" | "cancel" | "q" | "quit" => ConfirmReply::Cancel,
        _ => ConfirmReply::Unclear,
    }
}

/// 单次失败事件的 HITL 状态机
#[derive(Debug, Clone)]
pub struct HitlFlow {
    state: HitlState,
    pending_question: Option<String>,
    context: FailureContext,
    directive: Option<GuidanceDirective>,
    transitions: Vec<(HitlState, HitlState)>,
    warnings: Vec<AgentError>,
}

impl HitlFlow {
    pub fn new(context: FailureContext) -> Self {
        Self {
            state: HitlState::BuildContext,
            pending_question: None,
            context,
            directive: None,
            transitions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> HitlState {
        self.state
    }

    pub fn pending_question(&self) -> Option<&str> {
        self.pending_question.as_deref()
    }

    pub fn directive(&self) -> Option<&GuidanceDirective> {
        self.directive.as_ref()
    }

    /// 上下文已就绪，进入 AWAIT_GUIDANCE
    pub fn begin(&mut self) -> HumanPrompt {
        if self.state == HitlState::BuildContext {
            self.transition(HitlState::AwaitGuidance);
        }
        self.ask_for_guidance()
    }

    /// 用人类回复推进状态机
    pub async fn resume(&mut self, reply: HumanReply, reasoner: &dyn Reasoner) -> HitlStep {
        match self.state {
            HitlState::BuildContext => HitlStep::Ask(self.begin()),
            HitlState::AwaitGuidance | HitlState::Interpret => match reply {
                HumanReply::Quit => self.cancel(),
                HumanReply::Text(text) => {
                    if self.state == HitlState::AwaitGuidance {
                        self.transition(HitlState::Interpret);
                    }
                    let directive = self.interpret(&text, reasoner).await;
                    let question = format!(
                        "{}\n\nApply this change? [y]es / [e]dit / [c]ancel",
                        directive.describe()
                    );
                    self.directive = Some(directive);
                    self.transition(HitlState::Confirm);
                    HitlStep::Ask(self.ask(question))
                }
            },
            HitlState::Confirm => {
                let text = match reply {
                    HumanReply::Quit => return self.cancel(),
                    HumanReply::Text(text) => text,
                };
                match parse_confirm(&text) {
                    ConfirmReply::Yes => {
                        self.transition(HitlState::Apply);
                        self.pending_question = None;
                        let directive = self
                            .directive
                            .clone()
                            .unwrap_or_else(|| GuidanceDirective::no_action("nothing to apply"));
                        HitlStep::Resolved(Resolution::Apply(directive))
                    }
                    ConfirmReply::Edit => {
                        self.directive = None;
                        self.transition(HitlState::AwaitGuidance);
                        HitlStep::Ask(self.ask_for_guidance())
                    }
                    ConfirmReply::Cancel => self.cancel(),
                    ConfirmReply::Unclear => {
                        let summary = self
                            .directive
                            .as_ref()
                            .map(|d| d.describe())
                            .unwrap_or_default();
                        HitlStep::Ask(self.ask(format!(
                            "{summary}\n\nPlease answer yes, edit or cancel."
                        )))
                    }
                }
            }
            HitlState::Apply => HitlStep::Resolved(Resolution::Apply(
                self.directive
                    .clone()
                    .unwrap_or_else(|| GuidanceDirective::no_action("nothing to apply")),
            )),
            HitlState::Cancelled => HitlStep::Resolved(Resolution::Cancelled),
        }
    }

    /// 取出并清空自上次以来的状态迁移
    pub fn take_transitions(&mut self) -> Vec<(HitlState, HitlState)> {
        std::mem::take(&mut self.transitions)
    }

    pub fn take_warnings(&mut self) -> Vec<AgentError> {
        std::mem::take(&mut self.warnings)
    }

    /// 结构修复由推理协作者完成（一次）；仍失败则退回 COMMENT_NO_ACTION 并记录警告
    async fn interpret(&mut self, guidance: &str, reasoner: &dyn Reasoner) -> GuidanceDirective {
        let prompt = ReasoningPrompt::new(
            INTERPRET_INSTRUCTIONS,
            format!("{}\n\n## Human guidance\n{}", self.context.render(), guidance),
        );
        match propose_as::<GuidanceDirective>(reasoner, &prompt, GUIDANCE_SCHEMA).await {
            Ok(directive) => directive,
            Err(e) => {
                let err = AgentError::GuidanceInterpretation(e.to_string());
                tracing::warn!(error = %err, "Falling back to COMMENT_NO_ACTION");
                self.warnings.push(err);
                GuidanceDirective::no_action(
                    "Guidance could not be interpreted; the plan is left unchanged.",
                )
            }
        }
    }

    fn cancel(&mut self) -> HitlStep {
        self.transition(HitlState::Cancelled);
        self.pending_question = None;
        HitlStep::Resolved(Resolution::Cancelled)
    }

    fn ask_for_guidance(&mut self) -> HumanPrompt {
        self.ask(format!(
            "Step {} of {} failed: {}\nError: {}\nHow should the agent proceed? (quit to stop)",
            self.context.step_number,
            self.context.total_steps,
            self.context.step_description,
            self.context.error
        ))
    }

    fn ask(&mut self, question: String) -> HumanPrompt {
        self.pending_question = Some(question.clone());
        HumanPrompt {
            state: self.state,
            question,
            context: self.context.clone(),
        }
    }

    fn transition(&mut self, to: HitlState) {
        self.transitions.push((self.state, to));
        self.state = to;
    }
}

/// HITL 结果（含解析降级时的警告）
#[derive(Debug, Clone)]
pub struct HitlResult {
    pub resolution: Resolution,
    pub warnings: Vec<AgentError>,
}

/// 驱动 HitlFlow 与人类通道交互直到结束
pub struct HitlMediator {
    reasoner: Arc<dyn Reasoner>,
    capabilities: Arc<dyn CapabilityProvider>,
    human: Arc<dyn HumanChannel>,
    history_window: usize,
}

impl HitlMediator {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        capabilities: Arc<dyn CapabilityProvider>,
        human: Arc<dyn HumanChannel>,
        history_window: usize,
    ) -> Self {
        Self {
            reasoner,
            capabilities,
            human,
            history_window,
        }
    }

    /// BUILD_CONTEXT：失败摘要、所属 Desire、信念快照
    pub fn build_context(
        &self,
        desire: &Desire,
        intention: &Intention,
        beliefs: &BeliefStore,
        error: &AgentError,
    ) -> FailureContext {
        let step = intention.current_step();
        FailureContext {
            desire_id: desire.id.clone(),
            desire_text: desire.text.clone(),
            intention_id: intention.id.clone(),
            step_number: intention.cursor + 1,
            total_steps: intention.steps.len(),
            step_description: step.map(|s| s.description.clone()).unwrap_or_default(),
            capability: step.and_then(|s| s.capability.clone()),
            params: step.and_then(|s| s.params.clone()),
            error: error.to_string(),
            beliefs: beliefs.to_prompt_section(),
            remaining_steps: intention.remaining_prompt(),
            recent_history: intention.history_prompt(self.history_window),
            capabilities: catalog_prompt(&self.capabilities.list_actions()),
        }
    }

    pub async fn mediate(&self, context: FailureContext, events: &dyn EventSink) -> HitlResult {
        let desire_id = context.desire_id.clone();
        let mut flow = HitlFlow::new(context);
        let mut prompt = flow.begin();
        emit_transitions(&mut flow, &desire_id, events);
        loop {
            self.human.present(&prompt).await;
            let reply = self.human.await_text().await;
            let step = flow.resume(reply, self.reasoner.as_ref()).await;
            emit_transitions(&mut flow, &desire_id, events);
            match step {
                HitlStep::Ask(next) => prompt = next,
                HitlStep::Resolved(resolution) => {
                    return HitlResult {
                        resolution,
                        warnings: flow.take_warnings(),
                    }
                }
            }
        }
    }
}

fn emit_transitions(flow: &mut HitlFlow, desire_id: &str, events: &dyn EventSink) {
    for (from, to) in flow.take_transitions() {
        events.emit(EventRecord::new(BdiEvent::HitlTransition {
            desire_id: desire_id.to_string(),
            from,
            to,
        }));
    }
}

/// APPLY 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 计划未变（重试 / 仅评论 / 仅写信念）
    Unchanged,
    Mutated,
    /// 跳过最后一步，意图完成
    Completed,
    /// 放弃意图，Desire 回到 pending
    Aborted,
}

/// 按指导修改意图；信念更新先于计划变更。每次实际变更只发一条 intention.updated
pub fn apply_directive(
    directive: &GuidanceDirective,
    intention: &mut Intention,
    beliefs: &mut BeliefStore,
    events: &dyn EventSink,
) -> ApplyOutcome {
    for update in &directive.belief_updates {
        if update.name.trim().is_empty() {
            continue;
        }
        write_belief(
            beliefs,
            events,
            update.name.trim(),
            &update.value,
            update.certainty.unwrap_or(1.0),
            HUMAN_GUIDANCE_SOURCE,
        );
    }

    let to_steps = |specs: &[StepSpec]| specs.iter().cloned().map(Step::from).collect::<Vec<_>>();
    let action = &directive.action;
    let outcome = match action {
        GuidanceAction::RetryAsIs
        | GuidanceAction::UpdateBeliefsAndRetry
        | GuidanceAction::CommentNoAction => ApplyOutcome::Unchanged,
        GuidanceAction::ModifyCurrent { changes } => {
            if changes.is_empty() || !intention.modify_current(changes) {
                tracing::warn!("MODIFY_CURRENT without usable changes, retrying as is");
                ApplyOutcome::Unchanged
            } else {
                ApplyOutcome::Mutated
            }
        }
        GuidanceAction::ReplaceCurrentStep { steps } => {
            if steps.is_empty() || !intention.replace_current(to_steps(steps)) {
                tracing::warn!("REPLACE_CURRENT_STEP without new steps, plan unchanged");
                ApplyOutcome::Unchanged
            } else {
                ApplyOutcome::Mutated
            }
        }
        GuidanceAction::InsertBefore { steps } if !steps.is_empty() => {
            intention.insert_before(to_steps(steps));
            ApplyOutcome::Mutated
        }
        GuidanceAction::InsertAfter { steps } if !steps.is_empty() => {
            intention.insert_after(to_steps(steps));
            ApplyOutcome::Mutated
        }
        GuidanceAction::ReplaceRemainder { steps } if !steps.is_empty() => {
            intention.replace_remainder(to_steps(steps));
            ApplyOutcome::Mutated
        }
        GuidanceAction::InsertBefore { .. }
        | GuidanceAction::InsertAfter { .. }
        | GuidanceAction::ReplaceRemainder { .. } => {
            tracing::warn!(action = action.label(), "No new steps given, plan unchanged");
            ApplyOutcome::Unchanged
        }
        GuidanceAction::SkipCurrent => {
            if !intention.skip_current() {
                ApplyOutcome::Unchanged
            } else if intention.is_complete() {
                ApplyOutcome::Completed
            } else {
                ApplyOutcome::Mutated
            }
        }
        GuidanceAction::AbortIntention => ApplyOutcome::Aborted,
    };

    if matches!(outcome, ApplyOutcome::Mutated | ApplyOutcome::Completed) {
        events.emit(EventRecord::new(BdiEvent::IntentionUpdated {
            intention_id: intention.id.clone(),
            desire_id: intention.desire_id.clone(),
            change: action.label().to_string(),
            cursor: intention.cursor,
            steps: intention.steps.len(),
        }));
    }
    tracing::info!(desire = %intention.desire_id, action = action.label(), outcome = ?outcome, "Guidance applied");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdi::desire::DesireRegistry;
    use crate::bdi::events::MemorySink;
    use crate::bdi::intention::StepStatus;
    use crate::bdi::mock::{ScriptedHuman, ScriptedProvider, ScriptedReasoner};
    use serde_json::json;

    fn fixture() -> (Desire, Intention) {
        let mut registry = DesireRegistry::new();
        let id = registry.add("fetch data", 0.5);
        let desire = registry.get(&id).unwrap().clone();
        let mut intention = Intention::new(
            id,
            "fetch data",
            vec![],
            vec![
                Step::capability_call("download", "http_get", json!({"url": "x"})),
                Step::narrative("parse"),
            ],
        );
        intention.mark_failed();
        (desire, intention)
    }

    fn context() -> FailureContext {
        let (desire, intention) = fixture();
        let mediator = HitlMediator::new(
            Arc::new(ScriptedReasoner::new()),
            Arc::new(ScriptedProvider::with_actions(&["http_get"])),
            Arc::new(ScriptedHuman::default()),
            5,
        );
        mediator.build_context(
            &desire,
            &intention,
            &BeliefStore::new(),
            &AgentError::ToolInvocation {
                capability: "http_get".into(),
                cause: "404".into(),
            },
        )
    }

    #[test]
    fn test_directive_parsing_accepts_long_names() {
        let d: GuidanceDirective = serde_json::from_value(json!({
            "action": "SKIP_CURRENT_STEP",
            "summary": "skip it"
        }))
        .unwrap();
        assert_eq!(d.action, GuidanceAction::SkipCurrent);

        let d: GuidanceDirective = serde_json::from_value(json!({
            "action": "INSERT_BEFORE",
            "steps": [{"description": "login"}],
            "belief_updates": [{"name": "needs_auth", "value": "true"}]
        }))
        .unwrap();
        assert!(matches!(d.action, GuidanceAction::InsertBefore { ref steps } if steps.len() == 1));
        assert_eq!(d.belief_updates[0].certainty, None);
    }

    #[tokio::test]
    async fn test_flow_happy_path() {
        let reasoner = ScriptedReasoner::new();
        reasoner.push(
            GUIDANCE_SCHEMA,
            json!({"action": "SKIP_CURRENT", "summary": "skip"}),
        );
        let mut flow = HitlFlow::new(context());
        let first = flow.begin();
        assert_eq!(first.state, HitlState::AwaitGuidance);
        assert!(flow.pending_question().unwrap().contains("Step 1 of 2"));

        let step = flow.resume(HumanReply::Text("just skip".into()), &reasoner).await;
        let HitlStep::Ask(confirm) = step else {
            panic!("expected confirm question");
        };
        assert_eq!(confirm.state, HitlState::Confirm);
        assert!(confirm.question.contains("SKIP_CURRENT"));

        let step = flow.resume(HumanReply::Text("y".into()), &reasoner).await;
        assert!(matches!(step, HitlStep::Resolved(Resolution::Apply(_))));
        assert_eq!(flow.state(), HitlState::Apply);
        let states: Vec<_> = flow.take_transitions().into_iter().map(|(_, to)| to).collect();
        assert_eq!(
            states,
            vec![
                HitlState::AwaitGuidance,
                HitlState::Interpret,
                HitlState::Confirm,
                HitlState::Apply
            ]
        );
    }

    #[tokio::test]
    async fn test_flow_edit_loops_back_and_quit_cancels() {
        let reasoner = ScriptedReasoner::new();
        reasoner.set_fallback(GUIDANCE_SCHEMA, json!({"action": "RETRY_AS_IS"}));
        let mut flow = HitlFlow::new(context());
        flow.begin();
        flow.resume(HumanReply::Text("retry".into()), &reasoner).await;
        let step = flow.resume(HumanReply::Text("edit".into()), &reasoner).await;
        assert!(matches!(step, HitlStep::Ask(ref p) if p.state == HitlState::AwaitGuidance));
        assert!(flow.directive().is_none());
        let step = flow.resume(HumanReply::Quit, &reasoner).await;
        assert_eq!(step, HitlStep::Resolved(Resolution::Cancelled));
        assert_eq!(flow.state(), HitlState::Cancelled);
    }

    #[tokio::test]
    async fn test_flow_unclear_confirm_reasks() {
        let reasoner = ScriptedReasoner::new();
        reasoner.set_fallback(GUIDANCE_SCHEMA, json!({"action": "RETRY_AS_IS"}));
        let mut flow = HitlFlow::new(context());
        flow.begin();
        flow.resume(HumanReply::Text("retry".into()), &reasoner).await;
        flow.take_transitions();
        let step = flow.resume(HumanReply::Text("hmm?".into()), &reasoner).await;
        assert!(matches!(step, HitlStep::Ask(ref p) if p.state == HitlState::Confirm));
        assert!(flow.take_transitions().is_empty());
    }

    #[tokio::test]
    async fn test_uninterpretable_falls_back_to_no_action() {
        let reasoner = ScriptedReasoner::new();
        reasoner.push(GUIDANCE_SCHEMA, json!({"action": "DANCE"}));
        reasoner.push(GUIDANCE_SCHEMA, json!({"action": "RETRY_AS_IS"}));
        let mut flow = HitlFlow::new(context());
        flow.begin();
        flow.resume(HumanReply::Text("???".into()), &reasoner).await;
        // 不在协作者的修复之外再次请求
        assert_eq!(reasoner.calls_for(GUIDANCE_SCHEMA), 1);
        assert_eq!(flow.directive().unwrap().action, GuidanceAction::CommentNoAction);
        let warnings = flow.take_warnings();
        assert!(matches!(warnings[0], AgentError::GuidanceInterpretation(_)));
    }

    #[tokio::test]
    async fn test_mediator_emits_transitions() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push(GUIDANCE_SCHEMA, json!({"action": "ABORT_INTENTION"}));
        let human = Arc::new(ScriptedHuman::new(["give up", "yes"]));
        let mediator = HitlMediator::new(
            reasoner,
            Arc::new(ScriptedProvider::default()),
            human.clone(),
            5,
        );
        let sink = MemorySink::new();
        let result = mediator.mediate(context(), &sink).await;
        assert!(matches!(
            result.resolution,
            Resolution::Apply(GuidanceDirective { action: GuidanceAction::AbortIntention, .. })
        ));
        assert_eq!(sink.count("hitl.transition"), 4);
        assert_eq!(human.presented().len(), 2);
    }

    #[test]
    fn test_apply_skip_and_beliefs() {
        let (_, mut intention) = fixture();
        let sink = MemorySink::new();
        let mut beliefs = BeliefStore::new();
        let directive = GuidanceDirective {
            action: GuidanceAction::SkipCurrent,
            belief_updates: vec![BeliefUpdate {
                name: "server".into(),
                value: "down".into(),
                certainty: None,
            }],
            summary: String::new(),
        };
        let outcome = apply_directive(&directive, &mut intention, &mut beliefs, &sink);
        assert_eq!(outcome, ApplyOutcome::Mutated);
        assert_eq!(intention.cursor, 1);
        assert_eq!(intention.steps[0].status, StepStatus::Failed);
        let b = beliefs.get("server").unwrap();
        assert_eq!(b.source, HUMAN_GUIDANCE_SOURCE);
        assert_eq!(b.certainty, 1.0);
        assert_eq!(sink.count("intention.updated"), 1);
        // 信念事件先于计划事件
        assert_eq!(sink.kinds(), vec!["belief.updated", "intention.updated"]);
    }

    #[test]
    fn test_apply_skip_last_completes() {
        let (_, mut intention) = fixture();
        intention.advance();
        let outcome = apply_directive(
            &GuidanceDirective {
                action: GuidanceAction::SkipCurrent,
                belief_updates: vec![],
                summary: String::new(),
            },
            &mut intention,
            &mut BeliefStore::new(),
            &MemorySink::new(),
        );
        assert_eq!(outcome, ApplyOutcome::Completed);
    }

    #[test]
    fn test_apply_replace_remainder_empty_leaves_plan() {
        let (_, mut intention) = fixture();
        let before = intention.clone();
        let sink = MemorySink::new();
        let outcome = apply_directive(
            &GuidanceDirective {
                action: GuidanceAction::ReplaceRemainder { steps: vec![] },
                belief_updates: vec![],
                summary: String::new(),
            },
            &mut intention,
            &mut BeliefStore::new(),
            &sink,
        );
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(intention, before);
        assert_eq!(sink.count("intention.updated"), 0);
    }

    #[test]
    fn test_apply_comment_leaves_state() {
        let (_, mut intention) = fixture();
        let before = intention.clone();
        let sink = MemorySink::new();
        let outcome = apply_directive(
            &GuidanceDirective::no_action("just a comment"),
            &mut intention,
            &mut BeliefStore::new(),
            &sink,
        );
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(intention, before);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_apply_modify_current() {
        let (_, mut intention) = fixture();
        let outcome = apply_directive(
            &GuidanceDirective {
                action: GuidanceAction::ModifyCurrent {
                    changes: StepPatch {
                        tool_params: Some(json!({"url": "y"})),
                        ..Default::default()
                    },
                },
                belief_updates: vec![],
                summary: String::new(),
            },
            &mut intention,
            &mut BeliefStore::new(),
            &MemorySink::new(),
        );
        assert_eq!(outcome, ApplyOutcome::Mutated);
        assert_eq!(intention.steps[0].params, Some(json!({"url": "y"})));
        assert_eq!(intention.steps[0].status, StepStatus::Pending);
    }
}
