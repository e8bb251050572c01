//! 步骤执行器：每次只执行 cursor 处的一个步骤
//!
//! capability_call 走能力提供方，narrative 交给推理协作者。无论成败都会写入信念（source = 步骤描述）：
//! 一条确定性的结果 / 失败信念，加上可选的 LLM 信念抽取。成功前进 cursor，失败原地标记 failed。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bdi::belief::BeliefStore;
use crate::bdi::capability::CapabilityProvider;
use crate::bdi::desire::Desire;
use crate::bdi::events::{write_belief, BdiEvent, EventRecord, EventSink};
use crate::bdi::intention::{Intention, Step, StepKind};
use crate::bdi::reasoning::{propose_as, Reasoner, ReasoningPrompt};
use crate::core::AgentError;

pub const NARRATIVE_SCHEMA: &str = "narrative_outcome";
pub const BELIEF_EXTRACTION_SCHEMA: &str = "belief_extraction";

/// 信念值在 prompt / 信念库中的最大长度
const MAX_BELIEF_VALUE_CHARS: usize = 500;

const NARRATIVE_INSTRUCTIONS: &str = "You are executing one step of a BDI agent's plan. \
Perform the step using the current beliefs and recent history. \
Report the result in `output` and set `success` to false if the step could not be accomplished.";

const EXTRACTION_INSTRUCTIONS: &str = "Extract concrete facts learned from the step result as beliefs. \
Each belief has a short snake_case name, a value and a certainty between 0 and 1. \
Record failures and their causes as beliefs too. Return an empty list if nothing new was learned.";

/// 叙述型步骤的执行结果
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NarrativeOutcome {
    pub output: String,
    #[serde(default = "default_true")]
    pub success: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedBelief {
    pub name: String,
    pub value: String,
    #[serde(default = "default_certainty")]
    pub certainty: f64,
}

fn default_certainty() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BeliefExtraction {
    #[serde(default)]
    pub beliefs: Vec<ExtractedBelief>,
    #[serde(default)]
    pub explanation: String,
}

/// 单步执行结果
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// cursor 已到末尾：意图完成
    Complete,
    Succeeded { index: usize, output: String },
    Failed { index: usize, error: AgentError },
}

pub struct StepExecutor {
    reasoner: Arc<dyn Reasoner>,
    capabilities: Arc<dyn CapabilityProvider>,
    extract_beliefs: bool,
    history_window: usize,
}

impl StepExecutor {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        capabilities: Arc<dyn CapabilityProvider>,
        extract_beliefs: bool,
        history_window: usize,
    ) -> Self {
        Self {
            reasoner,
            capabilities,
            extract_beliefs,
            history_window,
        }
    }

    /// executeStep(intention, beliefs) → StepOutcome
    pub async fn execute_step(
        &self,
        desire: &Desire,
        intention: &mut Intention,
        beliefs: &mut BeliefStore,
        events: &dyn EventSink,
    ) -> StepOutcome {
        let Some(step) = intention.current_step().cloned() else {
            return StepOutcome::Complete;
        };
        let index = intention.cursor;
        tracing::info!(desire = %desire.id, step = index + 1, total = intention.steps.len(), description = %step.description, "Executing step");

        let result = match step.kind {
            StepKind::CapabilityCall => self.invoke_capability(&step).await,
            StepKind::Narrative => self.run_narrative(desire, intention, beliefs, &step).await,
        };

        let (success, text) = match &result {
            Ok(output) => (true, output.clone()),
            Err(e) => (false, e.to_string()),
        };
        intention.record(index, &step.description, success, &text);

        let outcome_key = format!(
            "step.{}.{}.{}",
            desire.id,
            index + 1,
            if success { "result" } else { "failure" }
        );
        write_belief(
            beliefs,
            events,
            &outcome_key,
            &truncate(&text, MAX_BELIEF_VALUE_CHARS),
            1.0,
            &step.description,
        );
        if self.extract_beliefs {
            self.extract(desire, intention, beliefs, events, &step, success, &text)
                .await;
        }

        match result {
            Ok(output) => {
                intention.advance();
                events.emit(EventRecord::new(BdiEvent::StepCompleted {
                    desire_id: desire.id.clone(),
                    intention_id: intention.id.clone(),
                    index,
                    description: step.description.clone(),
                    output: truncate(&output, MAX_BELIEF_VALUE_CHARS),
                }));
                StepOutcome::Succeeded { index, output }
            }
            Err(error) => {
                intention.mark_failed();
                events.emit(EventRecord::new(BdiEvent::StepFailed {
                    desire_id: desire.id.clone(),
                    intention_id: intention.id.clone(),
                    index,
                    description: step.description.clone(),
                    error: error.to_string(),
                }));
                StepOutcome::Failed { index, error }
            }
        }
    }

    async fn invoke_capability(&self, step: &Step) -> Result<String, AgentError> {
        let name = step.capability.as_deref().ok_or_else(|| AgentError::ToolInvocation {
            capability: String::new(),
            cause: "capability_call step has no capability name".to_string(),
        })?;
        let params = step
            .params
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        self.capabilities.invoke(name, params).await
    }

    async fn run_narrative(
        &self,
        desire: &Desire,
        intention: &Intention,
        beliefs: &BeliefStore,
        step: &Step,
    ) -> Result<String, AgentError> {
        let context = format!(
            "## Desire\n{}\n\n## Step to perform\n{}\n\n## Current beliefs\n{}\n\n## Recent history\n{}",
            desire.text,
            step.description,
            beliefs.to_prompt_section(),
            intention.history_prompt(self.history_window)
        );
        let prompt = ReasoningPrompt::new(NARRATIVE_INSTRUCTIONS, context);
        let outcome: NarrativeOutcome =
            propose_as(self.reasoner.as_ref(), &prompt, NARRATIVE_SCHEMA).await?;
        if outcome.success {
            Ok(outcome.output)
        } else {
            Err(AgentError::StepExecution {
                step: step.description.clone(),
                cause: outcome.output,
            })
        }
    }

    /// LLM 信念抽取；失败只记日志，不影响步骤结果
    #[allow(clippy::too_many_arguments)]
    async fn extract(
        &self,
        desire: &Desire,
        intention: &Intention,
        beliefs: &mut BeliefStore,
        events: &dyn EventSink,
        step: &Step,
        success: bool,
        text: &str,
    ) {
        let context = format!(
            "## Desire\n{}\n\n## Step\n{}\n\n## Outcome ({})\n{}\n\n## Current beliefs\n{}\n\n## Recent history\n{}",
            desire.text,
            step.description,
            if success { "success" } else { "failure" },
            truncate(text, 4000),
            beliefs.to_prompt_section(),
            intention.history_prompt(self.history_window)
        );
        let prompt = ReasoningPrompt::new(EXTRACTION_INSTRUCTIONS, context);
        match propose_as::<BeliefExtraction>(self.reasoner.as_ref(), &prompt, BELIEF_EXTRACTION_SCHEMA)
            .await
        {
            Ok(extraction) => {
                tracing::debug!(count = extraction.beliefs.len(), explanation = %extraction.explanation, "Beliefs extracted");
                for b in extraction.beliefs {
                    if b.name.trim().is_empty() {
                        continue;
                    }
                    write_belief(beliefs, events, b.name.trim(), &b.value, b.certainty, &step.description);
                }
            }
            Err(e) => tracing::warn!(desire = %desire.id, error = %e, "Belief extraction failed"),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
