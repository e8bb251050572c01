//! 两阶段规划：Desire → Intention
//!
//! Stage 1 决定「做什么」（子目标标题），Stage 2 对每个子目标独立展开「怎么做」（具体步骤），
//! 各子目标的步骤按顺序拼接成 Intention。结构修复由推理协作者负责；
//! 这里只对语义问题（如引用了不存在的能力）带修复说明重试，次数有上限。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bdi::belief::BeliefStore;
use crate::bdi::capability::{catalog_prompt, CapabilityInfo, CapabilityProvider};
use crate::bdi::desire::Desire;
use crate::bdi::intention::{Intention, Step, StepSpec};
use crate::bdi::reasoning::{propose_as, Reasoner, ReasoningPrompt};
use crate::core::AgentError;

pub const SUB_GOALS_SCHEMA: &str = "sub_goals";
pub const STEPS_SCHEMA: &str = "steps";

const STAGE1_INSTRUCTIONS: &str = "You are the deliberation stage of a BDI agent. \
Identify the high-level sub-goals (WHAT must happen) needed to fulfil the desire. \
Each sub-goal must be achievable by the agent through information processing or the listed capabilities. \
Return titles only, in execution order. Return an empty list if the desire cannot be planned yet.";

const STAGE2_INSTRUCTIONS: &str = "You are the means-end stage of a BDI agent. \
Expand the given sub-goal into an ordered list of concrete steps (HOW). \
Each step is either a call to one of the listed capabilities (is_tool_call = true, tool_name, tool_params) \
or an internal analysis task described as an action. \
Use current beliefs to fill parameters and skip discovery of facts that are already known.";

/// Stage 1 输出
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubGoalList {
    /// 高层子目标，按执行顺序
    pub sub_goals: Vec<String>,
}

/// Stage 2 输出
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepList {
    pub steps: Vec<StepSpec>,
}

/// 规划结果
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Planned(Intention),
    /// Stage 1 没有给出子目标：暂不能规划，不算错误
    Skipped { reason: String },
}

pub struct Planner {
    reasoner: Arc<dyn Reasoner>,
    capabilities: Arc<dyn CapabilityProvider>,
    /// 语义校验失败时的重试次数
    semantic_retries: u32,
}

impl Planner {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        capabilities: Arc<dyn CapabilityProvider>,
        semantic_retries: u32,
    ) -> Self {
        Self {
            reasoner,
            capabilities,
            semantic_retries,
        }
    }

    /// plan(desire, beliefs, catalog, guidance) → Intention
    pub async fn plan(
        &self,
        desire: &Desire,
        beliefs: &BeliefStore,
        guidance: &[String],
    ) -> Result<PlanOutcome, AgentError> {
        let catalog = self.capabilities.list_actions();
        let shared = shared_context(desire, beliefs, &catalog);

        let sub_goals = self.stage_one(desire, &shared, guidance).await?;
        if sub_goals.is_empty() {
            tracing::info!(desire = %desire.id, "Stage 1 produced no sub-goals, planning skipped");
            return Ok(PlanOutcome::Skipped {
                reason: "no sub-goals identified".to_string(),
            });
        }
        tracing::info!(desire = %desire.id, count = sub_goals.len(), "Stage 1 sub-goals");

        let mut steps = Vec::new();
        for sub_goal in &sub_goals {
            let expanded = self.stage_two(desire, &shared, sub_goal, &catalog).await?;
            if expanded.is_empty() {
                tracing::warn!(desire = %desire.id, sub_goal = %sub_goal, "Stage 2 produced no steps, skipping sub-goal");
                continue;
            }
            steps.extend(expanded.into_iter().map(Step::from));
        }

        if steps.is_empty() {
            return Err(AgentError::PlanGeneration {
                desire_id: desire.id.clone(),
                reason: "no executable steps for any sub-goal".to_string(),
            });
        }

        Ok(PlanOutcome::Planned(Intention::new(
            desire.id.clone(),
            desire.text.clone(),
            sub_goals,
            steps,
        )))
    }

    async fn stage_one(
        &self,
        desire: &Desire,
        shared: &str,
        guidance: &[String],
    ) -> Result<Vec<String>, AgentError> {
        let mut context = shared.to_string();
        if !guidance.is_empty() {
            context.push_str("\n\n## Strategic guidance from the user\n");
            context.push_str(
                &guidance
                    .iter()
                    .map(|g| format!("- {g}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        let prompt = ReasoningPrompt::new(STAGE1_INSTRUCTIONS, context);

        let list: SubGoalList = self
            .propose_checked(desire, &prompt, SUB_GOALS_SCHEMA, |_: &SubGoalList| Ok(()))
            .await?;
        Ok(list
            .sub_goals
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    async fn stage_two(
        &self,
        desire: &Desire,
        shared: &str,
        sub_goal: &str,
        catalog: &[CapabilityInfo],
    ) -> Result<Vec<StepSpec>, AgentError> {
        let context = format!("{shared}\n\n## Sub-goal to expand\n{sub_goal}");
        let prompt = ReasoningPrompt::new(STAGE2_INSTRUCTIONS, context);
        let list: StepList = self
            .propose_checked(desire, &prompt, STEPS_SCHEMA, |list: &StepList| {
                check_steps(&list.steps, catalog)
            })
            .await?;
        Ok(list.steps)
    }

    /// propose + 语义校验；协作者的结构错误（已修复过）直接成为 PlanGeneration，
    /// 只有语义校验失败时附带错误说明重试
    async fn propose_checked<T, F>(
        &self,
        desire: &Desire,
        prompt: &ReasoningPrompt,
        name: &'static str,
        check: F,
    ) -> Result<T, AgentError>
    where
        T: JsonSchema + serde::de::DeserializeOwned,
        F: Fn(&T) -> Result<(), String>,
    {
        let plan_error = |reason: String| AgentError::PlanGeneration {
            desire_id: desire.id.clone(),
            reason: format!("{name}: {reason}"),
        };
        let mut attempt_prompt = prompt.clone();
        let mut last_error = String::new();
        for attempt in 0..=self.semantic_retries {
            let value = propose_as::<T>(self.reasoner.as_ref(), &attempt_prompt, name)
                .await
                .map_err(|e| plan_error(e.to_string()))?;
            match check(&value) {
                Ok(()) => return Ok(value),
                Err(problem) => {
                    tracing::warn!(desire = %desire.id, schema = name, attempt, error = %problem, "Invalid plan output");
                    attempt_prompt = prompt.with_repair_note(&problem);
                    last_error = problem;
                }
            }
        }
        Err(plan_error(last_error))
    }
}

/// capability_call 步骤必须引用目录中的能力
fn check_steps(steps: &[StepSpec], catalog: &[CapabilityInfo]) -> Result<(), String> {
    for (i, step) in steps.iter().enumerate() {
        if step.description.trim().is_empty() {
            return Err(format!("step {} has an empty description", i + 1));
        }
        if !step.is_tool_call {
            continue;
        }
        match &step.tool_name {
            None => return Err(format!("step {} is a tool call without tool_name", i + 1)),
            Some(name) if !catalog.iter().any(|c| &c.name == name) => {
                return Err(format!(
                    "step {} uses unknown capability '{}'; available: {}",
                    i + 1,
                    name,
                    catalog
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn shared_context(desire: &Desire, beliefs: &BeliefStore, catalog: &[CapabilityInfo]) -> String {
    format!(
        "## Desire\n- ID: {}, Priority: {}, Description: {}\n\n## Current beliefs\n{}\n\n## Available capabilities\n{}",
        desire.id,
        desire.priority,
        desire.text,
        beliefs.to_prompt_section(),
        catalog_prompt(catalog)
    )
}
