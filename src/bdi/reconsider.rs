//! 计划重审：根据最新信念判断剩余步骤是否仍是通往 Desire 的合理路径
//!
//! 本身没有副作用，丢弃意图由循环完成；同样的输入重复调用得到同样的结论。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bdi::belief::BeliefStore;
use crate::bdi::desire::Desire;
use crate::bdi::intention::Intention;
use crate::bdi::reasoning::{propose_as, Reasoner, ReasoningPrompt};
use crate::core::AgentError;

pub const RECONSIDER_SCHEMA: &str = "reconsider_verdict";

const RECONSIDER_INSTRUCTIONS: &str = "You monitor a BDI agent's committed plan. \
Given the desire, the current beliefs, the recent step history and the remaining steps, \
decide whether the remaining plan is still an appropriate way to achieve the desire. \
Answer valid = false only when beliefs show the plan cannot work or is no longer needed.";

/// 重审结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReconsiderVerdict {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

pub struct Reconsiderer {
    reasoner: Arc<dyn Reasoner>,
    history_window: usize,
}

impl Reconsiderer {
    pub fn new(reasoner: Arc<dyn Reasoner>, history_window: usize) -> Self {
        Self {
            reasoner,
            history_window,
        }
    }

    /// reconsider(intention, beliefs, history) → verdict；输出格式错误时返回 Reconsideration 错误，
    /// 由调用方按「视为有效」处理
    pub async fn reconsider(
        &self,
        desire: &Desire,
        intention: &Intention,
        beliefs: &BeliefStore,
    ) -> Result<ReconsiderVerdict, AgentError> {
        let context = format!(
            "## Desire\n{} ({})\n\n## Intention\n{}\n\n## Current beliefs\n{}\n\n## Recent history\n{}\n\n## Remaining steps\n{}",
            desire.text,
            desire.id,
            intention.description,
            beliefs.to_prompt_section(),
            intention.history_prompt(self.history_window),
            intention.remaining_prompt()
        );
        let prompt = ReasoningPrompt::new(RECONSIDER_INSTRUCTIONS, context);
        let verdict: ReconsiderVerdict =
            propose_as(self.reasoner.as_ref(), &prompt, RECONSIDER_SCHEMA)
                .await
                .map_err(|e| AgentError::Reconsideration(e.to_string()))?;
        tracing::info!(desire = %desire.id, valid = verdict.valid, reason = ?verdict.reason, "Reconsideration");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdi::desire::DesireRegistry;
    use crate::bdi::intention::Step;
    use crate::bdi::mock::ScriptedReasoner;
    use serde_json::json;

    fn fixture() -> (Desire, Intention) {
        let mut registry = DesireRegistry::new();
        let id = registry.add("deploy", 0.5);
        let desire = registry.get(&id).unwrap().clone();
        let intention = Intention::new(id, "deploy", vec![], vec![Step::narrative("push")]);
        (desire, intention)
    }

    #[tokio::test]
    async fn test_verdict_is_repeatable() {
        let (desire, intention) = fixture();
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.set_fallback(RECONSIDER_SCHEMA, json!({"valid": false, "reason": "server gone"}));
        let reconsiderer = Reconsiderer::new(reasoner, 5);
        let beliefs = BeliefStore::new();
        let first = reconsiderer.reconsider(&desire, &intention, &beliefs).await.unwrap();
        let second = reconsiderer.reconsider(&desire, &intention, &beliefs).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.valid);
    }

    #[tokio::test]
    async fn test_malformed_is_reconsideration_error() {
        let (desire, intention) = fixture();
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push(RECONSIDER_SCHEMA, json!({"verdict": "dunno"}));
        let err = Reconsiderer::new(reasoner, 5)
            .reconsider(&desire, &intention, &BeliefStore::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Reconsideration(_)));
    }

    #[tokio::test]
    async fn test_prompt_lists_remaining_steps() {
        let (desire, intention) = fixture();
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push(RECONSIDER_SCHEMA, json!({"valid": true}));
        Reconsiderer::new(reasoner.clone(), 5)
            .reconsider(&desire, &intention, &BeliefStore::new())
            .await
            .unwrap();
        assert!(reasoner.calls()[0].1.context.contains("1. push"));
    }
}
