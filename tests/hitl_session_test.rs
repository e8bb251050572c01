//! 人在回路集成测试
//!
//! 步骤失败后经 ScriptedHuman 给出指导，验证确认 / 编辑 / 取消流程以及各类计划变更在会话中的效果。

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bdi::bdi::hitl::GUIDANCE_SCHEMA;
    use bdi::bdi::mock::{ScriptedHuman, ScriptedProvider, ScriptedReasoner};
    use bdi::bdi::planner::{STEPS_SCHEMA, SUB_GOALS_SCHEMA};
    use bdi::bdi::reconsider::RECONSIDER_SCHEMA;
    use bdi::bdi::{DesireStatus, HitlState, MemorySink, StepStatus, HUMAN_GUIDANCE_SOURCE};
    use bdi::{BdiSession, SessionOptions};
    use serde_json::{json, Value};

    struct Fixture {
        reasoner: Arc<ScriptedReasoner>,
        provider: Arc<ScriptedProvider>,
        human: Arc<ScriptedHuman>,
        sink: Arc<MemorySink>,
        session: BdiSession,
        desire: String,
    }

    /// 两步计划，第一步的能力调用失败一次
    fn fixture(replies: &[&str], enable_hitl: bool) -> Fixture {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push(SUB_GOALS_SCHEMA, json!({"sub_goals": ["fetch and unpack"]}));
        reasoner.push(
            STEPS_SCHEMA,
            json!({"steps": [
                {"description": "download archive", "is_tool_call": true, "tool_name": "echo", "tool_params": {"text": "download"}},
                {"description": "unpack archive", "is_tool_call": true, "tool_name": "echo", "tool_params": {"text": "unpack"}}
            ]}),
        );
        reasoner.set_fallback(RECONSIDER_SCHEMA, json!({"valid": true}));
        let provider = Arc::new(ScriptedProvider::with_actions(&["echo"]));
        provider.push("echo", Err("404 not found"));
        let human = Arc::new(ScriptedHuman::new(replies.iter().copied()));
        let sink = Arc::new(MemorySink::new());

        let options = SessionOptions {
            enable_hitl,
            extract_beliefs: false,
            ..Default::default()
        };
        let mut session = BdiSession::new(reasoner.clone(), provider.clone(), sink.clone(), options)
            .with_human(human.clone());
        let desire = session.inject_desire("Fetch and unpack the archive", 0.5);
        Fixture {
            reasoner,
            provider,
            human,
            sink,
            session,
            desire,
        }
    }

    fn payloads(sink: &MemorySink, kind: &str) -> Vec<Value> {
        sink.records()
            .into_iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.payload)
            .collect()
    }

    #[tokio::test]
    async fn test_skip_guidance_moves_past_failed_step() {
        let mut f = fixture(&["skip the download, the file is already there", "y"], true);
        f.reasoner.push(
            GUIDANCE_SCHEMA,
            json!({"action": "SKIP_CURRENT", "summary": "Skip the download step"}),
        );

        f.session.run_cycle().await.unwrap();
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.cursor, 1);
        assert!(!intention.halted);
        assert_eq!(intention.steps[0].status, StepStatus::Failed);
        assert_eq!(f.sink.count("intention.updated"), 1);
        assert_eq!(payloads(&f.sink, "intention.updated")[0]["change"], "SKIP_CURRENT");

        let presented = f.human.presented();
        assert_eq!(presented.len(), 2);
        assert_eq!(presented[0].state, HitlState::AwaitGuidance);
        assert_eq!(presented[0].context.step_number, 1);
        assert_eq!(presented[0].context.total_steps, 2);
        assert!(presented[0].context.error.contains("404 not found"));
        assert_eq!(presented[1].state, HitlState::Confirm);
        assert!(presented[1].question.contains("Skip the download step"));

        let transitions: Vec<(String, String)> = payloads(&f.sink, "hitl.transition")
            .iter()
            .map(|p| {
                (
                    p["from"].as_str().unwrap_or_default().to_string(),
                    p["to"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                ("BUILD_CONTEXT".to_string(), "AWAIT_GUIDANCE".to_string()),
                ("AWAIT_GUIDANCE".to_string(), "INTERPRET".to_string()),
                ("INTERPRET".to_string(), "CONFIRM".to_string()),
                ("CONFIRM".to_string(), "APPLY".to_string()),
            ]
        );

        // 第二步执行成功，被跳过的步骤从未标记为完成
        f.session.run_cycle().await.unwrap();
        assert_eq!(
            f.session.desires().get(&f.desire).unwrap().status,
            DesireStatus::Satisfied
        );
        assert_eq!(f.provider.invocations().len(), 2);
        assert_eq!(f.provider.invocations()[1].1, json!({"text": "unpack"}));
    }

    #[tokio::test]
    async fn test_abort_guidance_writes_beliefs_and_resets_desire() {
        let mut f = fixture(&["the server is gone, give up on this plan", "yes"], true);
        f.reasoner.push(
            GUIDANCE_SCHEMA,
            json!({
                "action": "ABORT_INTENTION",
                "belief_updates": [{"name": "server_status", "value": "decommissioned"}],
                "summary": "Abandon the plan"
            }),
        );

        f.session.run_cycle().await.unwrap();
        assert!(f.session.intention(&f.desire).is_none());
        assert_eq!(
            f.session.desires().get(&f.desire).unwrap().status,
            DesireStatus::Pending
        );
        let belief = f.session.beliefs().get("server_status").unwrap();
        assert_eq!(belief.value, "decommissioned");
        assert_eq!(belief.certainty, 1.0);
        assert_eq!(belief.source, HUMAN_GUIDANCE_SOURCE);
        assert_eq!(payloads(&f.sink, "intention.retired")[0]["reason"], "aborted");
        // 放弃的意图不再重审
        assert_eq!(f.reasoner.calls_for(RECONSIDER_SCHEMA), 0);
    }

    #[tokio::test]
    async fn test_quit_cancels_and_halts() {
        let mut f = fixture(&[], true);

        f.session.run_cycle().await.unwrap();
        let intention = f.session.intention(&f.desire).unwrap();
        assert!(intention.halted);
        assert_eq!(intention.cursor, 0);
        assert_eq!(f.reasoner.calls_for(GUIDANCE_SCHEMA), 0);

        let updated = payloads(&f.sink, "intention.updated");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["change"], "halted");
        let last = payloads(&f.sink, "hitl.transition").pop().unwrap();
        assert_eq!(last["to"], "CANCELLED");

        // 挂起后不再询问人类
        f.session.run_cycle().await.unwrap();
        assert_eq!(f.human.presented().len(), 1);
        assert_eq!(f.provider.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_uninterpretable_guidance_leaves_plan_unchanged() {
        let mut f = fixture(&["hmm, not sure", "y"], true);

        f.session.run_cycle().await.unwrap();
        // 解析只请求一次，失败后按无动作处理
        assert_eq!(f.reasoner.calls_for(GUIDANCE_SCHEMA), 1);
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.cursor, 0);
        assert!(!intention.halted);
        assert_eq!(f.sink.count("intention.updated"), 0);
        assert!(f
            .session
            .beliefs()
            .get("error.guidance_interpretation.desire_1")
            .is_some());
        let kinds: Vec<Value> = payloads(&f.sink, "error")
            .into_iter()
            .map(|p| p["kind"].clone())
            .collect();
        assert!(kinds.contains(&json!("guidance_interpretation")));

        // 计划未变，下一轮重试失败的步骤
        f.session.run_cycle().await.unwrap();
        assert_eq!(f.provider.invocations()[1].1, json!({"text": "download"}));
        assert_eq!(f.session.intention(&f.desire).unwrap().cursor, 1);
    }

    #[tokio::test]
    async fn test_insert_before_runs_new_step_first() {
        let mut f = fixture(&["create the target directory first", "ok"], true);
        f.reasoner.push(
            GUIDANCE_SCHEMA,
            json!({
                "action": "INSERT_BEFORE",
                "steps": [{"description": "create directory", "is_tool_call": true, "tool_name": "echo", "tool_params": {"text": "mkdir"}}],
                "summary": "Create the directory before downloading"
            }),
        );

        f.session.run_cycle().await.unwrap();
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.steps.len(), 3);
        assert_eq!(intention.cursor, 0);
        assert_eq!(intention.steps[0].description, "create directory");
        assert_eq!(intention.steps[1].description, "download archive");

        f.session.run_cycle().await.unwrap();
        assert_eq!(f.provider.invocations()[1].1, json!({"text": "mkdir"}));
        assert_eq!(f.session.intention(&f.desire).unwrap().cursor, 1);
    }

    #[tokio::test]
    async fn test_edit_returns_to_guidance() {
        let mut f = fixture(&["skip it", "e", "just retry", "y"], true);
        f.reasoner.push(GUIDANCE_SCHEMA, json!({"action": "SKIP_CURRENT"}));
        f.reasoner.push(GUIDANCE_SCHEMA, json!({"action": "RETRY_AS_IS"}));

        f.session.run_cycle().await.unwrap();
        let presented = f.human.presented();
        let states: Vec<HitlState> = presented.iter().map(|p| p.state).collect();
        assert_eq!(
            states,
            vec![
                HitlState::AwaitGuidance,
                HitlState::Confirm,
                HitlState::AwaitGuidance,
                HitlState::Confirm
            ]
        );
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.cursor, 0);
        assert!(!intention.halted);
        assert_eq!(f.sink.count("hitl.transition"), 7);
    }

    #[tokio::test]
    async fn test_hitl_disabled_ignores_human_channel() {
        let mut f = fixture(&["skip", "y"], false);
        assert!(!f.session.hitl_enabled());

        f.session.run_cycle().await.unwrap();
        assert!(f.human.presented().is_empty());
        assert!(f.session.intention(&f.desire).unwrap().halted);
        assert_eq!(f.sink.count("hitl.transition"), 0);
    }

    fn step_descriptions(f: &Fixture) -> Vec<String> {
        f.session
            .intention(&f.desire)
            .unwrap()
            .steps
            .iter()
            .map(|s| s.description.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_update_beliefs_and_retry_keeps_plan() {
        let mut f = fixture(&["use the mirror, the main host is down", "y"], true);
        f.reasoner.push(
            GUIDANCE_SCHEMA,
            json!({
                "action": "UPDATE_BELIEFS_AND_RETRY",
                "belief_updates": [{"name": "download_host", "value": "mirror.example.org", "certainty": 0.8}],
                "summary": "Record the mirror and retry"
            }),
        );

        f.session.run_cycle().await.unwrap();
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.cursor, 0);
        assert!(!intention.halted);
        assert_eq!(
            step_descriptions(&f),
            vec!["download archive".to_string(), "unpack archive".to_string()]
        );
        assert_eq!(f.sink.count("intention.updated"), 0);
        let belief = f.session.beliefs().get("download_host").unwrap();
        assert_eq!(belief.value, "mirror.example.org");
        assert_eq!(belief.certainty, 0.8);
        assert_eq!(belief.source, HUMAN_GUIDANCE_SOURCE);

        // 同一步骤再次执行
        f.session.run_cycle().await.unwrap();
        assert_eq!(f.provider.invocations().len(), 2);
        assert_eq!(f.provider.invocations()[1].1, json!({"text": "download"}));
        assert_eq!(f.session.intention(&f.desire).unwrap().cursor, 1);
    }

    #[tokio::test]
    async fn test_replace_current_step_swaps_failed_step() {
        let mut f = fixture(&["fetch it with the mirror command instead", "y"], true);
        f.reasoner.push(
            GUIDANCE_SCHEMA,
            json!({
                "action": "REPLACE_CURRENT_STEP",
                "steps": [{"description": "download from mirror", "is_tool_call": true, "tool_name": "echo", "tool_params": {"text": "mirror"}}],
                "belief_updates": [{"name": "download_host", "value": "mirror"}],
                "summary": "Download from the mirror"
            }),
        );

        f.session.run_cycle().await.unwrap();
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.cursor, 0);
        assert!(!intention.halted);
        assert_eq!(
            step_descriptions(&f),
            vec!["download from mirror".to_string(), "unpack archive".to_string()]
        );
        let updated = payloads(&f.sink, "intention.updated");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["change"], "REPLACE_CURRENT_STEP");
        assert_eq!(updated[0]["steps"], 2);
        assert_eq!(f.session.beliefs().get("download_host").unwrap().value, "mirror");

        f.session.run_cycle().await.unwrap();
        assert_eq!(f.provider.invocations()[1].1, json!({"text": "mirror"}));
        assert_eq!(f.session.intention(&f.desire).unwrap().cursor, 1);
    }

    #[tokio::test]
    async fn test_insert_after_keeps_failed_step_current() {
        let mut f = fixture(&["retry, then verify the checksum", "y"], true);
        f.reasoner.push(
            GUIDANCE_SCHEMA,
            json!({
                "action": "INSERT_AFTER",
                "steps": [{"description": "verify checksum", "is_tool_call": true, "tool_name": "echo", "tool_params": {"text": "verify"}}],
                "belief_updates": [{"name": "checksum_required", "value": "true"}],
                "summary": "Verify the checksum after downloading"
            }),
        );

        f.session.run_cycle().await.unwrap();
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.cursor, 0);
        assert!(!intention.halted);
        assert_eq!(
            step_descriptions(&f),
            vec![
                "download archive".to_string(),
                "verify checksum".to_string(),
                "unpack archive".to_string()
            ]
        );
        let updated = payloads(&f.sink, "intention.updated");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["change"], "INSERT_AFTER");
        assert_eq!(f.session.beliefs().get("checksum_required").unwrap().value, "true");

        // 失败的步骤仍是当前步骤，新步骤紧随其后
        f.session.run_cycle().await.unwrap();
        assert_eq!(f.provider.invocations()[1].1, json!({"text": "download"}));
        f.session.run_cycle().await.unwrap();
        assert_eq!(f.provider.invocations()[2].1, json!({"text": "verify"}));
        assert_eq!(f.session.intention(&f.desire).unwrap().cursor, 2);
    }

    #[tokio::test]
    async fn test_replace_remainder_splices_new_plan() {
        let mut f = fixture(&["clone the repository instead of the archive", "y"], true);
        f.reasoner.push(
            GUIDANCE_SCHEMA,
            json!({
                "action": "REPLACE_REMAINDER",
                "steps": [
                    {"description": "clone repository", "is_tool_call": true, "tool_name": "echo", "tool_params": {"text": "clone"}},
                    {"description": "checkout tag", "is_tool_call": true, "tool_name": "echo", "tool_params": {"text": "checkout"}},
                    {"description": "build sources", "is_tool_call": true, "tool_name": "echo", "tool_params": {"text": "build"}}
                ],
                "belief_updates": [{"name": "source_kind", "value": "git"}],
                "summary": "Clone instead of downloading"
            }),
        );

        f.session.run_cycle().await.unwrap();
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.cursor, 0);
        assert!(!intention.halted);
        assert_eq!(
            step_descriptions(&f),
            vec![
                "clone repository".to_string(),
                "checkout tag".to_string(),
                "build sources".to_string()
            ]
        );
        let updated = payloads(&f.sink, "intention.updated");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["change"], "REPLACE_REMAINDER");
        assert_eq!(updated[0]["steps"], 3);
        assert_eq!(f.session.beliefs().get("source_kind").unwrap().value, "git");

        f.session.run_cycle().await.unwrap();
        assert_eq!(f.provider.invocations()[1].1, json!({"text": "clone"}));
        assert_eq!(f.session.intention(&f.desire).unwrap().cursor, 1);
    }

    #[tokio::test]
    async fn test_empty_replace_remainder_leaves_plan_unchanged() {
        let mut f = fixture(&["drop the rest", "y"], true);
        f.reasoner.push(
            GUIDANCE_SCHEMA,
            json!({"action": "REPLACE_REMAINDER", "steps": [], "summary": "Drop the rest"}),
        );

        f.session.run_cycle().await.unwrap();
        let intention = f.session.intention(&f.desire).unwrap();
        assert_eq!(intention.cursor, 0);
        assert!(!intention.halted);
        assert_eq!(
            step_descriptions(&f),
            vec!["download archive".to_string(), "unpack archive".to_string()]
        );
        assert_eq!(f.sink.count("intention.updated"), 0);
        assert_eq!(f.sink.count("intention.retired"), 0);
        assert_eq!(
            f.session.desires().get(&f.desire).unwrap().status,
            DesireStatus::InProgress
        );

        f.session.run_cycle().await.unwrap();
        assert_eq!(f.provider.invocations()[1].1, json!({"text": "download"}));
    }
}
