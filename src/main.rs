//! BDI 命令行入口
//!
//! `bdi [goal ...]`：按配置与命令行目标构建会话，运行直到所有目标落定或达到 max_cycles。
//! Ctrl+C 只在两轮之间生效；开启 HITL 时在控制台收集人类指导；结束时打印摘要并按配置保存快照。

use std::sync::Arc;

use anyhow::Context;
use bdi::core::create_session_builder;
use bdi::human::ConsoleHuman;
use bdi::memory::SnapshotStore;
use bdi::BdiSession;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn print_summary(session: &BdiSession) {
    println!("\n=== Session summary (cycle {}) ===", session.cycle());
    for desire in session.desires().iter() {
        let progress = session
            .intention(&desire.id)
            .map(|i| format!(" [{}/{} steps]", i.cursor, i.steps.len()))
            .unwrap_or_default();
        println!("- {} ({}): {}{}", desire.id, desire.status, desire.text, progress);
    }
    println!("\nBeliefs:\n{}", session.beliefs().to_prompt_section());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer())
        .init();

    let goals: Vec<String> = std::env::args().skip(1).collect();
    let builder = create_session_builder(None).context("Failed to prepare session")?;
    let config = builder.config().clone();
    let snapshot_store = config.app.snapshot_path.as_ref().map(SnapshotStore::new);

    let mut builder = builder.with_desires(goals);
    if config.agent.enable_hitl {
        builder = builder.with_human(Arc::new(ConsoleHuman::new()));
    }
    let mut session = builder.build();

    if let Some(store) = &snapshot_store {
        if let Some(snapshot) = store.load().context("Failed to load snapshot")? {
            let new_goals: Vec<String> = session.desires().iter().map(|d| d.text.clone()).collect();
            session.restore(snapshot);
            for text in new_goals {
                if !session.desires().iter().any(|d| d.text == text) {
                    session.inject_desire(text, 0.5);
                }
            }
        }
    }

    if session.desires().is_empty() {
        println!("Usage: bdi <goal> [goal ...]  (or set [agent].desires in config/default.toml)");
        return Ok(());
    }

    session.supervisor().install_signal_handlers();
    let cycles = session
        .run_until_settled(config.agent.max_cycles)
        .await
        .context("Session aborted")?;
    tracing::info!(cycles, stopped = session.is_stopped(), "Run finished");

    print_summary(&session);

    if let Some(store) = &snapshot_store {
        store
            .save(&session.snapshot_state())
            .context("Failed to save snapshot")?;
    }
    Ok(())
}
