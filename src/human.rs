//! 控制台人类通道：stdout 展示，异步读取 stdin（不阻塞任何线程）
//!
//! 输入 `quit` / `q` 或 stdin 关闭时返回 Quit。

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::bdi::{HitlState, HumanChannel, HumanPrompt, HumanReply};

pub struct ConsoleHuman {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleHuman {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for ConsoleHuman {
    fn default() -> Self {
        Self::new()
    }
}

/// 把 stdin 的一行转成回复
fn to_reply(line: Option<String>) -> HumanReply {
    match line {
        None => HumanReply::Quit,
        Some(line) => {
            let text = line.trim();
            if text.eq_ignore_ascii_case("quit") || text.eq_ignore_ascii_case("q") {
                HumanReply::Quit
            } else {
                HumanReply::Text(text.to_string())
            }
        }
    }
}

#[async_trait]
impl HumanChannel for ConsoleHuman {
    async fn present(&self, prompt: &HumanPrompt) {
        let mut out = String::new();
        if prompt.state == HitlState::AwaitGuidance {
            out.push_str("\n=== Step failed, guidance needed ===\n");
            out.push_str(&prompt.context.render());
            out.push('\n');
        }
        out.push_str(&format!("\n{}\n> ", prompt.question));
        let mut stdout = tokio::io::stdout();
        if let Err(e) = stdout.write_all(out.as_bytes()).await {
            tracing::warn!(error = %e, "Failed to write prompt");
        }
        let _ = stdout.flush().await;
    }

    async fn await_text(&self) -> HumanReply {
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(line) => to_reply(line),
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                HumanReply::Quit
            }
        }
    }
}
