//! 工具执行器：能力提供方的实现
//!
//! 每次尝试都施加超时并输出一行结构化审计日志（JSON）；失败后最多重试 max_retries 次，
//! 预算用尽返回 ToolInvocation { capability, cause }。未知工具不重试。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;

use crate::bdi::capability::{CapabilityInfo, CapabilityProvider};
use crate::core::AgentError;
use crate::tools::ToolRegistry;

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    max_retries: u32,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64, max_retries: u32) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        }
    }

    /// 以毫秒精度设置超时（测试用）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 单次尝试：超时 + 审计
    async fn attempt(&self, tool_name: &str, args: Value, attempt: u32) -> Result<String, String> {
        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "attempt": attempt,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(format!("timed out after {}ms", self.timeout.as_millis())),
        }
    }
}

#[async_trait]
impl CapabilityProvider for ToolExecutor {
    async fn invoke(&self, name: &str, params: Value) -> Result<String, AgentError> {
        if !self.registry.contains(name) {
            return Err(AgentError::ToolInvocation {
                capability: name.to_string(),
                cause: format!("Unknown tool: {name}"),
            });
        }
        let mut cause = String::new();
        for attempt in 0..=self.max_retries {
            match self.attempt(name, params.clone(), attempt).await {
                Ok(out) => return Ok(out),
                Err(e) => {
                    tracing::warn!(tool = %name, attempt, error = %e, "Tool attempt failed");
                    cause = e;
                }
            }
        }
        Err(AgentError::ToolInvocation {
            capability: name.to_string(),
            cause,
        })
    }

    fn list_actions(&self) -> Vec<CapabilityInfo> {
        self.registry.list_actions()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
