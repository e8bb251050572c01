//! Shell 工具：白名单命令，禁止危险子串
//!
//! 只看首词（如 ls、grep、cargo）是否在 [tools.shell].allowed_commands 中；在工作区目录下经 sh -c / cmd /C 执行。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

/// 即使首词在白名单中也不允许出现的子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:",
];

pub struct ShellTool {
    allowed_commands: BTreeSet<String>,
    working_dir: PathBuf,
    timeout_secs: u64,
    description: String,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, working_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        let allowed_commands: BTreeSet<String> = allowed_commands
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let description = format!(
            "Run an allow-listed shell command in the workspace. Allowed commands: {}.",
            allowed_commands.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        Self {
            allowed_commands,
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout_secs,
            description,
        }
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        if let Some(forbidden) = FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
            return Err(format!("Forbidden pattern: {forbidden}"));
        }
        match lower.split_whitespace().next() {
            None => Err("Empty command".to_string()),
            Some(name) if self.allowed_commands.contains(name) => Ok(()),
            Some(name) => Err(format!("Command '{name}' not in allowlist")),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute (first word must be allow-listed)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.check(command)?;
        tracing::info!(command = %command, "shell");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.working_dir).kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {}s", self.timeout_secs))?
            .map_err(|e| format!("Execution failed: {e}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(format!("Exit {:?}\nstderr: {}", output.status.code(), stderr));
        }
        Ok(if stderr.is_empty() {
            stdout
        } else {
            format!("{stdout}\nstderr: {stderr}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool::new(vec!["echo".into(), "ls".into()], ".", 5)
    }

    #[test]
    fn test_allowlist_and_forbidden() {
        let shell = tool();
        assert!(shell.check("echo hi").is_ok());
        assert!(shell.check("curl example.com").is_err());
        assert!(shell.check("ls; rm -rf /").is_err());
        assert!(shell.check("   ").is_err());
        assert!(shell.description().contains("echo, ls"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_allowed_command() {
        let out = tool()
            .execute(serde_json::json!({"command": "echo bdi"}))
            .await
            .unwrap();
        assert_eq!(out, "bdi");
    }
}
