//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BDI__*` 覆盖（双下划线表示嵌套，如 `BDI__AGENT__ENABLE_HITL=true`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::bdi::SessionOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub agent: AgentSection,
    pub reasoning: ReasoningSection,
}

/// [app] 段：应用名、工作目录、快照路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 设置后 CLI 启动时尝试恢复、结束时保存会话快照
    pub snapshot_path: Option<PathBuf>,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: ProviderModelSection,
    #[serde(default)]
    pub openai: ProviderModelSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: ProviderModelSection::default(),
            openai: ProviderModelSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

/// 按后端覆盖的模型名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderModelSection {
    pub model: Option<String>,
}

/// [tools] 段：工具超时、重试预算、Shell 白名单
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 失败后的重试次数（总尝试 = 1 + max_retries）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_retries: default_max_retries(),
            shell: ShellSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

/// [tools.shell] 段：允许执行的命令名（仅首词）；为空则不注册 shell
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
        }
    }
}

fn default_allowed_commands() -> Vec<String> {
    ["ls", "grep", "cat", "head", "tail", "wc", "find", "echo", "date"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// [agent] 段：初始目标与循环策略
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 初始目标（优先级 0.5）
    #[serde(default)]
    pub desires: Vec<String>,
    /// 传给 Stage 1 的策略指导
    #[serde(default)]
    pub guidance: Vec<String>,
    #[serde(default)]
    pub enable_hitl: bool,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// 0 表示挂起的意图不会自动判定失败
    #[serde(default = "default_halted_cycle_limit")]
    pub halted_cycle_limit: u32,
    #[serde(default = "default_true")]
    pub extract_beliefs: bool,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            desires: Vec::new(),
            guidance: Vec::new(),
            enable_hitl: false,
            max_cycles: default_max_cycles(),
            halted_cycle_limit: default_halted_cycle_limit(),
            extract_beliefs: true,
            history_window: default_history_window(),
        }
    }
}

fn default_max_cycles() -> u32 {
    20
}

fn default_halted_cycle_limit() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_history_window() -> usize {
    5
}

/// [reasoning] 段：结构化输出的修复预算
#[derive(Debug, Clone, Deserialize)]
pub struct ReasoningSection {
    /// LlmReasoner 内部的修复次数（规划、指导解析、重审共用）
    #[serde(default = "default_one")]
    pub repair_attempts: u32,
    /// 规划器在语义校验失败后的重试次数
    #[serde(default = "default_one")]
    pub plan_retries: u32,
}

impl Default for ReasoningSection {
    fn default() -> Self {
        Self {
            repair_attempts: 1,
            plan_retries: 1,
        }
    }
}

fn default_one() -> u32 {
    1
}

impl AppConfig {
    /// 沙箱根目录
    pub fn workspace_root(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            enable_hitl: self.agent.enable_hitl,
            halted_cycle_limit: self.agent.halted_cycle_limit,
            extract_beliefs: self.agent.extract_beliefs,
            history_window: self.agent.history_window,
            guidance: self.agent.guidance.clone(),
            plan_retries: self.reasoning.plan_retries,
        }
    }
}

/// 从 config 目录加载配置，环境变量 BDI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BDI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BDI")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("agent.desires")
            .with_list_parse_key("agent.guidance")
            .with_list_parse_key("tools.shell.allowed_commands")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
