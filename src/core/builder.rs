//! 会话构建器：从 AppConfig 组装 LLM、推理协作者、工具与事件出口，得到 BdiSession
//!
//! CLI、宿主运行器与集成测试共用同一套初始化逻辑。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bdi::{BdiSession, EventSink, FanoutSink, HumanChannel, TracingSink};
use crate::config::AppConfig;
use crate::llm::{create_deepseek_client, LlmClient, LlmReasoner, MockLlmClient, OpenAiClient};
use crate::tools::{
    EchoTool, ListDirTool, ReadFileTool, ShellTool, ToolExecutor, ToolRegistry, WriteFileTool,
};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient::new());
    }
    // 有 DeepSeek Key，或配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model), cfg.llm.base_url.as_deref()))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, None))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 会话构建器
pub struct SessionBuilder {
    config: AppConfig,
    workspace: PathBuf,
    llm: Option<Arc<dyn LlmClient>>,
    sinks: Vec<Arc<dyn EventSink>>,
    human: Option<Arc<dyn HumanChannel>>,
    desires: Vec<String>,
}

impl SessionBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            desires: config.agent.desires.clone(),
            config,
            workspace,
            llm: None,
            sinks: Vec::new(),
            human: None,
        }
    }

    /// 指定 LLM 客户端（不指定时按配置选择）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 追加事件出口；TracingSink 总是存在
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_human(mut self, human: Arc<dyn HumanChannel>) -> Self {
        self.human = Some(human);
        self
    }

    /// 追加初始目标（在配置中的目标之后）
    pub fn with_desires<I, S>(mut self, desires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.desires.extend(desires.into_iter().map(Into::into));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 内置工具集；shell 白名单为空时不注册 shell
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register(ReadFileTool::new(&self.workspace));
        tools.register(ListDirTool::new(&self.workspace));
        tools.register(WriteFileTool::new(&self.workspace));
        if !self.config.tools.shell.allowed_commands.is_empty() {
            tools.register(ShellTool::new(
                self.config.tools.shell.allowed_commands.clone(),
                &self.workspace,
                self.config.tools.tool_timeout_secs,
            ));
        }
        tools
    }

    pub fn build(self) -> BdiSession {
        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let reasoner = Arc::new(LlmReasoner::new(llm, self.config.reasoning.repair_attempts));
        let executor = Arc::new(ToolExecutor::new(
            self.build_tool_registry(),
            self.config.tools.tool_timeout_secs,
            self.config.tools.max_retries,
        ));

        let mut fanout = FanoutSink::new().with(Arc::new(TracingSink));
        for sink in self.sinks {
            fanout = fanout.with(sink);
        }

        let mut session = BdiSession::new(
            reasoner,
            executor,
            Arc::new(fanout),
            self.config.session_options(),
        );
        if let Some(human) = self.human {
            session = session.with_human(human);
        }
        if session.options().enable_hitl && !session.hitl_enabled() {
            tracing::warn!("HITL enabled in config but no human channel attached, failures will halt");
        }
        for text in self.desires {
            session.inject_desire(text, 0.5);
        }
        session
    }
}

/// 便捷函数：加载配置并准备工作目录
pub fn create_session_builder(config_path: Option<PathBuf>) -> anyhow::Result<SessionBuilder> {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let workspace = config.workspace_root();
    std::fs::create_dir_all(&workspace)?;
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    Ok(SessionBuilder::new(config, workspace))
}
