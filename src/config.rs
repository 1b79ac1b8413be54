//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PILOT__*` 覆盖（双下划线表示嵌套，如 `PILOT__LLM__PROVIDER=mock`）。

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub executor: ExecutorSection,
    pub server: ServerSection,
}

/// [agent] 段：循环预算、重试、输出目录
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 顶层感知→决策→执行循环次数上限
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 单个执行步骤的重试上限
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 传输失败后的固定退避（毫秒）
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
}

fn default_max_steps() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_output_root() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("config/prompts")
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            output_root: default_output_root(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [executor] 段：命令在进程内执行（local）还是投递到 pilot-server（remote）
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_executor_mode")]
    pub mode: ExecutorMode,
    #[serde(default = "default_executor_url")]
    pub base_url: String,
    #[serde(default = "default_executor_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    Local,
    Remote,
}

fn default_executor_mode() -> ExecutorMode {
    ExecutorMode::Local
}

fn default_executor_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_executor_timeout() -> u64 {
    30
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            mode: default_executor_mode(),
            base_url: default_executor_url(),
            timeout_secs: default_executor_timeout(),
        }
    }
}

/// [server] 段：命令服务器
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// 命令历史环形缓冲容量
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// 短 ID 长度（取完整窗口 ID 末尾字符数）
    #[serde(default = "default_short_id_len")]
    pub short_id_len: usize,
    /// SSE keepalive 间隔（秒）
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_history_capacity() -> usize {
    100
}

fn default_short_id_len() -> usize {
    8
}

fn default_keepalive_secs() -> u64 {
    15
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            history_capacity: default_history_capacity(),
            short_id_len: default_short_id_len(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
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
        config::Environment::with_prefix("PILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
