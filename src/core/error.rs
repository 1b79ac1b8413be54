//! 错误类型
//!
//! 按失败性质分层：
//! - `TransportError`：执行器或网络调用本身失败（可重试，超限后对会话致命）
//! - `AgentError`：会话级致命错误，向上传播并走统一的 finalize / persist 路径
//! - `LedgerError`：步骤账本不变量被破坏（重复 ID、非法 lineage）
//!
//! 结构化失败（执行器返回 success=false）与协议校验失败不是 Rust 错误，
//! 它们以 `CommandResponse` 信封的形式返回，见 `protocol::envelope`。

use thiserror::Error;

use crate::llm::LlmError;

/// 执行器 / 网络层故障（非结构化失败）
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Executor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed executor response: {0}")]
    Decode(String),

    #[error("Executor timeout after {0}s")]
    Timeout(u64),

    #[error("Executor unavailable: {0}")]
    Unavailable(String),
}

/// 步骤账本错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Step already exists: {0}")]
    DuplicateStep(String),

    #[error("Step {step} references unknown lineage {from}")]
    UnknownLineage { step: String, from: String },

    #[error("Step {0} cannot be its own lineage")]
    SelfLineage(String),

    #[error("Only the root step may omit lineage: {0}")]
    MissingLineage(String),
}

/// Agent 会话级错误：出现即终止当前会话（仍会生成摘要并持久化）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Scene capture failed: {0}")]
    Scene(String),

    #[error("Command {command} failed after {attempts} transport retries: {source}")]
    TransportExhausted {
        command: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Retry budget exhausted for {step}: {message}")]
    RetryBudgetExhausted { step: String, message: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Failed to persist session summary: {0}")]
    Persist(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 供摘要与日志使用的短标签
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Llm(_) => "llm",
            AgentError::JsonParse(_) => "json_parse",
            AgentError::Scene(_) => "scene",
            AgentError::TransportExhausted { .. } => "transport",
            AgentError::RetryBudgetExhausted { .. } => "retry_budget",
            AgentError::Ledger(_) => "ledger",
            AgentError::Persist(_) => "persist",
            AgentError::Config(_) => "config",
            AgentError::Cancelled => "cancelled",
        }
    }
}
