//! 命令信封（本地调用与 HTTP 共用同一形状）
//!
//! 请求：`{"command": "...", "params": {...}}`
//! 响应：`{"success": bool, "message": "...", "result"?: {...}, "error"?: "...", "error_kind"?: "..."}`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 参数表：键唯一，值限定为 string / number / boolean
pub type Params = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub params: Params,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, params: Params) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }

    pub fn bare(command: impl Into<String>) -> Self {
        Self::new(command, Params::new())
    }
}

/// 协议层失败原因；`HandlerFault` 以外均属于校验类失败（不重试、不进入恢复分支）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorKind {
    MissingCommand,
    UnknownCommand,
    InvalidParams,
    ResourceNotFound,
    AmbiguousResource,
    /// 执行器内部抛错（如枚举窗口失败）
    HandlerFault,
}

impl ProtocolErrorKind {
    pub fn is_validation(self) -> bool {
        !matches!(self, ProtocolErrorKind::HandlerFault)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProtocolErrorKind>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            result: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::ok(message)
        }
    }

    /// 执行器正常返回但报告失败（结构化失败）
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(message)
        }
    }

    /// 协议层拒绝
    pub fn rejected(kind: ProtocolErrorKind, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: error.clone(),
            result: None,
            error: Some(error),
            error_kind: Some(kind),
        }
    }

    /// 校验类失败：不应重试，也不应进入错误恢复
    pub fn is_validation_failure(&self) -> bool {
        !self.success && self.error_kind.is_some_and(ProtocolErrorKind::is_validation)
    }

    /// 人类可读的结果描述：优先 message，其次 error
    pub fn describe(&self) -> &str {
        if !self.message.is_empty() {
            &self.message
        } else {
            self.error.as_deref().unwrap_or("Unknown error")
        }
    }
}
