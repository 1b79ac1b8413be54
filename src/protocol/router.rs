//! 命令路由
//!
//! 一次分发：查表 → 校验参数 → （窗口类）刷新短 ID 表并展开资源 ID → 调用类别执行器
//! → 记审计日志 → 写入有界历史 → 广播 `command_result`。
//! 协议层失败（未知命令、参数错误、资源不存在/有歧义）直接返回结构化拒绝，不触达执行器。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::protocol::broadcast::EventBroadcaster;
use crate::protocol::envelope::{CommandResponse, Params, ProtocolErrorKind};
use crate::protocol::handlers::HandlerSet;
use crate::protocol::registry::{CapabilityRegistry, Catalogue};
use crate::protocol::resolver::{Resolution, ShortIdResolver};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const COMMAND_RESULT_EVENT: &str = "command_result";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: String,
    pub params: Params,
    pub result: CommandResponse,
    pub timestamp: DateTime<Utc>,
}

pub struct CommandRouter {
    registry: Arc<CapabilityRegistry>,
    handlers: HandlerSet,
    resolver: ShortIdResolver,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_capacity: usize,
    broadcaster: Arc<EventBroadcaster>,
}

impl CommandRouter {
    pub fn new(registry: Arc<CapabilityRegistry>, handlers: HandlerSet) -> Self {
        Self {
            registry,
            handlers,
            resolver: ShortIdResolver::default(),
            history: Mutex::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            broadcaster: Arc::new(EventBroadcaster::new()),
        }
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    pub fn with_short_id_len(mut self, len: usize) -> Self {
        self.resolver = ShortIdResolver::new(len);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<EventBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn catalogue(&self) -> Catalogue {
        self.registry.catalogue()
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    /// 最近的命令历史，按时间先后
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn dispatch(&self, command: &str, params: Params) -> CommandResponse {
        let command = command.trim();
        if command.is_empty() {
            return CommandResponse::rejected(ProtocolErrorKind::MissingCommand, "No command provided");
        }

        let started = Instant::now();
        let response = self.route(command, &params).await;
        self.settle(command, params, response, started).await
    }

    /// 请求体里 params 无法解析时的拒绝：保留命令名，与普通分发一样审计、记录并广播
    pub async fn reject_malformed(&self, command: &str, message: impl Into<String>) -> CommandResponse {
        let command = command.trim();
        if command.is_empty() {
            return CommandResponse::rejected(ProtocolErrorKind::MissingCommand, "No command provided");
        }
        let response = CommandResponse::rejected(ProtocolErrorKind::InvalidParams, message);
        self.settle(command, Params::new(), response, Instant::now()).await
    }

    async fn settle(&self, command: &str, params: Params, response: CommandResponse, started: Instant) -> CommandResponse {
        let audit = json!({
            "event": "command_audit",
            "command": command,
            "ok": response.success,
            "error_kind": response.error_kind,
            "duration_ms": started.elapsed().as_millis() as u64,
            "message_preview": preview(response.describe(), 160),
        });
        tracing::info!(audit = %audit.to_string(), "command");

        self.record(command, params, response.clone()).await;
        response
    }

    async fn route(&self, command: &str, params: &Params) -> CommandResponse {
        let Some(spec) = self.registry.lookup(command) else {
            return CommandResponse::rejected(
                ProtocolErrorKind::UnknownCommand,
                format!("Unknown command: {}", command),
            );
        };
        if let Err(msg) = spec.validate(params) {
            return CommandResponse::rejected(ProtocolErrorKind::InvalidParams, msg);
        }

        let mut effective = params.clone();
        if spec.category.is_resource_targeted() {
            let enumerator = self.handlers.enumerator.as_ref();
            match spec.target {
                Some(key) => {
                    let candidate = effective.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
                    let resolution = match self.resolver.refresh_and_resolve(enumerator, &candidate).await {
                        Ok(r) => r,
                        Err(e) => {
                            return CommandResponse::rejected(
                                ProtocolErrorKind::HandlerFault,
                                format!("Failed to enumerate windows: {}", e),
                            )
                        }
                    };
                    match resolution {
                        Resolution::Full(full) => {
                            effective.insert(key.to_string(), Value::String(full));
                        }
                        Resolution::Expanded { short, full } => {
                            tracing::debug!(short = %short, full = %full, "expanded short id");
                            effective.insert(key.to_string(), Value::String(full));
                        }
                        Resolution::Ambiguous { short, candidates } => {
                            return CommandResponse::rejected(
                                ProtocolErrorKind::AmbiguousResource,
                                format!(
                                    "Window ID '{}' is ambiguous, matches: {}",
                                    short,
                                    candidates.join(", ")
                                ),
                            )
                        }
                        Resolution::NotFound(id) => {
                            return CommandResponse::rejected(
                                ProtocolErrorKind::ResourceNotFound,
                                format!("Window ID '{}' not found (full or short ID)", id),
                            )
                        }
                    }
                }
                None => {
                    if let Err(e) = self.resolver.refresh(enumerator).await {
                        return CommandResponse::rejected(
                            ProtocolErrorKind::HandlerFault,
                            format!("Failed to enumerate windows: {}", e),
                        );
                    }
                }
            }
        }

        let handler = self.handlers.for_category(spec.category);
        match handler.handle(command, &effective).await {
            Ok(out) => CommandResponse {
                success: out.success,
                message: out.message,
                result: out.result,
                error: None,
                error_kind: None,
            },
            Err(e) => CommandResponse::rejected(ProtocolErrorKind::HandlerFault, e.to_string()),
        }
    }

    async fn record(&self, command: &str, params: Params, result: CommandResponse) {
        let payload = json!({
            "command": command,
            "params": params,
            "result": result,
        });
        {
            let mut history = self.history.lock().await;
            history.push_back(HistoryEntry {
                command: command.to_string(),
                params,
                result,
                timestamp: Utc::now(),
            });
            while history.len() > self.history_capacity {
                history.pop_front();
            }
        }
        self.broadcaster.broadcast(COMMAND_RESULT_EVENT, payload).await;
    }
}

fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}…", head)
    }
}
