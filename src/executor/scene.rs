//! 场景快照
//!
//! 视觉检测管线不在本 crate 内；感知阶段只消费一个不透明的 JSON 场景描述。
//! 未接入视觉管线时，用 `get_windows` 的窗口清单充当场景。

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::executor::CommandExecutor;
use crate::protocol::CommandRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub captured_at: DateTime<Utc>,
    pub source: String,
    pub payload: Value,
}

impl SceneSnapshot {
    pub fn new(source: impl Into<String>, payload: Value) -> Self {
        Self {
            captured_at: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SceneError {
    #[error("scene producer unavailable: {0}")]
    Unavailable(String),
    #[error("scene capture rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SceneProducer: Send + Sync {
    async fn capture(&self) -> Result<SceneSnapshot, SceneError>;
}

/// 通过执行器拉取窗口清单作为场景
pub struct ExecutorSceneProducer {
    executor: Arc<dyn CommandExecutor>,
}

impl ExecutorSceneProducer {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl SceneProducer for ExecutorSceneProducer {
    async fn capture(&self) -> Result<SceneSnapshot, SceneError> {
        let resp = self
            .executor
            .execute(&CommandRequest::bare("get_windows"))
            .await
            .map_err(|e| SceneError::Unavailable(e.to_string()))?;
        if !resp.success {
            return Err(SceneError::Rejected(resp.describe().to_string()));
        }
        Ok(SceneSnapshot::new(
            "window_inventory",
            json!({
                "summary": resp.message,
                "windows": resp.result.unwrap_or(Value::Null),
            }),
        ))
    }
}

/// 按顺序返回预置场景，最后一个重复使用（测试与演示）
pub struct StaticSceneProducer {
    frames: Mutex<VecDeque<Value>>,
    last: Mutex<Value>,
}

impl StaticSceneProducer {
    pub fn new(payload: Value) -> Self {
        Self::sequence(vec![payload])
    }

    pub fn sequence(frames: Vec<Value>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            last: Mutex::new(Value::Null),
        }
    }
}

#[async_trait]
impl SceneProducer for StaticSceneProducer {
    async fn capture(&self) -> Result<SceneSnapshot, SceneError> {
        let next = self.frames.lock().await.pop_front();
        let mut last = self.last.lock().await;
        if let Some(frame) = next {
            *last = frame;
        }
        Ok(SceneSnapshot::new("static", last.clone()))
    }
}
