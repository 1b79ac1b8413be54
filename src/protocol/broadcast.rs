//! 事件广播
//!
//! 观察者通过 SSE 等长连接订阅服务端事件。广播时先在锁内取观察者快照，
//! 在锁外逐个发送，发送失败的观察者在本轮结束后统一移除。
//! 单个慢/坏观察者不会阻断其他观察者，也不会影响命令结果。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// 服务端事件：`event` 为事件类型（init / command_result），`data` 为 JSON 负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("observer disconnected")]
    Disconnected,
    #[error("observer send failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &ServerEvent) -> Result<(), SinkError>;
}

/// 基于无界通道的观察者；接收端被丢弃即视为断开
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { tx }
    }

    pub fn pair() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: &ServerEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError::Disconnected)
    }
}

pub type ObserverId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

#[derive(Default)]
pub struct EventBroadcaster {
    observers: Mutex<HashMap<ObserverId, Arc<dyn EventSink>>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, sink: Arc<dyn EventSink>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().await.insert(id, sink);
        tracing::debug!(observer = id, "observer subscribed");
        id
    }

    pub async fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.lock().await.remove(&id).is_some()
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.lock().await.len()
    }

    /// 单独向某个观察者发送（SSE 建连时的 init 事件）
    pub async fn send_to(&self, id: ObserverId, event: &ServerEvent) -> Result<(), SinkError> {
        let sink = self.observers.lock().await.get(&id).cloned();
        match sink {
            Some(sink) => {
                let res = sink.send(event).await;
                if res.is_err() {
                    self.unsubscribe(id).await;
                }
                res
            }
            None => Err(SinkError::Disconnected),
        }
    }

    pub async fn broadcast(&self, event_type: &str, data: Value) -> BroadcastReport {
        let event = ServerEvent::new(event_type, data);
        let snapshot: Vec<(ObserverId, Arc<dyn EventSink>)> = self
            .observers
            .lock()
            .await
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();
        for (id, sink) in snapshot {
            match sink.send(&event).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(observer = id, error = %e, event = event_type, "dropping observer");
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut observers = self.observers.lock().await;
            for id in dead {
                if observers.remove(&id).is_some() {
                    report.pruned += 1;
                }
            }
        }
        report
    }

    /// 服务关闭时清空观察者（通道发送端被丢弃，SSE 流随之结束）
    pub async fn close_all(&self) -> usize {
        let mut observers = self.observers.lock().await;
        let n = observers.len();
        observers.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BrokenSink;

    #[async_trait]
    impl EventSink for BrokenSink {
        async fn send(&self, _event: &ServerEvent) -> Result<(), SinkError> {
            Err(SinkError::Failed("socket reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_observers() {
        let broadcaster = EventBroadcaster::new();
        let (a, mut rx_a) = ChannelSink::pair();
        let (b, mut rx_b) = ChannelSink::pair();
        broadcaster.subscribe(Arc::new(a)).await;
        broadcaster.subscribe(Arc::new(b)).await;

        let report = broadcaster.broadcast("command_result", json!({"command": "user"})).await;
        assert_eq!(report, BroadcastReport { delivered: 2, pruned: 0 });
        assert_eq!(rx_a.recv().await.unwrap().event, "command_result");
        assert_eq!(rx_b.recv().await.unwrap().data["command"], "user");
    }

    #[tokio::test]
    async fn test_failed_observer_is_pruned_others_still_delivered() {
        let broadcaster = EventBroadcaster::new();
        let (good, mut rx) = ChannelSink::pair();
        broadcaster.subscribe(Arc::new(good)).await;
        broadcaster.subscribe(Arc::new(BrokenSink)).await;
        let (gone, gone_rx) = ChannelSink::pair();
        broadcaster.subscribe(Arc::new(gone)).await;
        drop(gone_rx);

        let report = broadcaster.broadcast("command_result", json!({})).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 2);
        assert_eq!(broadcaster.observer_count().await, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_one_failing_observer_of_three() {
        let broadcaster = EventBroadcaster::new();
        let (first, mut rx_first) = ChannelSink::pair();
        let (last, mut rx_last) = ChannelSink::pair();
        broadcaster.subscribe(Arc::new(first)).await;
        broadcaster.subscribe(Arc::new(BrokenSink)).await;
        broadcaster.subscribe(Arc::new(last)).await;

        let report = broadcaster.broadcast("command_result", json!({"command": "move"})).await;
        assert_eq!(report, BroadcastReport { delivered: 2, pruned: 1 });
        assert_eq!(rx_first.recv().await.unwrap().data["command"], "move");
        assert_eq!(rx_last.recv().await.unwrap().data["command"], "move");
        assert_eq!(broadcaster.observer_count().await, 2);

        let again = broadcaster.broadcast("command_result", json!({"command": "close"})).await;
        assert_eq!(again, BroadcastReport { delivered: 2, pruned: 0 });
    }

    #[tokio::test]
    async fn test_broadcast_without_observers() {
        let broadcaster = EventBroadcaster::new();
        let report = broadcaster.broadcast("command_result", json!({})).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let broadcaster = EventBroadcaster::new();
        let (sink, mut rx) = ChannelSink::pair();
        let id = broadcaster.subscribe(Arc::new(sink)).await;
        broadcaster
            .send_to(id, &ServerEvent::new("init", json!({"tools": {}})))
            .await
            .unwrap();
        assert_eq!(broadcaster.close_all().await, 1);
        assert_eq!(rx.recv().await.unwrap().event, "init");
        assert!(rx.recv().await.is_none());
    }
}
