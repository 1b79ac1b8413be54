//! 优雅关闭
//!
//! 统一监听 Ctrl+C / SIGTERM：
//! - Agent 进程：取消当前会话，让控制循环走 finalize 并落盘摘要
//! - 命令服务器：停止接收新连接并断开全部 SSE 观察者
//!
//! 关闭原因通过 watch 通道发布：等待方拿到原因即开始收尾，并据此记录日志。

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupted,
    /// SIGTERM
    Terminated,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupted => f.write_str("interrupted"),
            ShutdownReason::Terminated => f.write_str("terminated"),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownManager {
    reason_tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = watch::channel(None);
        Self {
            reason_tx: Arc::new(reason_tx),
        }
    }

    /// 只有第一次调用的原因会保留
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.reason_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// 等待关闭并返回原因
    pub async fn reason(&self) -> ShutdownReason {
        let mut rx = self.reason_tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ShutdownReason::Terminated;
            }
        }
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::Interrupted);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Terminated);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reason_reaches_waiter() {
        let manager = ShutdownManager::new();
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.reason().await })
        };
        manager.shutdown(ShutdownReason::Terminated);
        assert_eq!(waiter.await.unwrap(), ShutdownReason::Terminated);
    }

    #[tokio::test]
    async fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        manager.shutdown(ShutdownReason::Interrupted);
        manager.shutdown(ShutdownReason::Terminated);
        assert_eq!(manager.reason().await, ShutdownReason::Interrupted);
        assert_eq!(ShutdownReason::Interrupted.to_string(), "interrupted");
    }
}
