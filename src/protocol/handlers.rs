//! 命令执行器接口与窗口清单类型

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::envelope::Params;
use crate::protocol::registry::Category;

/// 执行器内部抛出的错误（区别于执行器正常返回的失败结果）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// 执行器的正常返回
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub success: bool,
    pub message: String,
    pub result: Option<Value>,
}

impl HandlerOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            result: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            result: None,
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// params 已通过校验，资源 ID 已展开为完整 ID
    async fn handle(&self, command: &str, params: &Params) -> Result<HandlerOutput, HandlerError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub window_id: String,
    pub title: String,
    pub app: String,
    pub monitor: u32,
    #[serde(default)]
    pub minimized: bool,
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

impl WindowInfo {
    pub fn new(window_id: impl Into<String>, title: impl Into<String>, app: impl Into<String>, monitor: u32) -> Self {
        Self {
            window_id: window_id.into(),
            title: title.into(),
            app: app.into(),
            monitor,
            minimized: false,
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppWindows {
    pub name: String,
    pub windows: Vec<WindowInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub id: u32,
    pub device: String,
    pub width: i64,
    pub height: i64,
    pub primary: bool,
    pub applications: Vec<AppWindows>,
}

/// 显示器 → 应用 → 窗口 三级清单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowInventory {
    pub monitors: Vec<MonitorInfo>,
}

impl WindowInventory {
    pub fn windows(&self) -> impl Iterator<Item = &WindowInfo> {
        self.monitors
            .iter()
            .flat_map(|m| m.applications.iter())
            .flat_map(|a| a.windows.iter())
    }

    pub fn window_ids(&self) -> Vec<String> {
        self.windows().map(|w| w.window_id.clone()).collect()
    }

    pub fn window_count(&self) -> usize {
        self.windows().count()
    }
}

/// 枚举当前存活的资源（窗口）
#[async_trait]
pub trait ResourceEnumerator: Send + Sync {
    async fn enumerate(&self) -> Result<WindowInventory, HandlerError>;
}

/// 每个类别一个执行器，外加窗口枚举器
#[derive(Clone)]
pub struct HandlerSet {
    pub window: Arc<dyn CommandHandler>,
    pub mouse: Arc<dyn CommandHandler>,
    pub keyboard: Arc<dyn CommandHandler>,
    pub system: Arc<dyn CommandHandler>,
    pub enumerator: Arc<dyn ResourceEnumerator>,
}

impl HandlerSet {
    /// 同一个后端承担全部类别
    pub fn uniform<T>(backend: Arc<T>) -> Self
    where
        T: CommandHandler + ResourceEnumerator + 'static,
    {
        Self {
            window: backend.clone(),
            mouse: backend.clone(),
            keyboard: backend.clone(),
            system: backend.clone(),
            enumerator: backend,
        }
    }

    pub fn for_category(&self, category: Category) -> &Arc<dyn CommandHandler> {
        match category {
            Category::WindowCommands => &self.window,
            Category::MouseCommands => &self.mouse,
            Category::KeyboardCommands => &self.keyboard,
            Category::SystemCommands => &self.system,
        }
    }
}
