//! 命令执行器
//!
//! 控制循环与交互客户端只依赖 [`CommandExecutor`]：
//! - [`LocalExecutor`]：进程内直接调用 [`CommandRouter`](crate::protocol::CommandRouter)
//! - [`RemoteExecutor`]：经 HTTP 投递到 `pilot-server`
//!
//! `Err(TransportError)` 表示调用本身失败（可重试），
//! `Ok(CommandResponse { success: false, .. })` 表示执行器正常返回了失败结果。

pub mod local;
pub mod remote;
pub mod scene;

use async_trait::async_trait;

use crate::core::TransportError;
use crate::protocol::{Catalogue, CommandRequest, CommandResponse};

pub use local::LocalExecutor;
pub use remote::RemoteExecutor;
pub use scene::{ExecutorSceneProducer, SceneError, SceneProducer, SceneSnapshot, StaticSceneProducer};

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandResponse, TransportError>;

    /// 能力目录 `{category: {command: {description, params}}}`
    async fn capabilities(&self) -> Result<Catalogue, TransportError>;
}
