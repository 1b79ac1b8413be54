//! 命令服务器（axum）
//!
//! - `POST /command`：信封 `{"command", "params"}` → `CommandResponse`（协议失败同样返回 200 + 结构化拒绝）
//! - `GET /tools`：按类别分组的能力目录
//! - `GET /history`：最近的命令历史
//! - `GET /sse`：连接时推送 `init`（能力目录），之后推送每条 `command_result`
//! - `GET /api/health`

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde_json::{json, Value};

use crate::core::ShutdownManager;
use crate::protocol::{Catalogue, ChannelSink, CommandResponse, CommandRouter, HistoryEntry, Params, ServerEvent};

pub const INIT_EVENT: &str = "init";

#[derive(Clone)]
pub struct ServerState {
    pub router: Arc<CommandRouter>,
    pub keepalive: Duration,
}

impl ServerState {
    pub fn new(router: Arc<CommandRouter>, keepalive: Duration) -> Self {
        Self { router, keepalive }
    }
}

pub fn app(state: ServerState) -> Router {
    Router::new()
        .route("/command", post(api_command))
        .route("/tools", get(api_tools))
        .route("/history", get(api_history))
        .route("/sse", get(api_sse))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state)
}

/// 监听并服务直到收到关闭信号；关闭时先断开全部 SSE 观察者，长连接才不会阻塞退出
pub async fn serve(state: ServerState, bind_addr: &str, shutdown: Arc<ShutdownManager>) -> anyhow::Result<()> {
    let broadcaster = state.router.broadcaster().clone();
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("pilot-server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let reason = shutdown.reason().await;
            tracing::info!(reason = %reason, "shutdown requested");
            let closed = broadcaster.close_all().await;
            tracing::info!(observers = closed, "closing event streams");
        })
        .await?;
    Ok(())
}

/// POST /command：缺少 command 字段时由路由返回 missing_command 拒绝；params 不是对象时返回 invalid_params
async fn api_command(State(state): State<ServerState>, Json(body): Json<Value>) -> Json<CommandResponse> {
    let command = body.get("command").and_then(Value::as_str).unwrap_or_default();
    let response = match body.get("params") {
        None | Some(Value::Null) => state.router.dispatch(command, Params::new()).await,
        Some(Value::Object(params)) => state.router.dispatch(command, params.clone()).await,
        Some(other) => {
            let message = format!("params must be a JSON object, got {}", other);
            state.router.reject_malformed(command, message).await
        }
    };
    Json(response)
}

async fn api_tools(State(state): State<ServerState>) -> Json<Catalogue> {
    Json(state.router.catalogue())
}

async fn api_history(State(state): State<ServerState>) -> Json<Vec<HistoryEntry>> {
    Json(state.router.history().await)
}

async fn api_sse(State(state): State<ServerState>) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let broadcaster = state.router.broadcaster().clone();
    let (sink, rx) = ChannelSink::pair();
    let id = broadcaster.subscribe(Arc::new(sink)).await;
    let init = ServerEvent::new(INIT_EVENT, json!({ "tools": state.router.catalogue() }));
    if let Err(e) = broadcaster.send_to(id, &init).await {
        tracing::warn!(observer = id, error = %e, "failed to send init event");
    }
    tracing::debug!(observer = id, "event stream opened");

    let event_stream = stream::unfold(rx, |mut rx| async move {
        let ev = rx.recv().await?;
        let event = Event::default().event(ev.event).data(ev.data.to_string());
        Some((Ok(event), rx))
    });
    Sse::new(event_stream).keep_alive(KeepAlive::new().interval(state.keepalive).text("keepalive"))
}
