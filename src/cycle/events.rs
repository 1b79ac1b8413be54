//! 循环过程事件：供 CLI / 前端实时展示感知、决策、执行与恢复

use serde::Serialize;
use serde_json::Value;

use crate::cycle::types::{Route, SnapshotType};
use crate::session::SessionStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    SessionStarted { session_id: String, query: String },
    /// 顶层循环第几轮（从 1 开始）
    CycleStarted { cycle: usize, max_steps: usize },
    Perceived {
        step_id: String,
        snapshot_type: SnapshotType,
        route: Route,
        reasoning: String,
    },
    Decided {
        step_id: String,
        command: Option<String>,
        params: Value,
        confidence: f64,
    },
    Executing {
        step_id: String,
        command: String,
        params: Value,
        attempt: u32,
    },
    Executed {
        step_id: String,
        success: bool,
        message: String,
    },
    /// 传输失败，退避后重试
    TransportRetry { step_id: String, attempt: u32, error: String },
    /// 进入错误恢复分支或放弃当前命令
    Recovery { step_id: String, detail: String },
    Finished {
        status: SessionStatus,
        summary: String,
        summary_path: Option<String>,
    },
    Error { text: String },
}
