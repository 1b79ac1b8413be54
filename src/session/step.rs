//! 步骤定义与确定性 ID
//!
//! ID 由类别 + 1 起始的循环序号组成（如 `PERCEPTION_003`），序号补零到 3 位，
//! 便于在审计输出中 grep 与按循环排序。错误恢复分支追加 `_ERR_<n>`，重试执行追加 `_R<n>`。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 根步骤 ID，每个会话创建时自动生成
pub const ROOT_STEP_ID: &str = "ROOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Root,
    Perception,
    Decision,
    Execution,
}

impl StepKind {
    pub fn label(self) -> &'static str {
        match self {
            StepKind::Root => "ROOT",
            StepKind::Perception => "PERCEPTION",
            StepKind::Decision => "DECISION",
            StepKind::Execution => "EXECUTION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::Pending)
    }
}

/// 一条步骤记录；`from_step` 只有根步骤为空
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub from_step: Option<String>,
    pub status: StepStatus,
    pub result: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub(crate) fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        kind: StepKind,
        from_step: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind,
            from_step,
            status: StepStatus::Pending,
            result: None,
            timestamp: Utc::now(),
        }
    }
}

/// 主循环步骤 ID：`PERCEPTION_001`
pub fn step_id(kind: StepKind, cycle: usize) -> String {
    format!("{}_{:03}", kind.label(), cycle)
}

/// 错误恢复侧分支 ID：`PERCEPTION_001_ERR_1`
pub fn recovery_step_id(kind: StepKind, cycle: usize, round: u32) -> String {
    format!("{}_{:03}_ERR_{}", kind.label(), cycle, round)
}

/// 恢复后重试执行的 ID：`EXECUTION_001_R1`
pub fn retry_step_id(cycle: usize, retry: u32) -> String {
    format!("{}_{:03}_R{}", StepKind::Execution.label(), cycle, retry)
}
