//! 会话摘要产物
//!
//! 目录结构：`<output_root>/YYYY/MM/DD/<session_id>/session_summary.json`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::context::{CycleRecord, SessionStatus};
use crate::session::step::Step;

pub const SUMMARY_FILE_NAME: &str = "session_summary.json";

/// 持久化到磁盘的会话记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub query: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub final_summary: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<Step>,
    pub cycles: Vec<CycleRecord>,
    #[serde(default)]
    pub current_state: Map<String, Value>,
    /// 版本化全局变量：首次写入用原键，之后写入 `key__<n>`
    #[serde(default)]
    pub globals: Map<String, Value>,
    #[serde(default)]
    pub global_history: BTreeMap<String, Vec<Value>>,
    /// 最后一次采集的场景快照
    #[serde(default)]
    pub last_scene: Option<Value>,
    /// 账本渲染出的执行树
    #[serde(default)]
    pub execution_tree: String,
    /// 最后一个步骤回溯到 ROOT 的路径
    #[serde(default)]
    pub final_lineage: Vec<String>,
    #[serde(default)]
    pub token_usage: TokenCounts,
}

/// 会话期间 LLM 的累计 token 消耗
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl From<(u64, u64, u64)> for TokenCounts {
    fn from((prompt_tokens, completion_tokens, total_tokens): (u64, u64, u64)) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// 会话输出目录：按日期分层
pub fn output_folder(root: &Path, session_id: &str, at: DateTime<Utc>) -> PathBuf {
    root.join(at.year().to_string())
        .join(format!("{:02}", at.month()))
        .join(format!("{:02}", at.day()))
        .join(session_id)
}

pub fn load_summary(path: &Path) -> anyhow::Result<SessionSummary> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
