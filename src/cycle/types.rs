//! 感知 / 决策结果类型
//!
//! LLM 输出中已知字段强类型化，其余字段收进 `extra`，原样写入账本与摘要。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::protocol::Params;

/// 感知输入的快照类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    #[default]
    UserQuery,
    StepResult,
    ErrorState,
}

/// 感知给出的下一步路由
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    #[default]
    Decision,
    Summarize,
    /// 未识别的路由一律按继续处理
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub route: Route,
    #[serde(default)]
    pub goal_achieved: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub snapshot_type: SnapshotType,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PerceptionResult {
    pub fn wants_summary(&self) -> bool {
        self.route == Route::Summarize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    #[serde(rename = "selected_tool", default)]
    pub command: Option<String>,
    #[serde(rename = "tool_parameters", default, deserialize_with = "null_as_default")]
    pub parameters: Params,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DecisionResult {
    /// 选中的命令；空字符串与 "none" 视为未选择
    pub fn selected_command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("none"))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
