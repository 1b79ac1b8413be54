//! 感知：根据场景快照、原始查询与已完成/失败步骤判断下一步路由

use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::AgentError;
use crate::cycle::parse::parse_llm_json;
use crate::cycle::schema::perception_schema_json;
use crate::cycle::steps_digest;
use crate::cycle::types::{PerceptionResult, SnapshotType};
use crate::llm::{LlmClient, Message};
use crate::session::Step;

pub struct PerceptionInput<'a> {
    pub snapshot_type: SnapshotType,
    pub query: &'a str,
    /// user_query 时为原始查询，step_result 时为场景文本，error_state 时为错误信息
    pub raw_input: String,
    pub scene: Value,
    pub completed: Vec<&'a Step>,
    pub failed: Vec<&'a Step>,
}

pub struct Perception {
    llm: Arc<dyn LlmClient>,
    template: String,
}

impl Perception {
    pub fn new(llm: Arc<dyn LlmClient>, template: impl Into<String>) -> Self {
        Self {
            llm,
            template: template.into(),
        }
    }

    pub async fn analyze(&self, input: PerceptionInput<'_>) -> Result<PerceptionResult, AgentError> {
        let payload = json!({
            "stage": "perception",
            "snapshot_type": input.snapshot_type,
            "original_query": input.query,
            "raw_input": input.raw_input,
            "pipeline_output": input.scene,
            "completed_steps": steps_digest(&input.completed),
            "failed_steps": steps_digest(&input.failed),
        });
        let messages = vec![
            Message::system(format!(
                "{}\n\nOutput JSON schema:\n{}",
                self.template.trim(),
                perception_schema_json()
            )),
            Message::user(payload.to_string()),
        ];

        let raw = self.llm.complete(&messages).await?;
        let mut result: PerceptionResult = parse_llm_json(&raw)?;
        result.snapshot_type = input.snapshot_type;
        tracing::debug!(route = ?result.route, goal_achieved = result.goal_achieved, "perception result");
        Ok(result)
    }
}
