//! 决策：根据感知结果与能力目录选出一条命令及其参数

use std::sync::Arc;

use serde_json::json;

use crate::core::AgentError;
use crate::cycle::parse::parse_llm_json;
use crate::cycle::prompts::TOOL_LIST_PLACEHOLDER;
use crate::cycle::schema::decision_schema_json;
use crate::cycle::steps_digest;
use crate::cycle::types::{DecisionResult, PerceptionResult};
use crate::llm::{LlmClient, Message};
use crate::protocol::Catalogue;
use crate::session::Step;

pub struct DecisionInput<'a> {
    pub query: &'a str,
    pub perception: &'a PerceptionResult,
    pub catalogue: &'a Catalogue,
    pub completed: Vec<&'a Step>,
    pub failed: Vec<&'a Step>,
}

/// `- name: description\n  Params: {..}`，按类别顺序
pub fn format_tool_list(catalogue: &Catalogue) -> String {
    catalogue
        .values()
        .flat_map(|group| group.iter())
        .map(|(name, entry)| {
            let params = serde_json::to_string(&entry.params).unwrap_or_default();
            format!("- {}: {}\n  Params: {}", name, entry.description, params)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Decision {
    llm: Arc<dyn LlmClient>,
    template: String,
}

impl Decision {
    pub fn new(llm: Arc<dyn LlmClient>, template: impl Into<String>) -> Self {
        Self {
            llm,
            template: template.into(),
        }
    }

    pub async fn decide(&self, input: DecisionInput<'_>) -> Result<DecisionResult, AgentError> {
        let system = self
            .template
            .replace(TOOL_LIST_PLACEHOLDER, &format_tool_list(input.catalogue));
        let payload = json!({
            "stage": "decision",
            "original_query": input.query,
            "perception": input.perception,
            "available_tools": input.catalogue,
            "completed_steps": steps_digest(&input.completed),
            "failed_steps": steps_digest(&input.failed),
        });
        let messages = vec![
            Message::system(format!(
                "{}\n\nOutput JSON schema:\n{}",
                system.trim(),
                decision_schema_json()
            )),
            Message::user(payload.to_string()),
        ];

        let raw = self.llm.complete(&messages).await?;
        let decision: DecisionResult = parse_llm_json(&raw)?;
        tracing::debug!(
            command = decision.selected_command().unwrap_or("<none>"),
            confidence = decision.confidence,
            "decision result"
        );
        Ok(decision)
    }
}
