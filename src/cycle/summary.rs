//! 总结：读取账本中已完成/失败步骤与最近一次感知，生成人类可读的结果叙述
//!
//! LLM 调用失败时退化为根据账本拼出的固定格式叙述，保证每个会话都有摘要。

use std::sync::Arc;

use serde_json::json;

use crate::cycle::steps_digest;
use crate::cycle::types::PerceptionResult;
use crate::llm::{LlmClient, Message};
use crate::session::{SessionStatus, Step};

pub struct SummaryInput<'a> {
    pub query: &'a str,
    pub status: SessionStatus,
    pub error: Option<&'a str>,
    pub perception: Option<&'a PerceptionResult>,
    pub completed: Vec<&'a Step>,
    pub failed: Vec<&'a Step>,
}

pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    template: String,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>, template: impl Into<String>) -> Self {
        Self {
            llm,
            template: template.into(),
        }
    }

    /// 共享 LLM 客户端的累计 token 消耗
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn summarize(&self, input: SummaryInput<'_>) -> String {
        let payload = json!({
            "stage": "summary",
            "original_query": input.query,
            "termination": input.status,
            "error": input.error,
            "completed_steps": steps_digest(&input.completed),
            "failed_steps": steps_digest(&input.failed),
            "perception": input.perception,
        });
        let messages = vec![
            Message::system(format!(
                "Current Time: {}\n\n{}",
                chrono::Utc::now().to_rfc3339(),
                self.template.trim()
            )),
            Message::user(payload.to_string()),
        ];

        match self.llm.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_narrative(&input),
            Err(e) => {
                tracing::warn!(error = %e, "summary generation failed, using ledger narrative");
                fallback_narrative(&input)
            }
        }
    }
}

/// 不依赖 LLM 的叙述
pub fn fallback_narrative(input: &SummaryInput<'_>) -> String {
    let outcome = match input.status {
        SessionStatus::Completed => "The goal was judged complete.".to_string(),
        SessionStatus::Stopped => "The agent stopped because no further command was selected.".to_string(),
        SessionStatus::BudgetExhausted => {
            "The step budget was exhausted before the goal was judged complete.".to_string()
        }
        SessionStatus::Cancelled => "The session was cancelled.".to_string(),
        SessionStatus::Failed => format!(
            "The session failed: {}.",
            input.error.unwrap_or("unknown error")
        ),
        SessionStatus::Running => "The session ended without a recorded outcome.".to_string(),
    };
    let mut text = format!(
        "Query: {}\n{} {} step(s) completed, {} failed.",
        input.query,
        outcome,
        input.completed.len(),
        input.failed.len()
    );
    for step in &input.failed {
        text.push_str(&format!("\n- {} failed: {}", step.id, step.description));
    }
    text
}
