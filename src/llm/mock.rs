//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 感知 / 决策 / 摘要三个阶段的用户消息都是带 `stage` 字段的 JSON，Mock 据此给出对应形状的回复。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, Message, Role};

fn last_user_input(messages: &[Message]) -> Value {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .and_then(|m| serde_json::from_str(&m.content).ok())
        .unwrap_or(Value::Null)
}

fn stage_of(input: &Value) -> String {
    input
        .get("stage")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// 演示用 Mock：先枚举窗口，拿到结果后即判定完成
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let input = last_user_input(messages);
        let reply = match stage_of(&input).as_str() {
            "perception" => {
                let executed = input["completed_steps"]
                    .as_array()
                    .is_some_and(|steps| steps.iter().any(|s| s["type"] == "EXECUTION"));
                if executed {
                    json!({
                        "route": "summarize",
                        "goal_achieved": true,
                        "reasoning": "Window inventory has been collected",
                    })
                } else {
                    json!({
                        "route": "decision",
                        "goal_achieved": false,
                        "reasoning": "Need to inspect open windows first",
                    })
                }
            }
            "decision" => json!({
                "selected_tool": "get_windows",
                "tool_parameters": {},
                "reasoning": "Enumerate windows to understand the desktop",
                "confidence": 0.9,
            }),
            "summary" => {
                let query = input["original_query"].as_str().unwrap_or_default();
                let done = input["completed_steps"].as_array().map_or(0, Vec::len);
                return Ok(format!(
                    "Handled \"{}\" with {} completed steps (mock summary).",
                    query, done
                ));
            }
            other => json!({ "error": format!("unknown stage {}", other) }),
        };
        Ok(reply.to_string())
    }
}

/// 脚本化 Mock：按阶段依次弹出预置回复；队列耗尽时使用该阶段的兜底回复
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    queues: Mutex<HashMap<String, VecDeque<Result<String, LlmError>>>>,
    fallbacks: HashMap<String, String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 队列耗尽后该阶段一直返回 `reply`
    pub fn with_fallback(mut self, stage: &str, reply: impl Into<String>) -> Self {
        self.fallbacks.insert(stage.to_string(), reply.into());
        self
    }

    pub fn push(&self, stage: &str, reply: impl Into<String>) -> &Self {
        self.enqueue(stage, Ok(reply.into()));
        self
    }

    pub fn push_err(&self, stage: &str, err: LlmError) -> &Self {
        self.enqueue(stage, Err(err));
        self
    }

    fn enqueue(&self, stage: &str, item: Result<String, LlmError>) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(stage.to_string()).or_default().push_back(item);
        }
    }

    /// 某阶段收到的全部输入（按调用顺序）
    pub fn inputs(&self, stage: &str) -> Vec<Value> {
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .filter(|(s, _)| s == stage)
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let input = last_user_input(messages);
        let stage = stage_of(&input);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((stage.clone(), input));
        }

        let queued = self
            .queues
            .lock()
            .ok()
            .and_then(|mut q| q.get_mut(&stage).and_then(VecDeque::pop_front));
        match queued {
            Some(item) => item,
            None => self
                .fallbacks
                .get(&stage)
                .cloned()
                .ok_or(LlmError::ScriptExhausted(stage)),
        }
    }
}
