//! 感知 / 决策 / 执行循环
//!
//! - **perception**: 场景 + 账本 → 路由判断
//! - **decision**: 感知结果 + 能力目录 → 一条命令
//! - **summary**: 会话结束时的叙述
//! - **loop_**: 主循环、传输重试与错误恢复

pub mod decision;
pub mod events;
pub mod loop_;
pub mod parse;
pub mod perception;
pub mod prompts;
pub mod schema;
pub mod summary;
pub mod types;

use serde_json::{json, Value};

use crate::session::Step;

pub use decision::{format_tool_list, Decision, DecisionInput};
pub use events::AgentEvent;
pub use loop_::{AgentLoop, LoopSettings, SessionOutcome};
pub use parse::{extract_json_block, parse_llm_json};
pub use perception::{Perception, PerceptionInput};
pub use prompts::{PromptSet, TOOL_LIST_PLACEHOLDER};
pub use summary::{fallback_narrative, Summarizer, SummaryInput};
pub use types::{DecisionResult, PerceptionResult, Route, SnapshotType};

/// 步骤列表的 LLM 输入形式
pub fn steps_digest(steps: &[&Step]) -> Value {
    Value::Array(
        steps
            .iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "type": s.kind,
                    "description": s.description,
                    "from_step": s.from_step,
                    "status": s.status,
                    "result": s.result,
                    "timestamp": s.timestamp.to_rfc3339(),
                })
            })
            .collect(),
    )
}
