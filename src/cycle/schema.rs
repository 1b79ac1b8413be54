//! 感知 / 决策输出格式的 JSON Schema，拼入 system prompt 以减少格式错误

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 感知输出格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PerceptionFormat {
    /// "decision" 继续执行；"summarize" 任务完成，进入总结
    pub route: String,
    /// 目标是否已达成
    pub goal_achieved: bool,
    /// 判断依据
    pub reasoning: String,
}

/// 决策输出格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DecisionFormat {
    /// 命令名，必须来自可用命令列表；无需动作时为 null
    pub selected_tool: Option<String>,
    /// 命令参数，值为 string / number / boolean
    pub tool_parameters: HashMap<String, serde_json::Value>,
    pub reasoning: String,
    /// 0.0 ~ 1.0
    pub confidence: f64,
}

pub fn perception_schema_json() -> String {
    serde_json::to_string_pretty(&schema_for!(PerceptionFormat)).unwrap_or_default()
}

pub fn decision_schema_json() -> String {
    serde_json::to_string_pretty(&schema_for!(DecisionFormat)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_name_fields() {
        assert!(perception_schema_json().contains("goal_achieved"));
        let decision = decision_schema_json();
        assert!(decision.contains("selected_tool"));
        assert!(decision.contains("tool_parameters"));
    }
}
