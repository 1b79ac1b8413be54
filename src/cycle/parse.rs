//! 从 LLM 输出中提取 JSON（```json 代码块或首尾花括号之间的内容）

use serde::de::DeserializeOwned;

use crate::core::AgentError;

pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析 LLM 输出为结构化结果；没有 JSON 或 JSON 不合法时返回 `AgentError::JsonParse`
pub fn parse_llm_json<T: DeserializeOwned>(output: &str) -> Result<T, AgentError> {
    let json_str = extract_json_block(output)
        .ok_or_else(|| AgentError::JsonParse(format!("no JSON object in LLM output: {}", preview(output))))?;
    serde_json::from_str(json_str).map_err(|e| AgentError::JsonParse(format!("{}: {}", e, preview(json_str))))
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}
