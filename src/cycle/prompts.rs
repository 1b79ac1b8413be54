//! Prompt 模板：优先读 `prompts_dir/{perception,decision,summary}.txt`，缺失时用内置模板

use std::path::Path;

/// 决策模板中的命令列表占位符
pub const TOOL_LIST_PLACEHOLDER: &str = "{TOOL_LIST}";

const PERCEPTION_FALLBACK: &str = "You are the perception module of a desktop automation agent. \
Given the user's original query, the current scene snapshot and the completed / failed steps, \
judge whether the goal has been achieved. Reply with a single JSON object: \
{\"route\": \"decision\" | \"summarize\", \"goal_achieved\": bool, \"reasoning\": string}. \
Use \"summarize\" only when the goal is achieved or cannot progress further. \
When snapshot_type is \"error_state\", raw_input is the error of the last command; explain what went wrong.";

const DECISION_FALLBACK: &str = "You are the decision module of a desktop automation agent. \
Pick exactly one command from the list below that moves the task forward.\n\n\
Available commands:\n{TOOL_LIST}\n\n\
Reply with a single JSON object: {\"selected_tool\": string | null, \"tool_parameters\": object, \
\"reasoning\": string, \"confidence\": number}. Use null when no further action is needed. \
When the perception describes an error, either retry the same command with corrected parameters \
or choose a different command.";

const SUMMARY_FALLBACK: &str = "You are the summary module of a desktop automation agent. \
Given the original query, the completed and failed steps and the latest perception, \
write a short plain-text narrative of what was done, what failed and whether the goal was reached.";

#[derive(Debug, Clone)]
pub struct PromptSet {
    pub perception: String,
    pub decision: String,
    pub summary: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            perception: PERCEPTION_FALLBACK.to_string(),
            decision: DECISION_FALLBACK.to_string(),
            summary: SUMMARY_FALLBACK.to_string(),
        }
    }
}

impl PromptSet {
    pub fn load(dir: &Path) -> Self {
        let read = |name: &str, fallback: &str| {
            let path = dir.join(format!("{}.txt", name));
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => {
                    tracing::debug!(path = %path.display(), "prompt file missing, using built-in template");
                    fallback.to_string()
                }
            }
        };
        Self {
            perception: read("perception", PERCEPTION_FALLBACK),
            decision: read("decision", DECISION_FALLBACK),
            summary: read("summary", SUMMARY_FALLBACK),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_prefers_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("summary.txt"), "custom summary").unwrap();
        std::fs::write(dir.path().join("perception.txt"), "   ").unwrap();
        let prompts = PromptSet::load(dir.path());
        assert_eq!(prompts.summary, "custom summary");
        assert_eq!(prompts.perception, PERCEPTION_FALLBACK);
        assert!(prompts.decision.contains(TOOL_LIST_PLACEHOLDER));
    }
}
