//! 重试计数器
//!
//! 按步骤 ID 记录尝试次数：默认 0，只增不减；与固定上限比较决定是否还能重试。
//! 计数按步骤隔离，不同逻辑步骤之间不共享预算。

use std::collections::HashMap;

/// 默认重试上限
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct RetryTracker {
    max_retries: u32,
    attempts: HashMap<String, u32>,
}

impl RetryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: HashMap::new(),
        }
    }

    /// attempts[step_id] < 上限 时为 true
    pub fn should_retry(&self, step_id: &str) -> bool {
        self.attempts(step_id) < self.max_retries
    }

    pub fn record_attempt(&mut self, step_id: &str) {
        let count = self.attempts.entry(step_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn attempts(&self, step_id: &str) -> u32 {
        self.attempts.get(step_id).copied().unwrap_or(0)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
