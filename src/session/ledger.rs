//! 步骤账本
//!
//! 只追加的步骤记录，按创建顺序保存。lineage 只能指向更早创建的步骤，
//! 因此整张图天然无环：主干挂在 ROOT 下，错误恢复步骤挂在失败的执行步骤下形成侧枝。

use std::collections::HashMap;

use crate::core::LedgerError;
use crate::session::step::{Step, StepKind, StepStatus};

#[derive(Debug, Default, Clone)]
pub struct StepLedger {
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    current: Option<usize>,
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增 pending 步骤并设为当前步骤；ID 重复或 lineage 非法时返回错误
    pub fn add_step(
        &mut self,
        id: &str,
        description: &str,
        kind: StepKind,
        from_step: Option<&str>,
    ) -> Result<&Step, LedgerError> {
        if self.index.contains_key(id) {
            return Err(LedgerError::DuplicateStep(id.to_string()));
        }
        match from_step {
            Some(from) if from == id => return Err(LedgerError::SelfLineage(id.to_string())),
            Some(from) if !self.index.contains_key(from) => {
                return Err(LedgerError::UnknownLineage {
                    step: id.to_string(),
                    from: from.to_string(),
                })
            }
            None if kind != StepKind::Root => {
                return Err(LedgerError::MissingLineage(id.to_string()))
            }
            _ => {}
        }

        let pos = self.steps.len();
        self.steps
            .push(Step::new(id, description, kind, from_step.map(String::from)));
        self.index.insert(id.to_string(), pos);
        self.current = Some(pos);
        Ok(&self.steps[pos])
    }

    /// 标记完成；未知 ID 或已是终态时不做任何事，返回 false
    pub fn mark_completed(&mut self, id: &str, result: serde_json::Value) -> bool {
        self.transition(id, StepStatus::Completed, result)
    }

    /// 标记失败，result 写为 `{"error": ...}`
    pub fn mark_failed(&mut self, id: &str, error: &str) -> bool {
        self.transition(id, StepStatus::Failed, serde_json::json!({ "error": error }))
    }

    fn transition(&mut self, id: &str, status: StepStatus, result: serde_json::Value) -> bool {
        let Some(&pos) = self.index.get(id) else {
            return false;
        };
        let step = &mut self.steps[pos];
        if step.status.is_terminal() {
            tracing::warn!(
                step = %id,
                current = ?step.status,
                requested = ?status,
                "ignoring transition on terminal step"
            );
            return false;
        }
        step.status = status;
        step.result = Some(result);
        true
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&pos| &self.steps[pos])
    }

    pub fn current(&self) -> Option<&Step> {
        self.current.map(|pos| &self.steps[pos])
    }

    /// 按创建顺序
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn completed(&self) -> Vec<&Step> {
        self.with_status(StepStatus::Completed)
    }

    pub fn failed(&self) -> Vec<&Step> {
        self.with_status(StepStatus::Failed)
    }

    fn with_status(&self, status: StepStatus) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.status == status).collect()
    }

    /// 从指定步骤沿 lineage 回溯到根，返回路径（含自身，根在最后）
    pub fn lineage(&self, id: &str) -> Vec<&str> {
        let mut path = Vec::new();
        let mut cursor = self.get(id);
        while let Some(step) = cursor {
            path.push(step.id.as_str());
            cursor = step.from_step.as_deref().and_then(|from| self.get(from));
        }
        path
    }

    /// 渲染执行树（审计用），子节点按创建顺序缩进展示
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        for step in self.steps.iter().filter(|s| s.from_step.is_none()) {
            self.render_node(step, 0, &mut out);
        }
        out
    }

    fn render_node(&self, step: &Step, depth: usize, out: &mut String) {
        let mark = match step.status {
            StepStatus::Pending => "…",
            StepStatus::Completed => "✓",
            StepStatus::Failed => "✗",
        };
        out.push_str(&format!(
            "{}{} {} {}\n",
            "  ".repeat(depth),
            mark,
            step.id,
            step.description
        ));
        for child in self
            .steps
            .iter()
            .filter(|s| s.from_step.as_deref() == Some(step.id.as_str()))
        {
            self.render_node(child, depth + 1, out);
        }
    }
}
