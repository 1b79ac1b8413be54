//! 会话上下文
//!
//! 一次 Agent 调用对应一个 Session：独占步骤账本、可变的 current_state、
//! 状态历史快照与循环日志（perception / decision / execution 三元组）。
//! 循环日志与状态历史只用于审计回放，不参与控制决策。
//!
//! 全局变量按版本保存：同一键第二次写入起落在 `key__1`、`key__2`…，原值不被覆盖。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{AgentError, LedgerError};
use crate::cycle::{DecisionResult, PerceptionResult};
use crate::protocol::CommandResponse;
use crate::session::ledger::StepLedger;
use crate::session::step::{Step, StepKind, ROOT_STEP_ID};
use crate::session::summary::{output_folder, SessionSummary, TokenCounts, SUMMARY_FILE_NAME};

/// 会话终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    /// 感知判定 route=summarize
    Completed,
    /// 决策未选择命令，提前结束（非错误）
    Stopped,
    /// 达到 max_steps
    BudgetExhausted,
    Cancelled,
    Failed,
}

/// 一次成功循环的完整记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: usize,
    pub perception: PerceptionResult,
    pub decision: DecisionResult,
    pub execution: CommandResponse,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub state: Map<String, Value>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    query: String,
    created_at: DateTime<Utc>,
    ledger: StepLedger,
    current_state: Map<String, Value>,
    state_history: Vec<StateSnapshot>,
    globals: Map<String, Value>,
    global_history: BTreeMap<String, Vec<Value>>,
    last_scene: Option<Value>,
    cycles: Vec<CycleRecord>,
    token_usage: TokenCounts,
    output_dir: PathBuf,
    status: SessionStatus,
    final_summary: Option<String>,
    error: Option<String>,
}

impl Session {
    /// 新建会话：生成 `session_YYYYMMDD_HHMMSS_<8 hex>`，并写入 ROOT 步骤
    pub fn new(query: impl Into<String>, output_root: &Path) -> Self {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("session_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8]);
        Self::with_id(id, query, output_root)
    }

    pub fn with_id(id: impl Into<String>, query: impl Into<String>, output_root: &Path) -> Self {
        let id = id.into();
        let created_at = Utc::now();
        let mut ledger = StepLedger::new();
        // 空账本下 ROOT 必然合法
        let _ = ledger.add_step(ROOT_STEP_ID, "Initial query", StepKind::Root, None);
        Self {
            output_dir: output_folder(output_root, &id, created_at),
            id,
            query: query.into(),
            created_at,
            ledger,
            current_state: Map::new(),
            state_history: Vec::new(),
            globals: Map::new(),
            global_history: BTreeMap::new(),
            last_scene: None,
            cycles: Vec::new(),
            token_usage: TokenCounts::default(),
            status: SessionStatus::Running,
            final_summary: None,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn add_step(
        &mut self,
        id: &str,
        description: &str,
        kind: StepKind,
        from_step: Option<&str>,
    ) -> Result<&Step, LedgerError> {
        self.ledger.add_step(id, description, kind, from_step)
    }

    pub fn mark_completed(&mut self, id: &str, result: Value) -> bool {
        self.ledger.mark_completed(id, result)
    }

    pub fn mark_failed(&mut self, id: &str, error: &str) -> bool {
        self.ledger.mark_failed(id, error)
    }

    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.ledger.get(id)
    }

    pub fn completed_steps(&self) -> Vec<&Step> {
        self.ledger.completed()
    }

    pub fn failed_steps(&self) -> Vec<&Step> {
        self.ledger.failed()
    }

    pub fn cycles(&self) -> &[CycleRecord] {
        &self.cycles
    }

    pub fn current_state(&self) -> &Map<String, Value> {
        &self.current_state
    }

    pub fn state_history(&self) -> &[StateSnapshot] {
        &self.state_history
    }

    /// 追加循环记录，并折叠进 current_state 的 `last_cycle` 键
    pub fn record_cycle(
        &mut self,
        cycle: usize,
        perception: PerceptionResult,
        decision: DecisionResult,
        execution: CommandResponse,
    ) {
        let record = CycleRecord {
            cycle,
            perception,
            decision,
            execution,
            timestamp: Utc::now(),
        };
        let folded = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(cycle, error = %e, "cycle record not serializable, folding null");
                Value::Null
            }
        };
        self.cycles.push(record);

        let mut update = Map::new();
        update.insert("last_cycle".to_string(), folded);
        self.update_state(update);
    }

    /// 合并键到 current_state 并保存一份深拷贝快照
    pub fn update_state(&mut self, update: Map<String, Value>) {
        self.current_state.extend(update);
        self.state_history.push(StateSnapshot {
            timestamp: Utc::now(),
            state: self.current_state.clone(),
        });
    }

    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }

    /// 写入全局变量：新键直接写入，已有键写到 `key__<n>`，n 为该键此前的写入次数
    pub fn update_globals(&mut self, vars: Map<String, Value>) {
        for (key, value) in vars {
            let history = self.global_history.entry(key.clone()).or_default();
            if history.is_empty() {
                self.globals.insert(key, value.clone());
            } else {
                self.globals.insert(format!("{}__{}", key, history.len()), value.clone());
            }
            history.push(value);
        }
    }

    pub fn record_scene(&mut self, scene: Value) {
        self.last_scene = Some(scene);
    }

    pub fn record_token_usage(&mut self, usage: TokenCounts) {
        self.token_usage = usage;
    }

    /// 记录终态；重复调用以最后一次为准
    pub fn finish(&mut self, status: SessionStatus, summary: Option<String>, error: Option<String>) {
        self.status = status;
        self.final_summary = summary;
        self.error = error;
    }

    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            query: self.query.clone(),
            start_time: self.created_at,
            end_time: Utc::now(),
            status: self.status,
            final_summary: self.final_summary.clone(),
            error: self.error.clone(),
            steps: self.ledger.steps().to_vec(),
            cycles: self.cycles.clone(),
            current_state: self.current_state.clone(),
            globals: self.globals.clone(),
            global_history: self.global_history.clone(),
            last_scene: self.last_scene.clone(),
            execution_tree: self.ledger.render_tree(),
            final_lineage: self
                .ledger
                .current()
                .map(|s| self.ledger.lineage(&s.id).into_iter().map(String::from).collect())
                .unwrap_or_default(),
            token_usage: self.token_usage,
        }
    }

    /// 序列化会话元数据、全部步骤与循环日志到 `<output_dir>/session_summary.json`
    pub fn persist_summary(&self) -> Result<PathBuf, AgentError> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| AgentError::Persist(format!("{}: {}", self.output_dir.display(), e)))?;
        let path = self.output_dir.join(SUMMARY_FILE_NAME);
        let body = serde_json::to_string_pretty(&self.to_summary())
            .map_err(|e| AgentError::Persist(e.to_string()))?;
        std::fs::write(&path, body)
            .map_err(|e| AgentError::Persist(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::summary::load_summary;
    use crate::session::StepStatus;
    use tempfile::TempDir;

    #[test]
    fn test_new_session_has_root() {
        let dir = TempDir::new().unwrap();
        let session = Session::new("open notepad", dir.path());
        assert!(session.id().starts_with("session_"));
        let root = session.get_step(ROOT_STEP_ID).unwrap();
        assert_eq!(root.kind, StepKind::Root);
        assert!(root.from_step.is_none());
        assert_eq!(session.status(), SessionStatus::Running);
    }

    #[test]
    fn test_session_ids_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let a = Session::new("q", dir.path());
        let b = Session::new("q", dir.path());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_record_cycle_folds_state() {
        let dir = TempDir::new().unwrap();
        let mut session = Session::with_id("session_test", "q", dir.path());
        session.record_cycle(
            1,
            PerceptionResult::default(),
            DecisionResult::default(),
            CommandResponse::ok("done"),
        );
        assert_eq!(session.cycles().len(), 1);
        assert_eq!(session.state_history().len(), 1);
        let last = &session.current_state()["last_cycle"];
        assert_eq!(last["execution"]["message"], "done");
        assert_eq!(last["cycle"], 1);
    }

    #[test]
    fn test_state_history_is_deep_copy() {
        let dir = TempDir::new().unwrap();
        let mut session = Session::with_id("session_test", "q", dir.path());
        let mut first = Map::new();
        first.insert("focus".to_string(), Value::from("notepad"));
        session.update_state(first);
        let mut second = Map::new();
        second.insert("focus".to_string(), Value::from("paint"));
        session.update_state(second);
        assert_eq!(session.state_history()[0].state["focus"], "notepad");
        assert_eq!(session.current_state()["focus"], "paint");
    }

    #[test]
    fn test_globals_keep_every_version() {
        let dir = TempDir::new().unwrap();
        let mut session = Session::with_id("session_test", "q", dir.path());
        for title in ["Untitled", "notes.txt", "notes.txt - saved"] {
            let mut vars = Map::new();
            vars.insert("focus".to_string(), Value::from(title));
            session.update_globals(vars);
        }
        let globals = session.globals();
        assert_eq!(globals["focus"], "Untitled");
        assert_eq!(globals["focus__1"], "notes.txt");
        assert_eq!(globals["focus__2"], "notes.txt - saved");
        assert_eq!(globals.len(), 3);

        let summary = session.to_summary();
        assert_eq!(summary.global_history["focus"].len(), 3);
        assert_eq!(summary.global_history["focus"][2], "notes.txt - saved");
    }

    #[test]
    fn test_persist_summary_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut session = Session::with_id("session_persist", "type hello", dir.path());
        session
            .add_step("PERCEPTION_001", "look", StepKind::Perception, Some(ROOT_STEP_ID))
            .unwrap();
        session.mark_failed("PERCEPTION_001", "scene unavailable");
        session.record_scene(serde_json::json!({"windows": []}));
        session.record_token_usage(TokenCounts::from((12, 3, 15)));
        session.finish(SessionStatus::Failed, None, Some("scene unavailable".to_string()));

        let path = session.persist_summary().unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.ends_with("session_persist/session_summary.json"));

        let summary = load_summary(&path).unwrap();
        assert_eq!(summary.session_id, "session_persist");
        assert_eq!(summary.query, "type hello");
        assert_eq!(summary.status, SessionStatus::Failed);
        assert_eq!(summary.steps.len(), 2);
        assert_eq!(summary.steps[1].status, StepStatus::Failed);
        assert!(summary.end_time >= summary.start_time);
        assert_eq!(summary.last_scene, Some(serde_json::json!({"windows": []})));
        assert_eq!(summary.token_usage.total_tokens, 15);
        assert_eq!(summary.final_lineage, vec!["PERCEPTION_001", ROOT_STEP_ID]);
        assert!(summary.execution_tree.contains("✗ PERCEPTION_001"));
    }
}
