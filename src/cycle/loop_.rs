//! 感知 → 决策 → 执行 主循环
//!
//! 每轮：取场景快照 → 感知（route=summarize 时结束）→ 决策（未选命令时结束）→ 执行。
//! 执行阶段是一个有界状态机：
//! - 传输失败：退避后重试同一步骤，超过重试上限则会话失败
//! - 结构化失败：进入恢复分支（错误态感知 + 决策，挂在失败的执行步骤下）；
//!   恢复决策选择同一命令时带新参数重试，选择其他命令时放弃本轮
//! - 校验类失败（未知命令、参数错误、窗口不存在）：不重试、不恢复，直接进入下一轮
//!
//! 无论以何种方式结束，都会生成摘要并持久化会话记录。

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RetryTracker};
use crate::cycle::decision::{Decision, DecisionInput};
use crate::cycle::events::AgentEvent;
use crate::cycle::perception::{Perception, PerceptionInput};
use crate::cycle::summary::{Summarizer, SummaryInput};
use crate::cycle::types::{DecisionResult, PerceptionResult, SnapshotType};
use crate::executor::{CommandExecutor, SceneProducer};
use crate::protocol::{Catalogue, CommandRequest, CommandResponse, Params};
use crate::session::{
    recovery_step_id, retry_step_id, step_id, CycleRecord, Session, SessionStatus, Step, StepKind, StepStatus,
    TokenCounts, ROOT_STEP_ID,
};

/// 循环预算与重试策略
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_steps: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub output_root: PathBuf,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_retries: 3,
            retry_backoff: Duration::from_millis(1000),
            output_root: PathBuf::from("outputs"),
        }
    }
}

/// 一次会话的最终结果
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub summary: String,
    pub summary_path: Option<PathBuf>,
    pub error: Option<String>,
    pub steps: Vec<Step>,
    pub cycles: Vec<CycleRecord>,
}

impl SessionOutcome {
    /// 实际发出的执行尝试步骤数（含恢复后的重试步骤）
    pub fn execution_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.kind == StepKind::Execution).count()
    }
}

/// 一次会话运行所需的协作者
pub struct AgentLoop<'a> {
    pub perception: &'a Perception,
    pub decision: &'a Decision,
    pub summarizer: &'a Summarizer,
    pub executor: &'a dyn CommandExecutor,
    pub scene: &'a dyn SceneProducer,
    pub settings: LoopSettings,
    pub cancel_token: CancellationToken,
    pub event_tx: Option<&'a UnboundedSender<AgentEvent>>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        perception: &'a Perception,
        decision: &'a Decision,
        summarizer: &'a Summarizer,
        executor: &'a dyn CommandExecutor,
        scene: &'a dyn SceneProducer,
        settings: LoopSettings,
    ) -> Self {
        Self {
            perception,
            decision,
            summarizer,
            executor,
            scene,
            settings,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, ev: AgentEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 运行一个完整会话；错误不会向上传播，而是体现在 `SessionOutcome` 中
    pub async fn run(&self, query: &str) -> SessionOutcome {
        let mut session = Session::new(query, &self.settings.output_root);
        tracing::info!(session = %session.id(), query = %query, "session started");
        self.emit(AgentEvent::SessionStarted {
            session_id: session.id().to_string(),
            query: query.to_string(),
        });

        let mut progress = Progress::default();
        let mut retries = RetryTracker::new(self.settings.max_retries);
        let driven = self.drive(&mut session, &mut retries, &mut progress).await;

        let (status, error) = match driven {
            Ok(status) => (status, None),
            Err(AgentError::Cancelled) => {
                tracing::info!(session = %session.id(), "session cancelled");
                if let Some(pending) = pending_step(&session) {
                    session.mark_failed(&pending, "cancelled");
                }
                (SessionStatus::Cancelled, None)
            }
            Err(e) => {
                tracing::error!(session = %session.id(), kind = e.kind(), error = %e, "session failed");
                self.emit(AgentEvent::Error { text: e.to_string() });
                (SessionStatus::Failed, Some(e.to_string()))
            }
        };

        let summary = self
            .summarizer
            .summarize(SummaryInput {
                query,
                status,
                error: error.as_deref(),
                perception: progress.last_perception.as_ref(),
                completed: session.completed_steps(),
                failed: session.failed_steps(),
            })
            .await;
        session.finish(status, Some(summary.clone()), error.clone());
        let usage = TokenCounts::from(self.summarizer.token_usage());
        session.record_token_usage(usage);

        let (summary_path, error) = match session.persist_summary() {
            Ok(path) => (Some(path), error),
            Err(e) => {
                tracing::error!(session = %session.id(), error = %e, "failed to persist session summary");
                (None, error.or_else(|| Some(e.to_string())))
            }
        };

        tracing::info!(
            session = %session.id(),
            status = ?status,
            steps = session.ledger().len(),
            total_tokens = usage.total_tokens,
            "session finished"
        );
        self.emit(AgentEvent::Finished {
            status,
            summary: summary.clone(),
            summary_path: summary_path.as_ref().map(|p| p.display().to_string()),
        });

        SessionOutcome {
            session_id: session.id().to_string(),
            status,
            summary,
            summary_path,
            error,
            steps: session.ledger().steps().to_vec(),
            cycles: session.cycles().to_vec(),
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        retries: &mut RetryTracker,
        progress: &mut Progress,
    ) -> Result<SessionStatus, AgentError> {
        let catalogue = self
            .executor
            .capabilities()
            .await
            .map_err(|source| AgentError::TransportExhausted {
                command: "capabilities".to_string(),
                attempts: 1,
                source,
            })?;

        for cycle in 1..=self.settings.max_steps {
            if self.cancel_token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            self.emit(AgentEvent::CycleStarted {
                cycle,
                max_steps: self.settings.max_steps,
            });

            // 感知
            let snapshot_type = if cycle == 1 {
                SnapshotType::UserQuery
            } else {
                SnapshotType::StepResult
            };
            let scene = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return Err(AgentError::Cancelled),
                s = self.scene.capture() => s.map_err(|e| AgentError::Scene(e.to_string()))?,
            };
            session.record_scene(scene.payload.clone());
            let perception_id = step_id(StepKind::Perception, cycle);
            let lineage = progress.last_execution.clone().unwrap_or_else(|| ROOT_STEP_ID.to_string());
            session.add_step(&perception_id, "Analyze current state", StepKind::Perception, Some(lineage.as_str()))?;

            let raw_input = match snapshot_type {
                SnapshotType::UserQuery => session.query().to_string(),
                _ => scene.payload.to_string(),
            };
            let analyzed = self
                .cancellable(self.perception.analyze(PerceptionInput {
                    snapshot_type,
                    query: session.query(),
                    raw_input,
                    scene: scene.payload.clone(),
                    completed: session.completed_steps(),
                    failed: session.failed_steps(),
                }))
                .await;
            let perception = record_step(session, &perception_id, analyzed)?;
            tracing::info!(step = %perception_id, route = ?perception.route, "perception");
            self.emit(AgentEvent::Perceived {
                step_id: perception_id.clone(),
                snapshot_type,
                route: perception.route.clone(),
                reasoning: perception.reasoning.clone(),
            });
            progress.last_perception = Some(perception.clone());
            if perception.wants_summary() {
                return Ok(SessionStatus::Completed);
            }

            // 决策
            let decision_id = step_id(StepKind::Decision, cycle);
            session.add_step(&decision_id, "Select next command", StepKind::Decision, Some(perception_id.as_str()))?;
            let decided = self
                .cancellable(self.decision.decide(DecisionInput {
                    query: session.query(),
                    perception: &perception,
                    catalogue: &catalogue,
                    completed: session.completed_steps(),
                    failed: session.failed_steps(),
                }))
                .await;
            let decision = record_step(session, &decision_id, decided)?;
            tracing::info!(
                step = %decision_id,
                command = decision.selected_command().unwrap_or("<none>"),
                confidence = decision.confidence,
                "decision"
            );
            self.emit(AgentEvent::Decided {
                step_id: decision_id.clone(),
                command: decision.selected_command().map(str::to_string),
                params: Value::Object(decision.parameters.clone()),
                confidence: decision.confidence,
            });
            let Some(command) = decision.selected_command().map(str::to_string) else {
                tracing::info!(step = %decision_id, "no command selected, stopping");
                return Ok(SessionStatus::Stopped);
            };

            // 执行
            let execution_id = step_id(StepKind::Execution, cycle);
            session.add_step(
                &execution_id,
                &format!("Execute {}", command),
                StepKind::Execution,
                Some(decision_id.as_str()),
            )?;
            progress.last_execution = Some(execution_id.clone());

            let attempt = ExecutionAttempt {
                cycle,
                command: &command,
                retry_key: &execution_id,
                catalogue: &catalogue,
            };
            match self
                .execute_with_recovery(session, retries, progress, attempt, decision.parameters.clone())
                .await?
            {
                ExecOutcome::Succeeded(response) => {
                    let mut vars = serde_json::Map::new();
                    vars.insert(
                        command.clone(),
                        response.result.clone().unwrap_or_else(|| Value::String(response.message.clone())),
                    );
                    session.update_globals(vars);
                    session.record_cycle(cycle, perception, decision, response);
                }
                ExecOutcome::Abandoned => {}
            }
        }

        tracing::info!(max_steps = self.settings.max_steps, "step budget exhausted");
        Ok(SessionStatus::BudgetExhausted)
    }

    async fn execute_with_recovery(
        &self,
        session: &mut Session,
        retries: &mut RetryTracker,
        progress: &mut Progress,
        attempt: ExecutionAttempt<'_>,
        params: Params,
    ) -> Result<ExecOutcome, AgentError> {
        let ExecutionAttempt {
            cycle,
            command,
            retry_key,
            catalogue,
        } = attempt;

        let mut state = ExecState::Executing {
            step_id: retry_key.to_string(),
            params,
        };
        loop {
            state = match state {
                ExecState::Executing { step_id, params } => {
                    self.emit(AgentEvent::Executing {
                        step_id: step_id.clone(),
                        command: command.to_string(),
                        params: Value::Object(params.clone()),
                        attempt: retries.attempts(retry_key) + 1,
                    });
                    let request = CommandRequest::new(command, params.clone());
                    let result = tokio::select! {
                        biased;
                        _ = self.cancel_token.cancelled() => return Err(AgentError::Cancelled),
                        r = self.executor.execute(&request) => r,
                    };

                    match result {
                        Err(fault) => {
                            if !retries.should_retry(retry_key) {
                                session.mark_failed(&step_id, &fault.to_string());
                                return Err(AgentError::TransportExhausted {
                                    command: command.to_string(),
                                    attempts: retries.attempts(retry_key),
                                    source: fault,
                                });
                            }
                            retries.record_attempt(retry_key);
                            tracing::warn!(
                                step = %step_id,
                                attempt = retries.attempts(retry_key),
                                error = %fault,
                                "transport fault, backing off"
                            );
                            self.emit(AgentEvent::TransportRetry {
                                step_id: step_id.clone(),
                                attempt: retries.attempts(retry_key),
                                error: fault.to_string(),
                            });
                            tokio::select! {
                                biased;
                                _ = self.cancel_token.cancelled() => return Err(AgentError::Cancelled),
                                _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                            }
                            ExecState::Executing { step_id, params }
                        }
                        Ok(response) if response.success => {
                            session.mark_completed(&step_id, archived(&step_id, &response));
                            tracing::info!(step = %step_id, command = %command, "execution succeeded");
                            self.emit(AgentEvent::Executed {
                                step_id,
                                success: true,
                                message: response.message.clone(),
                            });
                            ExecState::Finished(ExecOutcome::Succeeded(response))
                        }
                        Ok(response) => {
                            let error = response.describe().to_string();
                            session.mark_failed(&step_id, &error);
                            self.emit(AgentEvent::Executed {
                                step_id: step_id.clone(),
                                success: false,
                                message: error.clone(),
                            });
                            if response.is_validation_failure() {
                                tracing::warn!(step = %step_id, error = %error, "command rejected, moving on");
                                self.emit(AgentEvent::Recovery {
                                    step_id,
                                    detail: format!("rejected without recovery: {}", error),
                                });
                                ExecState::Finished(ExecOutcome::Abandoned)
                            } else {
                                ExecState::Recovering {
                                    failed_step: step_id,
                                    params,
                                    error,
                                }
                            }
                        }
                    }
                }

                ExecState::Recovering {
                    failed_step,
                    params,
                    error,
                } => {
                    if !retries.should_retry(retry_key) {
                        return Err(AgentError::RetryBudgetExhausted {
                            step: retry_key.to_string(),
                            message: error,
                        });
                    }
                    let round = retries.attempts(retry_key) + 1;
                    tracing::warn!(step = %failed_step, round, error = %error, "entering error recovery");

                    let perception_id = recovery_step_id(StepKind::Perception, cycle, round);
                    session.add_step(
                        &perception_id,
                        "Analyze error state",
                        StepKind::Perception,
                        Some(failed_step.as_str()),
                    )?;
                    let analyzed = self
                        .cancellable(self.perception.analyze(PerceptionInput {
                            snapshot_type: SnapshotType::ErrorState,
                            query: session.query(),
                            raw_input: error.clone(),
                            scene: json!({
                                "error": error,
                                "command": command,
                                "params": params,
                            }),
                            completed: session.completed_steps(),
                            failed: session.failed_steps(),
                        }))
                        .await;
                    let recovery_perception = record_step(session, &perception_id, analyzed)?;

                    let decision_id = recovery_step_id(StepKind::Decision, cycle, round);
                    session.add_step(
                        &decision_id,
                        "Decide recovery action",
                        StepKind::Decision,
                        Some(perception_id.as_str()),
                    )?;
                    let decided = self
                        .cancellable(self.decision.decide(DecisionInput {
                            query: session.query(),
                            perception: &recovery_perception,
                            catalogue,
                            completed: session.completed_steps(),
                            failed: session.failed_steps(),
                        }))
                        .await;
                    let recovery: DecisionResult = record_step(session, &decision_id, decided)?;

                    if recovery.selected_command() == Some(command) {
                        retries.record_attempt(retry_key);
                        let retry_id = retry_step_id(cycle, retries.attempts(retry_key));
                        session.add_step(
                            &retry_id,
                            &format!("Retry {}", command),
                            StepKind::Execution,
                            Some(decision_id.as_str()),
                        )?;
                        progress.last_execution = Some(retry_id.clone());
                        self.emit(AgentEvent::Recovery {
                            step_id: retry_id.clone(),
                            detail: format!("retrying {} with adjusted parameters", command),
                        });
                        ExecState::Executing {
                            step_id: retry_id,
                            params: recovery.parameters,
                        }
                    } else {
                        let chosen = recovery.selected_command().unwrap_or("<none>").to_string();
                        tracing::warn!(step = %failed_step, chosen = %chosen, "recovery chose a different command, abandoning");
                        self.emit(AgentEvent::Recovery {
                            step_id: decision_id,
                            detail: format!("abandoned {}; recovery chose {}", command, chosen),
                        });
                        ExecState::Finished(ExecOutcome::Abandoned)
                    }
                }

                ExecState::Finished(outcome) => return Ok(outcome),
            };
        }
    }

    async fn cancellable<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, AgentError>>,
    ) -> Result<T, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(AgentError::Cancelled),
            r = fut => r,
        }
    }
}

#[derive(Default)]
struct Progress {
    last_perception: Option<PerceptionResult>,
    /// 最近一个执行步骤（下一轮感知的 lineage）
    last_execution: Option<String>,
}

struct ExecutionAttempt<'a> {
    cycle: usize,
    command: &'a str,
    /// 重试计数按顶层执行步骤 ID 统计
    retry_key: &'a str,
    catalogue: &'a Catalogue,
}

enum ExecState {
    Executing { step_id: String, params: Params },
    Recovering { failed_step: String, params: Params, error: String },
    Finished(ExecOutcome),
}

enum ExecOutcome {
    Succeeded(CommandResponse),
    Abandoned,
}

/// 把阶段结果写回账本：成功标记 completed（结果序列化存档），失败标记 failed 并向上传播
fn record_step<T: serde::Serialize>(
    session: &mut Session,
    id: &str,
    result: Result<T, AgentError>,
) -> Result<T, AgentError> {
    match result {
        Ok(value) => {
            session.mark_completed(id, archived(id, &value));
            Ok(value)
        }
        Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
        Err(e) => {
            session.mark_failed(id, &e.to_string());
            Err(e)
        }
    }
}

/// 结果存档为 JSON；无法序列化时记 null 并告警
fn archived<T: serde::Serialize>(step: &str, value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::warn!(step = %step, error = %e, "step result not serializable, archiving null");
        Value::Null
    })
}

fn pending_step(session: &Session) -> Option<String> {
    session
        .ledger()
        .current()
        .filter(|s| s.status == StepStatus::Pending && s.kind != StepKind::Root)
        .map(|s| s.id.clone())
}
