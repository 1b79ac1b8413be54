//! 主循环集成测试：脚本化 LLM + 模拟桌面跑完整会话

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use pilot::core::TransportError;
use pilot::cycle::{AgentEvent, AgentLoop, Decision, LoopSettings, Perception, PromptSet, SessionOutcome, Summarizer};
use pilot::executor::{CommandExecutor, ExecutorSceneProducer, LocalExecutor, SceneProducer, StaticSceneProducer};
use pilot::llm::{LlmClient, LlmError, Message, ScriptedLlmClient, TokenUsage};
use pilot::protocol::{
    run_chain, CapabilityRegistry, Catalogue, CommandRequest, CommandResponse, CommandRouter, HandlerSet,
    SimulatedDesktop,
};
use pilot::session::{load_summary, SessionStatus, StepKind, StepStatus};

const TO_DECISION: &str = r#"{"route": "decision", "goal_achieved": false, "reasoning": "keep going"}"#;
const TO_SUMMARY: &str = r#"{"route": "summarize", "goal_achieved": true, "reasoning": "done"}"#;

fn desktop_executor(desktop: Arc<SimulatedDesktop>) -> Arc<LocalExecutor> {
    let router = CommandRouter::new(Arc::new(CapabilityRegistry::desktop()), HandlerSet::uniform(desktop));
    Arc::new(LocalExecutor::new(Arc::new(router)))
}

fn settings(dir: &TempDir) -> LoopSettings {
    LoopSettings {
        max_steps: 10,
        max_retries: 3,
        retry_backoff: Duration::from_millis(1),
        output_root: dir.path().to_path_buf(),
    }
}

struct Harness {
    perception: Perception,
    decision: Decision,
    summarizer: Summarizer,
}

impl Harness {
    fn new(llm: Arc<dyn LlmClient>) -> Self {
        let prompts = PromptSet::default();
        Self {
            perception: Perception::new(llm.clone(), prompts.perception),
            decision: Decision::new(llm.clone(), prompts.decision),
            summarizer: Summarizer::new(llm, prompts.summary),
        }
    }

    async fn run(
        &self,
        executor: &dyn CommandExecutor,
        scene: &dyn SceneProducer,
        settings: LoopSettings,
        query: &str,
    ) -> SessionOutcome {
        AgentLoop::new(&self.perception, &self.decision, &self.summarizer, executor, scene, settings)
            .run(query)
            .await
    }
}

fn step<'a>(outcome: &'a SessionOutcome, id: &str) -> &'a pilot::session::Step {
    outcome
        .steps
        .iter()
        .find(|s| s.id == id)
        .unwrap_or_else(|| panic!("missing step {}", id))
}

#[tokio::test]
async fn test_budget_exhaustion_runs_exactly_max_steps() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_fallback("perception", TO_DECISION)
            .with_fallback("decision", r#"{"selected_tool": "user", "tool_parameters": {}}"#)
            .with_fallback("summary", "Asked for the user name ten times."),
    );
    let desktop = Arc::new(SimulatedDesktop::new());
    let executor = desktop_executor(desktop.clone());
    let scene = ExecutorSceneProducer::new(executor.clone());

    let outcome = Harness::new(llm)
        .run(executor.as_ref(), &scene, settings(&dir), "who am i")
        .await;

    assert_eq!(outcome.status, SessionStatus::BudgetExhausted);
    assert_eq!(outcome.execution_steps(), 10);
    assert_eq!(outcome.cycles.len(), 10);
    let user_calls = desktop.invocations().await.iter().filter(|c| *c == "user").count();
    assert_eq!(user_calls, 10);

    let path = outcome.summary_path.clone().expect("summary persisted");
    let saved = load_summary(&path).unwrap();
    assert_eq!(saved.status, SessionStatus::BudgetExhausted);
    assert_eq!(saved.steps.len(), outcome.steps.len());
    assert_eq!(saved.final_summary.as_deref(), Some("Asked for the user name ten times."));

    assert_eq!(saved.global_history["user"].len(), 10);
    assert_eq!(saved.globals["user"], "User name: pilot");
    assert!(saved.globals.contains_key("user__9"));
    assert!(!saved.globals.contains_key("user__10"));
    assert!(saved.last_scene.as_ref().unwrap()["windows"]["inventory"].is_object());
    assert_eq!(saved.final_lineage.last().map(String::as_str), Some("ROOT"));
    assert!(saved.execution_tree.contains("EXECUTION_010"));
}

#[tokio::test]
async fn test_structured_failure_recovers_with_adjusted_params() {
    let dir = TempDir::new().unwrap();
    let desktop = Arc::new(SimulatedDesktop::new());
    let window_id = desktop.window_ids().await[0].clone();
    desktop.fail_next("resize", "Window too small").await;

    let llm = Arc::new(ScriptedLlmClient::new().with_fallback("summary", "Resized notepad."));
    llm.push("perception", TO_DECISION)
        .push("perception", r#"{"route": "decision", "goal_achieved": false, "reasoning": "size rejected"}"#)
        .push("perception", TO_SUMMARY);
    llm.push(
        "decision",
        json!({"selected_tool": "resize", "tool_parameters": {"window_id": window_id, "width": 10, "height": 10}})
            .to_string(),
    )
    .push(
        "decision",
        json!({"selected_tool": "resize", "tool_parameters": {"window_id": window_id, "width": 800, "height": 600}})
            .to_string(),
    );

    let executor = desktop_executor(desktop.clone());
    let scene = ExecutorSceneProducer::new(executor.clone());
    let outcome = Harness::new(llm.clone())
        .run(executor.as_ref(), &scene, settings(&dir), "make the window bigger")
        .await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(step(&outcome, "EXECUTION_001").status, StepStatus::Failed);
    assert_eq!(
        step(&outcome, "PERCEPTION_001_ERR_1").from_step.as_deref(),
        Some("EXECUTION_001")
    );
    assert_eq!(
        step(&outcome, "DECISION_001_ERR_1").from_step.as_deref(),
        Some("PERCEPTION_001_ERR_1")
    );
    let retry = step(&outcome, "EXECUTION_001_R1");
    assert_eq!(retry.status, StepStatus::Completed);
    assert_eq!(retry.from_step.as_deref(), Some("DECISION_001_ERR_1"));
    assert_eq!(
        step(&outcome, "PERCEPTION_002").from_step.as_deref(),
        Some("EXECUTION_001_R1")
    );

    // 只有一次重试，且只产生一条循环记录
    assert_eq!(outcome.execution_steps(), 2);
    assert_eq!(outcome.cycles.len(), 1);
    assert!(outcome.cycles[0].execution.success);
    let window = desktop.window(&window_id).await.unwrap();
    assert_eq!((window.width, window.height), (800, 600));

    let recovery_input = &llm.inputs("perception")[1];
    assert_eq!(recovery_input["snapshot_type"], "error_state");
    assert_eq!(recovery_input["raw_input"], "Window too small");
}

#[tokio::test]
async fn test_recovery_choosing_other_command_abandons_cycle() {
    let dir = TempDir::new().unwrap();
    let desktop = Arc::new(SimulatedDesktop::new());
    desktop.fail_next("type", "No focused input").await;

    let llm = Arc::new(ScriptedLlmClient::new().with_fallback("summary", "gave up typing"));
    llm.push("perception", TO_DECISION)
        .push("perception", TO_DECISION)
        .push("perception", TO_SUMMARY);
    llm.push("decision", r#"{"selected_tool": "type", "tool_parameters": {"text": "hi"}}"#)
        .push("decision", r#"{"selected_tool": "click", "tool_parameters": {}}"#);

    let executor = desktop_executor(desktop.clone());
    let scene = ExecutorSceneProducer::new(executor.clone());
    let outcome = Harness::new(llm)
        .run(executor.as_ref(), &scene, settings(&dir), "type hi")
        .await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.execution_steps(), 1);
    assert!(outcome.cycles.is_empty());
    assert!(!desktop.invocations().await.iter().any(|c| c == "click"));
    // 下一轮感知挂在失败的执行步骤下
    assert_eq!(
        step(&outcome, "PERCEPTION_002").from_step.as_deref(),
        Some("EXECUTION_001")
    );
}

#[tokio::test]
async fn test_validation_failure_skips_recovery() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new().with_fallback("summary", "window was gone"));
    llm.push("perception", TO_DECISION).push("perception", TO_SUMMARY);
    llm.push(
        "decision",
        r#"{"selected_tool": "maximize", "tool_parameters": {"window_id": "hwnd_gone"}}"#,
    );

    let desktop = Arc::new(SimulatedDesktop::new());
    let executor = desktop_executor(desktop.clone());
    let scene = ExecutorSceneProducer::new(executor.clone());
    let outcome = Harness::new(llm.clone())
        .run(executor.as_ref(), &scene, settings(&dir), "maximize it")
        .await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    let exec = step(&outcome, "EXECUTION_001");
    assert_eq!(exec.status, StepStatus::Failed);
    assert!(exec.result.as_ref().unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("not found"));
    assert!(!outcome.steps.iter().any(|s| s.id.contains("_ERR_")));
    assert_eq!(llm.inputs("perception").len(), 2);
    assert!(!desktop.invocations().await.iter().any(|c| c == "maximize"));
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_session() {
    let dir = TempDir::new().unwrap();
    let desktop = Arc::new(SimulatedDesktop::new());
    for _ in 0..4 {
        desktop.fail_next("launch", "Access denied").await;
    }
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_fallback("perception", TO_DECISION)
            .with_fallback("decision", r#"{"selected_tool": "launch", "tool_parameters": {"app_name": "paint"}}"#),
    );
    llm.push_err("summary", pilot::llm::LlmError::EmptyResponse);

    let executor = desktop_executor(desktop.clone());
    let scene = ExecutorSceneProducer::new(executor.clone());
    let outcome = Harness::new(llm)
        .run(executor.as_ref(), &scene, settings(&dir), "open paint")
        .await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("Retry budget exhausted"));
    // 首次执行 + 3 次重试
    assert_eq!(outcome.execution_steps(), 4);
    assert!(outcome.steps.iter().any(|s| s.id == "EXECUTION_001_R3"));
    // 摘要 LLM 失败时使用账本叙述
    assert!(outcome.summary.contains("open paint"));
    assert!(outcome.summary_path.as_ref().is_some_and(|p| p.exists()));
}

/// 前 `failures` 次执行返回传输错误，之后交给模拟桌面
struct FlakyExecutor {
    inner: Arc<LocalExecutor>,
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl CommandExecutor for FlakyExecutor {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandResponse, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(TransportError::Unavailable("connection refused".to_string()));
        }
        self.inner.execute(request).await
    }

    async fn capabilities(&self) -> Result<Catalogue, TransportError> {
        self.inner.capabilities().await
    }
}

#[tokio::test]
async fn test_transport_fault_retried_then_succeeds() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new().with_fallback("summary", "ok"));
    llm.push("perception", TO_DECISION).push("perception", TO_SUMMARY);
    llm.push("decision", r#"{"selected_tool": "computer", "tool_parameters": {}}"#);

    let executor = FlakyExecutor {
        inner: desktop_executor(Arc::new(SimulatedDesktop::new())),
        failures: 2,
        calls: AtomicUsize::new(0),
    };
    let scene = StaticSceneProducer::new(json!({"windows": []}));
    let harness = Harness::new(llm);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = AgentLoop::new(
        &harness.perception,
        &harness.decision,
        &harness.summarizer,
        &executor,
        &scene,
        settings(&dir),
    )
    .with_event_tx(&tx)
    .run("computer name")
    .await;
    drop(tx);

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    // 传输重试沿用同一步骤
    assert_eq!(outcome.execution_steps(), 1);
    assert_eq!(step(&outcome, "EXECUTION_001").status, StepStatus::Completed);

    let mut retries = 0;
    while let Some(ev) = rx.recv().await {
        if matches!(ev, AgentEvent::TransportRetry { .. }) {
            retries += 1;
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_transport_fault_exhausts_retries() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_fallback("perception", TO_DECISION)
            .with_fallback("decision", r#"{"selected_tool": "computer", "tool_parameters": {}}"#)
            .with_fallback("summary", "executor unreachable"),
    );
    let executor = FlakyExecutor {
        inner: desktop_executor(Arc::new(SimulatedDesktop::new())),
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
    };
    let scene = StaticSceneProducer::new(json!({}));
    let outcome = Harness::new(llm)
        .run(&executor, &scene, settings(&dir), "computer name")
        .await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
    assert_eq!(step(&outcome, "EXECUTION_001").status, StepStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("transport retries"));
    assert!(outcome.summary_path.is_some());
}

#[tokio::test]
async fn test_no_command_stops_session() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new().with_fallback("summary", "nothing to do"));
    llm.push("perception", TO_DECISION);
    llm.push("decision", r#"{"selected_tool": null, "tool_parameters": null}"#);

    let executor = desktop_executor(Arc::new(SimulatedDesktop::new()));
    let scene = StaticSceneProducer::new(json!({}));
    let outcome = Harness::new(llm)
        .run(executor.as_ref(), &scene, settings(&dir), "idle")
        .await;

    assert_eq!(outcome.status, SessionStatus::Stopped);
    assert_eq!(outcome.execution_steps(), 0);
    assert_eq!(outcome.summary, "nothing to do");
}

#[tokio::test]
async fn test_llm_garbage_fails_session_and_marks_step() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new().with_fallback("summary", "bad output"));
    llm.push("perception", "I think you should click somewhere");

    let executor = desktop_executor(Arc::new(SimulatedDesktop::new()));
    let scene = StaticSceneProducer::new(json!({}));
    let outcome = Harness::new(llm)
        .run(executor.as_ref(), &scene, settings(&dir), "do something")
        .await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(step(&outcome, "PERCEPTION_001").status, StepStatus::Failed);
    assert!(outcome.summary_path.is_some());
}

#[tokio::test]
async fn test_cancelled_session_still_persists() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new().with_fallback("summary", "cancelled early"));
    let executor = desktop_executor(Arc::new(SimulatedDesktop::new()));
    let scene = StaticSceneProducer::new(json!({}));
    let harness = Harness::new(llm);

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let outcome = AgentLoop::new(
        &harness.perception,
        &harness.decision,
        &harness.summarizer,
        executor.as_ref(),
        &scene,
        settings(&dir),
    )
    .with_cancel_token(token)
    .run("anything")
    .await;

    assert_eq!(outcome.status, SessionStatus::Cancelled);
    assert!(outcome.steps.iter().all(|s| s.kind == StepKind::Root));
    let saved = load_summary(outcome.summary_path.as_ref().unwrap()).unwrap();
    assert_eq!(saved.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_chain_stops_at_first_failure() {
    let desktop = Arc::new(SimulatedDesktop::new());
    let executor = desktop_executor(desktop.clone());
    let catalogue = executor.capabilities().await.unwrap();

    let report = run_chain("user : maximize hwnd_gone : computer", executor.as_ref(), &catalogue).await;

    assert_eq!(report.failed_at, Some(2));
    assert_eq!(report.steps.len(), 2);
    assert!(report.steps[0].response.success);
    let invoked = desktop.invocations().await;
    assert!(invoked.iter().any(|c| c == "user"));
    assert!(!invoked.iter().any(|c| c == "computer"));
}

/// 每次调用计 10 + 2 个 token 的包装客户端
struct MeteredLlm {
    inner: ScriptedLlmClient,
    usage: TokenUsage,
}

#[async_trait]
impl LlmClient for MeteredLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.usage.add(10, 2);
        self.inner.complete(messages).await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[tokio::test]
async fn test_token_usage_lands_in_session_record() {
    let dir = TempDir::new().unwrap();
    let inner = ScriptedLlmClient::new().with_fallback("summary", "done");
    inner.push("perception", TO_SUMMARY);
    let llm = Arc::new(MeteredLlm {
        inner,
        usage: TokenUsage::default(),
    });

    let executor = desktop_executor(Arc::new(SimulatedDesktop::new()));
    let scene = StaticSceneProducer::new(json!({"windows": []}));
    let outcome = Harness::new(llm)
        .run(executor.as_ref(), &scene, settings(&dir), "anything open?")
        .await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    let saved = load_summary(outcome.summary_path.as_ref().unwrap()).unwrap();
    // perception + summary
    assert_eq!(saved.token_usage.prompt_tokens, 20);
    assert_eq!(saved.token_usage.total_tokens, 24);
    assert_eq!(saved.last_scene, Some(json!({"windows": []})));
    assert!(saved.globals.is_empty());
}
