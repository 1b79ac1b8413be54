//! Headless Agent 运行时
//!
//! 按配置装配一次会话所需的全部组件：LLM、命令执行器（进程内模拟桌面或远程 pilot-server）、
//! 场景来源与 Prompt 模板；`run_query` 对单条查询跑完整的感知 → 决策 → 执行循环。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{AppConfig, ExecutorMode, ServerSection};
use crate::core::{AgentError, SessionSupervisor};
use crate::cycle::{AgentEvent, AgentLoop, Decision, LoopSettings, Perception, PromptSet, SessionOutcome, Summarizer};
use crate::executor::{CommandExecutor, ExecutorSceneProducer, LocalExecutor, RemoteExecutor, SceneProducer};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::protocol::{CapabilityRegistry, CommandRouter, EventBroadcaster, HandlerSet, SimulatedDesktop};

/// 预构建的 Agent 组件，可被多个会话共享
pub struct AgentComponents {
    pub perception: Perception,
    pub decision: Decision,
    pub summarizer: Summarizer,
    pub executor: Arc<dyn CommandExecutor>,
    pub scene: Arc<dyn SceneProducer>,
    pub settings: LoopSettings,
    pub supervisor: SessionSupervisor,
}

/// 按 [llm].provider 选择后端；openai 但没有 OPENAI_API_KEY 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        (_, Some(key)) => {
            let client = OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
                cfg.llm.timeouts.request,
            );
            tracing::info!("Using OpenAI-compatible LLM ({})", client.model());
            Arc::new(client)
        }
        (_, None) => {
            tracing::warn!("No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 以模拟桌面为后端的命令路由
pub fn desktop_router(
    server: &ServerSection,
    desktop: Arc<SimulatedDesktop>,
    broadcaster: Arc<EventBroadcaster>,
) -> CommandRouter {
    CommandRouter::new(Arc::new(CapabilityRegistry::desktop()), HandlerSet::uniform(desktop))
        .with_history_capacity(server.history_capacity)
        .with_short_id_len(server.short_id_len)
        .with_broadcaster(broadcaster)
}

pub fn create_executor(cfg: &AppConfig) -> Result<Arc<dyn CommandExecutor>, AgentError> {
    match cfg.executor.mode {
        ExecutorMode::Local => {
            tracing::info!("Using in-process simulated desktop");
            let router = desktop_router(
                &cfg.server,
                Arc::new(SimulatedDesktop::new()),
                Arc::new(EventBroadcaster::new()),
            );
            Ok(Arc::new(LocalExecutor::new(Arc::new(router))))
        }
        ExecutorMode::Remote => {
            tracing::info!("Using remote executor at {}", cfg.executor.base_url);
            let remote = RemoteExecutor::new(&cfg.executor.base_url, cfg.executor.timeout_secs)
                .map_err(|e| AgentError::Config(e.to_string()))?;
            Ok(Arc::new(remote))
        }
    }
}

pub fn loop_settings(cfg: &AppConfig) -> LoopSettings {
    LoopSettings {
        max_steps: cfg.agent.max_steps,
        max_retries: cfg.agent.max_retries,
        retry_backoff: Duration::from_millis(cfg.agent.retry_backoff_ms),
        output_root: cfg.agent.output_root.clone(),
    }
}

pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(cfg);
    let executor = create_executor(cfg)?;
    Ok(assemble(cfg, llm, executor))
}

/// 使用给定的 LLM 与执行器装配（测试与嵌入场景）
pub fn assemble(cfg: &AppConfig, llm: Arc<dyn LlmClient>, executor: Arc<dyn CommandExecutor>) -> AgentComponents {
    let prompts = PromptSet::load(&cfg.agent.prompts_dir);
    AgentComponents {
        perception: Perception::new(llm.clone(), prompts.perception),
        decision: Decision::new(llm.clone(), prompts.decision),
        summarizer: Summarizer::new(llm, prompts.summary),
        scene: Arc::new(ExecutorSceneProducer::new(executor.clone())),
        executor,
        settings: loop_settings(cfg),
        supervisor: SessionSupervisor::new(),
    }
}

/// 跑一个会话；event_tx 可选，用于实时展示进度
pub async fn run_query(
    components: &AgentComponents,
    query: &str,
    event_tx: Option<&mpsc::UnboundedSender<AgentEvent>>,
) -> SessionOutcome {
    let mut agent = AgentLoop::new(
        &components.perception,
        &components.decision,
        &components.summarizer,
        components.executor.as_ref(),
        components.scene.as_ref(),
        components.settings.clone(),
    )
    .with_cancel_token(components.supervisor.session_token());
    if let Some(tx) = event_tx {
        agent = agent.with_event_tx(tx);
    }
    agent.run(query).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mock_components_complete_a_session() {
        let dir = TempDir::new().unwrap();
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg.agent.output_root = dir.path().to_path_buf();
        cfg.agent.prompts_dir = dir.path().join("no-prompts");

        let components = create_agent_components(&cfg).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = run_query(&components, "list my windows", Some(&tx)).await;

        assert_eq!(outcome.status, SessionStatus::Completed);
        assert!(outcome.summary_path.as_ref().is_some_and(|p| p.exists()));
        drop(tx);
        let mut saw_finished = false;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, AgentEvent::Finished { .. }) {
                saw_finished = true;
            }
        }
        assert!(saw_finished);
    }

    #[test]
    fn test_remote_mode_builds_http_executor() {
        let mut cfg = AppConfig::default();
        cfg.executor.mode = ExecutorMode::Remote;
        cfg.executor.base_url = "http://127.0.0.1:9".to_string();
        assert!(create_executor(&cfg).is_ok());
    }
}
