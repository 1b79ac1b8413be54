//! Pilot - 桌面操作智能体
//!
//! 用法：`pilot [--config <path>] <query...>`
//! 对一条查询跑完整会话，实时打印进度事件，结束时输出摘要与落盘路径。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use pilot::agent::{create_agent_components, run_query};
use pilot::config::load_config;
use pilot::core::ShutdownManager;
use pilot::cycle::AgentEvent;
use pilot::session::SessionStatus;
use tokio::sync::mpsc;

fn print_event(ev: &AgentEvent) {
    match ev {
        AgentEvent::SessionStarted { session_id, query } => {
            println!("▶ {} : {}", session_id, query);
        }
        AgentEvent::CycleStarted { cycle, max_steps } => println!("\n── cycle {}/{} ──", cycle, max_steps),
        AgentEvent::Perceived {
            step_id,
            route,
            reasoning,
            ..
        } => println!("[{}] route={:?} {}", step_id, route, reasoning),
        AgentEvent::Decided {
            step_id,
            command,
            params,
            confidence,
        } => println!(
            "[{}] {} {} (confidence {:.2})",
            step_id,
            command.as_deref().unwrap_or("<none>"),
            params,
            confidence
        ),
        AgentEvent::Executing {
            step_id,
            command,
            attempt,
            ..
        } => println!("[{}] executing {} (attempt {})", step_id, command, attempt),
        AgentEvent::Executed {
            step_id,
            success,
            message,
        } => println!("[{}] {} {}", step_id, if *success { "✓" } else { "✗" }, message),
        AgentEvent::TransportRetry {
            step_id,
            attempt,
            error,
        } => println!("[{}] transport retry {}: {}", step_id, attempt, error),
        AgentEvent::Recovery { step_id, detail } => println!("[{}] recovery: {}", step_id, detail),
        AgentEvent::Finished { status, .. } => println!("\n■ finished: {:?}", status),
        AgentEvent::Error { text } => eprintln!("error: {}", text),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pilot::observability::init();

    let mut args = std::env::args().skip(1).peekable();
    let mut config_path: Option<PathBuf> = None;
    if args.peek().map(String::as_str) == Some("--config") {
        args.next();
        config_path = Some(args.next().map(PathBuf::from).context("--config requires a path")?);
    }
    let query = args.collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("usage: pilot [--config <path>] <query...>");
    }

    let cfg = load_config(config_path.as_deref()).context("Failed to load config")?;
    let components = create_agent_components(&cfg).context("Failed to create agent")?;

    // Ctrl+C / SIGTERM → 取消当前会话（仍会生成并落盘摘要）
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let supervisor = components.supervisor.clone();
    let signals = shutdown.clone();
    tokio::spawn(async move {
        let reason = signals.reason().await;
        tracing::warn!(reason = %reason, "cancelling session");
        supervisor.cancel();
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            print_event(&ev);
        }
    });

    let outcome = run_query(&components, &query, Some(&event_tx)).await;
    drop(event_tx);
    let _ = printer.await;

    println!("\n{}", outcome.summary);
    if let Some(path) = &outcome.summary_path {
        println!("session record: {}", path.display());
    }
    if let Some(err) = &outcome.error {
        eprintln!("session error: {}", err);
    }
    if outcome.status == SessionStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
