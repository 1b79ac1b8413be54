//! Pilot 交互式命令客户端
//!
//! 启动: cargo run --bin pilot-client -- [server_url]
//! 连接正在运行的 pilot-server，逐行读取命令：
//! - `q` 退出，`r` 刷新窗口清单（显示短 ID），`help` 列出命令
//! - 其余输入按 `" : "` 拆成命令链顺序执行，遇到失败即停止

use std::io::Write;

use anyhow::Context;
use pilot::executor::{CommandExecutor, RemoteExecutor};
use pilot::protocol::{run_chain, short_key, Catalogue, CHAIN_SEPARATOR, CommandRequest, WindowInventory, DEFAULT_SHORT_ID_LEN};
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

fn print_catalogue(catalogue: &Catalogue) {
    println!("\n=== Server Commands ===");
    for (category, commands) in catalogue {
        println!("\n{}:", category);
        for (name, entry) in commands {
            println!("  • {}: {}", name, entry.description);
            if !entry.params.is_empty() {
                let params = serde_json::to_string(&entry.params).unwrap_or_default();
                println!("    Parameters: {}", params);
            }
        }
    }
    println!("\nCommand chaining: separate commands with ' : '");
    println!("  maximize 12345678 : move 12345678 100 100 : resize 12345678 800 600");
    println!("  If any command fails, the chain stops at that point.");
    println!("\nShort IDs: '<short_id> <command> [args]' works for window commands (see 'r').\n");
}

async fn print_windows(executor: &RemoteExecutor) -> anyhow::Result<()> {
    let resp = executor
        .execute(&CommandRequest::bare("refresh_windows"))
        .await
        .context("refresh_windows failed")?;
    if !resp.success {
        println!("✗ {}", resp.describe());
        return Ok(());
    }
    let resp = executor
        .execute(&CommandRequest::bare("get_windows"))
        .await
        .context("get_windows failed")?;
    let inventory: WindowInventory = resp
        .result
        .as_ref()
        .and_then(|r| r.get("inventory"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    println!("{}", "=".repeat(80));
    println!(
        "WINDOWS - {} windows across {} monitors",
        inventory.window_count(),
        inventory.monitors.len()
    );
    println!("{}", "=".repeat(80));
    for monitor in &inventory.monitors {
        println!("\nMONITOR {} ({}x{})", monitor.id, monitor.width, monitor.height);
        if monitor.applications.is_empty() {
            println!("   No applications on this monitor");
        }
        for app in &monitor.applications {
            println!("\n   {}", app.name);
            for w in &app.windows {
                let suffix = if w.minimized { " (minimized)" } else { "" };
                println!("      ├─ {}{}", w.title, suffix);
                println!(
                    "      │   ID: {}  short: {}",
                    w.window_id,
                    short_key(&w.window_id, DEFAULT_SHORT_ID_LEN)
                );
                println!("      │   Position: ({}, {})  Size: {}x{}", w.x, w.y, w.width, w.height);
            }
        }
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pilot::observability::init();

    let base_url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let executor = RemoteExecutor::new(&base_url, 30).context("Failed to build HTTP client")?;
    let catalogue = executor
        .capabilities()
        .await
        .with_context(|| format!("Cannot reach pilot-server at {}", base_url))?;
    println!("Connected to {}", base_url);
    print_catalogue(&catalogue);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            l = lines.next_line() => l.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted. Goodbye!");
                break;
            }
        };
        let Some(line) = line else { break };
        let input = line.trim();
        match input {
            "" => continue,
            "q" | "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => print_catalogue(&catalogue),
            "r" => {
                if let Err(e) = print_windows(&executor).await {
                    println!("✗ {:#}", e);
                }
            }
            _ => {
                let report = run_chain(input, &executor, &catalogue).await;
                for step in &report.steps {
                    let mark = if step.response.success { "✓" } else { "✗" };
                    println!("{} {}", mark, step.response.describe());
                }
                if let Some(at) = report.failed_at {
                    if report.steps.len() > 1 || input.contains(CHAIN_SEPARATOR) {
                        println!("⚠️  Chain stopped at step {}", at);
                    }
                }
            }
        }
    }
    Ok(())
}
