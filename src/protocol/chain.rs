//! 交互式命令链
//!
//! 输入以 `" : "` 分隔为若干子命令，按序执行，遇到第一个失败即停止并报告失败位置，
//! 已执行的子命令不回滚。
//!
//! 单条命令语法：
//! - `<cmd> [args…]`
//! - `<short_id> <window_cmd> [args…]`
//! - 窗口类命令以窗口 ID 作为第一个参数：`resize <id> <w> <h>`
//!
//! 参数按位置映射，见 [`parse_command`]。

use serde_json::{json, Value};
use thiserror::Error;

use crate::executor::CommandExecutor;
use crate::protocol::envelope::{CommandRequest, CommandResponse, Params, ProtocolErrorKind};
use crate::protocol::registry::Catalogue;

pub const CHAIN_SEPARATOR: &str = " : ";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainParseError {
    #[error("Empty command")]
    Empty,
    #[error("Argument '{name}' expects a number, got '{value}'")]
    NotANumber { name: &'static str, value: String },
}

/// 拆分命令链；去除首尾空白并丢弃空片段
pub fn split_chain(input: &str) -> Vec<&str> {
    input
        .split(CHAIN_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn targets_window(catalogue: &Catalogue, command: &str) -> bool {
    catalogue
        .get("window_commands")
        .and_then(|group| group.get(command))
        .is_some_and(|entry| entry.params.contains_key("window_id"))
}

fn is_known(catalogue: &Catalogue, command: &str) -> bool {
    catalogue.values().any(|group| group.contains_key(command))
}

struct Args<'a> {
    parts: &'a [&'a str],
    params: Params,
}

impl<'a> Args<'a> {
    fn get(&self, idx: usize) -> Option<&'a str> {
        self.parts.get(idx).copied()
    }

    fn text(&mut self, name: &str, idx: usize) {
        if let Some(v) = self.get(idx) {
            self.params.insert(name.to_string(), Value::String(v.to_string()));
        }
    }

    fn int(&mut self, name: &'static str, idx: usize) -> Result<(), ChainParseError> {
        if let Some(v) = self.get(idx) {
            let n: i64 = v.parse().map_err(|_| ChainParseError::NotANumber {
                name,
                value: v.to_string(),
            })?;
            self.params.insert(name.to_string(), json!(n));
        }
        Ok(())
    }

    fn float(&mut self, name: &'static str, idx: usize) -> Result<(), ChainParseError> {
        if let Some(v) = self.get(idx) {
            let n: f64 = v.parse().map_err(|_| ChainParseError::NotANumber {
                name,
                value: v.to_string(),
            })?;
            self.params.insert(name.to_string(), json!(n));
        }
        Ok(())
    }

    /// x y 成对出现时才写入
    fn point(&mut self, idx: usize) -> Result<(), ChainParseError> {
        if self.get(idx + 1).is_some() {
            self.int("x", idx)?;
            self.int("y", idx + 1)?;
        }
        Ok(())
    }

    fn rest(&mut self, name: &str, from: usize) {
        if self.parts.len() > from {
            self.params
                .insert(name.to_string(), Value::String(self.parts[from..].join(" ")));
        }
    }
}

/// 解析单条命令为请求信封
///
/// 位置参数（方括号为可选）：
/// `resize id w h`、`move id x y`、`screen id s x y`、`monitor id m`、
/// `click|doubleclick [button [x y]]`、`longclick [button [duration [x y]]]`、
/// `scroll dir [amount [x y]]`、`drag sx sy ex ey [button [duration]]`、
/// `send|type <text…>`、`launch app [screen [mode]]`（mode 为 normal 以外即全屏）、
/// `msgbox title message [x y]`。
///
/// 未知命令不在此处报错，交由路由返回结构化拒绝。
pub fn parse_command(text: &str, catalogue: &Catalogue) -> Result<CommandRequest, ChainParseError> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Err(ChainParseError::Empty);
    }

    // `<short_id> <window_cmd> …` 改写为 `<window_cmd> <short_id> …`
    let mut reordered;
    let parts: &[&str] = if words.len() >= 2 && !is_known(catalogue, words[0]) && targets_window(catalogue, words[1]) {
        reordered = words.clone();
        reordered.swap(0, 1);
        &reordered
    } else {
        &words
    };

    let command = parts[0];
    let mut args = Args {
        parts,
        params: Params::new(),
    };

    if targets_window(catalogue, command) {
        args.text("window_id", 1);
        match command {
            "resize" => {
                args.int("width", 2)?;
                args.int("height", 3)?;
            }
            "move" => args.point(2)?,
            "screen" => {
                args.int("screen", 2)?;
                args.point(3)?;
            }
            "monitor" => args.int("monitor", 2)?,
            _ => {}
        }
        return Ok(CommandRequest::new(command, args.params));
    }

    match command {
        "click" | "doubleclick" => {
            args.text("button", 1);
            args.point(2)?;
        }
        "longclick" => {
            args.text("button", 1);
            args.float("duration", 2)?;
            args.point(3)?;
        }
        "scroll" => {
            args.text("direction", 1);
            args.int("amount", 2)?;
            args.point(3)?;
        }
        "drag" => {
            args.int("start_x", 1)?;
            args.int("start_y", 2)?;
            args.int("end_x", 3)?;
            args.int("end_y", 4)?;
            args.text("button", 5);
            args.float("duration", 6)?;
        }
        "send" => args.rest("keys", 1),
        "type" => args.rest("text", 1),
        "launch" => {
            args.text("app_name", 1);
            args.int("screen_id", 2)?;
            if args.get(1).is_some() {
                let fullscreen = args.get(3).map_or(true, |mode| !mode.eq_ignore_ascii_case("normal"));
                args.params.insert("fullscreen".to_string(), Value::Bool(fullscreen));
            }
        }
        "msgbox" => {
            args.text("title", 1);
            args.text("message", 2);
            args.point(3)?;
        }
        "get_windows" => {
            if let Some(flag) = args.get(1) {
                args.params
                    .insert("show_minimized".to_string(), Value::Bool(flag != "false" && flag != "0"));
            }
        }
        _ => {}
    }
    Ok(CommandRequest::new(command, args.params))
}

#[derive(Debug, Clone)]
pub struct ChainStep {
    /// 从 1 开始
    pub index: usize,
    pub text: String,
    pub response: CommandResponse,
}

#[derive(Debug, Clone, Default)]
pub struct ChainReport {
    pub steps: Vec<ChainStep>,
    /// 失败的子命令序号（从 1 开始）
    pub failed_at: Option<usize>,
}

impl ChainReport {
    pub fn succeeded(&self) -> bool {
        self.failed_at.is_none()
    }
}

/// 依次执行命令链，遇到第一个失败（解析失败、传输失败或执行失败）即停止
pub async fn run_chain(input: &str, executor: &dyn CommandExecutor, catalogue: &Catalogue) -> ChainReport {
    let mut report = ChainReport::default();
    for (i, text) in split_chain(input).into_iter().enumerate() {
        let index = i + 1;
        let response = match parse_command(text, catalogue) {
            Ok(request) => match executor.execute(&request).await {
                Ok(resp) => resp,
                Err(e) => CommandResponse::failure(format!("Transport error: {}", e)),
            },
            Err(e) => CommandResponse::rejected(ProtocolErrorKind::InvalidParams, e.to_string()),
        };
        let failed = !response.success;
        report.steps.push(ChainStep {
            index,
            text: text.to_string(),
            response,
        });
        if failed {
            tracing::warn!(step = index, command = %text, "chain stopped");
            report.failed_at = Some(index);
            break;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::registry::CapabilityRegistry;

    fn catalogue() -> Catalogue {
        CapabilityRegistry::desktop().catalogue()
    }

    #[test]
    fn test_split_chain() {
        assert_eq!(split_chain("user : computer"), vec!["user", "computer"]);
        assert_eq!(split_chain("  user  :  : computer "), vec!["user", "computer"]);
        // 没有两侧空格的冒号不是分隔符
        assert_eq!(split_chain("send ctrl:c"), vec!["send ctrl:c"]);
    }

    #[test]
    fn test_window_command_takes_id_first() {
        let req = parse_command("resize 00010001 800 600", &catalogue()).unwrap();
        assert_eq!(req.command, "resize");
        assert_eq!(req.params["window_id"], "00010001");
        assert_eq!(req.params["width"], 800);
        assert_eq!(req.params["height"], 600);
    }

    #[test]
    fn test_short_id_first_form() {
        let req = parse_command("00010001 monitor 2", &catalogue()).unwrap();
        assert_eq!(req.command, "monitor");
        assert_eq!(req.params["window_id"], "00010001");
        assert_eq!(req.params["monitor"], 2);
    }

    #[test]
    fn test_mouse_and_keyboard_args() {
        let cat = catalogue();
        let click = parse_command("click right 10 20", &cat).unwrap();
        assert_eq!(click.params["button"], "right");
        assert_eq!(click.params["x"], 10);

        let drag = parse_command("drag 1 2 3 4 left 0.5", &cat).unwrap();
        assert_eq!(drag.params["end_y"], 4);
        assert_eq!(drag.params["duration"], 0.5);

        let typed = parse_command("type hello   world", &cat).unwrap();
        assert_eq!(typed.params["text"], "hello world");
    }

    #[test]
    fn test_launch_mode() {
        let cat = catalogue();
        let normal = parse_command("launch mspaint 1 normal", &cat).unwrap();
        assert_eq!(normal.params["fullscreen"], false);
        let full = parse_command("launch mspaint 2 max", &cat).unwrap();
        assert_eq!(full.params["fullscreen"], true);
        assert_eq!(full.params["screen_id"], 2);
    }

    #[test]
    fn test_bad_number() {
        let err = parse_command("move abc left 3", &catalogue()).unwrap_err();
        assert_eq!(
            err,
            ChainParseError::NotANumber {
                name: "x",
                value: "left".to_string()
            }
        );
        assert_eq!(parse_command("   ", &catalogue()).unwrap_err(), ChainParseError::Empty);
    }
}
