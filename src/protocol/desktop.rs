//! 内存模拟桌面
//!
//! 平台无关的窗口/鼠标/键盘/系统后端，支撑本地执行器、HTTP 服务和测试。
//! 每次调用都会记入 invocation 日志，测试可据此断言被拒绝的命令没有触达后端。

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::protocol::envelope::Params;
use crate::protocol::handlers::{
    AppWindows, CommandHandler, HandlerError, HandlerOutput, MonitorInfo, ResourceEnumerator, WindowInfo,
    WindowInventory,
};

#[derive(Debug, Clone)]
enum Injected {
    Failure(String),
    Fault(String),
}

#[derive(Debug, Clone)]
struct Monitor {
    id: u32,
    device: String,
    width: i64,
    height: i64,
    primary: bool,
}

#[derive(Debug)]
struct DesktopState {
    monitors: Vec<Monitor>,
    windows: Vec<WindowInfo>,
    next_seq: u64,
    cursor: (i64, i64),
    typed: String,
    invocations: Vec<String>,
    injected: HashMap<String, VecDeque<Injected>>,
}

impl DesktopState {
    fn dual_monitor() -> Self {
        Self {
            monitors: vec![
                Monitor {
                    id: 1,
                    device: "\\\\.\\DISPLAY1".to_string(),
                    width: 1920,
                    height: 1080,
                    primary: true,
                },
                Monitor {
                    id: 2,
                    device: "\\\\.\\DISPLAY2".to_string(),
                    width: 2560,
                    height: 1440,
                    primary: false,
                },
            ],
            windows: Vec::new(),
            next_seq: 0,
            cursor: (0, 0),
            typed: String::new(),
            invocations: Vec::new(),
            injected: HashMap::new(),
        }
    }

    fn window_mut(&mut self, id: &str) -> Option<&mut WindowInfo> {
        self.windows.iter_mut().find(|w| w.window_id == id)
    }

    fn monitor(&self, id: u32) -> Option<&Monitor> {
        self.monitors.iter().find(|m| m.id == id)
    }

    fn spawn(&mut self, title: &str, app: &str, monitor: u32) -> String {
        self.next_seq += 1;
        let id = format!("hwnd_{:012x}", 0x10000 + self.next_seq);
        let mut window = WindowInfo::new(id.clone(), title, app, monitor);
        window.x = 100 + 20 * self.next_seq as i64;
        window.y = 100 + 20 * self.next_seq as i64;
        self.windows.push(window);
        id
    }

    fn inventory(&self) -> WindowInventory {
        let monitors = self
            .monitors
            .iter()
            .map(|m| {
                let mut applications: Vec<AppWindows> = Vec::new();
                for w in self.windows.iter().filter(|w| w.monitor == m.id) {
                    match applications.iter_mut().find(|a| a.name == w.app) {
                        Some(app) => app.windows.push(w.clone()),
                        None => applications.push(AppWindows {
                            name: w.app.clone(),
                            windows: vec![w.clone()],
                        }),
                    }
                }
                MonitorInfo {
                    id: m.id,
                    device: m.device.clone(),
                    width: m.width,
                    height: m.height,
                    primary: m.primary,
                    applications,
                }
            })
            .collect();
        WindowInventory { monitors }
    }
}

pub struct SimulatedDesktop {
    state: Mutex<DesktopState>,
}

impl SimulatedDesktop {
    /// 双显示器，预置资源管理器与记事本窗口
    pub fn new() -> Self {
        let mut state = DesktopState::dual_monitor();
        state.spawn("File Explorer", "explorer", 1);
        state.spawn("Untitled - Notepad", "notepad", 1);
        Self {
            state: Mutex::new(state),
        }
    }

    /// 双显示器，无窗口
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(DesktopState::dual_monitor()),
        }
    }

    pub async fn open_window(&self, title: &str, app: &str, monitor: u32) -> String {
        self.state.lock().await.spawn(title, app, monitor)
    }

    /// 使用指定 ID 打开窗口（用于构造短 ID 冲突）
    pub async fn open_window_with_id(&self, id: &str, title: &str, app: &str, monitor: u32) {
        self.state
            .lock()
            .await
            .windows
            .push(WindowInfo::new(id, title, app, monitor));
    }

    pub async fn window_ids(&self) -> Vec<String> {
        self.state.lock().await.windows.iter().map(|w| w.window_id.clone()).collect()
    }

    pub async fn window(&self, id: &str) -> Option<WindowInfo> {
        self.state.lock().await.windows.iter().find(|w| w.window_id == id).cloned()
    }

    pub async fn invocations(&self) -> Vec<String> {
        self.state.lock().await.invocations.clone()
    }

    pub async fn cursor(&self) -> (i64, i64) {
        self.state.lock().await.cursor
    }

    pub async fn typed_text(&self) -> String {
        self.state.lock().await.typed.clone()
    }

    /// 下一次执行 `command` 时返回结构化失败
    pub async fn fail_next(&self, command: &str, message: &str) {
        self.inject(command, Injected::Failure(message.to_string())).await;
    }

    /// 下一次执行 `command` 时抛出执行器错误
    pub async fn fault_next(&self, command: &str, message: &str) {
        self.inject(command, Injected::Fault(message.to_string())).await;
    }

    async fn inject(&self, command: &str, what: Injected) {
        self.state
            .lock()
            .await
            .injected
            .entry(command.to_string())
            .or_default()
            .push_back(what);
    }
}

impl Default for SimulatedDesktop {
    fn default() -> Self {
        Self::new()
    }
}

fn num(params: &Params, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_f64).map(|v| v.round() as i64)
}

fn float(params: &Params, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn text<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn position_suffix(params: &Params) -> String {
    match (num(params, "x"), num(params, "y")) {
        (Some(x), Some(y)) => format!(" at ({}, {})", x, y),
        _ => String::new(),
    }
}

#[async_trait]
impl CommandHandler for SimulatedDesktop {
    async fn handle(&self, command: &str, params: &Params) -> Result<HandlerOutput, HandlerError> {
        let mut state = self.state.lock().await;
        state.invocations.push(command.to_string());

        if let Some(injected) = state.injected.get_mut(command).and_then(VecDeque::pop_front) {
            return match injected {
                Injected::Failure(msg) => Ok(HandlerOutput::failed(msg)),
                Injected::Fault(msg) => Err(HandlerError(msg)),
            };
        }

        let window_id = text(params, "window_id").unwrap_or_default().to_string();

        let output = match command {
            "get_windows" => {
                let show_minimized = params.get("show_minimized").and_then(Value::as_bool).unwrap_or(true);
                let windows: Vec<&WindowInfo> = state
                    .windows
                    .iter()
                    .filter(|w| show_minimized || !w.minimized)
                    .collect();
                let message = format!("Found {} windows", windows.len());
                HandlerOutput::ok(message).with_result(json!({
                    "windows": windows,
                    "inventory": state.inventory(),
                }))
            }
            "print_windows_summary" => {
                let inventory = state.inventory();
                let mut lines = vec![
                    format!("Window Summary at {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
                    format!("Total Monitors: {}", inventory.monitors.len()),
                    format!("Total Windows: {}", inventory.window_count()),
                    String::new(),
                ];
                for monitor in &inventory.monitors {
                    lines.push(format!("=== MONITOR_{} ===", monitor.id));
                    lines.push(format!("Device: {}", monitor.device));
                    lines.push(format!("Resolution: {}x{}", monitor.width, monitor.height));
                    lines.push(format!("Primary: {}", if monitor.primary { "Yes" } else { "No" }));
                    for app in &monitor.applications {
                        lines.push(format!("  {} ({} windows)", app.name, app.windows.len()));
                        for w in &app.windows {
                            let visibility = if w.minimized { "MINIMIZED" } else { "VISIBLE" };
                            lines.push(format!("    - {} ({})", w.title, visibility));
                        }
                    }
                    lines.push(String::new());
                }
                HandlerOutput::ok(lines.join("\n"))
            }
            "refresh_windows" => HandlerOutput::ok(format!("Refreshed {} windows", state.windows.len())),

            "maximize" | "minimize" | "resize" | "move" | "introspect" | "tree" => {
                let Some(window) = state.window_mut(&window_id) else {
                    return Ok(HandlerOutput::failed(format!("Window {} not found", window_id)));
                };
                match command {
                    "maximize" => {
                        window.minimized = false;
                        window.x = 0;
                        window.y = 0;
                        HandlerOutput::ok(format!("Maximized window {}", window.title))
                    }
                    "minimize" => {
                        window.minimized = true;
                        HandlerOutput::ok(format!("Minimized window {}", window.title))
                    }
                    "resize" => {
                        window.width = num(params, "width").unwrap_or(window.width);
                        window.height = num(params, "height").unwrap_or(window.height);
                        HandlerOutput::ok(format!("Resized window to {}x{}", window.width, window.height))
                    }
                    "move" => {
                        window.x = num(params, "x").unwrap_or(window.x);
                        window.y = num(params, "y").unwrap_or(window.y);
                        HandlerOutput::ok(format!("Moved window to ({}, {})", window.x, window.y))
                    }
                    "introspect" => {
                        let detail = serde_json::to_value(&*window).unwrap_or(Value::Null);
                        HandlerOutput::ok(format!("Introspected window {}", window.title)).with_result(detail)
                    }
                    _ => HandlerOutput::ok(format!(
                        "{}\n  └─ Pane \"client\" ({}x{})",
                        window.title, window.width, window.height
                    )),
                }
            }
            "close" => match state.windows.iter().position(|w| w.window_id == window_id) {
                Some(idx) => {
                    let closed = state.windows.remove(idx);
                    HandlerOutput::ok(format!("Closed window {}", closed.title))
                }
                None => HandlerOutput::failed(format!("Window {} not found", window_id)),
            },
            "screen" | "monitor" => {
                let target = num(params, if command == "screen" { "screen" } else { "monitor" }).unwrap_or(0) as u32;
                if state.monitor(target).is_none() {
                    return Ok(HandlerOutput::failed(format!("Monitor {} does not exist", target)));
                }
                let Some(window) = state.window_mut(&window_id) else {
                    return Ok(HandlerOutput::failed(format!("Window {} not found", window_id)));
                };
                window.monitor = target;
                if command == "screen" {
                    window.x = num(params, "x").unwrap_or(window.x);
                    window.y = num(params, "y").unwrap_or(window.y);
                }
                HandlerOutput::ok(format!("Moved window {} to monitor {}", window.title, target))
            }

            "click" | "doubleclick" | "longclick" => {
                if let (Some(x), Some(y)) = (num(params, "x"), num(params, "y")) {
                    state.cursor = (x, y);
                }
                let button = text(params, "button").unwrap_or("left");
                let verb = match command {
                    "click" => "Clicked".to_string(),
                    "doubleclick" => "Double-clicked".to_string(),
                    _ => format!("Long-clicked ({:.1}s)", float(params, "duration", 1.0)),
                };
                HandlerOutput::ok(format!("{} {} button{}", verb, button, position_suffix(params)))
            }
            "scroll" => {
                let direction = text(params, "direction").unwrap_or_default();
                if !matches!(direction, "up" | "down" | "left" | "right") {
                    return Ok(HandlerOutput::failed(format!("Invalid scroll direction: {}", direction)));
                }
                let amount = num(params, "amount").unwrap_or(3);
                HandlerOutput::ok(format!("Scrolled {} {} units{}", direction, amount, position_suffix(params)))
            }
            "drag" => {
                let (sx, sy) = (num(params, "start_x").unwrap_or(0), num(params, "start_y").unwrap_or(0));
                let (ex, ey) = (num(params, "end_x").unwrap_or(0), num(params, "end_y").unwrap_or(0));
                state.cursor = (ex, ey);
                HandlerOutput::ok(format!(
                    "Dragged from ({}, {}) to ({}, {}) with {} button over {:.1}s",
                    sx,
                    sy,
                    ex,
                    ey,
                    text(params, "button").unwrap_or("left"),
                    float(params, "duration", 0.5)
                ))
            }

            "send" => HandlerOutput::ok(format!("Sent keys: {}", text(params, "keys").unwrap_or_default())),
            "type" => {
                let typed = text(params, "text").unwrap_or_default().to_string();
                state.typed.push_str(&typed);
                HandlerOutput::ok(format!("Typed text: {}", typed))
            }

            "launch" => {
                let app = text(params, "app_name").unwrap_or_default().to_string();
                let screen = num(params, "screen_id").unwrap_or(1) as u32;
                let Some(monitor) = state.monitor(screen).cloned() else {
                    return Ok(HandlerOutput::failed(format!("Monitor {} does not exist", screen)));
                };
                let fullscreen = params.get("fullscreen").and_then(Value::as_bool).unwrap_or(false);
                let id = state.spawn(&app, &app, screen);
                if fullscreen {
                    if let Some(window) = state.window_mut(&id) {
                        window.x = 0;
                        window.y = 0;
                        window.width = monitor.width;
                        window.height = monitor.height;
                    }
                }
                HandlerOutput::ok(format!("Launched {} on monitor {}", app, screen))
                    .with_result(json!({ "window_id": id }))
            }
            "msgbox" => HandlerOutput::ok(format!(
                "Message box '{}' shown{}",
                text(params, "title").unwrap_or_default(),
                position_suffix(params)
            )),
            "computer" => HandlerOutput::ok("Computer name: PILOT-SIM"),
            "user" => HandlerOutput::ok("User name: pilot"),
            "keys" => HandlerOutput::ok("Virtual key codes: ctrl=0x11 alt=0x12 shift=0x10 win=0x5B enter=0x0D esc=0x1B tab=0x09"),
            other => HandlerOutput::failed(format!("Unknown command: {}", other)),
        };
        Ok(output)
    }
}

#[async_trait]
impl ResourceEnumerator for SimulatedDesktop {
    async fn enumerate(&self) -> Result<WindowInventory, HandlerError> {
        Ok(self.state.lock().await.inventory())
    }
}
