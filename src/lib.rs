//! Pilot - Rust 桌面操作智能体
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（按配置装配 LLM、执行器、场景来源）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、重试计数、会话取消、优雅关闭
//! - **cycle**: 感知 / 决策 / 执行主循环、错误恢复与摘要
//! - **executor**: 命令执行器（进程内 / 远程 HTTP）与场景来源
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **protocol**: 命令信封、能力目录、短 ID、路由、事件广播、命令链
//! - **server**: axum 命令服务器（需 `server` feature）
//! - **session**: 步骤账本、会话上下文、摘要落盘

pub mod agent;
pub mod config;
pub mod core;
pub mod cycle;
pub mod executor;
pub mod llm;
pub mod observability;
pub mod protocol;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
