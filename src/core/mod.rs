//! 核心层：错误分类、重试计数、会话取消、优雅关闭

pub mod error;
pub mod retry;
pub mod session_supervisor;
pub mod shutdown;

pub use error::{AgentError, LedgerError, TransportError};
pub use retry::{RetryTracker, DEFAULT_MAX_RETRIES};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{ShutdownManager, ShutdownReason};
