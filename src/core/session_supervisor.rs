//! 会话监管：取消管理
//!
//! 每个 Agent 会话持有一个 CancellationToken；取消只会停止调度后续迭代，
//! 已开始的步骤照常结束，随后走与正常结束相同的 finalize / persist 路径。

use tokio_util::sync::CancellationToken;

/// 进程级监管者：派生出每个会话的子 token，Ctrl+C 时统一取消
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    /// 取消所有会话
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// 为单个会话创建子 token：取消子 token 不影响其它会话
    pub fn session_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_cancel_reaches_sessions() {
        let supervisor = SessionSupervisor::new();
        let a = supervisor.session_token();
        let b = supervisor.session_token();
        supervisor.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_session_cancel_is_isolated() {
        let supervisor = SessionSupervisor::new();
        let a = supervisor.session_token();
        let b = supervisor.session_token();
        a.cancel();
        assert!(!b.is_cancelled());
        assert!(!supervisor.session_token().is_cancelled());
    }
}
