//! 会话层：步骤账本、会话上下文、摘要持久化

pub mod context;
pub mod ledger;
pub mod step;
pub mod summary;

pub use context::{CycleRecord, Session, SessionStatus, StateSnapshot};
pub use ledger::StepLedger;
pub use step::{recovery_step_id, retry_step_id, step_id, Step, StepKind, StepStatus, ROOT_STEP_ID};
pub use summary::{load_summary, output_folder, SessionSummary, TokenCounts, SUMMARY_FILE_NAME};
