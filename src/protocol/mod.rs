//! 远程命令分发协议
//!
//! 能力注册表、短 ID 解析、命令路由、事件广播、交互式命令链，
//! 以及用于本地运行和测试的模拟桌面后端。

pub mod broadcast;
pub mod chain;
pub mod desktop;
pub mod envelope;
pub mod handlers;
pub mod registry;
pub mod resolver;
pub mod router;

pub use broadcast::{BroadcastReport, ChannelSink, EventBroadcaster, EventSink, ObserverId, ServerEvent, SinkError};
pub use chain::{parse_command, run_chain, split_chain, ChainParseError, ChainReport, ChainStep, CHAIN_SEPARATOR};
pub use desktop::SimulatedDesktop;
pub use envelope::{CommandRequest, CommandResponse, Params, ProtocolErrorKind};
pub use handlers::{
    AppWindows, CommandHandler, HandlerError, HandlerOutput, HandlerSet, MonitorInfo, ResourceEnumerator,
    WindowInfo, WindowInventory,
};
pub use registry::{CapabilityRegistry, Catalogue, CatalogueEntry, Category, CommandSpec, ParamKind, ParamSpec};
pub use resolver::{short_key, Resolution, ShortIdResolver, DEFAULT_SHORT_ID_LEN};
pub use router::{CommandRouter, HistoryEntry, COMMAND_RESULT_EVENT, DEFAULT_HISTORY_CAPACITY};
