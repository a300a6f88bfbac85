pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http; // WebSocket 接入与运维接口
pub mod infra;
pub mod logging;
pub mod model;
pub mod offline;
pub mod server;

pub use config::ServerConfig;
pub use dispatcher::{MessageDispatcher, RebindPolicy, RelayConfig, RelayStats, UsersListScope};
pub use error::{Result, ServerError};
pub use infra::{
    ConnectionManager, MemoryTransport, MessageRouter, PresenceRegistry, RouteResult, Transport,
    TransportEvent,
};
pub use model::*;
pub use offline::{OfflineQueue, OverflowPolicy, QueueConfig, RetryScheduler};
pub use server::{run_dispatch_loop, RelayServer};
