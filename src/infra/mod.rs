// Infrastructure layer - 基础设施层
// 负责在线注册表、消息路由、传输层抽象、连接管理与监控指标

pub mod connection_manager;
pub mod message_router;
pub mod metrics;
pub mod presence_registry;
pub mod transport;

// 重新导出主要类型
pub use connection_manager::{ConnectionHandle, ConnectionManager};
pub use message_router::{MessageRouter, MessageRouterStats, RouteResult};
pub use presence_registry::{BindOutcome, PresenceRegistry};
pub use transport::{Delivery, MemoryTransport, Transport, TransportEvent};
