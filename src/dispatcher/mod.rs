//! 消息分发器
//!
//! 服务端上下文对象：持有在线注册表、离线队列、路由器与重试调度器，
//! 把传输层事件翻译成对这些组件的操作。
//! 由单个分发循环独占，因此每个事件处理和每次扫描都是原子的。

use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::infra::message_router::{MessageRouter, MessageRouterStats};
use crate::infra::metrics;
use crate::infra::transport::{Transport, TransportEvent};
use crate::model::{
    ClientEvent, ConnectionId, ConversationNotice, Deliverable, DirectMessage, FlushEventNames,
    Identity, PrivateMessageRequest, ServerEvent,
};
use crate::offline::{QueueConfig, QueueStats, RetryScheduler, SchedulerConfig, SchedulerStats, SweepReport};

/// `get users` 的回复范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsersListScope {
    /// 广播给所有连接（兼容行为）
    #[default]
    Broadcast,
    /// 只回复请求方
    Requester,
}

/// 同一身份在新连接上重新声明时，旧连接的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebindPolicy {
    /// 保留旧连接（不再能收到发给该身份的消息）
    #[default]
    KeepOrphaned,
    /// 关闭旧连接
    CloseOrphaned,
}

/// 中继配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 重试扫描间隔（秒）
    pub retry_interval_secs: u64,
    /// `get users` 回复范围
    pub users_list_scope: UsersListScope,
    /// 重新绑定策略
    pub rebind_policy: RebindPolicy,
    /// 离线补发的事件名
    pub flush_event_names: FlushEventNames,
    /// 离线队列配置
    pub queue: QueueConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: SchedulerConfig::default().retry_interval_secs,
            users_list_scope: UsersListScope::default(),
            rebind_policy: RebindPolicy::default(),
            flush_event_names: FlushEventNames::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            retry_interval_secs: self.retry_interval_secs,
        }
    }
}

/// 中继运行状态快照（供 /health 使用）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayStats {
    /// 当前连接数
    pub connections: usize,
    /// 当前已绑定身份数
    pub bound_identities: usize,
    pub queue: QueueStats,
    pub router: MessageRouterStats,
    pub scheduler: SchedulerStats,
}

/// 消息分发器
pub struct MessageDispatcher {
    router: MessageRouter,
    scheduler: RetryScheduler,
    users_list_scope: UsersListScope,
    rebind_policy: RebindPolicy,
    /// 已建立的连接（含尚未声明身份的）
    connections: FxHashSet<ConnectionId>,
}

impl MessageDispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: RelayConfig) -> Self {
        let scheduler = RetryScheduler::new(config.scheduler());
        Self {
            router: MessageRouter::new(transport, config.queue)
                .with_flush_event_names(config.flush_event_names),
            scheduler,
            users_list_scope: config.users_list_scope,
            rebind_policy: config.rebind_policy,
            connections: FxHashSet::default(),
        }
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// 处理一个传输层事件
    pub fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(connection) => self.on_connect(connection),
            TransportEvent::Inbound { connection, event } => {
                self.on_client_event(connection, event)
            }
            TransportEvent::Disconnected(connection) => self.on_disconnect(connection),
        }
    }

    /// 新连接：身份声明前不做任何事
    pub fn on_connect(&mut self, connection: ConnectionId) {
        self.connections.insert(connection);
        metrics::record_connection_count(self.connections.len());
        info!("🔗 MessageDispatcher: 新连接 {}", connection);
    }

    pub fn on_client_event(&mut self, connection: ConnectionId, event: ClientEvent) {
        debug!("📨 MessageDispatcher: {} <- {}", connection, event.name());

        match event {
            ClientEvent::SetUserId(identity) => self.on_set_user_id(connection, identity),
            ClientEvent::GetUsers => self.on_get_users(connection),
            ClientEvent::SendMessage(message) => self.on_send_message(message),
            ClientEvent::CreateConversation(notice) => self.on_create_conversation(notice),
            ClientEvent::ConfirmConversation(notice) => self.on_confirm_conversation(notice),
            ClientEvent::SendToSpecificClient(request) => {
                self.on_send_to_specific_client(connection, request)
            }
        }
    }

    /// 连接断开：解绑并广播新的在线列表
    pub fn on_disconnect(&mut self, connection: ConnectionId) {
        self.connections.remove(&connection);
        metrics::record_connection_count(self.connections.len());

        match self.router.presence_mut().unbind(connection) {
            Some(identity) => info!("👋 MessageDispatcher: {} 下线 ({})", identity, connection),
            None => debug!("👋 MessageDispatcher: 未绑定身份的连接 {} 断开", connection),
        }
        metrics::record_presence_count(self.router.presence().len());

        self.broadcast_snapshot();
    }

    /// 执行一次重试扫描
    pub fn sweep(&mut self) -> SweepReport {
        self.scheduler.sweep(&mut self.router)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.connections.len(),
            bound_identities: self.router.presence().len(),
            queue: self.router.offline_queue().stats(),
            router: self.router.stats(),
            scheduler: self.scheduler.stats(),
        }
    }

    fn on_set_user_id(&mut self, connection: ConnectionId, identity: Identity) {
        let outcome = self.router.presence_mut().bind(identity.clone(), connection);
        info!("👤 MessageDispatcher: {} 绑定到 {}", identity, connection);

        if let Some(previous) = outcome.previous_identity {
            info!(
                "🔁 MessageDispatcher: {} 改为声明 {}，解除 {} 的绑定",
                connection, identity, previous
            );
        }

        if let Some(orphan) = outcome.displaced_connection {
            match self.rebind_policy {
                RebindPolicy::KeepOrphaned => {
                    debug!(
                        "🔁 MessageDispatcher: {} 的旧连接 {} 保持打开",
                        identity, orphan
                    );
                }
                RebindPolicy::CloseOrphaned => {
                    info!(
                        "🔌 MessageDispatcher: 关闭 {} 的旧连接 {}",
                        identity, orphan
                    );
                    self.router.transport().close(orphan);
                }
            }
        }
        metrics::record_presence_count(self.router.presence().len());

        self.broadcast_snapshot();
        self.router.flush_for(&identity);
    }

    fn on_get_users(&mut self, connection: ConnectionId) {
        match self.users_list_scope {
            UsersListScope::Broadcast => self.broadcast_snapshot(),
            UsersListScope::Requester => {
                let snapshot = self.snapshot_event();
                self.router.transport().send(connection, &snapshot);
            }
        }
    }

    fn on_send_message(&mut self, message: DirectMessage) {
        let recipient = message.recipient_id.clone();
        self.router
            .route(Deliverable::DirectMessage(message), &recipient);
    }

    fn on_create_conversation(&mut self, notice: ConversationNotice) {
        let recipient = notice.recipient_id.clone();
        self.router
            .route(Deliverable::ConversationCreated(notice), &recipient);
    }

    /// 确认事件回送给会话发起人，发送方与接收方互换
    fn on_confirm_conversation(&mut self, notice: ConversationNotice) {
        let confirmation = notice.swapped();
        let initiator = confirmation.recipient_id.clone();
        self.router
            .route(Deliverable::ConversationConfirmed(confirmation), &initiator);
    }

    /// 定向发送：只发给在线目标，不进离线队列
    fn on_send_to_specific_client(
        &mut self,
        connection: ConnectionId,
        request: PrivateMessageRequest,
    ) {
        match self.router.presence().lookup(&request.target_client_id) {
            Some(target) => {
                debug!(
                    "📤 MessageDispatcher: private message {} -> {} ({})",
                    connection, request.target_client_id, target
                );
                self.router
                    .transport()
                    .send(target, &ServerEvent::PrivateMessage(request.message));
            }
            None => {
                warn!(
                    "⚠️ MessageDispatcher: 定向发送目标 {} 不在线 (from {})",
                    request.target_client_id, connection
                );
                self.router.transport().send(
                    connection,
                    &ServerEvent::Error(ServerEvent::CLIENT_NOT_FOUND.to_string()),
                );
            }
        }
    }

    fn snapshot_event(&self) -> ServerEvent {
        ServerEvent::AllClientIds(self.router.presence().snapshot())
    }

    fn broadcast_snapshot(&self) {
        let snapshot = self.snapshot_event();
        self.router.transport().broadcast(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::transport::{Delivery, MemoryTransport};
    use serde_json::{json, Map};

    fn dispatcher_with(config: RelayConfig) -> (MessageDispatcher, MemoryTransport) {
        let transport = MemoryTransport::new();
        let dispatcher = MessageDispatcher::new(Arc::new(transport.clone()), config);
        (dispatcher, transport)
    }

    fn dispatcher() -> (MessageDispatcher, MemoryTransport) {
        dispatcher_with(RelayConfig::default())
    }

    fn announce(dispatcher: &mut MessageDispatcher, connection: u64, identity: &str) {
        dispatcher.handle(TransportEvent::Connected(ConnectionId::new(connection)));
        dispatcher.handle(TransportEvent::Inbound {
            connection: ConnectionId::new(connection),
            event: ClientEvent::SetUserId(Identity::from(identity)),
        });
    }

    fn inbound(dispatcher: &mut MessageDispatcher, connection: u64, event: ClientEvent) {
        dispatcher.handle(TransportEvent::Inbound {
            connection: ConnectionId::new(connection),
            event,
        });
    }

    fn snapshot(pairs: &[(&str, u64)]) -> ServerEvent {
        ServerEvent::AllClientIds(
            pairs
                .iter()
                .map(|(identity, connection)| (Identity::from(*identity), ConnectionId::new(*connection)))
                .collect(),
        )
    }

    #[test]
    fn test_set_user_id_broadcasts_snapshot() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 1, "alice");
        announce(&mut dispatcher, 2, "bob");

        assert_eq!(
            transport.broadcasts(),
            vec![snapshot(&[("alice", 1)]), snapshot(&[("alice", 1), ("bob", 2)])]
        );
        assert_eq!(dispatcher.stats().bound_identities, 2);
        assert_eq!(dispatcher.stats().connections, 2);
    }

    #[test]
    fn test_confirm_conversation_is_swapped_back_to_initiator() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 1, "A");
        announce(&mut dispatcher, 2, "B");
        transport.take();

        inbound(
            &mut dispatcher,
            2,
            ClientEvent::ConfirmConversation(ConversationNotice {
                sender_id: "A".into(),
                recipient_id: "B".into(),
                username: "U".to_string(),
            }),
        );

        assert_eq!(
            transport.take(),
            vec![Delivery::To(
                ConnectionId::new(1),
                ServerEvent::ConversationConfirmed(ConversationNotice {
                    sender_id: "B".into(),
                    recipient_id: "A".into(),
                    username: "U".to_string(),
                })
            )]
        );
    }

    #[test]
    fn test_send_to_specific_client_online_target() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 1, "alice");
        announce(&mut dispatcher, 2, "bob");
        transport.take();

        inbound(
            &mut dispatcher,
            1,
            ClientEvent::SendToSpecificClient(PrivateMessageRequest {
                target_client_id: "bob".into(),
                message: json!("psst"),
            }),
        );

        assert_eq!(
            transport.take(),
            vec![Delivery::To(
                ConnectionId::new(2),
                ServerEvent::PrivateMessage(json!("psst"))
            )]
        );
    }

    #[test]
    fn test_send_to_specific_client_offline_target_errors_to_caller() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 1, "alice");
        transport.take();

        inbound(
            &mut dispatcher,
            1,
            ClientEvent::SendToSpecificClient(PrivateMessageRequest {
                target_client_id: "ghost".into(),
                message: json!({ "text": "hello?" }),
            }),
        );

        assert_eq!(
            transport.take(),
            vec![Delivery::To(
                ConnectionId::new(1),
                ServerEvent::Error("Client not found".to_string())
            )]
        );
        assert!(!dispatcher
            .router()
            .offline_queue()
            .has_pending(&Identity::from("ghost")));
    }

    #[test]
    fn test_message_to_offline_recipient_is_flushed_on_announce() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 1, "alice");

        let message = DirectMessage {
            message_id: json!(1),
            conversation_id: json!("c"),
            sender_id: "alice".into(),
            recipient_id: "bob".into(),
            content: json!("hi"),
            extra: Map::new(),
        };
        inbound(&mut dispatcher, 1, ClientEvent::SendMessage(message.clone()));
        assert_eq!(dispatcher.stats().queue.pending_messages, 1);

        transport.take();
        announce(&mut dispatcher, 2, "bob");

        // 先广播在线列表，再补发
        assert_eq!(
            transport.take(),
            vec![
                Delivery::Broadcast(snapshot(&[("alice", 1), ("bob", 2)])),
                Delivery::To(ConnectionId::new(2), ServerEvent::MessageSent(message)),
            ]
        );
        assert_eq!(dispatcher.stats().queue.pending_messages, 0);
    }

    fn alice_creates_conversation_with_bob(dispatcher: &mut MessageDispatcher) {
        announce(dispatcher, 1, "alice");
        inbound(
            dispatcher,
            1,
            ClientEvent::CreateConversation(ConversationNotice {
                sender_id: "alice".into(),
                recipient_id: "bob".into(),
                username: "alice".to_string(),
            }),
        );
    }

    #[test]
    fn test_flushed_notice_defaults_to_message_sent_with_type() {
        let (mut dispatcher, transport) = dispatcher();
        alice_creates_conversation_with_bob(&mut dispatcher);
        announce(&mut dispatcher, 2, "bob");

        let frames: Vec<String> = transport
            .sent_to(ConnectionId::new(2))
            .iter()
            .map(|event| event.to_frame().unwrap())
            .collect();
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "messageSent",
                "data": {
                    "type": "conversationCreated",
                    "sender_id": "alice",
                    "recipient_id": "bob",
                    "username": "alice"
                }
            })
        );
    }

    #[test]
    fn test_flushed_notice_keeps_own_name_when_typed() {
        let (mut dispatcher, transport) = dispatcher_with(RelayConfig {
            flush_event_names: FlushEventNames::Typed,
            ..RelayConfig::default()
        });
        alice_creates_conversation_with_bob(&mut dispatcher);
        announce(&mut dispatcher, 2, "bob");

        assert_eq!(
            transport.sent_to(ConnectionId::new(2)),
            vec![ServerEvent::ConversationCreated(ConversationNotice {
                sender_id: "alice".into(),
                recipient_id: "bob".into(),
                username: "alice".to_string(),
            })]
        );
    }

    #[test]
    fn test_live_notice_keeps_own_name_in_either_mode() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 2, "bob");
        transport.take();
        alice_creates_conversation_with_bob(&mut dispatcher);

        let names: Vec<&str> = transport
            .sent_to(ConnectionId::new(2))
            .iter()
            .map(ServerEvent::name)
            .collect();
        assert_eq!(names, vec!["conversationCreated"]);
    }

    #[test]
    fn test_rebind_keeps_orphan_by_default() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 1, "alice");
        announce(&mut dispatcher, 2, "alice");

        assert!(!transport
            .deliveries()
            .iter()
            .any(|delivery| matches!(delivery, Delivery::Close(_))));

        // 孤立连接断开不影响新绑定
        dispatcher.handle(TransportEvent::Disconnected(ConnectionId::new(1)));
        assert_eq!(
            dispatcher.router().presence().lookup(&Identity::from("alice")),
            Some(ConnectionId::new(2))
        );
    }

    #[test]
    fn test_rebind_close_orphaned_policy() {
        let (mut dispatcher, transport) = dispatcher_with(RelayConfig {
            rebind_policy: RebindPolicy::CloseOrphaned,
            ..RelayConfig::default()
        });
        announce(&mut dispatcher, 1, "alice");
        announce(&mut dispatcher, 2, "alice");

        assert!(transport
            .deliveries()
            .contains(&Delivery::Close(ConnectionId::new(1))));
    }

    #[test]
    fn test_get_users_scope() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 1, "alice");
        transport.take();
        inbound(&mut dispatcher, 1, ClientEvent::GetUsers);
        assert_eq!(
            transport.take(),
            vec![Delivery::Broadcast(snapshot(&[("alice", 1)]))]
        );

        let (mut dispatcher, transport) = dispatcher_with(RelayConfig {
            users_list_scope: UsersListScope::Requester,
            ..RelayConfig::default()
        });
        announce(&mut dispatcher, 1, "alice");
        transport.take();
        inbound(&mut dispatcher, 1, ClientEvent::GetUsers);
        assert_eq!(
            transport.take(),
            vec![Delivery::To(ConnectionId::new(1), snapshot(&[("alice", 1)]))]
        );
    }

    #[test]
    fn test_disconnect_broadcasts_updated_snapshot() {
        let (mut dispatcher, transport) = dispatcher();
        announce(&mut dispatcher, 1, "alice");
        announce(&mut dispatcher, 2, "bob");
        transport.take();

        dispatcher.handle(TransportEvent::Disconnected(ConnectionId::new(1)));

        assert_eq!(
            transport.take(),
            vec![Delivery::Broadcast(snapshot(&[("bob", 2)]))]
        );
        assert_eq!(dispatcher.stats().connections, 1);
    }

    #[test]
    fn test_connect_without_announce_is_silent() {
        let (mut dispatcher, transport) = dispatcher();
        dispatcher.handle(TransportEvent::Connected(ConnectionId::new(7)));
        assert!(transport.take().is_empty());
        assert_eq!(dispatcher.stats().bound_identities, 0);
    }
}
