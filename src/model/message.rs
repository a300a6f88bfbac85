use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event::ServerEvent;
use super::identity::Identity;

/// 点对点消息
///
/// `message_id` / `conversation_id` / `content` 由客户端定义，服务端不解释；
/// 客户端附带的其它字段保存在 `extra` 中，原样转发给接收方。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub message_id: Value,
    pub conversation_id: Value,
    pub sender_id: Identity,
    pub recipient_id: Identity,
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 会话生命周期通知（创建 / 确认）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationNotice {
    pub sender_id: Identity,
    pub recipient_id: Identity,
    pub username: String,
}

impl ConversationNotice {
    /// 交换发送方与接收方，用于把确认事件回送给会话发起人
    pub fn swapped(self) -> Self {
        Self {
            sender_id: self.recipient_id,
            recipient_id: self.sender_id,
            username: self.username,
        }
    }
}

/// 定向发送请求（不经过离线队列）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessageRequest {
    #[serde(rename = "targetClientId")]
    pub target_client_id: Identity,
    #[serde(default)]
    pub message: Value,
}

/// 带 `type` 标签的会话通知，补发时以 `messageSent` 事件送出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedNotice {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub notice: ConversationNotice,
}

/// 离线补发时使用的事件名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushEventNames {
    /// 一律以 `messageSent` 送出，会话通知带 `type` 字段（兼容现有客户端）
    #[default]
    Original,
    /// 每种投递物保留自己的事件名
    Typed,
}

/// 可路由的投递物：消息或会话生命周期通知
#[derive(Debug, Clone, PartialEq)]
pub enum Deliverable {
    DirectMessage(DirectMessage),
    ConversationCreated(ConversationNotice),
    ConversationConfirmed(ConversationNotice),
}

impl Deliverable {
    /// 投递目标
    pub fn recipient(&self) -> &Identity {
        match self {
            Deliverable::DirectMessage(message) => &message.recipient_id,
            Deliverable::ConversationCreated(notice) => &notice.recipient_id,
            Deliverable::ConversationConfirmed(notice) => &notice.recipient_id,
        }
    }

    /// 出站事件名
    pub fn event_name(&self) -> &'static str {
        match self {
            Deliverable::DirectMessage(_) => ServerEvent::MESSAGE_SENT,
            Deliverable::ConversationCreated(_) => ServerEvent::CONVERSATION_CREATED,
            Deliverable::ConversationConfirmed(_) => ServerEvent::CONVERSATION_CONFIRMED,
        }
    }

    /// 转换为出站事件
    pub fn into_event(self) -> ServerEvent {
        match self {
            Deliverable::DirectMessage(message) => ServerEvent::MessageSent(message),
            Deliverable::ConversationCreated(notice) => ServerEvent::ConversationCreated(notice),
            Deliverable::ConversationConfirmed(notice) => {
                ServerEvent::ConversationConfirmed(notice)
            }
        }
    }

    /// 转换为离线补发事件
    pub fn into_queued_event(self, names: FlushEventNames) -> ServerEvent {
        if names == FlushEventNames::Typed {
            return self.into_event();
        }
        let kind = self.event_name().to_string();
        match self {
            Deliverable::DirectMessage(message) => ServerEvent::MessageSent(message),
            Deliverable::ConversationCreated(notice)
            | Deliverable::ConversationConfirmed(notice) => {
                ServerEvent::QueuedNotice(TaggedNotice { kind, notice })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_message_keeps_extra_fields() {
        let raw = json!({
            "message_id": 7,
            "conversation_id": "c-1",
            "sender_id": "alice",
            "recipient_id": "bob",
            "content": "hi",
            "timestamp": 1700000000
        });

        let message: DirectMessage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(message.recipient_id, Identity::from("bob"));
        assert_eq!(message.extra.get("timestamp"), Some(&json!(1700000000)));

        // 原样转发
        assert_eq!(serde_json::to_value(&message).unwrap(), raw);
    }

    #[test]
    fn test_conversation_notice_swapped() {
        let notice = ConversationNotice {
            sender_id: "A".into(),
            recipient_id: "B".into(),
            username: "U".to_string(),
        };

        let swapped = notice.swapped();
        assert_eq!(swapped.sender_id, Identity::from("B"));
        assert_eq!(swapped.recipient_id, Identity::from("A"));
        assert_eq!(swapped.username, "U");
    }

    #[test]
    fn test_deliverable_event_name_matches_event() {
        let notice = ConversationNotice {
            sender_id: "A".into(),
            recipient_id: "B".into(),
            username: "U".to_string(),
        };
        let deliverable = Deliverable::ConversationCreated(notice);

        assert_eq!(deliverable.recipient(), &Identity::from("B"));
        let name = deliverable.event_name();
        assert_eq!(deliverable.into_event().name(), name);
    }

    #[test]
    fn test_queued_notice_is_message_sent_with_type_tag() {
        let deliverable = Deliverable::ConversationConfirmed(ConversationNotice {
            sender_id: "B".into(),
            recipient_id: "A".into(),
            username: "U".to_string(),
        });

        let event = deliverable.clone().into_queued_event(FlushEventNames::Original);
        assert_eq!(event.name(), "messageSent");
        let value: Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "messageSent",
                "data": {
                    "type": "conversationConfirmed",
                    "sender_id": "B",
                    "recipient_id": "A",
                    "username": "U"
                }
            })
        );

        let typed = deliverable.into_queued_event(FlushEventNames::Typed);
        assert_eq!(typed.name(), "conversationConfirmed");
    }

    #[test]
    fn test_queued_direct_message_is_unchanged() {
        let message = DirectMessage {
            message_id: json!(1),
            conversation_id: json!("c"),
            sender_id: "A".into(),
            recipient_id: "B".into(),
            content: json!("hi"),
            extra: Map::new(),
        };
        let deliverable = Deliverable::DirectMessage(message.clone());

        assert_eq!(
            deliverable.into_queued_event(FlushEventNames::Original),
            ServerEvent::MessageSent(message)
        );
    }
}
