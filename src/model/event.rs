//! 协议事件
//!
//! 线上帧格式为 JSON 文本：`{"event": <事件名>, "data": <负载>}`。
//! 事件名是与现有客户端兼容的关键，不可随意修改。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ServerError};

use super::identity::{ConnectionId, Identity};
use super::message::{ConversationNotice, DirectMessage, PrivateMessageRequest, TaggedNotice};

/// 客户端 -> 服务端事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// 声明身份
    #[serde(rename = "setUserId")]
    SetUserId(Identity),
    /// 请求在线列表
    #[serde(rename = "get users")]
    GetUsers,
    #[serde(rename = "sendMessage")]
    SendMessage(DirectMessage),
    #[serde(rename = "createConversation")]
    CreateConversation(ConversationNotice),
    #[serde(rename = "confirmConversation")]
    ConfirmConversation(ConversationNotice),
    #[serde(rename = "sendToSpecificClient")]
    SendToSpecificClient(PrivateMessageRequest),
}

impl ClientEvent {
    pub const SET_USER_ID: &'static str = "setUserId";
    pub const GET_USERS: &'static str = "get users";
    pub const SEND_MESSAGE: &'static str = "sendMessage";
    pub const CREATE_CONVERSATION: &'static str = "createConversation";
    pub const CONFIRM_CONVERSATION: &'static str = "confirmConversation";
    pub const SEND_TO_SPECIFIC_CLIENT: &'static str = "sendToSpecificClient";

    /// 所有已知的入站事件名
    pub const NAMES: [&'static str; 6] = [
        Self::SET_USER_ID,
        Self::GET_USERS,
        Self::SEND_MESSAGE,
        Self::CREATE_CONVERSATION,
        Self::CONFIRM_CONVERSATION,
        Self::SEND_TO_SPECIFIC_CLIENT,
    ];

    /// 解析一帧文本
    pub fn from_frame(frame: &str) -> Result<Self> {
        serde_json::from_str(frame)
            .map_err(|e| ServerError::Protocol(format!("无法解析客户端事件: {}", e)))
    }

    /// 解析失败的帧若属于已知事件（负载不合法），返回要回给调用方的错误事件；
    /// 非 JSON 或未知事件返回 None，只记录日志
    pub fn rejection(frame: &str) -> Option<ServerEvent> {
        let value: Value = serde_json::from_str(frame).ok()?;
        let name = value.get("event")?.as_str()?;
        let known = Self::NAMES.iter().find(|known| **known == name)?;
        Some(ServerEvent::Error(format!("Invalid payload for {}", known)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SetUserId(_) => Self::SET_USER_ID,
            ClientEvent::GetUsers => Self::GET_USERS,
            ClientEvent::SendMessage(_) => Self::SEND_MESSAGE,
            ClientEvent::CreateConversation(_) => Self::CREATE_CONVERSATION,
            ClientEvent::ConfirmConversation(_) => Self::CONFIRM_CONVERSATION,
            ClientEvent::SendToSpecificClient(_) => Self::SEND_TO_SPECIFIC_CLIENT,
        }
    }
}

/// 服务端 -> 客户端事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// 在线快照：[[identity, connection], ...]
    #[serde(rename = "allClientIDs")]
    AllClientIds(Vec<(Identity, ConnectionId)>),
    #[serde(rename = "messageSent")]
    MessageSent(DirectMessage),
    /// 离线补发的会话通知
    #[serde(rename = "messageSent")]
    QueuedNotice(TaggedNotice),
    #[serde(rename = "conversationCreated")]
    ConversationCreated(ConversationNotice),
    #[serde(rename = "conversationConfirmed")]
    ConversationConfirmed(ConversationNotice),
    #[serde(rename = "private message")]
    PrivateMessage(Value),
    #[serde(rename = "error")]
    Error(String),
}

impl ServerEvent {
    pub const ALL_CLIENT_IDS: &'static str = "allClientIDs";
    pub const MESSAGE_SENT: &'static str = "messageSent";
    pub const CONVERSATION_CREATED: &'static str = "conversationCreated";
    pub const CONVERSATION_CONFIRMED: &'static str = "conversationConfirmed";
    pub const PRIVATE_MESSAGE: &'static str = "private message";
    pub const ERROR: &'static str = "error";

    /// 定向发送目标不在线时回给调用方的错误文本
    pub const CLIENT_NOT_FOUND: &'static str = "Client not found";

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AllClientIds(_) => Self::ALL_CLIENT_IDS,
            ServerEvent::MessageSent(_) | ServerEvent::QueuedNotice(_) => Self::MESSAGE_SENT,
            ServerEvent::ConversationCreated(_) => Self::CONVERSATION_CREATED,
            ServerEvent::ConversationConfirmed(_) => Self::CONVERSATION_CONFIRMED,
            ServerEvent::PrivateMessage(_) => Self::PRIVATE_MESSAGE,
            ServerEvent::Error(_) => Self::ERROR,
        }
    }

    /// 编码为一帧文本
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
