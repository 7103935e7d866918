//! WebSocket 事件的标签联合表示。
//!
//! 出站事件和入站帧都用 `{"type": ..., "payload": ...}` 的外形，
//! 字段名与既有客户端约定保持 camelCase。

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::value_objects::{ChatId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStatus {
    pub user_id: UserId,
    pub is_online: bool,
}

/// 服务端推送给客户端的事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ChatEvent {
    Message(Message),
    Typing(TypingStatus),
    Status(PresenceStatus),
}

/// 客户端上行的 typing 通知，userId 以连接身份为准。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub chat_id: ChatId,
    pub is_typing: bool,
}

/// 客户端入站帧。未识别的类型不是错误，按 `Unknown` 忽略，
/// 不管它带没带 payload。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Typing(TypingRequest),
    Unknown,
}

/// 入站帧的原始外形。先看 type，再按需解 payload。
#[derive(Deserialize)]
struct RawClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl<'de> Deserialize<'de> for ClientFrame {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawClientFrame::deserialize(deserializer)?;
        match raw.kind.as_str() {
            "typing" => serde_json::from_value(raw.payload)
                .map(ClientFrame::Typing)
                .map_err(serde::de::Error::custom),
            _ => Ok(ClientFrame::Unknown),
        }
    }
}
