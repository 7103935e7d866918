use crate::value_objects::{ChatId, MessageBody, MessageId, Timestamp, UserId};

/// 消息实体。创建后除 `is_read`（false→true 单向）外不可变。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: MessageBody,
    #[serde(rename = "timestamp")] // 客户端沿用 timestamp 字段名
    pub created_at: Timestamp,
    pub is_read: bool,
}

impl Message {
    pub fn new(
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        content: MessageBody,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            chat_id,
            sender_id,
            content,
            created_at,
            is_read: false,
        }
    }

    pub fn mark_read(&mut self) {
        self.is_read = true;
    }
}
