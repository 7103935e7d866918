//! 会话扇出引擎：事件 → 受影响会话的成员 → 各成员的存活连接。
//!
//! 单个接收者不可达不会让整次广播失败，只计数并记录。

use std::sync::Arc;

use domain::{
    ChatEvent, ChatId, ChatRepository, Message, PresenceStatus, RepositoryError, TypingStatus,
    UserId,
};
use tracing::debug;

use crate::error::ApplicationError;
use crate::presence::PresenceRegistry;

pub struct FanoutEngine {
    chats: Arc<dyn ChatRepository>,
    registry: Arc<PresenceRegistry>,
}

impl FanoutEngine {
    pub fn new(chats: Arc<dyn ChatRepository>, registry: Arc<PresenceRegistry>) -> Self {
        Self { chats, registry }
    }

    /// 把持久化后的消息推给会话里除发送者外的所有成员。
    pub async fn broadcast_message(&self, message: &Message) -> Result<(), ApplicationError> {
        let members = self.members_of(message.chat_id).await?;
        let frame = serde_json::to_string(&ChatEvent::Message(message.clone()))?;
        self.deliver(&members, message.sender_id, &frame).await;
        Ok(())
    }

    /// typing 指示只走内存，不落库。
    pub async fn broadcast_typing(&self, status: TypingStatus) -> Result<(), ApplicationError> {
        let members = self.members_of(status.chat_id).await?;
        let sender = status.user_id;
        let frame = serde_json::to_string(&ChatEvent::Typing(status))?;
        self.deliver(&members, sender, &frame).await;
        Ok(())
    }

    /// 在线状态变化推给所有与该用户共享会话的人，跨会话去重。
    pub async fn broadcast_presence(&self, status: PresenceStatus) -> Result<(), ApplicationError> {
        let contacts = self.chats.list_contacts(status.user_id).await?;
        let subject = status.user_id;
        let frame = serde_json::to_string(&ChatEvent::Status(status))?;
        self.deliver(&contacts, subject, &frame).await;
        Ok(())
    }

    async fn members_of(&self, chat_id: ChatId) -> Result<Vec<UserId>, ApplicationError> {
        match self.chats.list_participants(chat_id).await {
            Ok(members) => Ok(members),
            Err(RepositoryError::NotFound) => Err(domain::DomainError::ChatNotFound.into()),
            Err(err) => Err(err.into()),
        }
    }

    async fn deliver(&self, recipients: &[UserId], exclude: UserId, frame: &str) {
        let mut delivered = 0usize;
        let mut offline = 0usize;
        for &recipient in recipients {
            if recipient == exclude {
                continue;
            }
            match self.registry.send(recipient, frame).await {
                0 => offline += 1,
                n => delivered += n,
            }
        }
        debug!(delivered, offline, "event fan-out complete");
    }
}
