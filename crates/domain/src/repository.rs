//! 聚合根对应的仓储接口，具体实现放在 infrastructure。

use async_trait::async_trait;

use crate::chat::Chat;
use crate::errors::RepositoryError;
use crate::message::Message;
use crate::user::User;
use crate::value_objects::{ChatId, Timestamp, UserEmail, UserId};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 邮箱重复时返回 `Conflict`。
    async fn create(&self, user: User) -> RepositoryResult<User>;
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>>;
    async fn find_by_email(&self, email: &UserEmail) -> RepositoryResult<Option<User>>;
    async fn list_all(&self) -> RepositoryResult<Vec<User>>;
    /// 回写派生的在线标志和 last_seen。
    async fn set_online(
        &self,
        id: UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> RepositoryResult<()>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// 私聊插入受 `direct_key` 唯一约束保护，撞键时返回 `Conflict`。
    async fn create(&self, chat: Chat) -> RepositoryResult<Chat>;
    async fn find_by_id(&self, id: ChatId) -> RepositoryResult<Option<Chat>>;
    /// 两个用户之间已存在的私聊。
    async fn find_direct(&self, a: UserId, b: UserId) -> RepositoryResult<Option<Chat>>;
    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Chat>>;
    /// 会话成员集合；会话不存在时返回 `NotFound`。
    async fn list_participants(&self, id: ChatId) -> RepositoryResult<Vec<UserId>>;
    async fn is_participant(&self, id: ChatId, user_id: UserId) -> RepositoryResult<bool>;
    /// 与给定用户共享至少一个会话的去重用户集合（不含该用户本人）。
    async fn list_contacts(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 原子插入，返回带服务端时间戳的持久化记录。
    async fn create(&self, message: Message) -> RepositoryResult<Message>;
    /// 按插入顺序升序，时间戳相同也保持稳定。
    async fn list_for_chat(&self, chat_id: ChatId) -> RepositoryResult<Vec<Message>>;
    /// 把会话里所有「非 reader 发送且未读」的消息置为已读，返回条数。
    async fn mark_read(&self, chat_id: ChatId, reader_id: UserId) -> RepositoryResult<u64>;
    async fn unread_count(&self, chat_id: ChatId, reader_id: UserId) -> RepositoryResult<u64>;
    async fn last_message(&self, chat_id: ChatId) -> RepositoryResult<Option<Message>>;
}
