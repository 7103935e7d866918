//! 消息仓储的 PostgreSQL 实现。
//!
//! 插入时间戳由数据库分配（NOW()），历史排序走单调的 seq 列，
//! 同一毫秒落库的消息也保持插入顺序。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatId, Message, MessageBody, MessageId, MessageRepository, RepositoryError, RepositoryResult,
    UserId,
};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::repositories::map_sqlx_error;
use crate::db::DbPool;

#[derive(Debug, Clone, FromRow)]
struct DbMessage {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    content: String,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl DbMessage {
    fn into_message(self) -> RepositoryResult<Message> {
        let content = MessageBody::parse(self.content)
            .map_err(|err| RepositoryError::storage(format!("corrupt message row: {err}")))?;
        Ok(Message {
            id: MessageId::new(self.id),
            chat_id: ChatId::new(self.chat_id),
            sender_id: UserId::from(self.sender_id),
            content,
            created_at: self.created_at,
            is_read: self.is_read,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, is_read, created_at";

pub struct PgMessageRepository {
    pool: DbPool,
}

impl PgMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> RepositoryResult<Message> {
        let row = sqlx::query_as::<_, DbMessage>(&format!(
            "INSERT INTO messages (id, chat_id, sender_id, content, is_read, created_at) \
             VALUES ($1, $2, $3, $4, FALSE, NOW()) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.chat_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.into_message()
    }

    async fn list_for_chat(&self, chat_id: ChatId) -> RepositoryResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, DbMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE chat_id = $1 ORDER BY seq ASC"
        ))
        .bind(Uuid::from(chat_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(DbMessage::into_message).collect()
    }

    async fn mark_read(&self, chat_id: ChatId, reader_id: UserId) -> RepositoryResult<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = TRUE \
             WHERE chat_id = $1 AND sender_id <> $2 AND is_read = FALSE",
        )
        .bind(Uuid::from(chat_id))
        .bind(Uuid::from(reader_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn unread_count(&self, chat_id: ChatId, reader_id: UserId) -> RepositoryResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages \
             WHERE chat_id = $1 AND sender_id <> $2 AND is_read = FALSE",
        )
        .bind(Uuid::from(chat_id))
        .bind(Uuid::from(reader_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(count as u64)
    }

    async fn last_message(&self, chat_id: ChatId) -> RepositoryResult<Option<Message>> {
        let row = sqlx::query_as::<_, DbMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE chat_id = $1 ORDER BY seq DESC LIMIT 1"
        ))
        .bind(Uuid::from(chat_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(DbMessage::into_message).transpose()
    }
}
