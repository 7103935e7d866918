//! 会话仓储的 PostgreSQL 实现。
//!
//! 会话行带成员聚合加载（array_agg），私聊的去重不变量由
//! `chats.direct_key` 唯一索引保证。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Chat, ChatId, ChatRepository, RepositoryError, RepositoryResult, UserId};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::repositories::map_sqlx_error;
use crate::db::DbPool;

#[derive(Debug, Clone, FromRow)]
struct DbChat {
    id: Uuid,
    name: Option<String>,
    is_group: bool,
    created_at: DateTime<Utc>,
    participant_ids: Vec<Uuid>,
}

impl From<DbChat> for Chat {
    fn from(row: DbChat) -> Self {
        let mut participant_ids: Vec<UserId> =
            row.participant_ids.into_iter().map(UserId::from).collect();
        participant_ids.sort();
        Chat {
            id: ChatId::new(row.id),
            name: row.name,
            is_group: row.is_group,
            participant_ids,
            created_at: row.created_at,
        }
    }
}

/// 会话加成员聚合的公共 SELECT 片段。
const CHAT_SELECT: &str = "SELECT c.id, c.name, c.is_group, c.created_at, \
     array_agg(cp.user_id) AS participant_ids \
     FROM chats c JOIN chat_participants cp ON cp.chat_id = c.id";

pub struct PgChatRepository {
    pool: DbPool,
}

impl PgChatRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn direct_key_of(chat: &Chat) -> Option<String> {
        if chat.is_group {
            None
        } else {
            Some(Chat::direct_key(
                chat.participant_ids[0],
                chat.participant_ids[1],
            ))
        }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn create(&self, chat: Chat) -> RepositoryResult<Chat> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "INSERT INTO chats (id, name, is_group, direct_key, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::from(chat.id))
        .bind(&chat.name)
        .bind(chat.is_group)
        .bind(Self::direct_key_of(&chat))
        .bind(chat.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for &participant_id in &chat.participant_ids {
            sqlx::query(
                "INSERT INTO chat_participants (chat_id, user_id, joined_at) VALUES ($1, $2, $3)",
            )
            .bind(Uuid::from(chat.id))
            .bind(Uuid::from(participant_id))
            .bind(chat.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(chat)
    }

    async fn find_by_id(&self, id: ChatId) -> RepositoryResult<Option<Chat>> {
        let row = sqlx::query_as::<_, DbChat>(&format!(
            "{CHAT_SELECT} WHERE c.id = $1 GROUP BY c.id"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Chat::from))
    }

    async fn find_direct(&self, a: UserId, b: UserId) -> RepositoryResult<Option<Chat>> {
        let row = sqlx::query_as::<_, DbChat>(&format!(
            "{CHAT_SELECT} WHERE c.direct_key = $1 GROUP BY c.id"
        ))
        .bind(Chat::direct_key(a, b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Chat::from))
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Chat>> {
        let rows = sqlx::query_as::<_, DbChat>(&format!(
            "{CHAT_SELECT} WHERE c.id IN \
             (SELECT chat_id FROM chat_participants WHERE user_id = $1) \
             GROUP BY c.id ORDER BY c.created_at"
        ))
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Chat::from).collect())
    }

    async fn list_participants(&self, id: ChatId) -> RepositoryResult<Vec<UserId>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chats WHERE id = $1)")
            .bind(Uuid::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if !exists {
            return Err(RepositoryError::NotFound);
        }

        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM chat_participants WHERE chat_id = $1")
                .bind(Uuid::from(id))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(ids.into_iter().map(UserId::from).collect())
    }

    async fn is_participant(&self, id: ChatId, user_id: UserId) -> RepositoryResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chat_participants WHERE chat_id = $1 AND user_id = $2)",
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(exists)
    }

    async fn list_contacts(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT other.user_id \
             FROM chat_participants mine \
             JOIN chat_participants other ON other.chat_id = mine.chat_id \
             WHERE mine.user_id = $1 AND other.user_id <> $1",
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(ids.into_iter().map(UserId::from).collect())
    }
}
