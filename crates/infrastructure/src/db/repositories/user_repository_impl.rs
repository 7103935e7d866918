//! 用户仓储的 PostgreSQL 实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    PasswordHash, RepositoryError, RepositoryResult, Timestamp, User, UserEmail, UserId,
    UserRepository, Username,
};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::repositories::map_sqlx_error;
use crate::db::DbPool;

#[derive(Debug, Clone, FromRow)]
struct DbUser {
    id: Uuid,
    username: String,
    email: String,
    password: String,
    avatar: Option<String>,
    is_online: bool,
    last_seen: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl DbUser {
    fn into_user(self) -> RepositoryResult<User> {
        let username = Username::parse(self.username)
            .map_err(|err| RepositoryError::storage(format!("corrupt user row: {err}")))?;
        let email = UserEmail::parse(self.email)
            .map_err(|err| RepositoryError::storage(format!("corrupt user row: {err}")))?;
        Ok(User {
            id: UserId::from(self.id),
            username,
            email,
            password: PasswordHash::new(self.password),
            avatar: self.avatar,
            is_online: self.is_online,
            last_seen: self.last_seen,
            created_at: self.created_at,
        })
    }
}

const USER_COLUMNS: &str = "id, username, email, password, avatar, is_online, last_seen, created_at";

pub struct PgUserRepository {
    pool: DbPool,
}

impl PgUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> RepositoryResult<User> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "INSERT INTO users ({USER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(&user.avatar)
        .bind(user.is_online)
        .bind(user.last_seen)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.into_user()
    }

    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(DbUser::into_user).transpose()
    }

    async fn find_by_email(&self, email: &UserEmail) -> RepositoryResult<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(DbUser::into_user).transpose()
    }

    async fn list_all(&self) -> RepositoryResult<Vec<User>> {
        let rows = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(DbUser::into_user).collect()
    }

    async fn set_online(
        &self,
        id: UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> RepositoryResult<()> {
        let result = sqlx::query("UPDATE users SET is_online = $2, last_seen = $3 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(online)
            .bind(last_seen)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
