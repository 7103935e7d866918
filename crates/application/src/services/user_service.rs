use std::sync::Arc;

use domain::{
    DomainError, RepositoryError, User, UserEmail, UserId, UserRepository, Username,
};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::password::PasswordHasher;

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub email: String,
    pub password: String,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let username = Username::parse(request.username)?;
        let email = UserEmail::parse(request.email)?;
        if request.password.is_empty() {
            return Err(DomainError::invalid_argument("password", "cannot be empty").into());
        }

        if self.deps.user_repository.find_by_email(&email).await?.is_some() {
            return Err(DomainError::EmailAlreadyInUse.into());
        }

        let hashed = self.deps.password_hasher.hash(&request.password).await?;
        let user = User::register(
            UserId::from(Uuid::new_v4()),
            username,
            email,
            hashed,
            self.deps.clock.now(),
        );

        match self.deps.user_repository.create(user).await {
            Ok(created) => Ok(created),
            // 并发注册同一邮箱时唯一约束兜底
            Err(RepositoryError::Conflict) => Err(DomainError::EmailAlreadyInUse.into()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let email = UserEmail::parse(request.email).map_err(|_| DomainError::InvalidCredentials)?;
        let mut user = self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .ok_or(DomainError::InvalidCredentials)?;

        let ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !ok {
            return Err(DomainError::InvalidCredentials.into());
        }

        // 登录即视为上线，刷新 last_seen
        let now = self.deps.clock.now();
        self.deps.user_repository.set_online(user.id, true, now).await?;
        user.set_online(true, now);
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::UserNotFound.into())
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ApplicationError> {
        Ok(self.deps.user_repository.list_all().await?)
    }

    /// 在线标志回写。注册表才是 is_online 查询的权威，
    /// 这条失败由调用方决定要不要吞掉。
    pub async fn set_presence(&self, id: UserId, online: bool) -> Result<(), ApplicationError> {
        let now = self.deps.clock.now();
        self.deps.user_repository.set_online(id, online, now).await?;
        Ok(())
    }
}
