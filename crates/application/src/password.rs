use async_trait::async_trait;
use domain::PasswordHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    #[error("hashing failed: {0}")]
    Hash(String),
}

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plain: &str) -> Result<PasswordHash, PasswordHasherError>;
    async fn verify(&self, plain: &str, hash: &PasswordHash) -> Result<bool, PasswordHasherError>;
}

/// bcrypt 实现，cost 可配置。
pub struct BcryptPasswordHasher {
    cost: u32,
}

impl BcryptPasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptPasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

#[async_trait]
impl PasswordHasher for BcryptPasswordHasher {
    async fn hash(&self, plain: &str) -> Result<PasswordHash, PasswordHasherError> {
        let cost = self.cost;
        let plain = plain.to_owned();
        // bcrypt 是 CPU 密集操作，挪到阻塞线程池
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
            .await
            .map_err(|err| PasswordHasherError::Hash(err.to_string()))?
            .map_err(|err| PasswordHasherError::Hash(err.to_string()))?;
        Ok(PasswordHash::new(hashed))
    }

    async fn verify(&self, plain: &str, hash: &PasswordHash) -> Result<bool, PasswordHasherError> {
        let plain = plain.to_owned();
        let hash = hash.as_str().to_owned();
        tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
            .await
            .map_err(|err| PasswordHasherError::Hash(err.to_string()))?
            .map_err(|err| PasswordHasherError::Hash(err.to_string()))
    }
}
