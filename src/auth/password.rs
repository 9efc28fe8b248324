use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use rand::rngs::OsRng;

use crate::config::HashingConfig;
use crate::error::AppError;
use crate::Result;

/// One-way password hashing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<String>;

    /// `Ok(false)` on mismatch; `Err` only for an unreadable stored hash.
    async fn verify(&self, plaintext: &str, hash: &str) -> Result<bool>;
}

/// Argon2id, run on the blocking pool so a hash never stalls the executor.
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(config: &HashingConfig) -> Result<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AppError::ConfigError(format!("argon2 params: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

#[async_trait]
impl PasswordHasher for Argon2Hasher {
    async fn hash(&self, plaintext: &str) -> Result<String> {
        let argon2 = self.argon2();
        let plaintext = plaintext.to_owned();

        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(plaintext.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| AppError::InternalError(format!("argon2 hash: {e}")))
        })
        .await
        .map_err(|e| AppError::InternalError(format!("hashing task failed: {e}")))?
    }

    async fn verify(&self, plaintext: &str, hash: &str) -> Result<bool> {
        let argon2 = self.argon2();
        let plaintext = plaintext.to_owned();
        let hash = hash.to_owned();

        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| AppError::InternalError(format!("bad password hash: {e}")))?;
            Ok(argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok())
        })
        .await
        .map_err(|e| AppError::InternalError(format!("hashing task failed: {e}")))?
    }
}
