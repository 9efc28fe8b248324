//! Signed, expiring claim-sets.
//!
//! Access and refresh tokens are HS256 JWTs signed with *different* secrets,
//! so neither kind can stand in for the other.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Account;
use crate::error::TokenError;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn for_account(account: &Account, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: account.id,
            handle: account.handle.clone(),
            email: account.email.clone(),
            display_name: account.display_name.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    /// Keeps two refresh tokens minted within the same second distinct.
    pub jti: Uuid,
}

impl RefreshClaims {
    pub fn for_account(account_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: account_id,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4(),
        }
    }
}

/// One secret, one lifetime.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
    ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self { secret: secret.into(), ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue<C: Serialize>(&self, claims: &C) -> Result<String, TokenError> {
        issue(claims, &self.secret)
    }

    pub fn verify<C: DeserializeOwned>(&self, token: &str) -> Result<C, TokenError> {
        verify(token, &self.secret)
    }
}

/// Signs `claims`. Expiry is whatever `exp` the claims carry.
pub fn issue<C: Serialize>(claims: &C, secret: &str) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(TokenError::from)
}

/// Checks signature and expiry, then decodes the claims.
pub fn verify<C: DeserializeOwned>(token: &str, secret: &str) -> Result<C, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<C>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// The access/refresh codec pair a session manager signs with.
#[derive(Clone)]
pub struct TokenPair {
    pub access: TokenCodec,
    pub refresh: TokenCodec,
}

impl TokenPair {
    pub fn new(access: TokenCodec, refresh: TokenCodec) -> Self {
        Self { access, refresh }
    }

    pub fn from_settings(auth: &crate::config::AuthConfig) -> Self {
        Self {
            access: TokenCodec::new(
                auth.access_token_secret.clone(),
                Duration::seconds(auth.access_token_ttl_secs),
            ),
            refresh: TokenCodec::new(
                auth.refresh_token_secret.clone(),
                Duration::seconds(auth.refresh_token_ttl_secs),
            ),
        }
    }
}
