//! Authentication module for the VidStream backend
//!
//! This module handles credential checks, access/refresh token issuance,
//! refresh-token rotation, logout and password changes.

pub mod handlers;
pub mod middleware;
pub mod password;
pub mod token;
mod rate_limit;
mod service;

pub use middleware::AuthenticatedAccount;
pub use password::{Argon2Hasher, PasswordHasher};
pub use rate_limit::{LoginThrottle, ThrottleConfig};
pub use service::{
    AccountDetails, IssuedTokens, LoginOutcome, NewAccount, PasswordPolicy, SessionManager,
};
pub use token::{AccessClaims, RefreshClaims, TokenCodec, TokenPair};
