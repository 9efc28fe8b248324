//! Account persistence.
//!
//! The session manager only talks to [`AccountStore`]; the Postgres and
//! in-memory implementations are interchangeable behind it.

pub mod memory;
pub mod models;
pub mod operations;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;

pub use memory::MemoryAccountStore;
pub use models::{normalize_identifier, Account, AccountProfile};
pub use operations::PgAccountStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-record atomic account storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Looks up by handle or by email. `identifier` is already normalized.
    async fn find_by_handle_or_email(&self, identifier: &str) -> StoreResult<Option<Account>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    /// Any account other than `exclude` holding `handle` or `email`.
    async fn find_conflicting(
        &self,
        handle: &str,
        email: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Option<Account>>;

    /// Inserts a new record; `StoreError::Duplicate` on a uniqueness clash.
    async fn create(&self, account: &Account) -> StoreResult<()>;

    /// Overwrites the profile and password fields of an existing record.
    /// `refresh_token` is left alone; it only moves through
    /// [`set_refresh_token`](Self::set_refresh_token) and
    /// [`swap_refresh_token`](Self::swap_refresh_token), so a stale copy can
    /// never resurrect a rotated-away token.
    async fn save(&self, account: &Account) -> StoreResult<()>;

    /// Sets `refresh_token` to `replacement` only if it currently equals
    /// `expected`. Returns whether the swap happened.
    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<String>,
        replacement: Option<String>,
    ) -> StoreResult<bool>;

    /// Unconditionally sets `refresh_token`. Returns false for an unknown id.
    async fn set_refresh_token(&self, id: Uuid, token: Option<String>) -> StoreResult<bool>;

    async fn close(&self) {}
}
