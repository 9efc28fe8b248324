use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Account, AccountStore, StoreResult};
use crate::error::StoreError;

/// Process-local store. Every operation takes the map lock, which gives the
/// same per-record atomicity the Postgres store gets from single statements.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    fn clash<'a>(
        accounts: &'a HashMap<Uuid, Account>,
        handle: &str,
        email: &str,
        exclude: Option<Uuid>,
    ) -> Option<&'a Account> {
        accounts
            .values()
            .filter(|a| Some(a.id) != exclude)
            .find(|a| a.holds(handle) || a.holds(email))
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_handle_or_email(&self, identifier: &str) -> StoreResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.holds(identifier))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_conflicting(
        &self,
        handle: &str,
        email: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(Self::clash(&accounts, handle, email, exclude).cloned())
    }

    async fn create(&self, account: &Account) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        if let Some(existing) = Self::clash(&accounts, &account.handle, &account.email, None) {
            let field = if existing.holds(&account.handle) { "handle" } else { "email" };
            return Err(StoreError::Duplicate(field.to_string()));
        }
        if accounts.contains_key(&account.id) {
            return Err(StoreError::Duplicate("id".to_string()));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn save(&self, account: &Account) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        if let Some(existing) = Self::clash(&accounts, &account.handle, &account.email, Some(account.id)) {
            let field = if existing.holds(&account.handle) { "handle" } else { "email" };
            return Err(StoreError::Duplicate(field.to_string()));
        }
        match accounts.get_mut(&account.id) {
            Some(slot) => {
                let refresh_token = slot.refresh_token.take();
                *slot = account.clone();
                slot.refresh_token = refresh_token;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<String>,
        replacement: Option<String>,
    ) -> StoreResult<bool> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&id) {
            Some(account) if account.refresh_token == expected => {
                account.refresh_token = replacement;
                account.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<String>) -> StoreResult<bool> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&id) {
            Some(account) => {
                account.refresh_token = token;
                account.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
