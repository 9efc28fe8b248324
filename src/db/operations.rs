use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{Account, AccountStore, StoreResult};
use crate::error::StoreError;

const ACCOUNT_COLUMNS: &str = "id, handle, email, display_name, password_hash, password_history, \
     refresh_token, created_at, updated_at";

/// Postgres-backed account store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: Arc<PgPool>,
}

impl PgAccountStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        info!("Connected to account database");
        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_handle_or_email(&self, identifier: &str) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE handle = $1 OR email = $1 LIMIT 1"
        ))
        .bind(identifier)
        .fetch_optional(self.pool())
        .await?;

        Ok(account)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(account)
    }

    async fn find_conflicting(
        &self,
        handle: &str,
        email: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE (handle IN ($1, $2) OR email IN ($1, $2)) AND id IS DISTINCT FROM $3 LIMIT 1"
        ))
        .bind(handle)
        .bind(email)
        .bind(exclude)
        .fetch_optional(self.pool())
        .await?;

        Ok(account)
    }

    async fn create(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, handle, email, display_name, password_hash, password_history,
                                  refresh_token, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(account.id)
        .bind(&account.handle)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(&account.password_hash)
        .bind(&account.password_history)
        .bind(&account.refresh_token)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn save(&self, account: &Account) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET handle = $2, email = $3, display_name = $4, password_hash = $5,
                password_history = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.handle)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(&account.password_hash)
        .bind(&account.password_history)
        .bind(account.updated_at)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<String>,
        replacement: Option<String>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET refresh_token = $3, updated_at = now()
            WHERE id = $1 AND refresh_token IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(replacement)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<String>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET refresh_token = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(token)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
