use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Trims and lowercases a handle, email or login identifier.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Stored account record, credential fields included.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    /// Superseded password hashes, most recent last.
    pub password_history: Vec<String>,
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(handle: &str, email: &str, display_name: &str, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            handle: normalize_identifier(handle),
            email: normalize_identifier(email),
            display_name: display_name.trim().to_string(),
            password_hash,
            password_history: Vec::new(),
            refresh_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the password hash, pushing the old one onto the history
    /// and keeping only the newest `depth` entries.
    pub fn rotate_password(&mut self, new_hash: String, depth: usize) {
        let previous = std::mem::replace(&mut self.password_hash, new_hash);
        self.password_history.push(previous);
        if self.password_history.len() > depth {
            let excess = self.password_history.len() - depth;
            self.password_history.drain(..excess);
        }
        self.touch();
    }

    /// Whether `identifier` is this account's handle or its email.
    pub fn holds(&self, identifier: &str) -> bool {
        self.handle == identifier || self.email == identifier
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn profile(&self) -> AccountProfile {
        AccountProfile::from(self)
    }
}

/// What an account looks like to anyone but the credential check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: Uuid,
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountProfile {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            handle: account.handle.clone(),
            email: account.email.clone(),
            display_name: account.display_name.clone(),
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}
