use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::password::{Argon2Hasher, PasswordHasher};
use super::rate_limit::{LoginThrottle, ThrottleConfig};
use super::token::{AccessClaims, RefreshClaims, TokenPair};
use crate::config::Settings;
use crate::db::{normalize_identifier, Account, AccountProfile, AccountStore};
use crate::error::{AppError, AuthError, StoreError, TokenError};
use crate::Result;

/// Verified against when a login names no account, so both failure paths
/// pay for one hash verification.
const DUMMY_PASSWORD: &str = "vidstream-dummy-password";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user: AccountProfile,
    #[serde(flatten)]
    pub tokens: IssuedTokens,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountDetails {
    pub handle: String,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    /// How many superseded hashes are kept and checked for reuse.
    pub history_depth: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 6, history_depth: 3 }
    }
}

impl PasswordPolicy {
    fn check_length(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.min_length {
            return Err(AppError::ValidationError(format!(
                "Password must be at least {} characters",
                self.min_length
            )));
        }
        Ok(())
    }
}

/// Drives login, refresh-token rotation, logout and password changes.
///
/// The current refresh token lives on the account record. Every successful
/// login or refresh overwrites it, so a token that has been rotated away no
/// longer matches and is rejected even though its signature is valid.
pub struct SessionManager {
    store: Arc<dyn AccountStore>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: TokenPair,
    throttle: LoginThrottle,
    policy: PasswordPolicy,
    dummy_hash: OnceCell<String>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn AccountStore>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: TokenPair,
        throttle: LoginThrottle,
        policy: PasswordPolicy,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            throttle,
            policy,
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &Settings, store: Arc<dyn AccountStore>) -> Result<Self> {
        let hasher = Argon2Hasher::new(&settings.hashing)?;
        Ok(Self::new(
            store,
            Arc::new(hasher),
            TokenPair::from_settings(&settings.auth),
            LoginThrottle::new(ThrottleConfig::from(&settings.auth)),
            PasswordPolicy {
                min_length: settings.auth.min_password_length,
                history_depth: settings.auth.password_history_depth,
            },
        ))
    }

    pub fn tokens(&self) -> &TokenPair {
        &self.tokens
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn throttle(&self) -> &LoginThrottle {
        &self.throttle
    }

    pub async fn register(&self, new: NewAccount) -> Result<AccountProfile> {
        let fields = [
            ("handle", &new.handle),
            ("email", &new.email),
            ("display_name", &new.display_name),
            ("password", &new.password),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(AppError::ValidationError(format!("{} is required", field)));
        }
        self.policy.check_length(&new.password)?;

        let handle = normalize_identifier(&new.handle);
        let email = normalize_identifier(&new.email);
        check_identity(&handle, &email)?;

        if let Some(existing) = self.store.find_conflicting(&handle, &email, None).await? {
            return Err(AppError::Conflict(conflict_message(&existing, &handle, &email)));
        }

        // Hash first, then store: the record never exists with a plaintext password.
        let password_hash = self.hasher.hash(&new.password).await?;
        let account = Account::new(&handle, &email, &new.display_name, password_hash);

        match self.store.create(&account).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(AppError::Conflict("Handle or email already exists".into()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(account_id = %account.id, handle = %account.handle, "Account registered");
        Ok(account.profile())
    }

    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoginOutcome> {
        let identifier = normalize_identifier(identifier);
        if identifier.is_empty() || password.is_empty() {
            return Err(AppError::ValidationError(
                "Identifier and password are required".into(),
            ));
        }

        let found = self.store.find_by_handle_or_email(&identifier).await?;

        // Failures against a real account count once however it is named.
        let throttle_key = match &found {
            Some(account) => account.id.to_string(),
            None => identifier.clone(),
        };
        if !self.throttle.is_allowed(&throttle_key).await {
            warn!(identifier = %identifier, "Login throttled");
            return Err(AuthError::RateLimited.into());
        }

        let account = match found {
            Some(account) => account,
            None => {
                self.verify_dummy(password).await?;
                self.throttle.record_failure(&throttle_key).await;
                debug!(identifier = %identifier, "Login failed: no such account");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !self.hasher.verify(password, &account.password_hash).await? {
            self.throttle.record_failure(&throttle_key).await;
            debug!(account_id = %account.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }
        self.throttle.reset(&throttle_key).await;

        let tokens = self.issue_tokens(&account)?;
        if !self
            .store
            .set_refresh_token(account.id, Some(tokens.refresh_token.clone()))
            .await?
        {
            // Deleted between lookup and write.
            return Err(AuthError::InvalidCredentials.into());
        }

        info!(account_id = %account.id, "Login succeeded");
        Ok(LoginOutcome {
            user: account.profile(),
            tokens,
        })
    }

    pub async fn refresh(&self, presented: &str) -> Result<IssuedTokens> {
        let claims: RefreshClaims = self.tokens.refresh.verify(presented).map_err(|e| {
            debug!(reason = %e, "Refresh token rejected");
            AuthError::Unauthorized
        })?;

        let account = self.store.find_by_id(claims.sub).await?.ok_or_else(|| {
            warn!(account_id = %claims.sub, "Refresh token for unknown account");
            AuthError::Unauthorized
        })?;

        if account.refresh_token.as_deref() != Some(presented) {
            warn!(account_id = %account.id, "Refresh token expired or already used");
            return Err(AuthError::Unauthorized.into());
        }

        let tokens = self.issue_tokens(&account)?;
        let rotated = self
            .store
            .swap_refresh_token(
                account.id,
                Some(presented.to_string()),
                Some(tokens.refresh_token.clone()),
            )
            .await?;
        if !rotated {
            warn!(account_id = %account.id, "Refresh token rotated by a concurrent request");
            return Err(AuthError::Unauthorized.into());
        }

        info!(account_id = %account.id, "Tokens refreshed");
        Ok(tokens)
    }

    /// Revokes the stored refresh token. Repeating it is harmless.
    pub async fn logout(&self, account_id: Uuid) -> Result<()> {
        self.store.set_refresh_token(account_id, None).await?;
        info!(account_id = %account_id, "Logged out");
        Ok(())
    }

    pub async fn change_password(
        &self,
        account_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        self.policy.check_length(new_password)?;

        let mut account = self
            .store
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if !self.hasher.verify(old_password, &account.password_hash).await? {
            debug!(account_id = %account_id, "Password change rejected: wrong old password");
            return Err(AuthError::InvalidCredentials.into());
        }
        if new_password == old_password
            || self.hasher.verify(new_password, &account.password_hash).await?
        {
            return Err(AuthError::SamePassword.into());
        }
        for previous in &account.password_history {
            if self.hasher.verify(new_password, previous).await? {
                debug!(account_id = %account_id, "Password change rejected: reused password");
                return Err(AuthError::PasswordReused.into());
            }
        }

        let new_hash = self.hasher.hash(new_password).await?;
        account.rotate_password(new_hash, self.policy.history_depth);
        self.store.save(&account).await?;

        info!(account_id = %account_id, "Password changed");
        Ok(())
    }

    /// Resolves an access token to its account.
    pub async fn authenticate(&self, access_token: &str) -> Result<Account> {
        let claims: AccessClaims = self.tokens.access.verify(access_token).map_err(|e| {
            debug!(reason = %e, "Access token rejected");
            AuthError::Unauthorized
        })?;

        self.store
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| AuthError::Unauthorized.into())
    }

    pub async fn current_account(&self, account_id: Uuid) -> Result<AccountProfile> {
        self.store
            .find_by_id(account_id)
            .await?
            .map(|account| account.profile())
            .ok_or_else(|| StoreError::NotFound.into())
    }

    pub async fn update_account_details(
        &self,
        account_id: Uuid,
        details: AccountDetails,
    ) -> Result<AccountProfile> {
        if [&details.handle, &details.email, &details.display_name]
            .iter()
            .any(|value| value.trim().is_empty())
        {
            return Err(AppError::ValidationError(
                "Handle, email and display name are required".into(),
            ));
        }
        let handle = normalize_identifier(&details.handle);
        let email = normalize_identifier(&details.email);
        check_identity(&handle, &email)?;

        if let Some(existing) = self
            .store
            .find_conflicting(&handle, &email, Some(account_id))
            .await?
        {
            return Err(AppError::Conflict(conflict_message(&existing, &handle, &email)));
        }

        let mut account = self
            .store
            .find_by_id(account_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        account.handle = handle;
        account.email = email;
        account.display_name = details.display_name.trim().to_string();
        account.touch();

        match self.store.save(&account).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(AppError::Conflict("Handle or email already exists".into()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(account_id = %account_id, "Account details updated");
        Ok(account.profile())
    }

    fn issue_tokens(&self, account: &Account) -> std::result::Result<IssuedTokens, TokenError> {
        let access = AccessClaims::for_account(account, self.tokens.access.ttl());
        let refresh = RefreshClaims::for_account(account.id, self.tokens.refresh.ttl());

        Ok(IssuedTokens {
            access_token: self.tokens.access.issue(&access)?,
            refresh_token: self.tokens.refresh.issue(&refresh)?,
        })
    }

    async fn verify_dummy(&self, password: &str) -> Result<()> {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hasher.hash(DUMMY_PASSWORD))
            .await?;
        self.hasher.verify(password, dummy).await?;
        Ok(())
    }
}

/// Handles never look like emails, so a login identifier names at most one account.
fn check_identity(handle: &str, email: &str) -> Result<()> {
    if handle.contains('@') {
        return Err(AppError::ValidationError("handle must not contain '@'".into()));
    }
    if !email.contains('@') {
        return Err(AppError::ValidationError("email is not a valid address".into()));
    }
    Ok(())
}

fn conflict_message(existing: &Account, handle: &str, email: &str) -> String {
    let mut taken = Vec::new();
    if existing.holds(handle) {
        taken.push("handle");
    }
    if existing.holds(email) {
        taken.push("email");
    }
    format!("The following field(s) are already taken: {}", taken.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::MockPasswordHasher;
    use crate::auth::token::TokenCodec;
    use crate::db::{MemoryAccountStore, MockAccountStore};
    use chrono::Duration;

    fn tokens() -> TokenPair {
        TokenPair::new(
            TokenCodec::new("access-secret", Duration::minutes(15)),
            TokenCodec::new("refresh-secret", Duration::days(10)),
        )
    }

    /// Stores the plaintext behind a marker; keeps these tests off argon2.
    fn plain_hasher() -> MockPasswordHasher {
        let mut hasher = MockPasswordHasher::new();
        hasher
            .expect_hash()
            .returning(|plain| Ok(format!("plain:{}", plain)));
        hasher
            .expect_verify()
            .returning(|plain, hash| Ok(hash == format!("plain:{}", plain)));
        hasher
    }

    fn manager(store: Arc<dyn AccountStore>) -> SessionManager {
        SessionManager::new(
            store,
            Arc::new(plain_hasher()),
            tokens(),
            LoginThrottle::new(ThrottleConfig::default()),
            PasswordPolicy::default(),
        )
    }

    fn alice() -> NewAccount {
        NewAccount {
            handle: "Alice".into(),
            email: "alice@example.com".into(),
            display_name: "Alice".into(),
            password: "p1-secret".into(),
        }
    }

    #[tokio::test]
    async fn test_login_stores_issued_refresh_token() {
        let store = Arc::new(MemoryAccountStore::new());
        let manager = manager(store.clone());
        let profile = manager.register(alice()).await.unwrap();

        let outcome = manager.login("ALICE", "p1-secret").await.unwrap();
        let stored = store.find_by_id(profile.id).await.unwrap().unwrap();

        assert_eq!(outcome.user.handle, "alice");
        assert_eq!(stored.refresh_token.as_deref(), Some(outcome.tokens.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn test_refresh_replay_is_rejected() {
        let manager = manager(Arc::new(MemoryAccountStore::new()));
        manager.register(alice()).await.unwrap();
        let first = manager.login("alice", "p1-secret").await.unwrap().tokens;

        let second = manager.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let replay = manager.refresh(&first.refresh_token).await.unwrap_err();
        assert!(matches!(replay, AppError::AuthError(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_login_store_outage() {
        let mut store = MockAccountStore::new();
        store
            .expect_find_by_handle_or_email()
            .returning(|_| Err(StoreError::Unavailable("connection refused".into())));

        let err = manager(Arc::new(store)).login("alice", "p1-secret").await.unwrap_err();
        assert!(matches!(err, AppError::StoreError(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_refresh_store_outage() {
        let token = tokens()
            .refresh
            .issue(&RefreshClaims::for_account(Uuid::new_v4(), Duration::days(1)))
            .unwrap();

        let mut store = MockAccountStore::new();
        store
            .expect_find_by_id()
            .returning(|_| Err(StoreError::Unavailable("pool timed out".into())));

        let err = manager(Arc::new(store)).refresh(&token).await.unwrap_err();
        assert!(matches!(err, AppError::StoreError(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_logout_store_outage_propagates() {
        let mut store = MockAccountStore::new();
        store
            .expect_set_refresh_token()
            .times(1)
            .returning(|_, _| Err(StoreError::Unavailable("down".into())));

        let err = manager(Arc::new(store)).logout(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::StoreError(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_refresh_lost_race_is_unauthorized() {
        let account = Account::new("alice", "alice@example.com", "Alice", "plain:pw".into());
        let id = account.id;
        let codec = tokens();
        let presented = codec
            .refresh
            .issue(&RefreshClaims::for_account(id, Duration::days(1)))
            .unwrap();

        let mut stored = account.clone();
        stored.refresh_token = Some(presented.clone());

        let mut store = MockAccountStore::new();
        store
            .expect_find_by_id()
            .returning(move |_| Ok(Some(stored.clone())));
        store
            .expect_swap_refresh_token()
            .times(1)
            .returning(|_, _, _| Ok(false));

        let err = manager(Arc::new(store)).refresh(&presented).await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_refresh_for_missing_account_is_unauthorized() {
        let manager = manager(Arc::new(MemoryAccountStore::new()));
        manager.register(alice()).await.unwrap();
        manager.login("alice", "p1-secret").await.unwrap();

        let orphan = manager
            .tokens()
            .refresh
            .issue(&RefreshClaims::for_account(Uuid::new_v4(), Duration::days(1)))
            .unwrap();

        let err = manager.refresh(&orphan).await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_unauthorized() {
        let store = Arc::new(MemoryAccountStore::new());
        let manager = SessionManager::new(
            store.clone(),
            Arc::new(plain_hasher()),
            TokenPair::new(
                TokenCodec::new("access-secret", Duration::minutes(15)),
                TokenCodec::new("refresh-secret", Duration::seconds(-60)),
            ),
            LoginThrottle::new(ThrottleConfig::default()),
            PasswordPolicy::default(),
        );
        let profile = manager.register(alice()).await.unwrap();

        let expired = manager.login("alice", "p1-secret").await.unwrap().tokens.refresh_token;
        let stored = store.find_by_id(profile.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(expired.as_str()));

        let err = manager.refresh(&expired).await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_handle_cannot_look_like_email() {
        let manager = manager(Arc::new(MemoryAccountStore::new()));

        let mut squatter = alice();
        squatter.handle = "victim@example.com".into();
        match manager.register(squatter).await.unwrap_err() {
            AppError::ValidationError(msg) => assert!(msg.contains("handle")),
            other => panic!("expected validation error, got {:?}", other),
        }

        let a = manager.register(alice()).await.unwrap();
        let err = manager
            .update_account_details(
                a.id,
                AccountDetails {
                    handle: "victim@example.com".into(),
                    email: "alice@example.com".into(),
                    display_name: "Alice".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let err = manager
            .update_account_details(
                a.id,
                AccountDetails {
                    handle: "alice".into(),
                    email: "not-an-address".into(),
                    display_name: "Alice".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_register_email_taken_as_handle_conflicts() {
        let store = Arc::new(MemoryAccountStore::new());
        let mut squatter = Account::new("squatter", "squatter@example.com", "S", "plain:x".into());
        squatter.handle = "victim@example.com".into();
        store.create(&squatter).await.unwrap();
        let manager = manager(store);

        let err = manager
            .register(NewAccount {
                handle: "victim".into(),
                email: "victim@example.com".into(),
                display_name: "Victim".into(),
                password: "victim-pw".into(),
            })
            .await
            .unwrap_err();
        match err {
            AppError::Conflict(msg) => assert!(msg.contains("email")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_conflicts() {
        let manager = manager(Arc::new(MemoryAccountStore::new()));
        manager.register(alice()).await.unwrap();

        let mut dup = alice();
        dup.email = "other@example.com".into();
        match manager.register(dup).await.unwrap_err() {
            AppError::Conflict(msg) => assert!(msg.contains("handle")),
            other => panic!("expected conflict, got {:?}", other),
        }

        let mut blank = alice();
        blank.display_name = "   ".into();
        match manager.register(blank).await.unwrap_err() {
            AppError::ValidationError(msg) => assert_eq!(msg, "display_name is required"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_account_details() {
        let manager = manager(Arc::new(MemoryAccountStore::new()));
        let a = manager.register(alice()).await.unwrap();
        manager
            .register(NewAccount {
                handle: "bob".into(),
                email: "bob@example.com".into(),
                display_name: "Bob".into(),
                password: "bob-secret".into(),
            })
            .await
            .unwrap();

        let taken = manager
            .update_account_details(
                a.id,
                AccountDetails {
                    handle: "BOB".into(),
                    email: "alice@example.com".into(),
                    display_name: "Alice".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(taken, AppError::Conflict(_)));

        let updated = manager
            .update_account_details(
                a.id,
                AccountDetails {
                    handle: "alice2".into(),
                    email: "Alice2@Example.com".into(),
                    display_name: "Alice Two".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email, "alice2@example.com");
        assert_eq!(manager.current_account(a.id).await.unwrap(), updated);
    }
}
