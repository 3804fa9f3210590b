use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::debug;

use tianyi_store::SessionStore;

use crate::{AuthError, Refresher, Session, SessionProvider, load_optional};

/// Everything the manager knows about one account.
#[derive(Clone)]
pub struct AccountSession {
    pub account_id: String,
    pub display_name: String,
    pub store: Option<Arc<dyn SessionStore<Session>>>,
    pub refresher: Option<Arc<dyn Refresher>>,
}

impl AccountSession {
    pub fn new(
        display_name: &str,
        store: Arc<dyn SessionStore<Session>>,
        refresher: Arc<dyn Refresher>,
    ) -> Self {
        Self {
            account_id: String::new(),
            display_name: display_name.to_string(),
            store: Some(store),
            refresher: Some(refresher),
        }
    }
}

struct Registry {
    accounts: HashMap<String, AccountSession>,
    current: String,
}

/// Multi-account registry with lazy session materialization.
///
/// `get_account` loads the stored session and, when it is missing,
/// expired, or the refresher votes for renewal, drives the account's
/// refresher before handing out a clone. An empty `account_id` on any
/// method means "the current account".
pub struct AuthManager {
    registry: RwLock<Registry>,
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                accounts: HashMap::new(),
                current: String::new(),
            }),
        }
    }

    /// Registers an account. The first one added becomes current;
    /// re-adding an id replaces it.
    pub fn add_account(&self, account_id: &str, account: AccountSession) -> Result<(), AuthError> {
        if account_id.is_empty() {
            return Err(AuthError::AccountIdEmpty);
        }
        let mut registry = self.registry.write().unwrap();
        let mut account = account;
        account.account_id = account_id.to_string();
        registry.accounts.insert(account_id.to_string(), account);
        if registry.current.is_empty() {
            registry.current = account_id.to_string();
        }
        Ok(())
    }

    /// Removes an account, clearing `current` if it pointed there.
    pub fn remove_account(&self, account_id: &str) {
        let mut registry = self.registry.write().unwrap();
        registry.accounts.remove(account_id);
        if registry.current == account_id {
            registry.current.clear();
        }
    }

    pub fn set_current(&self, account_id: &str) -> Result<(), AuthError> {
        let mut registry = self.registry.write().unwrap();
        if !registry.accounts.contains_key(account_id) {
            return Err(AuthError::AccountNotFound);
        }
        registry.current = account_id.to_string();
        Ok(())
    }

    pub fn current(&self) -> String {
        self.registry.read().unwrap().current.clone()
    }

    /// Metadata snapshots of all registered accounts.
    pub fn list_accounts(&self) -> Vec<AccountSession> {
        self.registry
            .read()
            .unwrap()
            .accounts
            .values()
            .cloned()
            .collect()
    }

    /// Returns a valid session clone for the account, refreshing lazily.
    pub async fn get_account(&self, account_id: &str) -> Result<Session, AuthError> {
        let (id, account) = self.resolve(account_id)?;
        let store = account
            .store
            .clone()
            .ok_or(AuthError::SessionStoreMissing)?;

        let mut session = load_optional(store.as_ref())?;
        let mut stale = session
            .as_ref()
            .map_or(true, |s| s.expired(Utc::now()));
        if let Some(refresher) = &account.refresher {
            if refresher.needs_refresh() {
                stale = true;
            }
        }

        if stale {
            let refresher = account
                .refresher
                .clone()
                .ok_or(AuthError::RefresherMissing)?;
            debug!(account = %id, "session stale, refreshing");
            refresher.refresh().await?;
            session = Some(store.load().map_err(|_| AuthError::SessionNotFound)?);
        }

        session.ok_or(AuthError::SessionNotFound)
    }

    /// Forces a refresh through the account's refresher.
    pub async fn refresh_account(&self, account_id: &str) -> Result<(), AuthError> {
        let (id, account) = self.resolve(account_id)?;
        let refresher = account
            .refresher
            .clone()
            .ok_or(AuthError::RefresherMissing)?;
        debug!(account = %id, "forced refresh");
        refresher.refresh().await
    }

    /// Returns a provider that reads the account's store on every call
    /// and can persist a lazily discovered session key.
    pub fn session_provider(
        &self,
        account_id: &str,
    ) -> Result<Arc<dyn SessionProvider>, AuthError> {
        let (_, account) = self.resolve(account_id)?;
        let store = account.store.ok_or(AuthError::SessionStoreMissing)?;
        Ok(Arc::new(StoreProvider { store }))
    }

    fn resolve(&self, account_id: &str) -> Result<(String, AccountSession), AuthError> {
        let registry = self.registry.read().unwrap();
        let id = if account_id.is_empty() {
            registry.current.clone()
        } else {
            account_id.to_string()
        };
        if id.is_empty() {
            return Err(AuthError::AccountNotFound);
        }
        let account = registry
            .accounts
            .get(&id)
            .cloned()
            .ok_or(AuthError::AccountNotFound)?;
        Ok((id, account))
    }
}

/// Store-backed provider: every read hits the account's session store.
struct StoreProvider {
    store: Arc<dyn SessionStore<Session>>,
}

impl StoreProvider {
    fn snapshot(&self) -> Option<Session> {
        self.store.load().ok()
    }
}

impl SessionProvider for StoreProvider {
    fn session_key(&self) -> String {
        self.snapshot().map(|s| s.session_key).unwrap_or_default()
    }

    fn session_secret(&self) -> String {
        self.snapshot().map(|s| s.session_secret).unwrap_or_default()
    }

    fn access_token(&self) -> String {
        self.snapshot().map(|s| s.access_token).unwrap_or_default()
    }

    fn sson(&self) -> String {
        self.snapshot().map(|s| s.sson).unwrap_or_default()
    }

    fn cookie_login_user(&self) -> String {
        self.snapshot()
            .map(|s| s.cookie_login_user)
            .unwrap_or_default()
    }

    fn set_session_key(&self, key: &str) -> Result<(), AuthError> {
        let mut session = load_optional(self.store.as_ref())?.unwrap_or_default();
        session.session_key = key.to_string();
        self.store.save(&session)?;
        Ok(())
    }
}
