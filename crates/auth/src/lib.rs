//! Authentication: sessions, login flows, refreshers and the
//! multi-account manager.
//!
//! A [`Session`] is the credential set needed to sign API calls. It is
//! produced by username/password login ([`LoginClient`]), kept fresh by
//! a per-account [`Refresher`] (access-token exchange for the App
//! dialect, cookie renewal for the Web dialect, both falling back to a
//! full re-login), and owned by an injected [`SessionStore`]. The
//! [`AuthManager`] ties these together per account and lazily
//! materializes valid sessions on demand.

mod app_refresher;
mod login;
mod manager;
mod session;
#[cfg(test)]
mod testutil;
mod web_refresher;

pub use app_refresher::AppRefresher;
pub use login::{Credentials, LoginClient, LoginEndpoints};
pub use manager::{AccountSession, AuthManager};
pub use session::{Session, SessionProvider, StaticProvider};
pub use web_refresher::WebRefresher;

use async_trait::async_trait;
use tianyi_http::HttpError;
use tianyi_store::{SessionStore, StoreError};

/// Re-establishes a valid session for one account.
#[async_trait]
pub trait Refresher: Send + Sync {
    /// Refreshes the stored session, falling back to re-login where the
    /// strategy supports it. Implementations re-read the current session
    /// before doing work, so concurrent refreshes stay idempotent.
    async fn refresh(&self) -> Result<(), AuthError>;

    /// Reports whether the stored session is unusable as-is.
    fn needs_refresh(&self) -> bool;
}

/// Errors from the auth layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("account not found")]
    AccountNotFound,

    #[error("account id must not be empty")]
    AccountIdEmpty,

    #[error("no refresher configured for account")]
    RefresherMissing,

    #[error("no session store configured for account")]
    SessionStoreMissing,

    #[error("no session in store")]
    SessionNotFound,

    #[error("username and password are required")]
    MissingCredentials,

    #[error("login rejected: {0}")]
    LoginFailed(String),

    #[error("login flow error: {0}")]
    LoginFlow(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Crypto(#[from] tianyi_crypto::CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Loads a session, mapping "nothing stored yet" to `None`.
pub(crate) fn load_optional(
    store: &dyn SessionStore<Session>,
) -> Result<Option<Session>, AuthError> {
    match store.load() {
        Ok(session) => Ok(Some(session)),
        Err(StoreError::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
