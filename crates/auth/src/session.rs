use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AuthError;

/// Credentials required to sign App/Web API calls.
///
/// Cloned freely; a clone shares no state with the original. A session
/// with no `expires_at` never expires on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Session {
    pub session_key: String,
    pub session_secret: String,
    pub access_token: String,
    pub sson: String,
    pub cookie_login_user: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// True when `expires_at` is set and `now` has reached it.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    /// True when the session can sign App-dialect requests.
    pub fn can_sign_app(&self) -> bool {
        !self.session_key.is_empty() && !self.session_secret.is_empty()
    }
}

/// Read access to the current session's credential fields.
///
/// Signers consume this instead of a raw [`Session`] so they always see
/// the latest stored values, and so the Web upload path can write back
/// a lazily discovered session key without holding a mutable session.
pub trait SessionProvider: Send + Sync {
    fn session_key(&self) -> String;
    fn session_secret(&self) -> String;
    fn access_token(&self) -> String;
    fn sson(&self) -> String;
    fn cookie_login_user(&self) -> String;
    fn set_session_key(&self, key: &str) -> Result<(), AuthError>;
}

/// A provider over a fixed in-memory session. Useful for tools and
/// tests that do not need a store-backed account.
pub struct StaticProvider {
    session: RwLock<Session>,
}

impl StaticProvider {
    pub fn new(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.session.read().unwrap().clone()
    }
}

impl SessionProvider for StaticProvider {
    fn session_key(&self) -> String {
        self.session.read().unwrap().session_key.clone()
    }

    fn session_secret(&self) -> String {
        self.session.read().unwrap().session_secret.clone()
    }

    fn access_token(&self) -> String {
        self.session.read().unwrap().access_token.clone()
    }

    fn sson(&self) -> String {
        self.session.read().unwrap().sson.clone()
    }

    fn cookie_login_user(&self) -> String {
        self.session.read().unwrap().cookie_login_user.clone()
    }

    fn set_session_key(&self, key: &str) -> Result<(), AuthError> {
        self.session.write().unwrap().session_key = key.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn no_expiry_never_expires() {
        let session = Session::default();
        assert!(!session.expired(Utc::now()));
    }

    #[test]
    fn expiry_boundary() {
        let now = Utc::now();
        let session = Session {
            expires_at: Some(now),
            ..Default::default()
        };
        assert!(session.expired(now));
        assert!(session.expired(now + TimeDelta::seconds(1)));
        assert!(!session.expired(now - TimeDelta::seconds(1)));
    }

    #[test]
    fn clone_is_independent() {
        let mut original = Session {
            session_key: "key".into(),
            ..Default::default()
        };
        let copy = original.clone();
        original.session_key = "changed".into();
        assert_eq!(copy.session_key, "key");
    }

    #[test]
    fn app_signing_requires_key_and_secret() {
        let mut session = Session::default();
        assert!(!session.can_sign_app());
        session.session_key = "k".into();
        assert!(!session.can_sign_app());
        session.session_secret = "s".into();
        assert!(session.can_sign_app());
    }

    #[test]
    fn serde_uses_wire_names() {
        let session: Session = serde_json::from_str(
            r#"{"sessionKey":"k","sessionSecret":"s","accessToken":"t","sson":"o","cookieLoginUser":"c"}"#,
        )
        .unwrap();
        assert_eq!(session.session_key, "k");
        assert_eq!(session.cookie_login_user, "c");
        assert!(session.expires_at.is_none());
    }

    #[test]
    fn static_provider_reads_and_writes_key() {
        let provider = StaticProvider::new(Session {
            session_key: "a".into(),
            session_secret: "b".into(),
            ..Default::default()
        });
        assert_eq!(provider.session_key(), "a");
        provider.set_session_key("fresh").unwrap();
        assert_eq!(provider.session_key(), "fresh");
        assert_eq!(provider.session_secret(), "b");
    }
}
