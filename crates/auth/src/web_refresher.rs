use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use tianyi_http::{HttpClient, HttpError};
use tianyi_store::SessionStore;

use crate::login::parse_url;
use crate::{AuthError, Credentials, LoginClient, Refresher, Session, load_optional};

const DEFAULT_LOGIN_URL: &str = "https://cloud.189.cn/api/portal/loginUrl.action";

/// Web-dialect refresher: renews the identity cookie by visiting the
/// login URL, falling back to password login when the cookie does not
/// come back.
pub struct WebRefresher {
    http: Arc<HttpClient>,
    store: Arc<dyn SessionStore<Session>>,
    login: Arc<LoginClient>,
    creds: Credentials,
    login_url: String,
}

impl WebRefresher {
    pub fn new(
        http: Arc<HttpClient>,
        store: Arc<dyn SessionStore<Session>>,
        login: Arc<LoginClient>,
        creds: Credentials,
    ) -> Self {
        Self {
            http,
            store,
            login,
            creds,
            login_url: DEFAULT_LOGIN_URL.into(),
        }
    }

    pub fn with_login_url(mut self, url: &str) -> Self {
        self.login_url = url.to_string();
        self
    }

    async fn refresh_cookie(&self, current: Option<&Session>) -> Result<Session, AuthError> {
        let url = parse_url(&self.login_url)?;
        let response = self
            .http
            .inner()
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::Http(HttpError::Network(e)))?;
        if response.status().as_u16() >= 400 {
            return Err(AuthError::LoginFlow(format!(
                "cookie refresh failed with status {}",
                response.status()
            )));
        }
        let landing = response.url().clone();

        let user = self
            .http
            .cookie_value(&landing, "COOKIE_LOGIN_USER")
            .unwrap_or_default();
        if user.is_empty() {
            return Err(AuthError::LoginFlow(
                "cookie refresh did not yield COOKIE_LOGIN_USER".into(),
            ));
        }

        let mut session = current.cloned().unwrap_or_default();
        session.cookie_login_user = user;
        if session.sson.is_empty() {
            session.sson = self.http.cookie_value(&landing, "SSON").unwrap_or_default();
        }
        session.expires_at = None;
        Ok(session)
    }
}

#[async_trait]
impl Refresher for WebRefresher {
    async fn refresh(&self) -> Result<(), AuthError> {
        let current = load_optional(self.store.as_ref())?;

        match self.refresh_cookie(current.as_ref()).await {
            Ok(session) => {
                self.store.save(&session)?;
                return Ok(());
            }
            Err(err) => {
                warn!(error = %err, "cookie refresh failed, falling back to login");
            }
        }

        if self.creds.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let session = self.login.web_login(&self.creds).await?;
        self.store.save(&session)?;
        Ok(())
    }

    fn needs_refresh(&self) -> bool {
        match self.store.load() {
            Ok(session) => session.cookie_login_user.is_empty() || session.expired(Utc::now()),
            Err(_) => true,
        }
    }
}
