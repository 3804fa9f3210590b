use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::warn;

use tianyi_crypto::encode_form;
use tianyi_http::{ApiRequest, HttpClient};
use tianyi_store::SessionStore;

use crate::login::{ExchangePayload, parse_url};
use crate::{AuthError, Credentials, LoginClient, Refresher, Session, load_optional};

const DEFAULT_REFRESH_URL: &str = "https://api.cloud.189.cn/getSessionForPC.action";
const DEFAULT_APP_ID: &str = "9317140619";

/// App-dialect refresher: exchanges the stored access token for a fresh
/// session, falling back to password login when the token path fails.
pub struct AppRefresher {
    http: Arc<HttpClient>,
    store: Arc<dyn SessionStore<Session>>,
    login: Arc<LoginClient>,
    creds: Credentials,
    refresh_url: String,
    app_id: String,
}

impl AppRefresher {
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
            refresh_url: DEFAULT_REFRESH_URL.into(),
            app_id: DEFAULT_APP_ID.into(),
        }
    }

    pub fn with_refresh_url(mut self, url: &str) -> Self {
        self.refresh_url = url.to_string();
        self
    }

    pub fn with_app_id(mut self, app_id: &str) -> Self {
        self.app_id = app_id.to_string();
        self
    }

    async fn refresh_by_token(&self, access_token: &str) -> Result<Session, AuthError> {
        let mut form = BTreeMap::new();
        form.insert("appId".to_string(), self.app_id.clone());
        form.insert("accessToken".to_string(), access_token.to_string());

        let url = parse_url(&self.refresh_url)?;
        let req = ApiRequest::post_form(url, encode_form(&form)).header(
            ACCEPT,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        let payload: ExchangePayload = self.http.execute(&req, &[]).await?;
        let mut session = payload.session.clone();
        session.expires_at = payload.expires_at(Utc::now());
        Ok(session)
    }
}

#[async_trait]
impl Refresher for AppRefresher {
    async fn refresh(&self) -> Result<(), AuthError> {
        let current = load_optional(self.store.as_ref())?;

        if let Some(current) = current.filter(|s| !s.access_token.is_empty()) {
            match self.refresh_by_token(&current.access_token).await {
                Ok(mut refreshed) => {
                    // The exchange cannot return cookie identities; carry
                    // them (and a missing token) over from the old session.
                    refreshed.sson = current.sson;
                    refreshed.cookie_login_user = current.cookie_login_user;
                    if refreshed.access_token.is_empty() {
                        refreshed.access_token = current.access_token;
                    }
                    self.store.save(&refreshed)?;
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "access-token refresh failed, falling back to login");
                }
            }
        }

        if self.creds.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let session = self.login.app_login(&self.creds).await?;
        self.store.save(&session)?;
        Ok(())
    }

    fn needs_refresh(&self) -> bool {
        match self.store.load() {
            Ok(session) => !session.can_sign_app() || session.expired(Utc::now()),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoginEndpoints;
    use crate::testutil::{cookie_response, json_response, redirect_response, start_router, test_rsa_key};
    use std::time::Duration;
    use tianyi_http::RetryPolicy;
    use tianyi_store::MemorySessionStore;

    fn fast_client() -> Arc<HttpClient> {
        Arc::new(HttpClient::new().with_retry(RetryPolicy::new(
            1,
            Duration::from_millis(1),
            Duration::from_millis(2),
        )))
    }

    #[tokio::test]
    async fn token_refresh_updates_session_and_expiry() {
        let (base, requests) = start_router(|path, _body| match path {
            "/getSessionForPC.action" => json_response(
                200,
                r#"{"sessionKey":"refreshed-key","sessionSecret":"refreshed-secret","keepAlive":30}"#,
            ),
            _ => json_response(404, "{}"),
        })
        .await;

        let http = fast_client();
        let store = Arc::new(MemorySessionStore::new());
        store
            .save(&Session {
                access_token: "token-refresh".into(),
                sson: "old-sson".into(),
                cookie_login_user: "old-cookie".into(),
                ..Default::default()
            })
            .unwrap();
        let login = Arc::new(LoginClient::new(Arc::clone(&http)));
        let refresher = AppRefresher::new(http, Arc::clone(&store) as _, login, Credentials::default())
            .with_refresh_url(&format!("{base}/getSessionForPC.action"));

        refresher.refresh().await.unwrap();

        let session = store.load().unwrap();
        assert_eq!(session.session_key, "refreshed-key");
        assert_eq!(session.session_secret, "refreshed-secret");
        // Fields the exchange cannot return are preserved.
        assert_eq!(session.access_token, "token-refresh");
        assert_eq!(session.sson, "old-sson");
        assert_eq!(session.cookie_login_user, "old-cookie");
        assert!(session.expires_at.is_some());

        let body = requests.lock().unwrap()[0].1.clone();
        assert!(body.contains("accessToken=token-refresh"));
    }

    #[tokio::test]
    async fn falls_back_to_login_when_token_path_fails() {
        let (pub_key, _priv) = test_rsa_key();
        let (base, _requests) = start_router(move |path, body| match path {
            "/getSessionForPC.action" if body.contains("accessToken=") => json_response(500, "{}"),
            "/getSessionForPC.action" => json_response(
                200,
                r#"{"sessionKey":"login-key","sessionSecret":"login-secret","accessToken":"token-login"}"#,
            ),
            "/unifyLoginForPC.action" => redirect_response("{{BASE}}/page?reqId=r&lt=l&appId=a"),
            "/page" => json_response(200, ""),
            "/api/logbox/oauth2/appConf.do" => {
                json_response(200, r#"{"data":{"appKey":"a","clientType":1,"paramId":"p"}}"#)
            }
            "/api/logbox/config/encryptConf.do" => json_response(
                200,
                &format!(r#"{{"result":0,"data":{{"pre":"pre-","pubKey":"{pub_key}"}}}}"#),
            ),
            "/api/logbox/oauth2/loginSubmit.do" => cookie_response(
                200,
                "SSON=sson-login",
                r#"{"result":0,"toUrl":"{{BASE}}/redirect"}"#,
            ),
            "/redirect" => json_response(200, ""),
            _ => json_response(404, "{}"),
        })
        .await;

        let http = fast_client();
        let store = Arc::new(MemorySessionStore::new());
        store
            .save(&Session {
                access_token: "stale-token".into(),
                ..Default::default()
            })
            .unwrap();
        let login = Arc::new(
            LoginClient::new(Arc::clone(&http)).with_endpoints(LoginEndpoints {
                app_login_url: format!("{base}/unifyLoginForPC.action"),
                web_login_url: format!("{base}/api/portal/loginUrl.action"),
                app_conf_url: format!("{base}/api/logbox/oauth2/appConf.do"),
                encrypt_conf_url: format!("{base}/api/logbox/config/encryptConf.do"),
                login_submit_url: format!("{base}/api/logbox/oauth2/loginSubmit.do"),
                session_url: format!("{base}/getSessionForPC.action"),
            }),
        );
        let refresher = AppRefresher::new(
            http,
            Arc::clone(&store) as _,
            login,
            Credentials::new("user-app", "pass-app"),
        )
        .with_refresh_url(&format!("{base}/getSessionForPC.action"));

        refresher.refresh().await.unwrap();

        let session = store.load().unwrap();
        assert_eq!(session.session_key, "login-key");
        assert_eq!(session.access_token, "token-login");
        assert_eq!(session.sson, "sson-login");
    }

    #[tokio::test]
    async fn no_token_and_no_creds_is_missing_credentials() {
        let http = fast_client();
        let store = Arc::new(MemorySessionStore::<Session>::new());
        let login = Arc::new(LoginClient::new(Arc::clone(&http)));
        let refresher =
            AppRefresher::new(http, Arc::clone(&store) as _, login, Credentials::default());

        assert!(matches!(
            refresher.refresh().await,
            Err(AuthError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn needs_refresh_logic() {
        let http = fast_client();
        let store = Arc::new(MemorySessionStore::new());
        let login = Arc::new(LoginClient::new(Arc::clone(&http)));
        let refresher =
            AppRefresher::new(http, Arc::clone(&store) as _, login, Credentials::default());

        // Empty store.
        assert!(refresher.needs_refresh());

        // Missing secret.
        store
            .save(&Session {
                session_key: "k".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(refresher.needs_refresh());

        // Complete, unexpired session.
        store
            .save(&Session {
                session_key: "k".into(),
                session_secret: "s".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(!refresher.needs_refresh());

        // Expired session.
        store
            .save(&Session {
                session_key: "k".into(),
                session_secret: "s".into(),
                expires_at: Some(Utc::now() - chrono::TimeDelta::seconds(5)),
                ..Default::default()
            })
            .unwrap();
        assert!(refresher.needs_refresh());
    }
}
