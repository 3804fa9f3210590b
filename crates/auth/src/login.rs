use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderValue, REFERER};
use serde::Deserialize;
use tracing::debug;

use tianyi_crypto::{encode_form, rsa_encrypt};
use tianyi_http::{ApiRequest, BizCheck, HttpClient, HttpError};

use crate::{AuthError, Session};

/// Username/password pair. Consumed by login only, never persisted.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() || self.password.is_empty()
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        Ok(())
    }
}

/// Login-related endpoints, replaceable for tests.
#[derive(Debug, Clone)]
pub struct LoginEndpoints {
    pub app_login_url: String,
    pub web_login_url: String,
    pub app_conf_url: String,
    pub encrypt_conf_url: String,
    pub login_submit_url: String,
    pub session_url: String,
}

impl Default for LoginEndpoints {
    fn default() -> Self {
        Self {
            app_login_url: "https://cloud.189.cn/unifyLoginForPC.action".into(),
            web_login_url: "https://cloud.189.cn/api/portal/loginUrl.action".into(),
            app_conf_url: "https://open.e.189.cn/api/logbox/oauth2/appConf.do".into(),
            encrypt_conf_url: "https://open.e.189.cn/api/logbox/config/encryptConf.do".into(),
            login_submit_url: "https://open.e.189.cn/api/logbox/oauth2/loginSubmit.do".into(),
            session_url: "https://api.cloud.189.cn/getSessionForPC.action".into(),
        }
    }
}

/// Drives the full username/password login pipeline for both dialects.
pub struct LoginClient {
    http: Arc<HttpClient>,
    endpoints: LoginEndpoints,
}

/// Pre-login state scraped from the entry redirect.
struct LoginContext {
    referer: String,
    app_key: String,
    req_id: String,
    lt: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AppConf {
    data: AppConfData,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct AppConfData {
    account_type: String,
    app_key: String,
    client_type: i64,
    mail_suffix: String,
    is_oauth2: bool,
    param_id: String,
}

impl BizCheck for AppConf {}

#[derive(Deserialize, Default)]
#[serde(default)]
struct EncryptConf {
    data: EncryptConfData,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct EncryptConfData {
    pre: String,
    pub_key: String,
}

impl BizCheck for EncryptConf {}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct LoginResult {
    result: i64,
    msg: String,
    to_url: String,
}

impl BizCheck for LoginResult {}

/// Session-exchange payload: a session plus its advertised lifetime.
#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct ExchangePayload {
    #[serde(flatten)]
    pub session: Session,
    pub keep_alive: i64,
    pub expires_in: i64,
}

impl BizCheck for ExchangePayload {}

impl ExchangePayload {
    /// Resolves the advertised lifetime into an absolute expiry.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.keep_alive > 0 {
            Some(now + TimeDelta::seconds(self.keep_alive))
        } else if self.expires_in > 0 {
            Some(now + TimeDelta::seconds(self.expires_in))
        } else {
            None
        }
    }
}

impl LoginClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self {
            http,
            endpoints: LoginEndpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: LoginEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// App-dialect login: password pipeline, then session exchange.
    pub async fn app_login(&self, creds: &Credentials) -> Result<Session, AuthError> {
        creds.validate()?;
        let result = self
            .password_login(&self.endpoints.app_login_url, Some(self.app_entry_params()), creds)
            .await?;
        let mut session = self.exchange_session(&result.to_url).await?;
        session.sson = result.sson;
        debug!("app login complete");
        Ok(session)
    }

    /// Web-dialect login: password pipeline, then cookie harvest from
    /// the landing redirect. Fails when the identity cookie is absent.
    pub async fn web_login(&self, creds: &Credentials) -> Result<Session, AuthError> {
        creds.validate()?;
        let result = self
            .password_login(&self.endpoints.web_login_url, None, creds)
            .await?;
        if result.to_url.is_empty() {
            return Err(AuthError::LoginFlow("login response carried no redirect".into()));
        }

        let response = self
            .http
            .inner()
            .get(&result.to_url)
            .send()
            .await
            .map_err(|e| AuthError::Http(HttpError::Network(e)))?;
        if response.status().as_u16() >= 400 {
            return Err(AuthError::LoginFlow(format!(
                "landing redirect failed with status {}",
                response.status()
            )));
        }
        let landing = response.url().clone();

        let cookie_login_user = self
            .http
            .cookie_value(&landing, "COOKIE_LOGIN_USER")
            .unwrap_or_default();
        if cookie_login_user.is_empty() {
            return Err(AuthError::LoginFlow(
                "login did not yield COOKIE_LOGIN_USER".into(),
            ));
        }
        let sson = if result.sson.is_empty() {
            self.http.cookie_value(&landing, "SSON").unwrap_or_default()
        } else {
            result.sson
        };
        debug!("web login complete");
        Ok(Session {
            sson,
            cookie_login_user,
            ..Default::default()
        })
    }

    /// Web login for the identity cookie, then App login for the signing
    /// pair, merged with the Web cookie values winning.
    pub async fn hybrid_login(&self, creds: &Credentials) -> Result<Session, AuthError> {
        let web = self.web_login(creds).await?;
        let mut session = self.app_login(creds).await?;
        if !web.cookie_login_user.is_empty() {
            session.cookie_login_user = web.cookie_login_user;
        }
        if !web.sson.is_empty() {
            session.sson = web.sson;
        }
        Ok(session)
    }

    /// Exchanges the post-login redirect for an App session.
    pub(crate) async fn exchange_session(&self, redirect: &str) -> Result<Session, AuthError> {
        let mut form = BTreeMap::new();
        form.insert("redirectURL".to_string(), redirect.to_string());
        form.insert("clientType".to_string(), "TELEPC".to_string());
        form.insert("version".to_string(), "7.1.8.0".to_string());
        form.insert("channelId".to_string(), "web_cloud.189.cn".to_string());
        form.insert("rand".to_string(), Utc::now().timestamp_millis().to_string());

        let url = parse_url(&self.endpoints.session_url)?;
        let req = ApiRequest::post_form(url, encode_form(&form)).header(
            ACCEPT,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        let payload: ExchangePayload = self.http.execute(&req, &[]).await?;
        Ok(payload.session)
    }

    async fn password_login(
        &self,
        login_url: &str,
        entry_params: Option<BTreeMap<String, String>>,
        creds: &Credentials,
    ) -> Result<LoginResultWithSson, AuthError> {
        let ctx = self.prepare_login(login_url, entry_params.as_ref()).await?;
        let app_conf = self.fetch_app_conf(&ctx).await?;
        let encrypt_conf = self.fetch_encrypt_conf(&ctx).await?;
        let result = self
            .submit_password(&ctx, &app_conf, &encrypt_conf, creds)
            .await?;
        if result.result != 0 {
            return Err(AuthError::LoginFailed(result.msg));
        }

        let submit_url = parse_url(&self.endpoints.login_submit_url)?;
        let sson = self
            .http
            .cookie_value(&submit_url, "SSON")
            .unwrap_or_default();
        Ok(LoginResultWithSson {
            to_url: result.to_url,
            sson,
        })
    }

    /// Hits the entry login URL and scrapes `reqId`, `lt` and the app
    /// key from the redirect target.
    async fn prepare_login(
        &self,
        login_url: &str,
        entry_params: Option<&BTreeMap<String, String>>,
    ) -> Result<LoginContext, AuthError> {
        let mut url = parse_url(login_url)?;
        if let Some(params) = entry_params {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        let response = self
            .http
            .inner()
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::Http(HttpError::Network(e)))?;
        let referer = response.url().clone();

        let query: BTreeMap<String, String> = referer.query_pairs().into_owned().collect();
        let mut app_key = query.get("appId").cloned().unwrap_or_default();
        if app_key.is_empty() {
            if let Some(params) = entry_params {
                app_key = params.get("appId").cloned().unwrap_or_default();
            }
        }
        Ok(LoginContext {
            referer: referer.to_string(),
            app_key,
            req_id: query.get("reqId").cloned().unwrap_or_default(),
            lt: query.get("lt").cloned().unwrap_or_default(),
        })
    }

    async fn fetch_app_conf(&self, ctx: &LoginContext) -> Result<AppConf, AuthError> {
        let mut form = BTreeMap::new();
        form.insert("version".to_string(), "2.0".to_string());
        form.insert("appKey".to_string(), ctx.app_key.clone());

        let url = parse_url(&self.endpoints.app_conf_url)?;
        let mut req = ApiRequest::post_form(url, encode_form(&form)).header(
            reqwest::header::ORIGIN,
            HeaderValue::from_static("https://open.e.189.cn"),
        );
        req = apply_login_headers(req, ctx)?;
        Ok(self.http.execute(&req, &[]).await?)
    }

    async fn fetch_encrypt_conf(&self, ctx: &LoginContext) -> Result<EncryptConf, AuthError> {
        let mut form = BTreeMap::new();
        form.insert("appId".to_string(), "cloud".to_string());

        let url = parse_url(&self.endpoints.encrypt_conf_url)?;
        let mut req = ApiRequest::post_form(url, encode_form(&form));
        req = req.header(
            REFERER,
            HeaderValue::from_str(&ctx.referer).map_err(|e| HttpError::Setup(e.to_string()))?,
        );
        Ok(self.http.execute(&req, &[]).await?)
    }

    async fn submit_password(
        &self,
        ctx: &LoginContext,
        app_conf: &AppConf,
        encrypt_conf: &EncryptConf,
        creds: &Credentials,
    ) -> Result<LoginResult, AuthError> {
        let enc_user = rsa_encrypt(&encrypt_conf.data.pub_key, creds.username.as_bytes())?;
        let enc_pwd = rsa_encrypt(&encrypt_conf.data.pub_key, creds.password.as_bytes())?;
        let pre = &encrypt_conf.data.pre;

        let mut form = BTreeMap::new();
        form.insert("version".to_string(), "v2.0".to_string());
        form.insert("appKey".to_string(), app_conf.data.app_key.clone());
        form.insert("accountType".to_string(), app_conf.data.account_type.clone());
        form.insert(
            "userName".to_string(),
            format!("{pre}{}", hex::encode(&enc_user)),
        );
        form.insert("epd".to_string(), format!("{pre}{}", hex::encode(&enc_pwd)));
        form.insert("captchaType".to_string(), String::new());
        form.insert("validateCode".to_string(), String::new());
        form.insert("smsValidateCode".to_string(), String::new());
        form.insert("captchaToken".to_string(), String::new());
        form.insert("returnUrl".to_string(), ctx.referer.clone());
        form.insert("mailSuffix".to_string(), app_conf.data.mail_suffix.clone());
        form.insert("dynamicCheck".to_string(), "FALSE".to_string());
        form.insert(
            "clientType".to_string(),
            app_conf.data.client_type.to_string(),
        );
        form.insert("cb_SaveName".to_string(), "0".to_string());
        form.insert("isOauth2".to_string(), app_conf.data.is_oauth2.to_string());
        form.insert("state".to_string(), String::new());
        form.insert("paramId".to_string(), app_conf.data.param_id.clone());

        let url = parse_url(&self.endpoints.login_submit_url)?;
        let mut req = ApiRequest::post_form(url, encode_form(&form));
        req = apply_login_headers(req, ctx)?;
        Ok(self.http.execute(&req, &[]).await?)
    }

    fn app_entry_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("appId".to_string(), "9317140619".to_string());
        params.insert("clientType".to_string(), "10020".to_string());
        params.insert(
            "timeStamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        );
        params.insert(
            "returnURL".to_string(),
            "https://m.cloud.189.cn/zhuanti/2020/loginErrorPc/index.html".to_string(),
        );
        params
    }
}

struct LoginResultWithSson {
    to_url: String,
    sson: String,
}

fn apply_login_headers(mut req: ApiRequest, ctx: &LoginContext) -> Result<ApiRequest, AuthError> {
    req = req.header(
        REFERER,
        HeaderValue::from_str(&ctx.referer).map_err(|e| HttpError::Setup(e.to_string()))?,
    );
    if !ctx.req_id.is_empty() {
        req = req.header(
            reqwest::header::HeaderName::from_static("reqid"),
            HeaderValue::from_str(&ctx.req_id).map_err(|e| HttpError::Setup(e.to_string()))?,
        );
    }
    if !ctx.lt.is_empty() {
        req = req.header(
            reqwest::header::HeaderName::from_static("lt"),
            HeaderValue::from_str(&ctx.lt).map_err(|e| HttpError::Setup(e.to_string()))?,
        );
    }
    Ok(req)
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, AuthError> {
    Url::parse(raw).map_err(|e| AuthError::Http(HttpError::Setup(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        cookie_response, json_response, redirect_response, start_router, test_rsa_key,
    };

    fn endpoints(base: &str) -> LoginEndpoints {
        LoginEndpoints {
            app_login_url: format!("{base}/unifyLoginForPC.action"),
            web_login_url: format!("{base}/api/portal/loginUrl.action"),
            app_conf_url: format!("{base}/api/logbox/oauth2/appConf.do"),
            encrypt_conf_url: format!("{base}/api/logbox/config/encryptConf.do"),
            login_submit_url: format!("{base}/api/logbox/oauth2/loginSubmit.do"),
            session_url: format!("{base}/getSessionForPC.action"),
        }
    }

    #[tokio::test]
    async fn app_login_produces_full_session() {
        let (pub_key, _priv_key) = test_rsa_key();
        let (base, requests) = start_router(move |path, _body| match path {
            "/unifyLoginForPC.action" => {
                redirect_response("{{BASE}}/page?reqId=req-1&lt=lt-1&appId=appid-1")
            }
            "/page" => json_response(200, ""),
            "/api/logbox/oauth2/appConf.do" => json_response(
                200,
                r#"{"data":{"accountType":"01","appKey":"9317140619","clientType":10020,"mailSuffix":"","isOauth2":true,"paramId":"pid"}}"#,
            ),
            "/api/logbox/config/encryptConf.do" => json_response(
                200,
                &format!(r#"{{"result":0,"data":{{"pre":"pre-","pubKey":"{pub_key}"}}}}"#),
            ),
            "/api/logbox/oauth2/loginSubmit.do" => cookie_response(
                200,
                "SSON=sson-cookie",
                r#"{"result":0,"toUrl":"{{BASE}}/redirect"}"#,
            ),
            "/getSessionForPC.action" => json_response(
                200,
                r#"{"sessionKey":"new-key","sessionSecret":"new-secret","accessToken":"token-1","keepAlive":60}"#,
            ),
            _ => json_response(404, "{}"),
        })
        .await;

        let login = LoginClient::new(Arc::new(HttpClient::new())).with_endpoints(endpoints(&base));
        let session = login
            .app_login(&Credentials::new("user-app", "pass-app"))
            .await
            .unwrap();

        assert_eq!(session.session_key, "new-key");
        assert_eq!(session.session_secret, "new-secret");
        assert_eq!(session.access_token, "token-1");
        assert_eq!(session.sson, "sson-cookie");
        // Fresh logins carry no expiry; only refreshes do.
        assert!(session.expires_at.is_none());

        // The submitted password form must carry the RSA-prefixed fields.
        let submitted = requests
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| path == "/api/logbox/oauth2/loginSubmit.do")
            .map(|(_, body)| body.clone())
            .unwrap();
        assert!(submitted.contains("userName=pre-"));
        assert!(submitted.contains("epd=pre-"));
        assert!(submitted.contains("dynamicCheck=FALSE"));
        assert!(submitted.contains("cb_SaveName=0"));
    }

    #[tokio::test]
    async fn web_login_harvests_cookies() {
        let (pub_key, _priv_key) = test_rsa_key();
        let (base, _requests) = start_router(move |path, _body| match path {
            "/api/portal/loginUrl.action" => {
                redirect_response("{{BASE}}/page?reqId=web-req&lt=web-lt&appId=web-app")
            }
            "/page" => json_response(200, ""),
            "/api/logbox/oauth2/appConf.do" => json_response(
                200,
                r#"{"data":{"accountType":"01","appKey":"web-app","clientType":10020,"mailSuffix":"","isOauth2":true,"paramId":"pid"}}"#,
            ),
            "/api/logbox/config/encryptConf.do" => json_response(
                200,
                &format!(r#"{{"result":0,"data":{{"pre":"pre-","pubKey":"{pub_key}"}}}}"#),
            ),
            "/api/logbox/oauth2/loginSubmit.do" => cookie_response(
                200,
                "SSON=web-sson",
                r#"{"result":0,"toUrl":"{{BASE}}/web_redirect"}"#,
            ),
            "/web_redirect" => cookie_response(200, "COOKIE_LOGIN_USER=cookie-web", ""),
            _ => json_response(404, "{}"),
        })
        .await;

        let login = LoginClient::new(Arc::new(HttpClient::new())).with_endpoints(endpoints(&base));
        let session = login
            .web_login(&Credentials::new("user-web", "pass-web"))
            .await
            .unwrap();

        assert_eq!(session.cookie_login_user, "cookie-web");
        assert_eq!(session.sson, "web-sson");
        assert!(session.session_key.is_empty());
    }

    #[tokio::test]
    async fn login_rejection_carries_server_message() {
        let (pub_key, _priv_key) = test_rsa_key();
        let (base, _requests) = start_router(move |path, _body| match path {
            "/unifyLoginForPC.action" => redirect_response("{{BASE}}/page?reqId=r&lt=l&appId=a"),
            "/page" => json_response(200, ""),
            "/api/logbox/oauth2/appConf.do" => {
                json_response(200, r#"{"data":{"appKey":"a","clientType":1,"paramId":"p"}}"#)
            }
            "/api/logbox/config/encryptConf.do" => json_response(
                200,
                &format!(r#"{{"result":0,"data":{{"pre":"pre-","pubKey":"{pub_key}"}}}}"#),
            ),
            "/api/logbox/oauth2/loginSubmit.do" => {
                json_response(200, r#"{"result":-63,"msg":"wrong password"}"#)
            }
            _ => json_response(404, "{}"),
        })
        .await;

        let login = LoginClient::new(Arc::new(HttpClient::new())).with_endpoints(endpoints(&base));
        let err = login
            .app_login(&Credentials::new("user", "bad-pass"))
            .await
            .unwrap_err();
        match err {
            AuthError::LoginFailed(msg) => assert_eq!(msg, "wrong password"),
            other => panic!("expected LoginFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_credentials_rejected_without_network() {
        let login = LoginClient::new(Arc::new(HttpClient::new()));
        assert!(matches!(
            login.app_login(&Credentials::default()).await,
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            login.web_login(&Credentials::new("user", "")).await,
            Err(AuthError::MissingCredentials)
        ));
    }
}
