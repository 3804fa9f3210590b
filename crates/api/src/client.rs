use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Url;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::debug;

use tianyi_auth::{AuthManager, SessionProvider};
use tianyi_crypto::{encode_form, encode_values_sorted, encrypt_ecb};
use tianyi_http::{ApiRequest, BizCheck, HttpClient, RetryPolicy};

use crate::app_signer::app_signer;
use crate::error::CloudError;
use crate::types::WebRsa;
use crate::web_signer::{web_cookies, web_upload_signer};
use crate::{DEFAULT_APP_BASE_URL, DEFAULT_UPLOAD_BASE_URL, DEFAULT_WEB_BASE_URL};

const JSON_ACCEPT: &str = "application/json;charset=UTF-8";
const UPLOAD_DECODE_FIELDS: &str = "familyId,parentFolderId,fileName,fileMd5,fileSize,sliceMd5,sliceSize,albumId,extend,lazyCheck,isLog";

/// Base URLs for the three API hosts.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub app_base_url: String,
    pub web_base_url: String,
    pub upload_base_url: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            app_base_url: DEFAULT_APP_BASE_URL.into(),
            web_base_url: DEFAULT_WEB_BASE_URL.into(),
            upload_base_url: DEFAULT_UPLOAD_BASE_URL.into(),
        }
    }
}

/// Endpoint-aware API client bound to one account.
///
/// The retry policy's refresh hook is wired to
/// `AuthManager::refresh_account` for the bound account, so any call
/// that fails with an auth error transparently refreshes and retries.
/// The bound account is fixed after [`with_account`](Self::with_account).
pub struct CloudClient {
    auth: Arc<AuthManager>,
    account_id: String,
    http: HttpClient,
    app_base: String,
    web_base: String,
    upload_base: String,
}

impl CloudClient {
    pub fn new(auth: Arc<AuthManager>) -> Self {
        Self::with_config(auth, CloudConfig::default())
    }

    pub fn with_config(auth: Arc<AuthManager>, config: CloudConfig) -> Self {
        let mut client = Self {
            auth,
            account_id: String::new(),
            http: HttpClient::new(),
            app_base: config.app_base_url,
            web_base: config.web_base_url,
            upload_base: config.upload_base_url,
        };
        client.wire_retry();
        client
    }

    /// Replaces the HTTP pipeline (custom timeouts, rate limits); the
    /// refresh hook is re-bound onto the new pipeline.
    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self.wire_retry();
        self
    }

    /// Binds the client to an account id ("" = the manager's current).
    pub fn with_account(mut self, account_id: &str) -> Self {
        self.account_id = account_id.to_string();
        self.wire_retry();
        self
    }

    /// A raw transport clone for transfers that bypass the pipeline.
    pub fn raw_http(&self) -> reqwest::Client {
        self.http.inner().clone()
    }

    fn wire_retry(&mut self) {
        let auth = Arc::clone(&self.auth);
        let account_id = self.account_id.clone();
        self.http
            .set_retry(RetryPolicy::default().with_refresh(Arc::new(move || {
                let auth = Arc::clone(&auth);
                let account_id = account_id.clone();
                Box::pin(async move {
                    debug!(account = %account_id, "refreshing credentials for retry");
                    auth.refresh_account(&account_id)
                        .await
                        .map_err(|e| Box::new(e) as _)
                })
            })));
    }

    /// Ensures a fresh session exists, then returns a live provider.
    pub(crate) async fn provider(&self) -> Result<Arc<dyn SessionProvider>, CloudError> {
        self.auth.get_account(&self.account_id).await?;
        Ok(self.auth.session_provider(&self.account_id)?)
    }

    /// App-dialect GET: form params in the query, HMAC header signature.
    pub async fn app_get<T>(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned + BizCheck,
    {
        let provider = self.provider().await?;
        let url = get_url(&join_url(&self.app_base, path), params)?;
        let req = ApiRequest::get(url).header(ACCEPT, HeaderValue::from_static(JSON_ACCEPT));
        Ok(self.http.execute(&req, &[app_signer(provider)]).await?)
    }

    /// App-dialect POST with a form body.
    pub async fn app_post<T>(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned + BizCheck,
    {
        let provider = self.provider().await?;
        let url = parse_url(&join_url(&self.app_base, path))?;
        let req = ApiRequest::post_form(url, encode_form(params))
            .header(ACCEPT, HeaderValue::from_static(JSON_ACCEPT));
        Ok(self.http.execute(&req, &[app_signer(provider)]).await?)
    }

    /// Web-dialect GET with identity cookies.
    pub async fn web_get<T>(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned + BizCheck,
    {
        let provider = self.provider().await?;
        let url = get_url(&join_url(&self.web_base, path), params)?;
        let req = ApiRequest::get(url).header(ACCEPT, HeaderValue::from_static(JSON_ACCEPT));
        Ok(self.http.execute(&req, &[web_cookies(provider)]).await?)
    }

    /// Web-dialect POST with identity cookies.
    pub async fn web_post<T>(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned + BizCheck,
    {
        let provider = self.provider().await?;
        let url = parse_url(&join_url(&self.web_base, path))?;
        let req = ApiRequest::post_form(url, encode_form(params))
            .header(ACCEPT, HeaderValue::from_static(JSON_ACCEPT));
        Ok(self.http.execute(&req, &[web_cookies(provider)]).await?)
    }

    /// App-dialect upload-host call: the form parameters travel
    /// AES-ECB-encrypted in the `params` query field, keyed by the
    /// first 16 bytes of the session secret.
    pub async fn app_upload<T>(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned + BizCheck,
    {
        let provider = self.provider().await?;
        let secret = provider.session_secret();
        if secret.len() < 16 {
            return Err(CloudError::invalid_request(
                "session secret shorter than an AES key",
            ));
        }
        let encoded = encode_values_sorted(params);
        let cipher = encrypt_ecb(&secret.as_bytes()[..16], encoded.as_bytes())?;

        let mut url = parse_url(&join_url(&self.upload_base, path))?;
        url.query_pairs_mut().append_pair("params", &hex::encode(cipher));

        let req = ApiRequest::get(url)
            .header(ACCEPT, HeaderValue::from_static(JSON_ACCEPT))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .header(
                reqwest::header::HeaderName::from_static("decodefields"),
                HeaderValue::from_static(UPLOAD_DECODE_FIELDS),
            );
        Ok(self.http.execute(&req, &[app_signer(provider)]).await?)
    }

    /// Web-dialect upload-host call through the AES+RSA+HMAC envelope.
    pub async fn web_upload<T>(
        &self,
        path: &str,
        params: BTreeMap<String, String>,
        rsa: &WebRsa,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned + BizCheck,
    {
        let provider = self.provider().await?;
        let url = parse_url(&join_url(&self.upload_base, path))?;
        let req = ApiRequest::get(url);
        Ok(self
            .http
            .execute(&req, &[web_upload_signer(provider, params, rsa.clone())])
            .await?)
    }
}

/// Joins a base URL and path textually; the Web base carries a path
/// segment of its own, so RFC-style resolution would drop it.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn parse_url(raw: &str) -> Result<Url, CloudError> {
    Url::parse(raw).map_err(|e| CloudError::invalid_request(&e.to_string()))
}

fn get_url(raw: &str, params: &BTreeMap<String, String>) -> Result<Url, CloudError> {
    let mut url = parse_url(raw)?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
}
