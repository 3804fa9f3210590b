use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::decode_error_envelope;
use crate::{BizCheck, HttpError, Middleware, RetryPolicy, TokenBucketLimiter};

/// A retryable request template.
///
/// The pipeline may send a request several times; the first attempt
/// consumes `body`, later attempts rebuild it through `body_factory`.
/// A non-empty body without a factory fails the retry with
/// [`HttpError::BodyNotRetryable`].
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    body: Option<Vec<u8>>,
    body_factory: Option<Arc<dyn Fn() -> Vec<u8> + Send + Sync>>,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            body_factory: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST with an `application/x-www-form-urlencoded` body; the body
    /// is replayable on retry.
    pub fn post_form(url: Url, form: String) -> Self {
        let mut req = Self::new(Method::POST, url);
        req.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        req.body = Some(form.clone().into_bytes());
        req.body_factory = Some(Arc::new(move || form.clone().into_bytes()));
        req
    }

    /// Attaches a one-shot body with no replay factory.
    pub fn body_once(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self.body_factory = None;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn body_for_attempt(&self, attempt: u32) -> Result<Option<Vec<u8>>, HttpError> {
        if attempt == 0 {
            if let Some(body) = &self.body {
                return Ok(Some(body.clone()));
            }
            if let Some(factory) = &self.body_factory {
                return Ok(Some(factory()));
            }
            return Ok(None);
        }
        if let Some(factory) = &self.body_factory {
            return Ok(Some(factory()));
        }
        match &self.body {
            Some(body) if !body.is_empty() => Err(HttpError::BodyNotRetryable),
            _ => Ok(None),
        }
    }
}

/// HTTP pipeline client: middleware chain, rate limiting, retries and
/// structured response decoding over a shared `reqwest` client.
pub struct HttpClient {
    http: reqwest::Client,
    jar: Arc<reqwest::cookie::Jar>,
    prepare: Vec<Middleware>,
    retry: RetryPolicy,
    limiter: Option<TokenBucketLimiter>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with its own cookie jar and default retry policy.
    pub fn new() -> Self {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()
            .unwrap_or_default();
        Self::with_client(http, jar)
    }

    /// Wraps an externally configured `reqwest` client and its jar.
    ///
    /// The injected client is expected to carry its own timeout; the
    /// pipeline does not impose one.
    pub fn with_client(http: reqwest::Client, jar: Arc<reqwest::cookie::Jar>) -> Self {
        Self {
            http,
            jar,
            prepare: Vec::new(),
            retry: RetryPolicy::default(),
            limiter: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limiter(mut self, limiter: TokenBucketLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Appends middleware to the prepare chain.
    pub fn use_middleware(&mut self, mw: Middleware) {
        self.prepare.push(mw);
    }

    /// Replaces the retry policy (used to wire the refresh hook late).
    pub fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// The underlying `reqwest` client, for raw transfers that bypass
    /// the pipeline (redirect probing, ranged downloads, part PUTs).
    pub fn inner(&self) -> &reqwest::Client {
        &self.http
    }

    /// Reads a cookie value for `url` from the shared jar.
    pub fn cookie_value(&self, url: &Url, name: &str) -> Option<String> {
        use reqwest::cookie::CookieStore;
        let header = self.jar.cookies(url)?;
        let raw = header.to_str().ok()?;
        raw.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    }

    /// Stores a `name=value` cookie into the shared jar.
    pub fn set_cookie(&self, url: &Url, cookie: &str) {
        self.jar.add_cookie_str(cookie, url);
    }

    /// Executes a request through middleware, rate limiting and retry,
    /// decoding the JSON response into `T`.
    pub async fn execute<T>(&self, req: &ApiRequest, extra: &[Middleware]) -> Result<T, HttpError>
    where
        T: DeserializeOwned + BizCheck,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.try_once(req, extra, attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match self.retry.next_delay(&err, attempt).await? {
                Some(delay) => {
                    attempt += 1;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                None => return Err(err),
            }
        }
    }

    async fn try_once<T>(
        &self,
        req: &ApiRequest,
        extra: &[Middleware],
        attempt: u32,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned + BizCheck,
    {
        let mut request = reqwest::Request::new(req.method.clone(), req.url.clone());
        *request.headers_mut() = req.headers.clone();
        if let Some(body) = req.body_for_attempt(attempt)? {
            *request.body_mut() = Some(reqwest::Body::from(body));
        }

        for mw in self.prepare.iter().chain(extra.iter()) {
            mw(&mut request)?;
        }

        if let Some(limiter) = &self.limiter {
            limiter.wait(&request).await;
        }

        debug!(method = %request.method(), path = request.url().path(), attempt, "executing request");
        let response = self.http.execute(request).await.map_err(HttpError::Network)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(HttpError::Network)?;

        if status >= 500 {
            return Err(HttpError::Api(crate::ApiError::from_status(status)));
        }
        if status >= 400 {
            return Err(HttpError::Api(decode_error_envelope(&bytes, status)));
        }

        // Some endpoints reply with an empty body on success; decode it
        // as an empty object so default-tolerant types still parse.
        let payload: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        let value: T = serde_json::from_slice(payload).map_err(|source| HttpError::Decode {
            status,
            source,
        })?;

        if !value.is_success() {
            return Err(HttpError::Api(crate::ApiError {
                code: value.biz_code(),
                message: value.biz_message(),
                status,
            }));
        }
        Ok(value)
    }
}
