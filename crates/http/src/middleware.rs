use std::str::FromStr;
use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue};

use crate::HttpError;

/// A request-preparation hook, run in registration order before every
/// network attempt. A failing middleware aborts the attempt and its
/// error propagates without consuming retry budget.
pub type Middleware = Arc<dyn Fn(&mut reqwest::Request) -> Result<(), HttpError> + Send + Sync>;

/// Middleware that sets a fixed header.
pub fn with_header(name: &str, value: &str) -> Middleware {
    let name = name.to_string();
    let value = value.to_string();
    Arc::new(move |req| {
        let name = HeaderName::from_str(&name).map_err(|e| HttpError::Setup(e.to_string()))?;
        let value = HeaderValue::from_str(&value).map_err(|e| HttpError::Setup(e.to_string()))?;
        req.headers_mut().insert(name, value);
        Ok(())
    })
}

/// Middleware that sets the `User-Agent` header.
pub fn with_user_agent(ua: &str) -> Middleware {
    with_header("user-agent", ua)
}

/// Middleware that sets the `Content-Type` header.
pub fn with_content_type(ct: &str) -> Middleware {
    with_header("content-type", ct)
}
