use std::fmt;

/// Boxed error for extension seams (refresh callbacks, collaborators).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the HTTP pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Transport failure before an HTTP response was received. Retryable.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The response arrived but its body could not be decoded. Never retried.
    #[error("decode failed (status={status}): {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    /// The remote reported a business or HTTP-level error.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Request construction failed before any network activity.
    #[error("request setup failed: {0}")]
    Setup(String),

    /// A signer could not produce a signature (missing credentials).
    #[error("signature setup failed: {0}")]
    Signature(String),

    /// A retry needed the request body again but no factory was provided.
    #[error("request body cannot be replayed")]
    BodyNotRetryable,

    /// The auth-refresh callback itself failed; surfaced immediately.
    #[error("credential refresh failed: {0}")]
    Refresh(#[source] BoxError),
}

/// A structured error decoded from a response, carrying the upstream
/// business code and message alongside the HTTP status.
#[derive(Debug, Clone, Default)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub status: u16,
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Builds an error from a bare HTTP status.
    pub fn from_status(status: u16) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default();
        Self {
            code: format!("HTTP_{status}"),
            message: reason.to_string(),
            status,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.code, self.message),
            (false, true) => write!(f, "{}", self.code),
            (true, false) => write!(f, "{}", self.message),
            (true, true) => write!(f, "http status {}", self.status),
        }
    }
}

/// Decodes the remote error envelope from a non-2xx body.
///
/// The API is inconsistent about field names (`code`/`res_code`,
/// `msg`/`res_message`) and about whether codes are strings or numbers;
/// both spellings and both shapes are accepted. Falls back to a bare
/// status error when the body is not a recognizable envelope.
pub(crate) fn decode_error_envelope(bytes: &[u8], status: u16) -> ApiError {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return ApiError::from_status(status);
    };
    let code = flex_field(&value, "code")
        .or_else(|| flex_field(&value, "res_code"))
        .unwrap_or_default();
    let message = value
        .get("msg")
        .or_else(|| value.get("res_message"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if code.is_empty() && message.is_empty() {
        return ApiError::from_status(status);
    }
    ApiError {
        code,
        message,
        status,
    }
}

fn flex_field(value: &serde_json::Value, key: &str) -> Option<String> {
    match value.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
