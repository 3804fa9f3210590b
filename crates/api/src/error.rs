use tianyi_auth::AuthError;
use tianyi_http::{ApiError, HttpError};

/// Coarse error classes handed across the API boundary. UIs branch on
/// these to pick between "offer re-login", "show message" and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    Unknown,
    InvalidToken,
    Unauthorized,
    Forbidden,
    FileNotFound,
    InvalidRequest,
    RateLimited,
    Server,
}

/// Unified business error for every API operation.
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub message: String,
    pub http_status: u16,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
            http_status: 0,
            source: None,
        }
    }

    pub fn invalid_request(message: &str) -> Self {
        Self::new(CloudErrorKind::InvalidRequest, message)
    }
}

/// Maps an upstream code string plus HTTP status onto a [`CloudErrorKind`].
///
/// Code substrings are matched first; the status is only consulted when
/// no substring hits.
pub(crate) fn map_code(code: &str, status: u16) -> CloudErrorKind {
    let upper = code.to_uppercase();
    if upper.contains("INVALIDSESSION") || upper.contains("INVALIDTOKEN") {
        return CloudErrorKind::InvalidToken;
    }
    if upper.contains("UNAUTHORIZED") || upper.contains("NOT_LOGIN") {
        return CloudErrorKind::Unauthorized;
    }
    if upper.contains("FORBIDDEN") || upper.contains("PERMISSION") {
        return CloudErrorKind::Forbidden;
    }
    if upper.contains("NOT_FOUND") || upper.contains("NOTEXIST") || upper.contains("NOT_EXIST") {
        return CloudErrorKind::FileNotFound;
    }
    if upper.contains("PARAM") || upper.contains("BAD_REQUEST") {
        return CloudErrorKind::InvalidRequest;
    }
    match status {
        401 => CloudErrorKind::Unauthorized,
        403 => CloudErrorKind::Forbidden,
        404 => CloudErrorKind::FileNotFound,
        429 => CloudErrorKind::RateLimited,
        500..=599 => CloudErrorKind::Server,
        _ => CloudErrorKind::Unknown,
    }
}

fn api_message(api: &ApiError) -> String {
    if !api.message.is_empty() {
        return api.message.clone();
    }
    if !api.code.is_empty() {
        return api.code.clone();
    }
    format!("http status {}", api.status)
}

impl From<HttpError> for CloudError {
    fn from(err: HttpError) -> Self {
        let (kind, message, status) = match &err {
            HttpError::Api(api) => (map_code(&api.code, api.status), api_message(api), api.status),
            HttpError::Decode { status, .. } => {
                (CloudErrorKind::Unknown, err.to_string(), *status)
            }
            _ => (CloudErrorKind::Unknown, err.to_string(), 0),
        };
        Self {
            kind,
            message,
            http_status: status,
            source: Some(Box::new(err)),
        }
    }
}

impl From<AuthError> for CloudError {
    fn from(err: AuthError) -> Self {
        Self {
            kind: CloudErrorKind::InvalidToken,
            message: err.to_string(),
            http_status: 0,
            source: Some(Box::new(err)),
        }
    }
}

impl From<tianyi_crypto::CryptoError> for CloudError {
    fn from(err: tianyi_crypto::CryptoError) -> Self {
        Self {
            kind: CloudErrorKind::InvalidRequest,
            message: err.to_string(),
            http_status: 0,
            source: Some(Box::new(err)),
        }
    }
}
