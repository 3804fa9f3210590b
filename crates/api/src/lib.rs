//! 189-cloud RPC client.
//!
//! Speaks the two dialects of the remote API: "App" (HMAC-SHA1 header
//! signing) and "Web" (cookie identity plus an AES+RSA+HMAC envelope
//! for upload calls). Every call flows through the shared HTTP pipeline
//! with the auth manager's refresh hook bound into the retry policy, so
//! expired credentials heal without callers noticing.

mod app_signer;
mod client;
mod error;
mod file_ops;
#[cfg(test)]
mod testutil;
mod transfer;
mod types;
mod upload;
mod user_ops;
mod web_signer;

pub use app_signer::app_signer;
pub use client::{CloudClient, CloudConfig};
pub use error::{CloudError, CloudErrorKind};
pub use file_ops::{ListOptions, SearchOptions};
pub use transfer::{AppDownloader, AppUploader, WebUploader};
pub use types::{
    CapacityInfo, CloudTime, CodeResponse, FileInfo, FileListResponse, FlexString, SearchResponse,
    SignInResult, UploadCommitResponse, UploadInitData, UploadInitResponse, UserInfo, WebRsa,
};
pub use upload::UploadSession;
pub use web_signer::{web_cookies, web_upload_signer};

/// Default API endpoints and client identification.
pub const DEFAULT_APP_BASE_URL: &str = "https://api.cloud.189.cn";
pub const DEFAULT_WEB_BASE_URL: &str = "https://cloud.189.cn/api";
pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://upload.cloud.189.cn";

pub const APP_CLIENT_TYPE: &str = "TELEPC";
pub const APP_VERSION: &str = "7.1.8.0";
pub const APP_CHANNEL_ID: &str = "web_cloud.189.cn";
pub const USER_AGENT: &str = "desktop";

/// Host the App signer treats specially when a `params` field is present.
pub const UPLOAD_HOST: &str = "upload.cloud.189.cn";

/// Fixed upload chunk size; the server requires 10 MiB slices.
pub const SLICE_SIZE: i64 = 10 * 1024 * 1024;
