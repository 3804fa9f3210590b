//! Wire types for the remote API.
//!
//! The API is old and inconsistent: identifiers arrive as strings or
//! numbers, timestamps as epoch seconds, epoch millis or formatted
//! strings, and result codes under two different field names. The types
//! here absorb those quirks so the rest of the workspace sees clean
//! domain models.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use tianyi_http::BizCheck;
use tianyi_model::{File, StorageQuota, User};

/// A JSON field that may be a string or a number; kept as a string so
/// 64-bit identifiers never pass through a float.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlexString(pub String);

impl FlexString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FlexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlexString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<'de> Deserialize<'de> for FlexString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let s = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        Ok(Self(s))
    }
}

/// A timestamp that may arrive as epoch seconds, epoch millis or
/// `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CloudTime(pub Option<DateTime<Utc>>);

impl<'de> Deserialize<'de> for CloudTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let raw = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => return Ok(Self(None)),
        };
        if raw.is_empty() || raw == "null" {
            return Ok(Self(None));
        }
        if let Ok(ts) = raw.parse::<i64>() {
            // Millis for anything past 2001-09-09 in seconds.
            let parsed = if ts > 1_000_000_000_000 {
                DateTime::from_timestamp_millis(ts)
            } else {
                DateTime::from_timestamp(ts, 0)
            };
            return Ok(Self(parsed));
        }
        let parsed = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
            .map_err(serde::de::Error::custom)?;
        Ok(Self(Some(parsed.and_utc())))
    }
}

/// Result-code envelope shared by every response; tolerates both the
/// `code`/`msg` and `res_code`/`res_message` spellings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CodeResponse {
    pub code: FlexString,
    pub msg: String,
    pub res_code: FlexString,
    pub res_message: String,
}

impl CodeResponse {
    pub fn code(&self) -> &str {
        if !self.code.is_empty() {
            self.code.as_str()
        } else {
            self.res_code.as_str()
        }
    }

    pub fn message(&self) -> &str {
        if !self.msg.is_empty() {
            &self.msg
        } else {
            &self.res_message
        }
    }

    /// Absent codes and the literal `SUCCESS`/`0` mean success.
    pub fn is_success(&self) -> bool {
        let code = self.code();
        if code.is_empty() {
            return true;
        }
        let upper = code.to_uppercase();
        upper == "SUCCESS" || upper == "0"
    }
}

impl BizCheck for CodeResponse {
    fn is_success(&self) -> bool {
        CodeResponse::is_success(self)
    }
    fn biz_code(&self) -> String {
        self.code().to_string()
    }
    fn biz_message(&self) -> String {
        self.message().to_string()
    }
}

/// Implements [`BizCheck`] by delegating to an embedded `code` envelope.
macro_rules! biz_check_via_code {
    ($($ty:ty),+ $(,)?) => {$(
        impl BizCheck for $ty {
            fn is_success(&self) -> bool {
                self.code.is_success()
            }
            fn biz_code(&self) -> String {
                self.code.code().to_string()
            }
            fn biz_message(&self) -> String {
                self.code.message().to_string()
            }
        }
    )+};
}

/// A file or folder as the wire describes it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileInfo {
    pub id: FlexString,
    pub parent_id: FlexString,
    pub name: String,
    pub size: i64,
    pub md5: String,
    pub media_type: i32,
    #[serde(rename = "fileCata")]
    pub category: i32,
    pub rev: FlexString,
    pub star_label: i32,
    pub last_op_time: CloudTime,
    pub create_date: CloudTime,
    pub is_folder: bool,
    pub file_count: i32,
    #[serde(rename = "filePath")]
    pub parent_path: String,
    #[serde(rename = "fileDownloadUrl")]
    pub download_url: String,
}

impl FileInfo {
    pub fn to_model(&self) -> File {
        File {
            id: self.id.to_string(),
            parent_id: self.parent_id.to_string(),
            name: self.name.clone(),
            size: self.size,
            md5: self.md5.clone(),
            media_type: self.media_type,
            category: self.category,
            revision: self.rev.to_string(),
            starred: self.star_label > 0,
            is_folder: self.is_folder,
            child_count: self.file_count,
            parent_path: self.parent_path.clone(),
            download_url: self.download_url.clone(),
            created_at: self.create_date.0,
            updated_at: self.last_op_time.0,
        }
    }
}

/// Files and folders inside a list response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileListResult {
    pub count: i32,
    #[serde(rename = "fileList")]
    pub files: Vec<FileInfo>,
    #[serde(rename = "folderList")]
    pub folders: Vec<FileInfo>,
}

impl FileListResult {
    /// Folders first (flagged as such), then files.
    pub fn items(&self) -> Vec<FileInfo> {
        let mut items = Vec::with_capacity(self.folders.len() + self.files.len());
        for folder in &self.folders {
            let mut folder = folder.clone();
            folder.is_folder = true;
            items.push(folder);
        }
        items.extend(self.files.iter().cloned());
        items
    }
}

/// Folder listing response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileListResponse {
    #[serde(flatten)]
    pub code: CodeResponse,
    #[serde(rename = "fileListAO")]
    pub file_list: FileListResult,
    pub record_count: i32,
}

impl FileListResponse {
    pub fn items(&self) -> Vec<FileInfo> {
        self.file_list.items()
    }
}

/// Search response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub count: i32,
    #[serde(rename = "fileList")]
    pub files: Vec<FileInfo>,
    #[serde(rename = "folderList")]
    pub folders: Vec<FileInfo>,
}

impl SearchResponse {
    pub fn items(&self) -> Vec<FileInfo> {
        let mut items = Vec::with_capacity(self.folders.len() + self.files.len());
        for folder in &self.folders {
            let mut folder = folder.clone();
            folder.is_folder = true;
            items.push(folder);
        }
        items.extend(self.files.iter().cloned());
        items
    }
}

/// File-info response (envelope plus the file fields inline).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileInfoResponse {
    #[serde(flatten)]
    pub code: CodeResponse,
    #[serde(flatten)]
    pub file: FileInfo,
}

/// Download-url response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloadUrlResponse {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub file_download_url: String,
}

/// User info, including quota numbers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub user_id: FlexString,
    pub user_name: String,
    pub nick_name: String,
    pub family_id: FlexString,
    pub session_key: String,
    pub capacity: u64,
    pub available: u64,
    pub used_size: u64,
    #[serde(rename = "backupCapacity")]
    pub backup_space: u64,
}

impl UserInfo {
    pub fn to_model(&self) -> User {
        User {
            id: self.user_id.to_string(),
            name: self.user_name.clone(),
            nick_name: self.nick_name.clone(),
            family_id: self.family_id.to_string(),
            quota: StorageQuota {
                capacity: self.capacity,
                available: self.available,
                used: self.used_size,
                backup: self.backup_space,
            },
        }
    }
}

/// Capacity response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CapacityInfo {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub capacity: u64,
    pub available: u64,
    pub used_size: u64,
    #[serde(rename = "backupCapacity")]
    pub backup_space: u64,
}

impl CapacityInfo {
    pub fn to_model(&self) -> StorageQuota {
        StorageQuota {
            capacity: self.capacity,
            available: self.available,
            used: self.used_size,
            backup: self.backup_space,
        }
    }
}

/// Daily sign-in result.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignInResult {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub result: i32,
    pub result_tip: String,
    pub prize_name: String,
}

/// Upload-init payload.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadInitData {
    pub upload_type: i32,
    pub upload_host: String,
    pub upload_file_id: FlexString,
    pub file_data_exists: i32,
}

impl UploadInitData {
    /// The server already holds identical content (instant success).
    pub fn exists(&self) -> bool {
        self.file_data_exists == 1
    }
}

/// Upload-init response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadInitResponse {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub data: UploadInitData,
}

/// One presigned part-upload target.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadUrlInfo {
    #[serde(rename = "requestURL")]
    pub request_url: String,
    pub request_header: String,
}

/// Response of `getMultiUploadUrls`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadUrlsResponse {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub upload_urls: HashMap<String, UploadUrlInfo>,
}

/// File metadata returned by the commit call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadFileMeta {
    #[serde(rename = "userFileId")]
    pub id: FlexString,
    pub file_size: i64,
    pub file_name: String,
    pub file_md_5: String,
    pub create_date: String,
}

/// Commit response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadCommitResponse {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub file: UploadFileMeta,
}

/// RSA public key material for the Web upload signer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WebRsa {
    #[serde(rename = "res_code")]
    pub res_code: FlexString,
    #[serde(rename = "res_message")]
    pub res_message: String,
    #[serde(rename = "pkId")]
    pub pk_id: String,
    #[serde(rename = "pubKey")]
    pub pub_key: String,
    pub expire: i64,
}

impl BizCheck for WebRsa {
    fn is_success(&self) -> bool {
        self.res_code.is_empty() || self.res_code.as_str() == "0"
    }
    fn biz_code(&self) -> String {
        self.res_code.to_string()
    }
    fn biz_message(&self) -> String {
        self.res_message.clone()
    }
}

/// Brief-info response used to discover the Web session key lazily.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BriefInfoResponse {
    #[serde(flatten)]
    pub code: CodeResponse,
    pub session_key: String,
}

biz_check_via_code!(
    FileListResponse,
    SearchResponse,
    FileInfoResponse,
    DownloadUrlResponse,
    UserInfo,
    CapacityInfo,
    SignInResult,
    UploadInitResponse,
    UploadUrlsResponse,
    UploadCommitResponse,
    BriefInfoResponse,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flex_string_accepts_both_shapes() {
        #[derive(Deserialize)]
        struct Probe {
            id: FlexString,
        }
        let s: Probe = serde_json::from_str(r#"{"id":"12345678901234567890"}"#).unwrap();
        assert_eq!(s.id.as_str(), "12345678901234567890");
        let n: Probe = serde_json::from_str(r#"{"id":9007199254740993}"#).unwrap();
        // Beyond 2^53: must survive without float loss.
        assert_eq!(n.id.as_str(), "9007199254740993");
        let null: Probe = serde_json::from_str(r#"{"id":null}"#).unwrap();
        assert!(null.id.is_empty());
    }

    #[test]
    fn cloud_time_accepts_all_shapes() {
        #[derive(Deserialize)]
        struct Probe {
            t: CloudTime,
        }
        let millis: Probe = serde_json::from_str(r#"{"t":1700000000000}"#).unwrap();
        assert_eq!(millis.t.0.unwrap().timestamp(), 1_700_000_000);
        let secs: Probe = serde_json::from_str(r#"{"t":1700000000}"#).unwrap();
        assert_eq!(secs.t.0.unwrap().timestamp(), 1_700_000_000);
        let formatted: Probe = serde_json::from_str(r#"{"t":"2023-11-14 22:13:20"}"#).unwrap();
        assert_eq!(formatted.t.0.unwrap().timestamp(), 1_700_000_000);
        let empty: Probe = serde_json::from_str(r#"{"t":""}"#).unwrap();
        assert!(empty.t.0.is_none());
    }

    #[test]
    fn code_response_success_rules() {
        let empty = CodeResponse::default();
        assert!(empty.is_success());

        let ok: CodeResponse = serde_json::from_str(r#"{"code":"SUCCESS"}"#).unwrap();
        assert!(ok.is_success());

        let zero: CodeResponse = serde_json::from_str(r#"{"res_code":0}"#).unwrap();
        assert!(zero.is_success());

        let failed: CodeResponse =
            serde_json::from_str(r#"{"res_code":"InvalidSessionKey","res_message":"x"}"#).unwrap();
        assert!(!failed.is_success());
        assert_eq!(failed.code(), "InvalidSessionKey");
        assert_eq!(failed.message(), "x");
    }

    #[test]
    fn file_list_decodes_and_merges() {
        let raw = r#"{
            "res_code": 0,
            "fileListAO": {
                "count": 2,
                "fileList": [{"id": 100, "name": "a.txt", "size": 7, "md5": "x"}],
                "folderList": [{"id": 200, "name": "docs"}]
            }
        }"#;
        let rsp: FileListResponse = serde_json::from_str(raw).unwrap();
        assert!(tianyi_http::BizCheck::is_success(&rsp));
        let items = rsp.items();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_folder);
        assert_eq!(items[0].name, "docs");
        assert_eq!(items[1].id.as_str(), "100");
    }

    #[test]
    fn file_info_to_model() {
        let raw = r#"{
            "id": 42, "parentId": "7", "name": "movie.mkv", "size": 123456789,
            "md5": "ABC", "starLabel": 1, "isFolder": false,
            "lastOpTime": "2023-11-14 22:13:20"
        }"#;
        let info: FileInfo = serde_json::from_str(raw).unwrap();
        let file = info.to_model();
        assert_eq!(file.id, "42");
        assert_eq!(file.parent_id, "7");
        assert!(file.starred);
        assert_eq!(file.size, 123_456_789);
        assert!(file.updated_at.is_some());
    }

    #[test]
    fn upload_init_exists_flag() {
        let rsp: UploadInitResponse = serde_json::from_str(
            r#"{"code":"SUCCESS","data":{"uploadFileId":"uf1","fileDataExists":1}}"#,
        )
        .unwrap();
        assert!(rsp.data.exists());
        assert_eq!(rsp.data.upload_file_id.as_str(), "uf1");
    }

    #[test]
    fn upload_urls_decode() {
        let rsp: UploadUrlsResponse = serde_json::from_str(
            r#"{"code":"SUCCESS","uploadUrls":{"partNumber_1":{"requestURL":"https://u/1","requestHeader":"a=b&c=d=e"}}}"#,
        )
        .unwrap();
        let info = &rsp.upload_urls["partNumber_1"];
        assert_eq!(info.request_url, "https://u/1");
        assert_eq!(info.request_header, "a=b&c=d=e");
    }

    #[test]
    fn web_rsa_success_check() {
        let ok: WebRsa =
            serde_json::from_str(r#"{"res_code":0,"pkId":"pk","pubKey":"key"}"#).unwrap();
        assert!(tianyi_http::BizCheck::is_success(&ok));
        let bad: WebRsa =
            serde_json::from_str(r#"{"res_code":500,"res_message":"boom"}"#).unwrap();
        assert!(!tianyi_http::BizCheck::is_success(&bad));
    }
}
