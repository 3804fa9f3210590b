//! Chunked upload flows for both API dialects.
//!
//! Uploads are three-step: `initMultiUpload` opens a server-side
//! session, `getMultiUploadUrls` presigns each 10 MiB part for a PUT,
//! and `commitMultiUploadFile` seals the file. With lazy-check enabled
//! the file MD5 is only declared at commit time, which is what makes
//! crash-resume possible: part checksums are verified server-side as
//! they arrive, and a resumed run does not need the MD5 of bytes it
//! never saw.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use tracing::debug;

use crate::client::CloudClient;
use crate::error::{CloudError, CloudErrorKind};
use crate::types::{
    BriefInfoResponse, FileInfo, UploadCommitResponse, UploadInitData, UploadInitResponse,
    UploadUrlInfo, UploadUrlsResponse, WebRsa,
};
use crate::{SLICE_SIZE, types::FlexString};

const INIT_EXTEND: &str = r#"{"opScene":"1","relativepath":"","rootfolderid":""}"#;

/// An in-flight chunked upload.
///
/// Owns the running whole-file MD5 hasher (hence not `Clone`); durable
/// resume state carries only the part hashes and counters, so a resumed
/// session hashes just the bytes it transmits itself.
pub struct UploadSession {
    pub init: UploadInitData,
    pub parent_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub slice_size: i64,
    pub lazy_check: bool,
    pub overwrite: bool,
    pub file_md5: String,
    pub slice_md5: String,
    hasher: Md5,
    hashed_all_parts: bool,
    part_hashes: Vec<String>,
}

impl UploadSession {
    fn new(init: UploadInitData, parent_id: &str, file_name: &str, file_size: i64) -> Self {
        let lazy_check = !init.exists();
        Self {
            init,
            parent_id: parent_id.to_string(),
            file_name: file_name.to_string(),
            file_size,
            slice_size: SLICE_SIZE,
            lazy_check,
            overwrite: false,
            file_md5: String::new(),
            slice_md5: String::new(),
            hasher: Md5::new(),
            hashed_all_parts: true,
            part_hashes: Vec::new(),
        }
    }

    /// Rebuilds a session from durable resume state. The whole-file
    /// hasher cannot be recovered, so the commit relies on slice
    /// hashes only.
    pub fn resume(
        parent_id: &str,
        file_name: &str,
        file_size: i64,
        upload_file_id: &str,
        part_hashes: Vec<String>,
    ) -> Self {
        let init = UploadInitData {
            upload_file_id: FlexString(upload_file_id.to_string()),
            ..Default::default()
        };
        Self {
            hashed_all_parts: false,
            part_hashes,
            ..Self::new(init, parent_id, file_name, file_size)
        }
    }

    pub fn upload_file_id(&self) -> &str {
        self.init.upload_file_id.as_str()
    }

    /// Instant success: the server already holds identical content.
    pub fn exists(&self) -> bool {
        self.init.exists()
    }

    /// Uppercase-hex MD5s of the parts uploaded so far, in order.
    pub fn part_hashes(&self) -> Vec<String> {
        self.part_hashes.clone()
    }

    fn record_part(&mut self, part_num: usize, digest: &[u8], data: &[u8]) {
        if !data.is_empty() {
            self.hasher.update(data);
        }
        if part_num > 0 {
            while self.part_hashes.len() < part_num {
                self.part_hashes.push(String::new());
            }
            self.part_hashes[part_num - 1] = hex::encode_upper(digest);
        }
    }

    /// Finalizes `file_md5`/`slice_md5` for the commit call.
    ///
    /// Single part: the slice MD5 is the file MD5. Multiple parts: MD5
    /// of the newline-joined uppercase part MD5s.
    fn compute_hashes(&mut self) {
        if self.file_md5.is_empty() && self.hashed_all_parts {
            self.file_md5 = hex::encode(self.hasher.clone().finalize());
        }
        if self.slice_md5.is_empty() && !self.part_hashes.is_empty() {
            if self.part_hashes.len() == 1 {
                self.slice_md5 = if self.file_md5.is_empty() {
                    self.part_hashes[0].to_lowercase()
                } else {
                    self.file_md5.clone()
                };
                return;
            }
            let joined = self.part_hashes.join("\n");
            self.slice_md5 = hex::encode(Md5::digest(joined.as_bytes()));
        }
    }
}

impl CloudClient {
    /// Opens a chunked upload session (App dialect).
    pub async fn init_upload(
        &self,
        parent_id: &str,
        file_name: &str,
        file_size: i64,
    ) -> Result<UploadSession, CloudError> {
        if file_name.is_empty() {
            return Err(CloudError::invalid_request("file name must not be empty"));
        }
        let params = init_params(parent_id, file_name, file_size);
        let rsp: UploadInitResponse = self.app_upload("/person/initMultiUpload", &params).await?;
        if rsp.data.upload_file_id.is_empty() {
            return Err(CloudError::new(
                CloudErrorKind::Unknown,
                "upload init returned no uploadFileId",
            ));
        }
        debug!(upload_file_id = %rsp.data.upload_file_id, exists = rsp.data.exists(), "upload session opened");
        Ok(UploadSession::new(rsp.data, parent_id, file_name, file_size))
    }

    /// Uploads one part (App dialect): presign, PUT, record the hash.
    pub async fn upload_part(
        &self,
        session: &mut UploadSession,
        part_num: i64,
        data: &[u8],
    ) -> Result<(), CloudError> {
        validate_part(session, part_num)?;
        let digest = Md5::digest(data);
        let params = part_params(session.upload_file_id(), part_num, &digest);
        let rsp: UploadUrlsResponse = self
            .app_upload("/person/getMultiUploadUrls", &params)
            .await?;
        let info = part_url(&rsp, part_num)?;
        self.put_part(&info, data).await?;
        session.record_part(part_num as usize, &digest, data);
        Ok(())
    }

    /// Seals the upload (App dialect) and returns the file metadata.
    pub async fn commit_upload(
        &self,
        session: &mut UploadSession,
    ) -> Result<FileInfo, CloudError> {
        let params = commit_params(session);
        let rsp: UploadCommitResponse = self
            .app_upload("/person/commitMultiUploadFile", &params)
            .await?;
        Ok(commit_file_info(session, rsp))
    }

    /// One-shot small-file upload: init, single part, commit.
    pub async fn simple_upload(
        &self,
        parent_id: &str,
        file_name: &str,
        data: &[u8],
    ) -> Result<FileInfo, CloudError> {
        let mut session = self
            .init_upload(parent_id, file_name, data.len() as i64)
            .await?;
        if !session.exists() {
            self.upload_part(&mut session, 1, data).await?;
        } else {
            session.record_part(1, &Md5::digest(data), data);
        }
        self.commit_upload(&mut session).await
    }

    // -----------------------------------------------------------------
    // Web dialect
    // -----------------------------------------------------------------

    /// Fetches the RSA key material for the Web upload signer.
    pub async fn fetch_web_rsa(&self) -> Result<WebRsa, CloudError> {
        self.web_get("/security/generateRsaKey.action", &BTreeMap::new())
            .await
    }

    /// Resolves the Web session key, discovering and persisting it via
    /// the brief-info endpoint when the store has none yet.
    pub async fn web_session_key(&self) -> Result<String, CloudError> {
        let provider = self.provider().await?;
        let key = provider.session_key();
        if !key.is_empty() {
            return Ok(key);
        }
        let info: BriefInfoResponse = self
            .web_get("/portal/v2/getUserBriefInfo.action", &BTreeMap::new())
            .await?;
        if info.session_key.is_empty() {
            return Err(CloudError::new(
                CloudErrorKind::InvalidToken,
                "web session has no sessionKey",
            ));
        }
        provider.set_session_key(&info.session_key)?;
        Ok(info.session_key)
    }

    /// Opens a chunked upload session (Web dialect). No resume support.
    pub async fn web_init_upload(
        &self,
        parent_id: &str,
        file_name: &str,
        file_size: i64,
        rsa: &WebRsa,
    ) -> Result<UploadSession, CloudError> {
        if file_name.is_empty() {
            return Err(CloudError::invalid_request("file name must not be empty"));
        }
        self.web_session_key().await?;
        let params = init_params(parent_id, file_name, file_size);
        let rsp: UploadInitResponse = self
            .web_upload("/person/initMultiUpload", params, rsa)
            .await?;
        if rsp.data.upload_file_id.is_empty() {
            return Err(CloudError::new(
                CloudErrorKind::Unknown,
                "upload init returned no uploadFileId",
            ));
        }
        Ok(UploadSession::new(rsp.data, parent_id, file_name, file_size))
    }

    /// Uploads one part through the Web envelope.
    pub async fn web_upload_part(
        &self,
        session: &mut UploadSession,
        part_num: i64,
        data: &[u8],
        rsa: &WebRsa,
    ) -> Result<(), CloudError> {
        validate_part(session, part_num)?;
        let digest = Md5::digest(data);
        let params = part_params(session.upload_file_id(), part_num, &digest);
        let rsp: UploadUrlsResponse = self
            .web_upload("/person/getMultiUploadUrls", params, rsa)
            .await?;
        let info = part_url(&rsp, part_num)?;
        self.put_part(&info, data).await?;
        session.record_part(part_num as usize, &digest, data);
        Ok(())
    }

    /// Seals a Web-dialect upload.
    pub async fn web_commit_upload(
        &self,
        session: &mut UploadSession,
        rsa: &WebRsa,
    ) -> Result<FileInfo, CloudError> {
        let params = commit_params(session);
        let rsp: UploadCommitResponse = self
            .web_upload("/person/commitMultiUploadFile", params, rsa)
            .await?;
        Ok(commit_file_info(session, rsp))
    }

    /// Raw PUT of part bytes to the presigned URL, applying the
    /// `k=v&k=v` header string verbatim (no percent decoding).
    async fn put_part(&self, info: &UploadUrlInfo, data: &[u8]) -> Result<(), CloudError> {
        let mut request = self.raw_http().put(&info.request_url).body(data.to_vec());
        for pair in info.request_header.split('&') {
            if pair.is_empty() {
                continue;
            }
            if let Some((name, value)) = pair.split_once('=') {
                request = request.header(name, value);
            }
        }
        let response = request.send().await.map_err(|e| CloudError {
            kind: CloudErrorKind::Unknown,
            message: format!("part upload failed: {e}"),
            http_status: 0,
            source: Some(Box::new(e)),
        })?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(CloudError {
                kind: CloudErrorKind::Server,
                message: format!("part upload rejected with status {status}"),
                http_status: status,
                source: None,
            });
        }
        Ok(())
    }
}

fn init_params(parent_id: &str, file_name: &str, file_size: i64) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("parentFolderId".to_string(), parent_id.to_string());
    params.insert("fileName".to_string(), file_name.to_string());
    if file_size > 0 {
        params.insert("fileSize".to_string(), file_size.to_string());
    }
    params.insert("sliceSize".to_string(), SLICE_SIZE.to_string());
    params.insert("lazyCheck".to_string(), "1".to_string());
    params.insert("extend".to_string(), INIT_EXTEND.to_string());
    params
}

fn part_params(upload_file_id: &str, part_num: i64, digest: &[u8]) -> BTreeMap<String, String> {
    let part_name = BASE64.encode(digest);
    let mut params = BTreeMap::new();
    params.insert("partInfo".to_string(), format!("{part_num}-{part_name}"));
    params.insert("uploadFileId".to_string(), upload_file_id.to_string());
    params
}

fn commit_params(session: &mut UploadSession) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert(
        "uploadFileId".to_string(),
        session.upload_file_id().to_string(),
    );
    if session.lazy_check {
        session.compute_hashes();
        if !session.file_md5.is_empty() {
            params.insert("fileMd5".to_string(), session.file_md5.clone());
        }
        if !session.slice_md5.is_empty() {
            params.insert("sliceMd5".to_string(), session.slice_md5.clone());
        }
        params.insert("lazyCheck".to_string(), "1".to_string());
    }
    if session.overwrite {
        params.insert("opertype".to_string(), "3".to_string());
    }
    params
}

fn commit_file_info(session: &UploadSession, rsp: UploadCommitResponse) -> FileInfo {
    FileInfo {
        id: rsp.file.id,
        name: if rsp.file.file_name.is_empty() {
            session.file_name.clone()
        } else {
            rsp.file.file_name
        },
        size: rsp.file.file_size,
        md5: rsp.file.file_md_5,
        ..Default::default()
    }
}

fn validate_part(session: &UploadSession, part_num: i64) -> Result<(), CloudError> {
    if part_num <= 0 {
        return Err(CloudError::invalid_request("part numbers start at 1"));
    }
    if session.upload_file_id().is_empty() {
        return Err(CloudError::invalid_request("upload session has no id"));
    }
    Ok(())
}

fn part_url(rsp: &UploadUrlsResponse, part_num: i64) -> Result<UploadUrlInfo, CloudError> {
    rsp.upload_urls
        .get(&format!("partNumber_{part_num}"))
        .cloned()
        .ok_or_else(|| CloudError::invalid_request("presigned part URL missing"))
}
