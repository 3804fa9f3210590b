//! Task-engine adapters.
//!
//! The transfer engine only knows the `Uploader`/`Downloader` seams;
//! these adapters bind them to the RPC client. App mode supports
//! resume; Web mode re-signs every call with the RSA envelope and
//! always starts fresh.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tianyi_task::{
    DownloadMode, Downloader, InitResult, ResumeState, TransferError, UploadMode, Uploader,
};

use crate::client::CloudClient;
use crate::types::WebRsa;
use crate::upload::UploadSession;

const NO_SESSION: &str = "upload session not initialized";

/// App-dialect uploader with resume support.
pub struct AppUploader {
    client: Arc<CloudClient>,
    session: Mutex<Option<UploadSession>>,
}

impl AppUploader {
    pub fn new(client: Arc<CloudClient>) -> Self {
        Self {
            client,
            session: Mutex::new(None),
        }
    }

    fn take_session(&self) -> Result<UploadSession, TransferError> {
        self.session
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| NO_SESSION.into())
    }

    fn put_session(&self, session: UploadSession) {
        *self.session.lock().unwrap() = Some(session);
    }
}

#[async_trait]
impl Uploader for AppUploader {
    async fn init(
        &self,
        parent_id: &str,
        file_name: &str,
        file_size: i64,
        resume: Option<ResumeState>,
    ) -> Result<InitResult, TransferError> {
        if let Some(resume) = resume.filter(|r| !r.upload_file_id.is_empty()) {
            let session = UploadSession::resume(
                parent_id,
                file_name,
                file_size,
                &resume.upload_file_id,
                resume.part_hashes,
            );
            self.put_session(session);
            return Ok(InitResult {
                upload_file_id: resume.upload_file_id,
                exists: false,
                uploaded_size: resume.uploaded_size,
            });
        }

        let session = self.client.init_upload(parent_id, file_name, file_size).await?;
        let result = InitResult {
            upload_file_id: session.upload_file_id().to_string(),
            exists: session.exists(),
            uploaded_size: 0,
        };
        self.put_session(session);
        Ok(result)
    }

    async fn upload_part(
        &self,
        _upload_file_id: &str,
        part_num: i64,
        data: Vec<u8>,
    ) -> Result<(), TransferError> {
        let mut session = self.take_session()?;
        let result = self.client.upload_part(&mut session, part_num, &data).await;
        self.put_session(session);
        result?;
        Ok(())
    }

    async fn commit(
        &self,
        _upload_file_id: &str,
        file_md5: &str,
        slice_md5: &str,
    ) -> Result<String, TransferError> {
        let mut session = self.take_session()?;
        if !file_md5.is_empty() {
            session.file_md5 = file_md5.to_string();
        }
        if !slice_md5.is_empty() {
            session.slice_md5 = slice_md5.to_string();
        }
        let result = self.client.commit_upload(&mut session).await;
        self.put_session(session);
        Ok(result?.id.to_string())
    }

    fn mode(&self) -> UploadMode {
        UploadMode::App
    }

    fn part_hashes(&self) -> Vec<String> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.part_hashes())
            .unwrap_or_default()
    }
}

/// Web-dialect uploader. Every call goes through the RSA+AES envelope;
/// resume state is ignored because the Web flow cannot revive sessions.
pub struct WebUploader {
    client: Arc<CloudClient>,
    rsa: WebRsa,
    session: Mutex<Option<UploadSession>>,
}

impl WebUploader {
    pub fn new(client: Arc<CloudClient>, rsa: WebRsa) -> Self {
        Self {
            client,
            rsa,
            session: Mutex::new(None),
        }
    }

    fn take_session(&self) -> Result<UploadSession, TransferError> {
        self.session
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| NO_SESSION.into())
    }

    fn put_session(&self, session: UploadSession) {
        *self.session.lock().unwrap() = Some(session);
    }
}

#[async_trait]
impl Uploader for WebUploader {
    async fn init(
        &self,
        parent_id: &str,
        file_name: &str,
        file_size: i64,
        _resume: Option<ResumeState>,
    ) -> Result<InitResult, TransferError> {
        let session = self
            .client
            .web_init_upload(parent_id, file_name, file_size, &self.rsa)
            .await?;
        let result = InitResult {
            upload_file_id: session.upload_file_id().to_string(),
            exists: session.exists(),
            uploaded_size: 0,
        };
        self.put_session(session);
        Ok(result)
    }

    async fn upload_part(
        &self,
        _upload_file_id: &str,
        part_num: i64,
        data: Vec<u8>,
    ) -> Result<(), TransferError> {
        let mut session = self.take_session()?;
        let result = self
            .client
            .web_upload_part(&mut session, part_num, &data, &self.rsa)
            .await;
        self.put_session(session);
        result?;
        Ok(())
    }

    async fn commit(
        &self,
        _upload_file_id: &str,
        file_md5: &str,
        slice_md5: &str,
    ) -> Result<String, TransferError> {
        let mut session = self.take_session()?;
        if !file_md5.is_empty() {
            session.file_md5 = file_md5.to_string();
        }
        if !slice_md5.is_empty() {
            session.slice_md5 = slice_md5.to_string();
        }
        let result = self.client.web_commit_upload(&mut session, &self.rsa).await;
        self.put_session(session);
        Ok(result?.id.to_string())
    }

    fn mode(&self) -> UploadMode {
        UploadMode::Web
    }

    fn part_hashes(&self) -> Vec<String> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.part_hashes())
            .unwrap_or_default()
    }
}

/// App-dialect downloader.
pub struct AppDownloader {
    client: Arc<CloudClient>,
}

impl AppDownloader {
    pub fn new(client: Arc<CloudClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for AppDownloader {
    async fn file_info(&self, file_id: &str) -> Result<(String, i64), TransferError> {
        let file = self.client.file_info(file_id).await?;
        Ok((file.name, file.size))
    }

    async fn download_url(&self, file_id: &str) -> Result<String, TransferError> {
        Ok(self.client.download_url(file_id).await?)
    }

    fn http_client(&self) -> reqwest::Client {
        self.client.raw_http()
    }

    fn mode(&self) -> DownloadMode {
        DownloadMode::App
    }
}
