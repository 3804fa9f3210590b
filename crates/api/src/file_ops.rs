//! File and folder operations over the App dialect.

use std::collections::BTreeMap;

use tianyi_model::File;

use crate::client::CloudClient;
use crate::error::CloudError;
use crate::types::{
    CodeResponse, DownloadUrlResponse, FileInfo, FileInfoResponse, FileListResponse,
    SearchResponse,
};

/// Listing options; the defaults match the desktop client.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub page_num: u32,
    pub page_size: u32,
    pub order_by: String,
    pub descending: bool,
    pub file_type: String,
    pub media_type: String,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page_num: 1,
            page_size: 100,
            order_by: "filename".into(),
            descending: true,
            file_type: "0".into(),
            media_type: "0".into(),
        }
    }
}

/// Search options; the default scope is the whole drive (folder `-11`).
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub folder_id: String,
    pub recursive: bool,
    pub page_num: u32,
    pub page_size: u32,
    pub order_by: String,
    pub descending: bool,
    pub file_type: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            folder_id: "-11".into(),
            recursive: false,
            page_num: 1,
            page_size: 100,
            order_by: "filename".into(),
            descending: true,
            file_type: "0".into(),
        }
    }
}

impl CloudClient {
    /// Lists files and folders inside `folder_id` (paged).
    pub async fn list_files(
        &self,
        folder_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<File>, CloudError> {
        if folder_id.is_empty() {
            return Err(CloudError::invalid_request("folder id must not be empty"));
        }
        let mut params = BTreeMap::new();
        params.insert("folderId".to_string(), folder_id.to_string());
        params.insert("fileType".to_string(), options.file_type.clone());
        params.insert("mediaType".to_string(), options.media_type.clone());
        params.insert("mediaAttr".to_string(), "0".to_string());
        params.insert("iconOption".to_string(), "0".to_string());
        params.insert("orderBy".to_string(), options.order_by.clone());
        params.insert("descending".to_string(), options.descending.to_string());
        params.insert("pageNum".to_string(), options.page_num.to_string());
        params.insert("pageSize".to_string(), options.page_size.to_string());

        let rsp: FileListResponse = self.app_get("/listFiles.action", &params).await?;
        Ok(rsp.items().iter().map(FileInfo::to_model).collect())
    }

    /// Searches for files by name.
    pub async fn search_files(
        &self,
        keyword: &str,
        options: &SearchOptions,
    ) -> Result<Vec<File>, CloudError> {
        let mut params = BTreeMap::new();
        params.insert("folderId".to_string(), options.folder_id.clone());
        params.insert("filename".to_string(), keyword.to_string());
        params.insert("fileType".to_string(), options.file_type.clone());
        params.insert("mediaType".to_string(), "0".to_string());
        params.insert("mediaAttr".to_string(), "0".to_string());
        params.insert(
            "recursive".to_string(),
            if options.recursive { "1" } else { "0" }.to_string(),
        );
        params.insert("iconOption".to_string(), "0".to_string());
        params.insert("orderBy".to_string(), options.order_by.clone());
        params.insert("descending".to_string(), options.descending.to_string());
        params.insert("pageNum".to_string(), options.page_num.to_string());
        params.insert("pageSize".to_string(), options.page_size.to_string());

        let rsp: SearchResponse = self.app_get("/searchFiles.action", &params).await?;
        Ok(rsp.items().iter().map(FileInfo::to_model).collect())
    }

    /// Creates a folder under `parent_id`. A `name` containing path
    /// separators splits into `relativePath` plus the leaf name.
    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<File, CloudError> {
        let (relative_path, base) = match name.rfind('/') {
            Some(idx) => (&name[..=idx], &name[idx + 1..]),
            None => ("", name),
        };
        if base.is_empty() {
            return Err(CloudError::invalid_request("folder name must not be empty"));
        }
        let mut params = BTreeMap::new();
        params.insert("folderName".to_string(), base.to_string());
        params.insert("parentFolderId".to_string(), parent_id.to_string());
        if !relative_path.is_empty() {
            params.insert("relativePath".to_string(), relative_path.to_string());
        }

        let rsp: FileInfoResponse = self.app_post("/createFolder.action", &params).await?;
        Ok(rsp.file.to_model())
    }

    /// Deletes files or folders by id.
    pub async fn delete_files(&self, file_ids: &[String]) -> Result<(), CloudError> {
        if file_ids.is_empty() {
            return Ok(());
        }
        let mut params = BTreeMap::new();
        params.insert("fileIdList".to_string(), file_ids.join(";"));
        let _: CodeResponse = self.app_post("/batchDeleteFile.action", &params).await?;
        Ok(())
    }

    /// Copies files into `dest_folder_id`, one call per id.
    pub async fn copy_files(
        &self,
        file_ids: &[String],
        dest_folder_id: &str,
    ) -> Result<(), CloudError> {
        for id in file_ids {
            let mut params = BTreeMap::new();
            params.insert("fileId".to_string(), id.clone());
            params.insert("destParentFolderId".to_string(), dest_folder_id.to_string());
            params.insert("destFileName".to_string(), String::new());
            let _: CodeResponse = self.app_post("/copyFile.action", &params).await?;
        }
        Ok(())
    }

    /// Moves files into `dest_folder_id`.
    pub async fn move_files(
        &self,
        file_ids: &[String],
        dest_folder_id: &str,
    ) -> Result<(), CloudError> {
        if file_ids.is_empty() {
            return Ok(());
        }
        let mut params = BTreeMap::new();
        params.insert("fileIdList".to_string(), file_ids.join(";"));
        params.insert("destParentFolderId".to_string(), dest_folder_id.to_string());
        let _: CodeResponse = self.app_post("/batchMoveFile.action", &params).await?;
        Ok(())
    }

    /// Renames a file.
    pub async fn rename_file(&self, file_id: &str, new_name: &str) -> Result<(), CloudError> {
        if file_id.is_empty() || new_name.is_empty() {
            return Err(CloudError::invalid_request("file id and name are required"));
        }
        let mut params = BTreeMap::new();
        params.insert("fileId".to_string(), file_id.to_string());
        params.insert("destFileName".to_string(), new_name.to_string());
        let _: CodeResponse = self.app_post("/renameFile.action", &params).await?;
        Ok(())
    }

    /// Fetches metadata for one file or folder.
    pub async fn file_info(&self, file_id: &str) -> Result<File, CloudError> {
        if file_id.is_empty() {
            return Err(CloudError::invalid_request("file id must not be empty"));
        }
        let mut params = BTreeMap::new();
        params.insert("fileId".to_string(), file_id.to_string());
        params.insert("filePath".to_string(), String::new());
        params.insert("pathList".to_string(), "1".to_string());
        params.insert("iconOption".to_string(), "0".to_string());

        let rsp: FileInfoResponse = self.app_get("/getFileInfo.action", &params).await?;
        Ok(rsp.file.to_model())
    }

    /// Resolves a direct download URL for a file.
    pub async fn download_url(&self, file_id: &str) -> Result<String, CloudError> {
        if file_id.is_empty() {
            return Err(CloudError::invalid_request("file id must not be empty"));
        }
        let mut params = BTreeMap::new();
        params.insert("fileId".to_string(), file_id.to_string());
        let rsp: DownloadUrlResponse = self.app_get("/getFileDownloadUrl.action", &params).await?;
        Ok(rsp.file_download_url)
    }
}
