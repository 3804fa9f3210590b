use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TransferError;
use crate::manager::Manager;
use crate::task::{Task, TaskStatus, TaskType};
use crate::upload::{select_cancel, wait_while_paused};

/// Which API dialect a downloader speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    App,
    Web,
}

/// Download strategy, implemented by the API layer.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Returns `(file_name, file_size)` for the remote file.
    async fn file_info(&self, file_id: &str) -> Result<(String, i64), TransferError>;

    /// Resolves the direct download URL.
    async fn download_url(&self, file_id: &str) -> Result<String, TransferError>;

    /// Transport used for the ranged GET.
    fn http_client(&self) -> reqwest::Client;

    fn mode(&self) -> DownloadMode;
}

/// Sink for downloaded bytes.
pub trait DownloadWriter: Write + Seek + Send {}

impl<T: Write + Seek + Send> DownloadWriter for T {}

/// File-backed writer; created (or opened for append when resuming) at
/// the destination path.
pub struct FileDownloadWriter;

impl FileDownloadWriter {
    pub fn create(path: &Path) -> std::io::Result<std::fs::File> {
        std::fs::File::create(path)
    }

    pub fn open_for_resume(path: &Path) -> std::io::Result<std::fs::File> {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
    }
}

/// What to download and where.
#[derive(Debug, Clone, Default)]
pub struct DownloadConfig {
    pub file_id: String,
    pub local_path: String,
    /// Continue from the writer's current end instead of starting over.
    pub resume: bool,
}

/// A download attempt rejected by the remote with an HTTP status.
#[derive(Debug, thiserror::Error)]
#[error("download failed with status {status}")]
pub struct DownloadError {
    pub status: u16,
}

enum WorkerExit {
    Done,
    Canceled,
    Failed(String),
}

impl Manager {
    /// Submits a download. Returns the task id immediately; the
    /// transfer runs on its own tokio task.
    pub fn create_download(
        &self,
        config: DownloadConfig,
        downloader: Arc<dyn Downloader>,
        writer: Box<dyn DownloadWriter>,
    ) -> String {
        let task = self.create_task(TaskType::Download);
        task.set_file_id(&config.file_id);
        task.set_local_path(&config.local_path);
        let task_id = task.id();

        let manager = self.clone();
        tokio::spawn(async move {
            run_download(manager, task, config, downloader, writer).await;
        });
        task_id
    }
}

async fn run_download(
    manager: Manager,
    task: Arc<Task>,
    config: DownloadConfig,
    downloader: Arc<dyn Downloader>,
    mut writer: Box<dyn DownloadWriter>,
) {
    let cancel = CancellationToken::new();
    manager.register_cancel(&task.id(), cancel.clone());

    let exit = download_worker(
        &manager,
        &task,
        &config,
        downloader.as_ref(),
        writer.as_mut(),
        &cancel,
    )
    .await;
    if let WorkerExit::Failed(message) = exit {
        warn!(task = %task.id(), error = %message, "download failed");
        task.set_error(&message);
        manager.notify(&task);
    }

    manager.unregister_cancel(&task.id());
}

async fn download_worker(
    manager: &Manager,
    task: &Task,
    config: &DownloadConfig,
    downloader: &dyn Downloader,
    writer: &mut dyn DownloadWriter,
    cancel: &CancellationToken,
) -> WorkerExit {
    let Some(_permit) = manager.acquire_slot(cancel).await else {
        return WorkerExit::Canceled;
    };
    if !wait_while_paused(task, cancel).await {
        return WorkerExit::Canceled;
    }
    task.set_status(TaskStatus::Running);
    manager.notify(task);

    let (file_name, file_size) =
        match select_cancel(cancel, downloader.file_info(&config.file_id)).await {
            None => return WorkerExit::Canceled,
            Some(Err(err)) => return WorkerExit::Failed(err.to_string()),
            Some(Ok(info)) => info,
        };
    task.set_file_name(&file_name);
    task.set_total(file_size);

    let url = match select_cancel(cancel, downloader.download_url(&config.file_id)).await {
        None => return WorkerExit::Canceled,
        Some(Err(err)) => return WorkerExit::Failed(err.to_string()),
        Some(Ok(url)) => url,
    };

    // Resume continues from wherever the writer already ends.
    let mut downloaded: i64 = 0;
    if config.resume {
        match writer.seek(SeekFrom::End(0)) {
            Ok(offset) => downloaded = offset as i64,
            Err(err) => return WorkerExit::Failed(err.to_string()),
        }
        if downloaded >= file_size {
            task.set_progress(file_size);
            task.set_status(TaskStatus::Completed);
            manager.notify(task);
            return WorkerExit::Done;
        }
        task.set_progress(downloaded);
    }

    let mut request = downloader.http_client().get(&url);
    if downloaded > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={downloaded}-"));
    }
    debug!(task = %task.id(), offset = downloaded, "starting download stream");

    let mut response = match select_cancel(cancel, request.send()).await {
        None => return WorkerExit::Canceled,
        Some(Err(err)) => return WorkerExit::Failed(err.to_string()),
        Some(Ok(response)) => response,
    };
    let status = response.status().as_u16();
    if status >= 400 {
        return WorkerExit::Failed(DownloadError { status }.to_string());
    }

    loop {
        if !wait_while_paused(task, cancel).await {
            return WorkerExit::Canceled;
        }

        let chunk = match select_cancel(cancel, response.chunk()).await {
            None => return WorkerExit::Canceled,
            Some(Err(err)) => return WorkerExit::Failed(err.to_string()),
            Some(Ok(chunk)) => chunk,
        };
        let Some(chunk) = chunk else {
            break; // EOF
        };
        if let Err(err) = writer.write_all(&chunk) {
            return WorkerExit::Failed(err.to_string());
        }
        downloaded += chunk.len() as i64;
        task.set_progress(downloaded);
        manager.notify(task);
    }

    task.set_status(TaskStatus::Completed);
    manager.notify(task);
    WorkerExit::Done
}
