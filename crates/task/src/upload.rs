use std::future::Future;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tianyi_store::{UploadState, UploadStateStore};

use crate::manager::Manager;
use crate::task::{Task, TaskStatus, TaskType};
use crate::TransferError;

/// Fixed upload chunk size. The server requires 10 MiB slices, and the
/// resume math (`part = uploaded / CHUNK_SIZE + 1`) depends on every
/// non-trailing part having exactly this size.
pub const CHUNK_SIZE: i64 = 10 * 1024 * 1024;

/// Which API dialect an uploader speaks. Only App-mode uploads support
/// durable resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    App,
    Web,
}

/// Resume input for [`Uploader::init`], reconstructed from the durable
/// upload-state record.
#[derive(Debug, Clone, Default)]
pub struct ResumeState {
    pub upload_file_id: String,
    pub uploaded_size: i64,
    pub part_hashes: Vec<String>,
}

/// Outcome of [`Uploader::init`].
#[derive(Debug, Clone, Default)]
pub struct InitResult {
    pub upload_file_id: String,
    /// The server already holds identical content; nothing to transfer.
    pub exists: bool,
    /// Bytes confirmed uploaded in a previous run.
    pub uploaded_size: i64,
}

/// Upload strategy, implemented by the API layer.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Opens a new upload session, or revives `resume` when given.
    async fn init(
        &self,
        parent_id: &str,
        file_name: &str,
        file_size: i64,
        resume: Option<ResumeState>,
    ) -> Result<InitResult, TransferError>;

    /// Uploads one part. Part numbers start at 1.
    async fn upload_part(
        &self,
        upload_file_id: &str,
        part_num: i64,
        data: Vec<u8>,
    ) -> Result<(), TransferError>;

    /// Seals the upload; returns the new remote file id. MD5
    /// computation is the uploader's business.
    async fn commit(
        &self,
        upload_file_id: &str,
        file_md5: &str,
        slice_md5: &str,
    ) -> Result<String, TransferError>;

    fn mode(&self) -> UploadMode;

    /// Uppercase-hex MD5s of the parts uploaded so far, for the resume
    /// record.
    fn part_hashes(&self) -> Vec<String>;
}

/// Source of upload bytes.
pub trait UploadReader: Read + Seek + Send {
    fn size(&self) -> i64;
}

/// File-backed reader.
pub struct FileUploadReader {
    file: std::fs::File,
    size: i64,
}

impl FileUploadReader {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len() as i64;
        Ok(Self { file, size })
    }
}

impl Read for FileUploadReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileUploadReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl UploadReader for FileUploadReader {
    fn size(&self) -> i64 {
        self.size
    }
}

/// What to upload and where.
#[derive(Debug, Clone, Default)]
pub struct UploadConfig {
    pub local_path: String,
    pub file_name: String,
    pub parent_id: String,
    /// Optional whole-file MD5; when set, a resume record must carry
    /// the same value to be trusted.
    pub file_md5: String,
}

enum WorkerExit {
    Done,
    Canceled,
    Failed(String),
}

impl Manager {
    /// Submits an upload. Returns the task id immediately; the transfer
    /// runs on its own tokio task.
    pub fn create_upload(
        &self,
        config: UploadConfig,
        uploader: Arc<dyn Uploader>,
        reader: Box<dyn UploadReader>,
    ) -> String {
        let task = self.create_task(TaskType::Upload);
        task.set_local_path(&config.local_path);
        task.set_file_name(&config.file_name);
        task.set_parent_id(&config.parent_id);
        task.set_total(reader.size());
        let task_id = task.id();

        let manager = self.clone();
        tokio::spawn(async move {
            run_upload(manager, task, config, uploader, reader).await;
        });
        task_id
    }
}

async fn run_upload(
    manager: Manager,
    task: Arc<Task>,
    config: UploadConfig,
    uploader: Arc<dyn Uploader>,
    mut reader: Box<dyn UploadReader>,
) {
    let cancel = CancellationToken::new();
    manager.register_cancel(&task.id(), cancel.clone());

    let exit = upload_worker(
        &manager,
        &task,
        &config,
        uploader.as_ref(),
        reader.as_mut(),
        &cancel,
    )
    .await;
    if let WorkerExit::Failed(message) = exit {
        warn!(task = %task.id(), error = %message, "upload failed");
        task.set_error(&message);
        manager.notify(&task);
    }

    manager.unregister_cancel(&task.id());
}

async fn upload_worker(
    manager: &Manager,
    task: &Task,
    config: &UploadConfig,
    uploader: &dyn Uploader,
    reader: &mut dyn UploadReader,
    cancel: &CancellationToken,
) -> WorkerExit {
    let Some(_permit) = manager.acquire_slot(cancel).await else {
        return WorkerExit::Canceled;
    };
    // Honor a pause or cancel that landed while the task was queued.
    if !wait_while_paused(task, cancel).await {
        return WorkerExit::Canceled;
    }
    task.set_status(TaskStatus::Running);
    manager.notify(task);

    let file_size = reader.size();

    // Resume is an App-mode feature; the record must still describe
    // the same file or it is discarded.
    let store = match uploader.mode() {
        UploadMode::App => manager.state_store(),
        UploadMode::Web => None,
    };
    let mut resume = None;
    if let Some(store) = &store {
        if let Ok(state) = store.load(&config.local_path) {
            let trusted = state.file_size == file_size
                && (config.file_md5.is_empty() || state.file_md5 == config.file_md5)
                && !state.upload_file_id.is_empty();
            if trusted {
                debug!(task = %task.id(), uploaded = state.uploaded_size, "resuming upload");
                resume = Some(ResumeState {
                    upload_file_id: state.upload_file_id,
                    uploaded_size: state.uploaded_size,
                    part_hashes: state.part_hashes,
                });
            } else {
                let _ = store.delete(&config.local_path);
            }
        }
    }

    let init = match select_cancel(
        cancel,
        uploader.init(&config.parent_id, &config.file_name, file_size, resume),
    )
    .await
    {
        None => return WorkerExit::Canceled,
        Some(Err(err)) => return WorkerExit::Failed(err.to_string()),
        Some(Ok(init)) => init,
    };

    if init.exists {
        // Instant success: identical content already on the server.
        if let Some(store) = &store {
            let _ = store.delete(&config.local_path);
        }
        task.set_progress(file_size);
        task.set_status(TaskStatus::Completed);
        manager.notify(task);
        return WorkerExit::Done;
    }

    let mut uploaded = init.uploaded_size;
    save_state(
        &store,
        config,
        file_size,
        &init.upload_file_id,
        uploaded,
        uploader.part_hashes(),
    );

    let total_parts = ((file_size + CHUNK_SIZE - 1) / CHUNK_SIZE).max(1);
    let start_part = uploaded / CHUNK_SIZE + 1;
    if uploaded > 0 {
        task.set_progress(uploaded);
        manager.notify(task);
    }

    for part_num in start_part..=total_parts {
        if !wait_while_paused(task, cancel).await {
            return WorkerExit::Canceled;
        }

        let offset = (part_num - 1) * CHUNK_SIZE;
        if let Err(err) = reader.seek(SeekFrom::Start(offset as u64)) {
            return WorkerExit::Failed(err.to_string());
        }
        let part_size = if part_num == total_parts {
            file_size - offset
        } else {
            CHUNK_SIZE
        };
        let mut data = vec![0u8; part_size as usize];
        let n = match read_full(reader, &mut data) {
            Ok(n) => n,
            Err(err) => return WorkerExit::Failed(err.to_string()),
        };
        if n == 0 {
            break;
        }
        data.truncate(n);

        match select_cancel(
            cancel,
            uploader.upload_part(&init.upload_file_id, part_num, data),
        )
        .await
        {
            None => return WorkerExit::Canceled,
            Some(Err(err)) => return WorkerExit::Failed(err.to_string()),
            Some(Ok(())) => {}
        }

        uploaded += n as i64;
        task.set_progress(uploaded);
        manager.notify(task);

        save_state(
            &store,
            config,
            file_size,
            &init.upload_file_id,
            uploaded,
            uploader.part_hashes(),
        );
    }

    let file_id = match select_cancel(cancel, uploader.commit(&init.upload_file_id, "", "")).await
    {
        None => return WorkerExit::Canceled,
        Some(Err(err)) => return WorkerExit::Failed(err.to_string()),
        Some(Ok(file_id)) => file_id,
    };
    task.set_file_id(&file_id);

    if let Some(store) = &store {
        let _ = store.delete(&config.local_path);
    }
    task.set_status(TaskStatus::Completed);
    manager.notify(task);
    WorkerExit::Done
}

/// Overwrites the durable resume record after a successful step.
fn save_state(
    store: &Option<Arc<dyn UploadStateStore>>,
    config: &UploadConfig,
    file_size: i64,
    upload_file_id: &str,
    uploaded_size: i64,
    part_hashes: Vec<String>,
) {
    if let Some(store) = store {
        let _ = store.save(
            &config.local_path,
            &UploadState {
                local_path: config.local_path.clone(),
                parent_id: config.parent_id.clone(),
                file_name: config.file_name.clone(),
                file_size,
                file_md5: config.file_md5.clone(),
                upload_file_id: upload_file_id.to_string(),
                uploaded_size,
                part_hashes,
                created_at: Utc::now().timestamp(),
            },
        );
    }
}

/// Parks while the task is paused, polling at 100 ms. Returns `false`
/// when the task was canceled; resuming re-enters the running state.
pub(crate) async fn wait_while_paused(task: &Task, cancel: &CancellationToken) -> bool {
    loop {
        match task.status() {
            TaskStatus::Canceled => return false,
            TaskStatus::Paused => {
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
            TaskStatus::Pending => {
                task.set_status(TaskStatus::Running);
                return true;
            }
            _ => return true,
        }
    }
}

/// Races a future against the cancel token; `None` means canceled.
pub(crate) async fn select_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn read_full(reader: &mut dyn UploadReader, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
