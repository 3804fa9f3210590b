//! Transfer engine.
//!
//! The [`Manager`] owns a table of upload/download tasks, bounds how
//! many run at once with a semaphore, and drives each transfer on its
//! own tokio task with cooperative pause/cancel checks between chunks.
//! Uploads write a durable resume record after every part, so an
//! interrupted transfer continues where it stopped on the next run.
//!
//! The engine talks to the outside world only through the [`Uploader`],
//! [`Downloader`], [`UploadReader`] and [`DownloadWriter`] seams plus an
//! optional [`UploadStateStore`](tianyi_store::UploadStateStore); the
//! API client provides the real implementations.

mod download;
mod manager;
mod task;
mod upload;

pub use download::{
    DownloadConfig, DownloadError, DownloadMode, DownloadWriter, Downloader, FileDownloadWriter,
};
pub use manager::{Manager, ManagerOptions, ProgressCallback};
pub use task::{Task, TaskInfo, TaskStatus, TaskType};
pub use upload::{
    CHUNK_SIZE, FileUploadReader, InitResult, ResumeState, UploadConfig, UploadMode, UploadReader,
    Uploader,
};

/// Boxed error used across the collaborator seams.
pub type TransferError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the engine's public surface.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task not found")]
    TaskNotFound,

    /// The requested transition is not legal from the task's current
    /// status (terminal statuses are sticky).
    #[error("invalid task status for this operation")]
    InvalidStatus,

    #[error("task canceled")]
    Canceled,
}
