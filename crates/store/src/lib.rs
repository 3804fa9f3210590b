//! Persistence contracts.
//!
//! The core never touches the user's config directory itself. Hosts
//! inject implementations of these traits (keyring-backed, file-backed,
//! whatever fits the platform); the in-memory implementations here are
//! the reference behavior and the test doubles.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Errors from store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store holds no value. Callers treat this as "fresh start",
    /// not as a failure.
    #[error("not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persists a single session record per account.
///
/// Implementations must be safe for concurrent `load`/`save`.
pub trait SessionStore<T>: Send + Sync {
    fn save(&self, session: &T) -> Result<(), StoreError>;
    /// Returns [`StoreError::NotFound`] when nothing has been saved.
    fn load(&self) -> Result<T, StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Durable resume record for a chunked upload, keyed by local path.
///
/// Written after every successfully uploaded part; deleted on commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadState {
    pub local_path: String,
    pub parent_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_md5: String,
    pub upload_file_id: String,
    pub uploaded_size: i64,
    pub part_hashes: Vec<String>,
    /// Unix seconds when the record was first written.
    pub created_at: i64,
}

/// Stores upload resume records.
pub trait UploadStateStore: Send + Sync {
    fn save(&self, local_path: &str, state: &UploadState) -> Result<(), StoreError>;
    fn load(&self, local_path: &str) -> Result<UploadState, StoreError>;
    fn delete(&self, local_path: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore<T> {
    session: RwLock<Option<T>>,
}

impl<T> MemorySessionStore<T> {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
        }
    }
}

impl<T: Clone + Send + Sync> SessionStore<T> for MemorySessionStore<T> {
    fn save(&self, session: &T) -> Result<(), StoreError> {
        *self.session.write().unwrap() = Some(session.clone());
        Ok(())
    }

    fn load(&self) -> Result<T, StoreError> {
        self.session
            .read()
            .unwrap()
            .clone()
            .ok_or(StoreError::NotFound)
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.session.write().unwrap() = None;
        Ok(())
    }
}

/// In-memory upload-state store.
#[derive(Default)]
pub struct MemoryUploadStateStore {
    states: RwLock<HashMap<String, UploadState>>,
}

impl MemoryUploadStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UploadStateStore for MemoryUploadStateStore {
    fn save(&self, local_path: &str, state: &UploadState) -> Result<(), StoreError> {
        self.states
            .write()
            .unwrap()
            .insert(local_path.to_string(), state.clone());
        Ok(())
    }

    fn load(&self, local_path: &str) -> Result<UploadState, StoreError> {
        self.states
            .read()
            .unwrap()
            .get(local_path)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn delete(&self, local_path: &str) -> Result<(), StoreError> {
        self.states.write().unwrap().remove(local_path);
        Ok(())
    }
}
