use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file or folder in the user's cloud drive.
///
/// IDs are kept as strings: the remote uses 64-bit identifiers that
/// must never round-trip through a float.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub size: i64,
    pub md5: String,
    pub media_type: i32,
    pub category: i32,
    pub revision: String,
    pub starred: bool,
    pub is_folder: bool,
    pub child_count: i32,
    pub parent_path: String,
    pub download_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
