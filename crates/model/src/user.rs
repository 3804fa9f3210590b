use serde::{Deserialize, Serialize};

/// Storage quota for an account, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageQuota {
    pub capacity: u64,
    pub available: u64,
    pub used: u64,
    pub backup: u64,
}

/// A signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub nick_name: String,
    pub family_id: String,
    pub quota: StorageQuota,
}
