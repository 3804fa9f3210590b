//! Domain types shared across the core.
//!
//! These are the shapes handed to UI layers; wire-format quirks stay in
//! the API crate, which converts its response types into these.

mod file;
mod user;

pub use file::File;
pub use user::{StorageQuota, User};
