//! Common utilities and types shared across notesync crates.
//!
//! This module provides the error taxonomy, Git-compatible content
//! addressing, and the plain data types that flow between the storage
//! collaborators and the sync core.

pub mod addresser;
pub mod error;
pub mod types;

pub use addresser::{ContentAddresser, ObjectKind};
pub use error::{Error, PatternViolation, Result};
pub use types::{
    join_path, normalize_path, EntryKind, LocalFileRecord, RefHead, RemoteTreeEntry, RepoId,
};
