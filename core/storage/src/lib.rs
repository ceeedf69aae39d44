//! Storage collaborators for notesync.
//!
//! This module provides trait-based interfaces for both sides of a sync:
//! the local note snapshot and the remote Git repository, plus concrete
//! implementations (local filesystem, GitHub, and in-memory fakes).
//!
//! # Design Principles
//! - Provider isolation: no GitHub specifics leak into the sync core
//! - Async operations: all I/O operations are async
//! - Unified error semantics: consistent error types across providers

pub mod github;
pub mod local;
pub mod memory;
pub mod provider;

pub use github::{GitHubConfig, GitHubProvider};
pub use local::LocalSnapshot;
pub use memory::{MemoryRemote, MemorySource, Operation};
pub use provider::{
    CommitProvider, ContentProvider, ContentSource, Release, ReleaseProvider, RemoteRepository,
    SnapshotProvider, TreeChange, TreeListing, TreeProvider,
};
