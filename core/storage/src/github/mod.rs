//! GitHub remote for notesync.
//!
//! This module talks to the Git Data API so a whole sync lands as:
//! - one blob per changed file
//! - one tree built on top of the current base tree
//! - one commit and a single non-forced reference update

pub mod client;
pub mod provider;

pub use client::{GitHubClient, GITHUB_API_BASE};
pub use provider::{GitHubConfig, GitHubProvider};
