//! File size limits.

use serde::Serialize;

use notesync_common::LocalFileRecord;

/// Default size limit: 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

const UNITS: [&str; 3] = ["KB", "MB", "GB"];

/// A local file over the size limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OversizedFile {
    pub path: String,
    pub size: u64,
    pub formatted_size: String,
}

/// Result of checking a file set against a limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub is_valid: bool,
    pub oversized: Vec<OversizedFile>,
    pub count: usize,
}

/// Flags local files that are too large to sync.
///
/// Oversized files are reported and skipped, never fatal.
pub struct SizeGuard;

impl SizeGuard {
    /// Human-readable binary size: `0 B`, `1.00 KB`, `1.50 MB`, `1.00 GB`.
    pub fn format_size(bytes: u64) -> String {
        if bytes < 1024 {
            return format!("{} B", bytes);
        }

        let mut value = bytes as f64 / 1024.0;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        format!("{:.2} {}", value, UNITS[unit])
    }

    /// A file exactly at the threshold is compliant.
    pub fn is_oversized(size: u64, threshold: u64) -> bool {
        size > threshold
    }

    /// Files strictly larger than `threshold`, in input order.
    pub fn find_oversized(files: &[LocalFileRecord], threshold: u64) -> Vec<OversizedFile> {
        files
            .iter()
            .filter(|f| Self::is_oversized(f.size, threshold))
            .map(|f| OversizedFile {
                path: f.path.clone(),
                size: f.size,
                formatted_size: Self::format_size(f.size),
            })
            .collect()
    }

    /// Check every file against `threshold`. Never fails.
    pub fn validate(files: &[LocalFileRecord], threshold: u64) -> SizeReport {
        let oversized = Self::find_oversized(files, threshold);
        SizeReport {
            is_valid: oversized.is_empty(),
            count: oversized.len(),
            oversized,
        }
    }
}
