//! File comparison logic

use crate::backend::{Backend, BackendResult};
use crate::hash::hash_file;
use crate::types::FileDescriptor;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Default tolerance for modification-time comparison (seconds).
///
/// Covers filesystems and servers that store timestamps with second or
/// two-second precision.
pub const DEFAULT_TIME_TOLERANCE_SECS: u64 = 2;

/// How the engine decides that a present target file is out of date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ComparePolicy {
    /// Copy only when sizes differ
    SizeOnly,

    /// Copy when sizes differ or the source is newer beyond the tolerance
    SizeAndTime {
        #[serde(default = "default_tolerance")]
        tolerance_secs: u64,
    },

    /// Copy when sizes differ or the Blake3 hashes of the contents differ
    Checksum,
}

fn default_tolerance() -> u64 {
    DEFAULT_TIME_TOLERANCE_SECS
}

impl Default for ComparePolicy {
    fn default() -> Self {
        ComparePolicy::SizeAndTime {
            tolerance_secs: DEFAULT_TIME_TOLERANCE_SECS,
        }
    }
}

impl ComparePolicy {
    /// Decide whether `src` must be copied over `dest`.
    ///
    /// A missing target always needs a copy. With `SizeAndTime`, a target
    /// newer than its source is left alone rather than overwritten.
    ///
    /// # Errors
    /// Only `Checksum` reads file contents, so only it can fail.
    pub fn needs_copy(
        &self,
        source: &dyn Backend,
        src: &FileDescriptor,
        target: &dyn Backend,
        dest: &FileDescriptor,
    ) -> BackendResult<bool> {
        if !dest.exists() {
            return Ok(true);
        }
        // Size mismatch = definitely different
        if src.size() != dest.size() {
            return Ok(true);
        }

        match self {
            ComparePolicy::SizeOnly => Ok(false),
            ComparePolicy::SizeAndTime { tolerance_secs } => Ok(source_is_newer(
                src.modified(),
                dest.modified(),
                Duration::from_secs(*tolerance_secs),
            )),
            ComparePolicy::Checksum => {
                let src_hash = hash_file(source, src)?;
                let dest_hash = hash_file(target, dest)?;
                Ok(src_hash != dest_hash)
            }
        }
    }
}

/// Source newer than destination by more than `tolerance`
fn source_is_newer(src: SystemTime, dest: SystemTime, tolerance: Duration) -> bool {
    match src.duration_since(dest) {
        Ok(ahead) => ahead > tolerance,
        // Destination is newer: never overwrite it
        Err(_) => false,
    }
}
