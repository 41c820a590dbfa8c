//! Error type for container writing.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// A container could not be written.
///
/// Fatal to one chapter only; chapters already written stay valid.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// Writing the container failed.
    #[error("failed to assemble {}: {reason}", .path.display())]
    AssemblyFailed {
        /// Intended final path.
        path: PathBuf,
        /// Leftover partial file the caller should remove, if any.
        partial: Option<PathBuf>,
        /// What went wrong.
        reason: String,
    },
}

impl AssembleError {
    /// Failure with no partial file left behind.
    pub fn failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::AssemblyFailed {
            path: path.into(),
            partial: None,
            reason: reason.to_string(),
        }
    }

    /// Failure that left `partial` on disk.
    pub fn with_partial(path: impl Into<PathBuf>, partial: &Path, reason: impl ToString) -> Self {
        Self::AssemblyFailed {
            path: path.into(),
            partial: Some(partial.to_path_buf()),
            reason: reason.to_string(),
        }
    }

    /// The partial file left behind, if any.
    #[must_use]
    pub fn partial(&self) -> Option<&Path> {
        match self {
            Self::AssemblyFailed { partial, .. } => partial.as_deref(),
        }
    }
}
