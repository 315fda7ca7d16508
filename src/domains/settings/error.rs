//! Settings-specific error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while persisting settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The env file exists but could not be read.
    #[error("Cannot read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    /// The env file or `.gitignore` could not be written.
    #[error("Cannot write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}
