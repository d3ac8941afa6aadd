//! Build error taxonomy
//!
//! Every failed build surfaces exactly one of these variants, carrying the
//! offending module/specifier so the fault can be located without re-running
//! at higher verbosity.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the bundler.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the bundling pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// An import specifier could not be located or was ambiguous.
    #[error("cannot resolve '{specifier}' imported by '{importer}': {reason}")]
    Resolution {
        specifier: String,
        importer: String,
        reason: String,
    },

    /// Source failed to parse or compile.
    #[error("failed to transform '{module}': {message}")]
    Transform { module: String, message: String },

    /// Filesystem failure (entry missing, output directory unwritable, ...).
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid combination of build options.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The build was aborted before output was written.
    #[error("build was cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap an io error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn resolution(
        specifier: impl Into<String>,
        importer: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            specifier: specifier.into(),
            importer: importer.into(),
            reason: reason.into(),
        }
    }

    pub fn transform(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transform {
            module: module.into(),
            message: message.into(),
        }
    }
}
