//! Cover Art Error Types
//!
//! One error enum for the whole pipeline, plus the category each failure falls
//! into. The category decides what the orchestrator does with it: recoverable
//! failures degrade a single bucket, optional ones only stop a sub-stage, and
//! fatal ones end the batch.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Recoverable,
    Fatal,
    Optional,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Recoverable => write!(f, "RECOVERABLE"),
            ErrorCategory::Fatal => write!(f, "FATAL"),
            ErrorCategory::Optional => write!(f, "OPTIONAL"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoverArtError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Upscale engine '{engine}' failed (exit code: {exit_code:?}): {output}")]
    Engine {
        engine: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Upscaling gave up after {failures} failed steps (reached {achieved}px)")]
    ExhaustedRetries { failures: u32, achieved: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Batch cancelled")]
    Cancelled,
}

impl CoverArtError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoverArtError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn decode(path: impl Into<PathBuf>, error: &image::ImageError) -> Self {
        CoverArtError::Decode {
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CoverArtError::Io { .. } | CoverArtError::Decode { .. } => ErrorCategory::Recoverable,
            CoverArtError::Engine { .. } => ErrorCategory::Recoverable,
            CoverArtError::ExhaustedRetries { .. } => ErrorCategory::Optional,
            CoverArtError::Config(_) | CoverArtError::Cancelled => ErrorCategory::Fatal,
        }
    }

    /// Whether the batch may continue with the next bucket or record.
    pub fn is_recoverable(&self) -> bool {
        self.category() != ErrorCategory::Fatal
    }
}

pub type Result<T> = std::result::Result<T, CoverArtError>;
