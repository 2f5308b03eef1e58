use crate::backend::ExtractionMethod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Every way extraction of a single document can fail.
///
/// Callers branch on the variant; `Display` carries the backend-reported
/// reason text meant for the user.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid file type for {name}: {reason}")]
    InvalidFileType { name: String, reason: String },

    #[error("file too large: {name} is {size} bytes (limit {limit})")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("{0} is password-protected; supply the password and retry")]
    PasswordProtected(String),

    #[error("{method} could not extract {name}: {reason}")]
    BackendExtractionFailure {
        method: ExtractionMethod,
        name: String,
        reason: String,
    },

    #[error("all extraction backends failed for {name}: {}", join_failures(.failures))]
    AllBackendsFailed {
        name: String,
        failures: Vec<BackendFailure>,
    },

    #[error("{0} has no extractable text")]
    EmptyDocument(String),

    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Short machine-readable tag for reports and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::FileNotFound(_) => "file_not_found",
            ExtractError::InvalidFileType { .. } => "invalid_file_type",
            ExtractError::FileTooLarge { .. } => "file_too_large",
            ExtractError::PasswordProtected(_) => "password_protected",
            ExtractError::BackendExtractionFailure { .. } => "backend_extraction_failure",
            ExtractError::AllBackendsFailed { .. } => "all_backends_failed",
            ExtractError::EmptyDocument(_) => "empty_document",
            ExtractError::Io { .. } => "io",
        }
    }
}

/// One backend's reason for giving up on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFailure {
    pub method: ExtractionMethod,
    pub reason: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.method, self.reason)
    }
}

fn join_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}
