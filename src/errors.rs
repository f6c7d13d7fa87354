use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Missing credential: environment variable {var} is not set")]
    MissingCredential { var: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("File is empty: {path}. Zero-byte files cannot be sent through an upload session.")]
    EmptyFile { path: String },

    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Graph API error during {operation}: HTTP {status}: {body}")]
    Graph {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Graph API response for {operation} is missing field '{field}'")]
    MissingField { operation: String, field: String },

    #[error("Drive '{wanted}' not found (available: {})", format_available(.available))]
    DriveNotFound {
        wanted: String,
        available: Vec<String>,
    },

    #[error("Upload session expired at {expired_at}")]
    SessionExpired { expired_at: String },

    #[error("Server committed the upload after bytes 0-{end} of {total}; remaining ranges were not sent")]
    EarlyCommit { end: u64, total: u64 },

    #[error("Upload failed for bytes {start}-{end}: HTTP {status}: {body}")]
    ChunkUploadFailed {
        start: u64,
        end: u64,
        status: u16,
        body: String,
    },
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    }
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    pub fn graph(operation: &str, status: u16, body: String) -> Self {
        Self::Graph {
            operation: operation.to_string(),
            status,
            body,
        }
    }

    pub fn missing_field(operation: &str, field: &str) -> Self {
        Self::MissingField {
            operation: operation.to_string(),
            field: field.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(e) => e.is_timeout() || e.is_connect(),
            AppError::Graph { status, .. } | AppError::ChunkUploadFailed { status, .. } => {
                crate::uploader::retry::should_retry_status(*status)
            }
            _ => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AppError::Config(_)
                | AppError::Validation { .. }
                | AppError::MissingCredential { .. }
                | AppError::FileNotFound { .. }
                | AppError::EmptyFile { .. }
                | AppError::Authentication { .. }
                | AppError::DriveNotFound { .. }
                | AppError::SessionExpired { .. }
        )
    }
}
