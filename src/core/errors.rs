use thiserror::Error;
use super::types::{TaskId, TaskStatus};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload API error: {0}")]
    Api(String),

    #[error("Manager shutdown")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
