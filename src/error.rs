use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("cannot reach the notebook server: {0}")]
    #[diagnostic(help("check that the server is running and that base_url in kira-ln.json is correct"))]
    Connection(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("server returned status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response from server: {0}")]
    Decode(String),

    #[error("another request for experiment {0} is still in progress")]
    Busy(String),

    #[error("response discarded: session context changed while the request was in flight")]
    Discarded,

    #[error("invalid experiment id: {0}")]
    InvalidExperimentId(String),

    #[error("invalid group code: {0}")]
    InvalidGroupCode(String),

    #[error("invalid experiment status: {0}")]
    InvalidStatus(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    /// Classifies a non-2xx response. `message` is the server's `error` field,
    /// surfaced verbatim.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => KiraError::Auth(message),
            403 => KiraError::Forbidden(message),
            404 => KiraError::NotFound(message),
            400..=499 => KiraError::Validation(message),
            _ => KiraError::Server { status, message },
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, KiraError::Connection(_))
    }
}
