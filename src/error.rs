use thiserror::Error;

/// Errors raised while talking to the notification backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    Transport(String),
    /// The backend answered with a non-2xx status. The body text is what the
    /// backend wants surfaced, so it doubles as the message.
    #[error("{body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("ledger error: {0}")]
    Ledger(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("ledger event stream closed")]
    LedgerClosed,
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    /// Whether the error was caused by the caller's input (maps to HTTP 400).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServiceError::Validation(_))
    }

    pub fn status_code(&self) -> u16 {
        if self.is_client_error() { 400 } else { 500 }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
