use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnowcastError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Run ID not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnowcastError {
    /// Message safe to hand back to a caller.
    pub fn public_message(&self) -> String {
        match self {
            SnowcastError::Validation(msg) | SnowcastError::Rejected(msg) => msg.clone(),
            SnowcastError::NotFound(_) => "Run ID not found".to_string(),
            SnowcastError::Io(_) | SnowcastError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SnowcastError>;

/// Outcome kinds an execution unit can report for a single run.
///
/// The worker inspects the kind to decide what the caller gets to see:
/// validation messages are passed through verbatim, everything else is
/// summarized and the detail stays in the logs.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("{0}")]
    Validation(String),

    #[error("remote data preparation failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("{0}")]
    Internal(String),
}

impl ExecutionError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ExecutionError::Internal(err.to_string())
    }
}

/// Failures of the remote data-preparation service.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Remote processing failed: {0}")]
    Rejected(String),

    #[error("Failed to download processed file: {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to process data remotely after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<RemoteError>,
    },
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}
