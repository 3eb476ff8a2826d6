use thiserror::Error;

#[derive(Error, Debug)]
pub enum MqError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error after {0}ms")]
    Timeout(u64),

    #[error("Request failed: {status} - {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Client has been stopped")]
    EngineStopped,

    #[error("Client has not been started")]
    NotStarted,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Message too large: {size} bytes")]
    MessageTooLarge { size: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MqError {
    /// Connection-level failures: the broker may well answer the same request
    /// once a fresh connection is established.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MqError::Connection(_) | MqError::Timeout(_) | MqError::Io(_)
        )
    }

    /// Whether the connection this error was raised on can no longer be used.
    pub(crate) fn invalidates_connection(&self) -> bool {
        self.is_retryable() || matches!(self, MqError::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, MqError>;
