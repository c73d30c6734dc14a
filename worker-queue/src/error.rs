//! Queue error types.

/// Errors raised by the command queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Database query or connection failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A claimed row could not be interpreted.
    #[error("Invalid command row: {0}")]
    InvalidCommand(String),

    /// Reconnecting kept failing; the process cannot continue.
    #[error("Giving up after {attempts} connection attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last transient error.
        #[source]
        source: Box<QueueError>,
    },

    /// A handler reported a failure it could not record.
    #[error("Fatal worker failure: {0}")]
    Fatal(String),
}

impl QueueError {
    /// Whether the error is a connection-level failure worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Result alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
