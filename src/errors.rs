use thiserror::Error;

/// Boxed error type carried as the cause of provider failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for SQS queue client and listener operations.
///
/// Provider failures are always wrapped with the operation that produced them,
/// and the underlying error stays reachable through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// Error that occurs during AWS SQS client initialization.
    ///
    /// This error typically happens when the region or queue URL is missing
    /// from the configuration handed to the client constructor.
    #[error("failed to initialize AWS SQS client: {0}")]
    InitializationError(String),

    /// The session factory could not produce a service handle.
    #[error("error initializing aws session: {0}")]
    Session(#[source] BoxError),

    /// A receive request failed; no messages are returned alongside it.
    #[error("error receiving sqs messages: {0}")]
    Receive(#[source] BoxError),

    /// One or more deletions in a batch failed.
    ///
    /// Only the last failure is kept as the cause; `count` is the total number
    /// of messages that could not be deleted.
    #[error("error deleting {count} messages, captured last error: {source}")]
    Delete {
        count: usize,
        #[source]
        source: BoxError,
    },

    /// The provider rejected a send request for `queue_url`.
    #[error("unable to send message to {queue_url}: {source}")]
    Send {
        queue_url: String,
        #[source]
        source: BoxError,
    },

    /// The provider accepted a message but did not report its ID.
    #[error("queue {0} did not return a message ID")]
    MissingMessageId(String),

    /// The listener has already processed a close request and cannot be reused.
    #[error("listener is already closed")]
    ListenerClosed,
}
