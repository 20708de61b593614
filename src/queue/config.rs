use crate::errors::QueueError;

/// Parameters applied to every receive request.
///
/// The defaults are fixed: a batch ceiling of 10, a 120 second visibility
/// timeout and a zero wait time, so each call returns immediately with
/// whatever is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveConfig {
    /// The maximum number of messages to receive in a single request.
    pub max_number_of_messages: i32,

    /// How long received messages stay hidden from other receivers, in seconds.
    pub visibility_timeout_seconds: i32,

    /// The wait time for long polling, in seconds.
    pub wait_time_seconds: i32,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        ReceiveConfig {
            max_number_of_messages: 10,
            visibility_timeout_seconds: 120,
            wait_time_seconds: 0,
        }
    }
}

/// Where a queue client connects to.
///
/// # Fields
/// - `region`: The AWS region hosting the queue.
/// - `queue_url`: The URL of the queue the client is bound to.
/// - `endpoint_url`: An optional endpoint override, e.g. LocalStack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub region: String,
    pub queue_url: String,
    pub endpoint_url: Option<String>,
}

impl ClientConfig {
    pub const QUEUE_URL_VAR: &'static str = "SQS_QUEUE_URL";
    pub const REGION_VAR: &'static str = "SQS_REGION";
    pub const AWS_REGION_VAR: &'static str = "AWS_REGION";
    pub const ENDPOINT_URL_VAR: &'static str = "SQS_ENDPOINT_URL";

    /// Reads the configuration from process environment variables.
    ///
    /// `SQS_REGION` takes precedence over `AWS_REGION`. Callers wanting `.env`
    /// support should load it (e.g. with `dotenvy`) before calling this.
    pub fn from_env() -> Result<Self, QueueError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, QueueError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let queue_url =
            non_empty(Self::QUEUE_URL_VAR).ok_or_else(|| missing(Self::QUEUE_URL_VAR))?;
        let region = non_empty(Self::REGION_VAR)
            .or_else(|| non_empty(Self::AWS_REGION_VAR))
            .ok_or_else(|| missing(Self::REGION_VAR))?;

        Ok(ClientConfig {
            region,
            queue_url,
            endpoint_url: non_empty(Self::ENDPOINT_URL_VAR),
        })
    }
}

fn missing(key: &str) -> QueueError {
    QueueError::InitializationError(format!("{key} must be set"))
}
