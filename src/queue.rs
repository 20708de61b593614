use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sqs::types::Message as SqsMessage;
use tracing::{debug, warn};

use crate::client::{AwsSessionFactory, SessionFactory, SqsService};
use crate::errors::{BoxError, QueueError};

pub mod config;

use config::{ClientConfig, ReceiveConfig};

/// The body of an SQS message together with the receipt handle of its delivery.
///
/// The receipt handle is only valid until the visibility timeout elapses or the
/// message is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub receipt_handle: String,
    pub body: String,
}

impl Message {
    /// Creates a message from a receipt handle and a body.
    pub fn new(receipt_handle: impl Into<String>, body: impl Into<String>) -> Self {
        Message {
            receipt_handle: receipt_handle.into(),
            body: body.into(),
        }
    }
}

/// Operations against a single queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Receives up to 10 messages. An empty queue yields an empty batch, not an error.
    async fn receive_messages(&self) -> Result<Vec<Message>, QueueError>;

    /// Deletes every message in `messages`, continuing past individual failures.
    async fn delete_messages(&self, messages: &[Message]) -> Result<(), QueueError>;

    /// Queues `body` and returns the provider-assigned message ID.
    async fn send_message(&self, body: &str) -> Result<String, QueueError>;
}

/// A [`QueueClient`] bound to one SQS queue URL.
#[derive(Clone)]
pub struct SqsQueueClient {
    queue_url: String,
    service: Arc<dyn SqsService>,
    receive_config: ReceiveConfig,
}

impl SqsQueueClient {
    /// Connects to `queue_url` in `region` using credentials from the environment.
    pub async fn new(region: &str, queue_url: &str) -> Result<Self, QueueError> {
        Self::with_factory(&AwsSessionFactory::from_env(), region, queue_url).await
    }

    /// Connects using a service handle produced by `factory`.
    pub async fn with_factory(
        factory: &dyn SessionFactory,
        region: &str,
        queue_url: &str,
    ) -> Result<Self, QueueError> {
        if queue_url.trim().is_empty() {
            return Err(QueueError::InitializationError(
                "queue url must not be empty".to_string(),
            ));
        }
        let service = factory.create_service(region).await?;
        Ok(Self::from_service(queue_url, service))
    }

    /// Connects using the region, queue and endpoint named in `config`.
    pub async fn from_config(config: &ClientConfig) -> Result<Self, QueueError> {
        let mut factory = AwsSessionFactory::from_env();
        if let Some(endpoint_url) = &config.endpoint_url {
            factory = factory.endpoint_url(endpoint_url);
        }
        Self::with_factory(&factory, &config.region, &config.queue_url).await
    }

    /// Wraps an existing service handle.
    pub fn from_service(queue_url: &str, service: Arc<dyn SqsService>) -> Self {
        debug!(queue_url, "Initializing SQS client");
        SqsQueueClient {
            queue_url: queue_url.to_string(),
            service,
            receive_config: ReceiveConfig::default(),
        }
    }

    /// The queue URL this client was bound to at construction.
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

impl std::fmt::Debug for SqsQueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsQueueClient")
            .field("queue_url", &self.queue_url)
            .field("receive_config", &self.receive_config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn receive_messages(&self) -> Result<Vec<Message>, QueueError> {
        let raw = self
            .service
            .receive_message(&self.queue_url, &self.receive_config)
            .await
            .map_err(QueueError::Receive)?;

        if raw.is_empty() {
            return Ok(Vec::new());
        }

        debug!(queue_url = %self.queue_url, count = raw.len(), "Received SQS messages");
        Ok(unmarshal_messages(raw))
    }

    async fn delete_messages(&self, messages: &[Message]) -> Result<(), QueueError> {
        let mut error_count = 0;
        let mut last_error: Option<BoxError> = None;

        for message in messages {
            if let Err(err) = self
                .service
                .delete_message(&self.queue_url, &message.receipt_handle)
                .await
            {
                warn!(
                    queue_url = %self.queue_url,
                    receipt_handle = %message.receipt_handle,
                    error = %err,
                    "Failed to delete SQS message"
                );
                error_count += 1;
                last_error = Some(err);
            }
        }

        match last_error {
            Some(source) => Err(QueueError::Delete {
                count: error_count,
                source,
            }),
            None => Ok(()),
        }
    }

    async fn send_message(&self, body: &str) -> Result<String, QueueError> {
        let message_id = self
            .service
            .send_message(&self.queue_url, body)
            .await
            .map_err(|source| QueueError::Send {
                queue_url: self.queue_url.clone(),
                source,
            })?;

        match message_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(QueueError::MissingMessageId(self.queue_url.clone())),
        }
    }
}

fn unmarshal_messages(raw: Vec<SqsMessage>) -> Vec<Message> {
    raw.into_iter()
        .filter_map(|msg| {
            let Some(receipt_handle) = msg.receipt_handle() else {
                warn!(
                    message_id = ?msg.message_id(),
                    "Dropping SQS message without a receipt handle"
                );
                return None;
            };
            Some(Message::new(receipt_handle, msg.body().unwrap_or_default()))
        })
        .collect()
}
