//! # SQS Listener
//!
//! An asynchronous AWS SQS queue client and a polling listener that turns the
//! queue's request/response API into a cancellable stream of messages.
//!
//! ## Features
//!
//! - Batch receive (up to 10 messages, 120s visibility timeout, no long-poll wait)
//! - Best-effort batch delete that reports the failure count and the last cause
//! - Single message send with provider contract checks
//! - A listener that hands messages to a consumer one at a time, with optional
//!   auto-cleanup of dispatched batches
//! - Cooperative shutdown that waits for the poll loop to stop
//! - Injectable session factory and service handle for testing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqs_listener::{listener::{self, Listener}, queue::{config::ClientConfig, SqsQueueClient}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::from_env()?;
//!     let client = SqsQueueClient::from_config(&config).await?;
//!     let listener = Arc::new(Listener::new(Arc::new(client)));
//!
//!     let (tx, mut messages) = listener::channel();
//!     let poller = listener.spawn(tx, true);
//!
//!     while let Some(message) = messages.recv().await {
//!         println!("Processing message: {}", message.body);
//!     }
//!
//!     poller.await??;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod errors;
pub mod listener;
pub mod queue;
