use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::errors::QueueError;
use crate::queue::{Message, QueueClient};

mod shutdown;

use shutdown::{Observed, ShutdownSignal, Watcher};

/// Creates the handoff channel a [`Listener`] dispatches into.
///
/// The channel holds a single slot, and the listener waits for that slot to be
/// drained after every send, so each message is handed over only once the
/// consumer has taken the previous one.
pub fn channel() -> (MessageSender, MessageStream) {
    let (tx, rx) = mpsc::channel(1);
    (MessageSender { inner: tx }, MessageStream { inner: rx })
}

/// The write side of a listener's output channel.
///
/// Only [`channel`] creates one, so the listener always dispatches into a
/// single-slot channel and a message counts as handed over only after the
/// consumer has received it.
#[derive(Debug, Clone)]
pub struct MessageSender {
    inner: mpsc::Sender<Message>,
}

/// The read side of a listener's output channel.
///
/// Yields messages until the listener is closed.
#[derive(Debug)]
pub struct MessageStream {
    inner: mpsc::Receiver<Message>,
}

impl MessageStream {
    pub async fn recv(&mut self) -> Option<Message> {
        self.inner.recv().await
    }
}

impl Stream for MessageStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_recv(cx)
    }
}

/// Turns a [`QueueClient`] into a push-based stream of messages.
///
/// A listener is `Running` from construction until a [`Listener::close`] has
/// been processed by the poll loop, after which it is closed for good.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sqs_listener::listener::{self, Listener};
/// use sqs_listener::queue::SqsQueueClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), sqs_listener::errors::QueueError> {
///     let queue_url = "https://sqs.eu-west-1.amazonaws.com/123/jobs";
///     let client = SqsQueueClient::new("eu-west-1", queue_url).await?;
///     let listener = Arc::new(Listener::new(Arc::new(client)));
///
///     let (tx, mut messages) = listener::channel();
///     let poller = listener.spawn(tx, true);
///
///     if let Some(message) = messages.recv().await {
///         println!("Received message: {}", message.body);
///     }
///
///     // Keep draining while closing so a pending handoff cannot block shutdown.
///     let drain = tokio::spawn(async move { while messages.recv().await.is_some() {} });
///     listener.close().await?;
///     drain.await.ok();
///     poller.await.ok();
///     Ok(())
/// }
/// ```
pub struct Listener {
    client: Arc<dyn QueueClient>,
    shutdown: ShutdownSignal,
}

impl Listener {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        Listener {
            client,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Polls the queue until [`Listener::close`] is called.
    ///
    /// Each received message is sent on `output` in the order the batch was
    /// returned, waiting for the consumer to take it before sending the next.
    /// With `auto_cleanup` the batch is deleted once it has been handed over.
    /// Receive and delete errors are logged and polling carries on.
    ///
    /// The close request is observed only at the top of each iteration. On
    /// shutdown `output` is dropped, which ends the consumer's stream.
    pub async fn poll(&self, output: MessageSender, auto_cleanup: bool) -> Result<(), QueueError> {
        let mut watcher = self.shutdown.watch().await;

        loop {
            match watcher.check() {
                Observed::Running => {}
                Observed::Requested(ack) => {
                    drop(output);
                    watcher.finish(ack);
                    debug!("SQS listener closed");
                    return Ok(());
                }
                Observed::Closed => return Err(QueueError::ListenerClosed),
            }

            let messages = match self.client.receive_messages().await {
                Ok(messages) => messages,
                Err(err) => {
                    error!(error = %err, "Error on reading SQS messages");
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            let (delivered, consumer_gone) = dispatch(&output, messages).await;

            if auto_cleanup && !delivered.is_empty() {
                if let Err(err) = self.client.delete_messages(&delivered).await {
                    error!(error = %err, "Error on deleting SQS messages");
                }
            }

            if consumer_gone {
                warn!("Message consumer went away, waiting for the listener to be closed");
                drop(output);
                return park_until_closed(watcher).await;
            }

            // Zero wait time makes receive return immediately; give other tasks a turn.
            tokio::task::yield_now().await;
        }
    }

    /// Runs [`Listener::poll`] on its own task.
    pub fn spawn(
        self: &Arc<Self>,
        output: MessageSender,
        auto_cleanup: bool,
    ) -> JoinHandle<Result<(), QueueError>> {
        let listener = Arc::clone(self);
        tokio::spawn(async move { listener.poll(output, auto_cleanup).await })
    }

    /// Stops the poll loop and waits until it has taken the request.
    ///
    /// This blocks while the loop is handing a message to a consumer that is
    /// not reading, so keep draining the stream while closing. Returns
    /// [`QueueError::ListenerClosed`] if the listener was already closed.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.shutdown.request().await
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_closed()
    }
}

/// Hands `messages` to the consumer one at a time.
///
/// Returns the messages the consumer is known to have taken and whether the
/// consumer has dropped its end of the channel.
async fn dispatch(output: &MessageSender, messages: Vec<Message>) -> (Vec<Message>, bool) {
    let output = &output.inner;
    let mut delivered = Vec::with_capacity(messages.len());

    for message in messages {
        if output.send(message.clone()).await.is_err() {
            return (delivered, true);
        }

        // The slot frees up only once the consumer has received the message.
        match output.reserve().await {
            Ok(permit) => drop(permit),
            Err(_) => return (delivered, true),
        }
        delivered.push(message);
    }

    (delivered, false)
}

async fn park_until_closed(mut watcher: Watcher<'_>) -> Result<(), QueueError> {
    match watcher.wait().await {
        Observed::Requested(ack) => {
            watcher.finish(ack);
            debug!("SQS listener closed");
            Ok(())
        }
        Observed::Running | Observed::Closed => Err(QueueError::ListenerClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MockQueueClient;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    const MAX_TIMEOUT: Duration = Duration::from_secs(3);

    fn listener(client: MockQueueClient) -> Arc<Listener> {
        Arc::new(Listener::new(Arc::new(client)))
    }

    #[tokio::test]
    async fn new_listener_is_running() {
        let listener = listener(MockQueueClient::new());
        assert!(!listener.is_closed());
    }

    #[test]
    fn handoff_channel_holds_a_single_message() {
        let (tx, _messages) = channel();
        assert_eq!(tx.inner.max_capacity(), 1);
    }

    #[tokio::test]
    async fn unread_messages_are_not_deleted() {
        let deleted = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut client = MockQueueClient::new();
        client.expect_receive_messages().returning(|| {
            Ok(vec![
                Message::new("a", "1"),
                Message::new("b", "2"),
                Message::new("c", "3"),
            ])
        });
        {
            let deleted = deleted.clone();
            client
                .expect_delete_messages()
                .returning(move |messages: &[Message]| {
                    deleted.lock().unwrap().extend_from_slice(messages);
                    Ok(())
                });
        }
        let listener = listener(client);

        let (tx, mut messages) = channel();
        let poller = listener.spawn(tx, true);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(deleted.lock().unwrap().is_empty());

        let first = timeout(MAX_TIMEOUT, messages.recv()).await.unwrap();
        assert_eq!(first, Some(Message::new("a", "1")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(deleted.lock().unwrap().is_empty());

        let drain = tokio::spawn(async move { while messages.recv().await.is_some() {} });
        timeout(MAX_TIMEOUT, listener.close()).await.unwrap().unwrap();
        timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap().unwrap();
        timeout(MAX_TIMEOUT, drain).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_ends_poll_and_closes_stream() {
        let mut client = MockQueueClient::new();
        client.expect_receive_messages().returning(|| Ok(Vec::new()));
        client.expect_delete_messages().never();
        let listener = listener(client);

        let (tx, mut messages) = channel();
        let poller = listener.spawn(tx, true);

        timeout(MAX_TIMEOUT, listener.close()).await.unwrap().unwrap();

        let result = timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(timeout(MAX_TIMEOUT, messages.recv()).await.unwrap(), None);
        assert!(listener.is_closed());
    }

    #[tokio::test]
    async fn closed_listener_cannot_be_reused() {
        let mut client = MockQueueClient::new();
        client.expect_receive_messages().returning(|| Ok(Vec::new()));
        let listener = listener(client);

        let (tx, _messages) = channel();
        let poller = listener.spawn(tx, false);
        timeout(MAX_TIMEOUT, listener.close()).await.unwrap().unwrap();
        timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap().unwrap();

        assert!(matches!(listener.close().await, Err(QueueError::ListenerClosed)));

        let (tx, mut messages) = channel();
        let result = timeout(MAX_TIMEOUT, listener.poll(tx, false)).await.unwrap();
        assert!(matches!(result, Err(QueueError::ListenerClosed)));
        assert_eq!(messages.recv().await, None);
    }

    #[tokio::test]
    async fn batch_is_dispatched_in_order_then_deleted() {
        let batch = vec![
            Message::new("1", "first"),
            Message::new("2", "second"),
            Message::new("3", "third"),
        ];
        let expected = batch.clone();

        let mut client = MockQueueClient::new();
        let mut served = false;
        client.expect_receive_messages().returning(move || {
            if served {
                Ok(Vec::new())
            } else {
                served = true;
                Ok(batch.clone())
            }
        });
        let deleted = expected.clone();
        client
            .expect_delete_messages()
            .withf(move |messages: &[Message]| messages == deleted.as_slice())
            .times(1)
            .returning(|_| Ok(()));
        let listener = listener(client);

        let (tx, mut messages) = channel();
        let poller = listener.spawn(tx, true);

        let first_three = (&mut messages).take(3).collect::<Vec<_>>();
        let received: Vec<Message> = timeout(MAX_TIMEOUT, first_three).await.unwrap();
        assert_eq!(received, expected);

        timeout(MAX_TIMEOUT, listener.close()).await.unwrap().unwrap();
        timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap().unwrap();
        assert_eq!(messages.next().await, None);
    }

    #[tokio::test]
    async fn without_auto_cleanup_nothing_is_deleted() {
        let mut client = MockQueueClient::new();
        client
            .expect_receive_messages()
            .returning(|| Ok(vec![Message::new("abcdef123456", "body")]));
        client.expect_delete_messages().never();
        let listener = listener(client);

        let (tx, mut messages) = channel();
        let poller = listener.spawn(tx, false);

        let first = timeout(MAX_TIMEOUT, messages.recv()).await.unwrap();
        assert_eq!(first, Some(Message::new("abcdef123456", "body")));

        let drain = tokio::spawn(async move { while messages.recv().await.is_some() {} });
        timeout(MAX_TIMEOUT, listener.close()).await.unwrap().unwrap();
        timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap().unwrap();
        timeout(MAX_TIMEOUT, drain).await.unwrap().unwrap();
    }

    #[traced_test]
    #[tokio::test]
    async fn receive_errors_are_logged_and_polling_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut client = MockQueueClient::new();
        {
            let calls = calls.clone();
            client.expect_receive_messages().returning(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueueError::Receive("connection refused".into()))
            });
        }
        let listener = listener(client);

        let (tx, _messages) = channel();
        let poller = listener.spawn(tx, true);

        timeout(MAX_TIMEOUT, async {
            while calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!poller.is_finished());

        timeout(MAX_TIMEOUT, listener.close()).await.unwrap().unwrap();
        timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap().unwrap();
        assert!(logs_contain("Error on reading SQS messages"));
    }

    #[traced_test]
    #[tokio::test]
    async fn delete_errors_do_not_stop_polling() {
        let mut client = MockQueueClient::new();
        client
            .expect_receive_messages()
            .returning(|| Ok(vec![Message::new("h", "b")]));
        client.expect_delete_messages().returning(|_| {
            Err(QueueError::Delete {
                count: 1,
                source: "inner error message".into(),
            })
        });
        let listener = listener(client);

        let (tx, mut messages) = channel();
        let poller = listener.spawn(tx, true);

        for _ in 0..3 {
            let message = timeout(MAX_TIMEOUT, messages.recv()).await.unwrap();
            assert!(message.is_some());
        }

        let drain = tokio::spawn(async move { while messages.recv().await.is_some() {} });
        timeout(MAX_TIMEOUT, listener.close()).await.unwrap().unwrap();
        timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap().unwrap();
        drain.await.unwrap();
        assert!(logs_contain("Error on deleting SQS messages"));
    }

    #[tokio::test]
    async fn close_waits_for_pending_handoff() {
        let mut client = MockQueueClient::new();
        client
            .expect_receive_messages()
            .returning(|| Ok(vec![Message::new("a", "1"), Message::new("b", "2")]));
        let listener = listener(client);

        let (tx, mut messages) = channel();
        let poller = listener.spawn(tx, false);

        let closer = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.close().await })
        };

        // Nobody is reading, so the loop is stuck mid-batch and cannot see the request.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!closer.is_finished());

        let drain = tokio::spawn(async move { while messages.recv().await.is_some() {} });
        timeout(MAX_TIMEOUT, closer).await.unwrap().unwrap().unwrap();
        timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap().unwrap();
        timeout(MAX_TIMEOUT, drain).await.unwrap().unwrap();
    }

    #[traced_test]
    #[tokio::test]
    async fn departed_consumer_parks_loop_without_deleting_undelivered() {
        let receives = Arc::new(AtomicUsize::new(0));
        let mut client = MockQueueClient::new();
        {
            let receives = receives.clone();
            client.expect_receive_messages().returning(move || {
                receives.fetch_add(1, Ordering::SeqCst);
                Ok(vec![Message::new("a", "1"), Message::new("b", "2")])
            });
        }
        client
            .expect_delete_messages()
            .withf(|messages: &[Message]| messages.iter().all(|m| m.receipt_handle == "a"))
            .returning(|_| Ok(()));
        let listener = listener(client);

        let (tx, mut messages) = channel();
        let poller = listener.spawn(tx, true);

        let first = timeout(MAX_TIMEOUT, messages.recv()).await.unwrap();
        assert_eq!(first, Some(Message::new("a", "1")));
        drop(messages);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(receives.load(Ordering::SeqCst), 1);
        assert!(!poller.is_finished());

        timeout(MAX_TIMEOUT, listener.close()).await.unwrap().unwrap();
        timeout(MAX_TIMEOUT, poller).await.unwrap().unwrap().unwrap();
        assert!(logs_contain("Message consumer went away"));
    }
}
