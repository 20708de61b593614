use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Mutex, MutexGuard, mpsc, oneshot};

use crate::errors::QueueError;

type Ack = oneshot::Sender<()>;

/// A synchronous rendezvous between `close` and the poll loop.
///
/// A close request carries an acknowledgement sender; the requester waits until
/// the poll loop has taken the request and acknowledged it, so shutdown never
/// completes before the loop has actually stopped.
pub(crate) struct ShutdownSignal {
    tx: mpsc::Sender<Ack>,
    rx: Mutex<mpsc::Receiver<Ack>>,
}

/// Outcome of checking the signal from the poll loop.
pub(crate) enum Observed {
    Running,
    Requested(Ack),
    Closed,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        ShutdownSignal {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Requests shutdown and waits for the poll loop to acknowledge it.
    pub(crate) async fn request(&self) -> Result<(), QueueError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(ack_tx)
            .await
            .map_err(|_| QueueError::ListenerClosed)?;
        ack_rx.await.map_err(|_| QueueError::ListenerClosed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Takes exclusive ownership of the receiving side for one poll loop.
    pub(crate) async fn watch(&self) -> Watcher<'_> {
        Watcher {
            rx: self.rx.lock().await,
        }
    }
}

pub(crate) struct Watcher<'a> {
    rx: MutexGuard<'a, mpsc::Receiver<Ack>>,
}

impl Watcher<'_> {
    /// Non-blocking check for a pending close request.
    pub(crate) fn check(&mut self) -> Observed {
        match self.rx.try_recv() {
            Ok(ack) => Observed::Requested(ack),
            Err(TryRecvError::Empty) => Observed::Running,
            Err(TryRecvError::Disconnected) => Observed::Closed,
        }
    }

    /// Parks until a close request arrives.
    pub(crate) async fn wait(&mut self) -> Observed {
        match self.rx.recv().await {
            Some(ack) => Observed::Requested(ack),
            None => Observed::Closed,
        }
    }

    /// Moves the signal to its terminal state and acknowledges the closer.
    ///
    /// Requests queued behind the acknowledged one are dropped, which fails
    /// their `request` with `ListenerClosed`.
    pub(crate) fn finish(&mut self, ack: Ack) {
        self.rx.close();
        while let Ok(pending) = self.rx.try_recv() {
            drop(pending);
        }
        let _ = ack.send(());
    }
}
