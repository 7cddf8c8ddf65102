//! Bounded dispatch queue between the listener and the workers
//!
//! One producer (the listener) pushes with a bounded wait; any number of
//! consumers pull. When the producer closes its end, consumers drain what is
//! buffered and then observe end-of-queue.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Error)]
pub enum PushError<T> {
    /// Queue stayed full for the whole timeout; the item was not delivered
    #[error("dispatch queue saturated")]
    Saturated(T),

    /// Every consumer is gone
    #[error("dispatch queue closed")]
    Closed(T),
}

impl<T> PushError<T> {
    /// Hands back the undelivered item
    pub fn into_inner(self) -> T {
        match self {
            PushError::Saturated(item) | PushError::Closed(item) => item,
        }
    }
}

/// Creates a queue holding at most `capacity` items
pub fn dispatch_queue<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> QueueSender<T> {
    /// Enqueues `item`, waiting at most `timeout` for a free slot
    pub async fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        match self.tx.send_timeout(item, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(item)) => Err(PushError::Saturated(item)),
            Err(SendTimeoutError::Closed(item)) => Err(PushError::Closed(item)),
        }
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Signals that nothing more will be pushed
    pub fn close(self) {
        drop(self.tx);
    }
}

/// Consumer end; clone it once per worker
pub struct QueueReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Next item, or `None` once the queue is closed and drained
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}
