// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded fan-in queue between connection handlers and the sink writer.
//!
//! Every connection handler owns an [`EntrySender`]; the sink writer owns the
//! single [`EntryReceiver`]. Sends wait while the queue is full, which is how a
//! slow sink pushes back on the sockets.
//!
//! The queue is closed by consuming its [`EntryQueue`] handle. Because every
//! other sender belongs to a handler task, and the server only closes the queue
//! after those tasks have all finished, no send can race the close.

use tokio::sync::mpsc;

use crate::errors::ConfigError;
use crate::protocol::LogEntry;

/// Default number of entries buffered between handlers and the writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Creates a queue holding at most `capacity` entries.
pub fn entry_queue(capacity: usize) -> Result<(EntryQueue, EntryReceiver), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::Invalid(
            "queue capacity must be greater than 0".to_string(),
        ));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((
        EntryQueue {
            tx: EntrySender { tx },
            capacity,
        },
        EntryReceiver { rx },
    ))
}

/// Owning handle of the queue. Hands out producers and closes the queue once.
#[derive(Debug)]
pub struct EntryQueue {
    tx: EntrySender,
    capacity: usize,
}

impl EntryQueue {
    /// A new producer handle for a connection handler.
    #[must_use]
    pub fn producer(&self) -> EntrySender {
        self.tx.clone()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Closes the queue. The receiver drains whatever is buffered and then
    /// reports the end of the stream.
    ///
    /// Must only be called once all producers have been dropped; producers that
    /// are still alive keep the queue open.
    pub fn close(self) {
        tracing::debug!(capacity = self.capacity, "Closing entry queue");
        drop(self.tx);
    }
}

/// The queue was closed while a producer still tried to send.
#[derive(Debug, thiserror::Error)]
#[error("entry queue closed")]
pub struct QueueClosed(pub LogEntry);

/// Producer side of the queue, one per connection handler.
#[derive(Debug, Clone)]
pub struct EntrySender {
    tx: mpsc::Sender<LogEntry>,
}

impl EntrySender {
    /// Enqueues an entry, waiting for room if the queue is full.
    pub async fn send(&self, entry: LogEntry) -> Result<(), QueueClosed> {
        self.tx.send(entry).await.map_err(|e| QueueClosed(e.0))
    }

    /// Free slots left in the queue.
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer side of the queue, owned by the sink writer.
#[derive(Debug)]
pub struct EntryReceiver {
    rx: mpsc::Receiver<LogEntry>,
}

impl EntryReceiver {
    /// Next entry in FIFO order, or `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<LogEntry> {
        self.rx.recv().await
    }

    /// Blocking variant of [`EntryReceiver::recv`] for a thread outside the
    /// async runtime. Panics when called from an async context.
    pub fn blocking_recv(&mut self) -> Option<LogEntry> {
        self.rx.blocking_recv()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(entry_queue(0).is_err());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut rx) = entry_queue(8).unwrap();
        let tx = queue.producer();
        for message in ["one", "two", "three"] {
            tx.send(entry(message)).await.unwrap();
        }
        drop(tx);
        queue.close();

        let mut received = Vec::new();
        while let Some(e) = rx.recv().await {
            received.push(e.message);
        }
        assert_eq!(received, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_close_drains_buffered_entries() {
        let (queue, mut rx) = entry_queue(4).unwrap();
        queue.producer().send(entry("buffered")).await.unwrap();
        queue.close();

        assert_eq!(rx.recv().await.unwrap().message, "buffered");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_live_producer_keeps_queue_open() {
        let (queue, mut rx) = entry_queue(4).unwrap();
        let tx = queue.producer();
        queue.close();

        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_blocks_when_full() {
        let (queue, mut rx) = entry_queue(2).unwrap();
        let tx = queue.producer();
        tx.send(entry("a")).await.unwrap();
        tx.send(entry("b")).await.unwrap();
        assert_eq!(tx.available(), 0);

        let blocked = tokio::spawn({
            let tx = tx.clone();
            async move { tx.send(entry("c")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.unwrap().message, "a");
        blocked.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().message, "b");
        assert_eq!(rx.recv().await.unwrap().message, "c");
    }
}
