//! Typed FIFO hand-off between any number of producers and one consumer.
//!
//! Besides ordering, the queue tracks how many items were put but not yet
//! acknowledged by the consumer, so a shutdown path can [`QueueSender::join`]
//! until the consumer has finished everything it was handed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::error::QueueError;

#[derive(Debug, Default)]
struct Shared {
    unfinished: AtomicUsize,
    consumer_gone: AtomicBool,
    drained: Notify,
}

impl Shared {
    fn finish_one(&self) {
        if self.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

#[derive(Debug)]
enum Tx<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> Clone for Tx<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
        }
    }
}

#[derive(Debug)]
enum Rx<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

/// Producing half. Cheap to clone.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: Tx<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Consuming half. There is exactly one per queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: Rx<T>,
    shared: Arc<Shared>,
    taken: usize,
}

/// Creates a queue whose `put` never waits.
pub fn unbounded<T>() -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    pair(Tx::Unbounded(tx), Rx::Unbounded(rx))
}

/// Creates a queue holding at most `capacity` undelivered items.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    pair(Tx::Bounded(tx), Rx::Bounded(rx))
}

fn pair<T>(tx: Tx<T>, rx: Rx<T>) -> (QueueSender<T>, QueueReceiver<T>) {
    let shared = Arc::new(Shared::default());
    (
        QueueSender {
            tx,
            shared: shared.clone(),
        },
        QueueReceiver {
            rx,
            shared,
            taken: 0,
        },
    )
}

impl<T> QueueSender<T> {
    /// Enqueues without waiting.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] if a bounded queue is at capacity,
    /// [`QueueError::Closed`] if the consumer is gone.
    pub fn try_put(&self, item: T) -> Result<(), QueueError> {
        self.shared.unfinished.fetch_add(1, Ordering::AcqRel);
        let sent = match &self.tx {
            Tx::Unbounded(tx) => tx.send(item).map_err(|_| QueueError::Closed),
            Tx::Bounded(tx) => tx.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            }),
        };
        if sent.is_err() {
            self.shared.finish_one();
        }
        sent
    }

    /// Enqueues, waiting for capacity on a bounded queue.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] if the consumer is gone.
    pub async fn put(&self, item: T) -> Result<(), QueueError> {
        match &self.tx {
            Tx::Unbounded(_) => self.try_put(item),
            Tx::Bounded(tx) => {
                self.shared.unfinished.fetch_add(1, Ordering::AcqRel);
                let sent = tx.send(item).await.map_err(|_| QueueError::Closed);
                if sent.is_err() {
                    self.shared.finish_one();
                }
                sent
            }
        }
    }

    /// Items put but not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        self.shared.unfinished.load(Ordering::Acquire)
    }

    /// Waits until every item put so far has been acknowledged, or the
    /// consumer has been dropped.
    pub async fn join(&self) {
        loop {
            let drained = self.shared.drained.notified();
            if self.unfinished() == 0 || self.shared.consumer_gone.load(Ordering::Acquire) {
                return;
            }
            drained.await;
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Waits for the next item in arrival order.
    ///
    /// Returns `None` once every sender is dropped (or the queue is closed)
    /// and the backlog is empty.
    pub async fn take(&mut self) -> Option<T> {
        let item = match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        };
        if item.is_some() {
            self.taken += 1;
        }
        item
    }

    /// Marks the oldest taken-but-unacknowledged item as fully processed.
    pub fn ack(&mut self) {
        if self.taken == 0 {
            tracing::warn!("queue ack without a matching take");
            return;
        }
        self.taken -= 1;
        self.shared.finish_one();
    }

    /// Refuses further puts. Items already queued can still be taken.
    pub fn close(&mut self) {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.close(),
            Rx::Unbounded(rx) => rx.close(),
        }
    }
}

impl<T> Drop for QueueReceiver<T> {
    fn drop(&mut self) {
        self.shared.consumer_gone.store(true, Ordering::Release);
        self.shared.drained.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn items_come_out_in_put_order() {
        let (tx, mut rx) = unbounded();
        for i in 0..100 {
            tx.try_put(i).expect("unbounded put should succeed");
        }
        for i in 0..100 {
            assert_eq!(rx.take().await, Some(i));
            rx.ack();
        }
    }

    #[tokio::test]
    async fn take_waits_for_a_producer() {
        let (tx, mut rx) = unbounded::<&'static str>();
        let consumer = tokio::spawn(async move { rx.take().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.try_put("late").expect("put should succeed");

        let got = consumer.await.expect("consumer should not panic");
        assert_eq!(got, Some("late"));
    }

    #[tokio::test]
    async fn take_returns_none_after_senders_drop() {
        let (tx, mut rx) = unbounded();
        tx.try_put(1).expect("put should succeed");
        drop(tx);
        assert_eq!(rx.take().await, Some(1));
        assert_eq!(rx.take().await, None);
    }

    #[tokio::test]
    async fn join_waits_for_acks() {
        let (tx, mut rx) = unbounded();
        tx.try_put(1).expect("put should succeed");
        tx.try_put(2).expect("put should succeed");
        assert_eq!(tx.unfinished(), 2);

        let worker = tokio::spawn(async move {
            while let Some(_item) = rx.take().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
                rx.ack();
            }
        });

        tokio::time::timeout(Duration::from_secs(1), tx.join())
            .await
            .expect("join should finish once both items are acked");
        assert_eq!(tx.unfinished(), 0);

        drop(tx);
        worker.await.expect("worker should not panic");
    }

    #[tokio::test]
    async fn join_returns_when_consumer_is_dropped() {
        let (tx, rx) = unbounded();
        tx.try_put(1).expect("put should succeed");
        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), tx.join())
            .await
            .expect("join must not hang on a dead consumer");
    }

    #[tokio::test]
    async fn bounded_queue_reports_full() {
        let (tx, mut rx) = bounded(1);
        tx.try_put("a").expect("first put fits");
        assert_eq!(tx.try_put("b"), Err(QueueError::Full));
        assert_eq!(tx.unfinished(), 1);

        assert_eq!(rx.take().await, Some("a"));
        rx.ack();
        tx.put("b").await.expect("capacity freed");
        assert_eq!(rx.take().await, Some("b"));
    }

    #[tokio::test]
    async fn closed_queue_rejects_puts_but_drains_backlog() {
        let (tx, mut rx) = unbounded();
        tx.try_put(1).expect("put should succeed");
        rx.close();
        assert_eq!(tx.try_put(2), Err(QueueError::Closed));
        assert_eq!(rx.take().await, Some(1));
        assert_eq!(rx.take().await, None);
    }

    #[tokio::test]
    async fn extra_ack_is_ignored() {
        let (tx, mut rx) = unbounded();
        tx.try_put(1).expect("put should succeed");
        rx.ack();
        assert_eq!(tx.unfinished(), 1, "ack before take must not count");
        rx.take().await;
        rx.ack();
        assert_eq!(tx.unfinished(), 0);
    }
}
