//! # Event Batcher
//!
//! Time-windowed buffer that collapses bursts of items into batches.
//!
//! Items pushed from any number of producers accumulate in a shared buffer.
//! When items arrive while no timer is pending, a timer is armed for a fixed
//! quiet period; when it fires, the entire buffer is swapped out and sent to
//! the single consumer as one batch. The timer is not re-armed by further
//! arrivals, so every item is delivered at most one quiet period after it was
//! added, while a burst of n items costs one delivery instead of n.
//!
//! Deliveries go over an mpsc channel and are consumed by exactly one task,
//! so they are never interleaved or re-entrant. Items arriving while the
//! consumer is still processing a batch accumulate into the next batch.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct BatchState<T> {
    items: Vec<T>,
    timer_armed: bool,
}

struct BatcherInner<T> {
    quiet_period: Duration,
    state: Mutex<BatchState<T>>,
    tx: mpsc::UnboundedSender<Vec<T>>,
    cancelled: CancellationToken,
}

/// Accumulates items from concurrent producers and delivers them as batches
/// to a single consumer after a quiet period.
pub struct EventBatcher<T> {
    inner: Arc<BatcherInner<T>>,
}

impl<T> Clone for EventBatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> EventBatcher<T> {
    /// Create a batcher and the receiver its batches are delivered on
    pub fn channel(quiet_period: Duration) -> (Self, mpsc::UnboundedReceiver<Vec<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let batcher = Self {
            inner: Arc::new(BatcherInner {
                quiet_period,
                state: Mutex::new(BatchState {
                    items: Vec::new(),
                    timer_armed: false,
                }),
                tx,
                cancelled: CancellationToken::new(),
            }),
        };
        (batcher, rx)
    }

    /// Add one item to the current buffer
    pub async fn add(&self, item: T) {
        if self.inner.cancelled.is_cancelled() {
            return;
        }

        let arm = {
            let mut state = self.inner.state.lock().await;
            state.items.push(item);
            if state.timer_armed {
                false
            } else {
                state.timer_armed = true;
                true
            }
        };

        if arm {
            self.arm_timer();
        }
    }

    /// Add several items to the current buffer
    pub async fn add_all(&self, items: impl IntoIterator<Item = T>) {
        if self.inner.cancelled.is_cancelled() {
            return;
        }

        let arm = {
            let mut state = self.inner.state.lock().await;
            let before = state.items.len();
            state.items.extend(items);
            if state.items.len() == before || state.timer_armed {
                false
            } else {
                state.timer_armed = true;
                true
            }
        };

        if arm {
            self.arm_timer();
        }
    }

    /// Number of items waiting in the current buffer
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.lock().await.items.is_empty()
    }

    /// Take everything currently buffered without waiting for the timer.
    ///
    /// Used at shutdown so buffered items can be handed to their consumer
    /// directly instead of being dropped.
    pub async fn drain(&self) -> Vec<T> {
        let mut state = self.inner.state.lock().await;
        std::mem::take(&mut state.items)
    }

    /// Stop the timer and drop unconsumed items; no partial batch is
    /// delivered
    pub async fn cancel(&self) {
        self.inner.cancelled.cancel();
        let mut state = self.inner.state.lock().await;
        let dropped = state.items.len();
        state.items.clear();
        state.timer_armed = false;
        if dropped > 0 {
            debug!(dropped, "Batcher cancelled with unconsumed items");
        }
    }

    fn arm_timer(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(inner.quiet_period) => {}
                _ = inner.cancelled.cancelled() => return,
            }

            let batch = {
                let mut state = inner.state.lock().await;
                state.timer_armed = false;
                std::mem::take(&mut state.items)
            };

            if !batch.is_empty() {
                trace!(size = batch.len(), "Delivering batch");
                let _ = inner.tx.send(batch);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const QUIET: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_batch() {
        let (batcher, mut rx) = EventBatcher::channel(QUIET);

        batcher.add(1u32).await;
        batcher.add(2).await;
        batcher.add_all(vec![3, 4]).await;

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_item_delivered_twice_or_lost() {
        let (batcher, mut rx) = EventBatcher::channel(QUIET);

        batcher.add(1u32).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first, vec![1]);

        batcher.add(2).await;
        batcher.add(3).await;
        let second = rx.recv().await.unwrap();
        assert_eq!(second, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_within_one_quiet_period() {
        let (batcher, mut rx) = EventBatcher::channel(QUIET);

        batcher.add(1u32).await;
        // The timer armed by the first add is not reset by later arrivals
        tokio::time::advance(Duration::from_secs(2)).await;
        batcher.add(2).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let batch = tokio::time::timeout(Duration::from_millis(10), rx.recv())
            .await
            .expect("batch must be delivered within one quiet period")
            .unwrap();
        assert_eq!(batch, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_unconsumed_items() {
        let (batcher, mut rx) = EventBatcher::channel(QUIET);

        batcher.add(1u32).await;
        batcher.cancel().await;

        let result = tokio::time::timeout(QUIET * 2, rx.recv()).await;
        assert!(result.is_err(), "no delivery after cancel");

        // Adds after cancel are ignored
        batcher.add(2).await;
        assert!(batcher.is_empty().await);
    }
}
