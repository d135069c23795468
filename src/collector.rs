//! Time-windowed batching of a fast producer for a slower consumer.
//!
//! Two tasks share one buffer. The ingest task appends every upstream item;
//! the drain task wakes once per window, takes everything buffered and emits
//! it as one batch. When upstream completes, the ingest task performs one
//! last drain so nothing that arrived just before completion is lost.
//!
//! Taking and emitting happen under the same lock, which is what keeps
//! batches in upstream order even though two tasks emit them.
//!
//! ```rust
//! use futures::StreamExt;
//! use std::time::Duration;
//! use tributary::collector::WindowedExt;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let batches: Vec<Vec<u32>> = futures::stream::iter(1..=3)
//!     .windowed(Duration::from_secs(5))
//!     .collect()
//!     .await;
//!
//! assert_eq!(batches, vec![vec![1, 2, 3]]);
//! # }
//! ```

use futures::StreamExt;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shortest window the drain task will sleep for. A zero window means
/// "flush as often as the timer allows", not "spin".
pub const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Configuration for a windowed collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Time between two drains
    pub window: Duration,
    /// Batches buffered between the collector and the consumer
    pub channel_capacity: usize,
    /// Capacity reserved for the shared buffer up front
    pub initial_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            channel_capacity: 16,
            initial_capacity: 10_000,
        }
    }
}

/// Turns any stream into a stream of non-empty, time-windowed batches
#[derive(Debug, Clone, Default)]
pub struct WindowedCollector {
    config: CollectorConfig,
}

impl WindowedCollector {
    /// Create a collector flushing every `window`
    pub fn new(window: Duration) -> Self {
        Self::with_config(CollectorConfig {
            window,
            ..CollectorConfig::default()
        })
    }

    /// Create a collector from a signed millisecond count; zero or less
    /// flushes continuously
    pub fn from_millis(millis: i64) -> Self {
        Self::new(Duration::from_millis(millis.max(0) as u64))
    }

    pub fn with_config(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// Set how many batches may wait for the consumer
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    /// Set the capacity reserved for the shared buffer
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_capacity = capacity;
        self
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    /// Start collecting `upstream`. Must be called from within a tokio runtime.
    pub fn collect<S>(&self, upstream: S) -> WindowedBatches<S::Item>
    where
        S: Stream + Send + 'static,
        S::Item: Send + 'static,
    {
        let window = self.config.window.max(MIN_WINDOW);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let buffer = Arc::new(BatchBuffer::with_capacity(self.config.initial_capacity));
        let token = CancellationToken::new();
        let drain_token = token.child_token();

        tracing::info!(window_ms = window.as_millis() as u64, "collecting in windows");

        let drain = tokio::spawn(drain_loop(
            buffer.clone(),
            tx.clone(),
            window,
            drain_token.clone(),
        ));
        let ingest = tokio::spawn(ingest_loop(upstream, buffer, tx, token.clone(), drain_token));

        WindowedBatches {
            rx,
            token,
            handles: vec![ingest, drain],
        }
    }
}

/// The shared buffer. Every access goes through the one lock.
struct BatchBuffer<T> {
    items: TokioMutex<Vec<T>>,
    capacity: usize,
}

impl<T> BatchBuffer<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            items: TokioMutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    async fn push(&self, item: T) {
        self.items.lock().await.push(item);
    }

    /// Take everything buffered and send it as one batch, holding the lock
    /// until the batch is handed over. Returns `false` once the consumer is
    /// gone.
    async fn flush(&self, tx: &mpsc::Sender<Vec<T>>) -> bool {
        let mut items = self.items.lock().await;
        if items.is_empty() {
            return true;
        }
        let batch = std::mem::replace(&mut *items, Vec::with_capacity(self.capacity));
        tracing::trace!(items = batch.len(), "flushing window");

        #[cfg(feature = "metrics")]
        crate::metrics::record_collector_batch();

        tx.send(batch).await.is_ok()
    }
}

async fn drain_loop<T>(
    buffer: Arc<BatchBuffer<T>>,
    tx: mpsc::Sender<Vec<T>>,
    window: Duration,
    token: CancellationToken,
) {
    let ticks = async {
        loop {
            tokio::time::sleep(window).await;
            if !buffer.flush(&tx).await {
                break;
            }
        }
    };
    tokio::select! {
        _ = token.cancelled() => {}
        _ = ticks => {}
    }
}

async fn ingest_loop<S>(
    upstream: S,
    buffer: Arc<BatchBuffer<S::Item>>,
    tx: mpsc::Sender<Vec<S::Item>>,
    token: CancellationToken,
    drain_token: CancellationToken,
) where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    let ingest = async {
        let mut upstream = Box::pin(upstream);
        while let Some(item) = upstream.next().await {
            buffer.push(item).await;
        }
        buffer.flush(&tx).await;
    };

    let completed = tokio::select! {
        _ = token.cancelled() => false,
        _ = ingest => true,
    };
    drain_token.cancel();

    if completed {
        tracing::debug!("upstream completed");
    } else {
        let dropped = buffer.items.try_lock().map(|items| items.len()).unwrap_or_default();
        tracing::debug!(dropped, "collector cancelled, discarding buffered items");
    }
}

/// Stream of non-empty batches in upstream order.
///
/// Dropping it cancels both collector tasks; anything still buffered is
/// discarded.
pub struct WindowedBatches<T> {
    rx: mpsc::Receiver<Vec<T>>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl<T> WindowedBatches<T> {
    /// Receive the next batch
    pub async fn recv(&mut self) -> Option<Vec<T>> {
        self.rx.recv().await
    }

    /// Cancel collection and wait for both tasks to stop.
    pub async fn close(mut self) {
        self.token.cancel();
        self.rx.close();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "collector task failed");
            }
        }
    }
}

impl<T> Stream for WindowedBatches<T> {
    type Item = Vec<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for WindowedBatches<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Extension trait adding windowed batching to every stream
pub trait WindowedExt: Stream + Sized {
    /// Batch this stream's items, flushing every `window` and at completion
    fn windowed(self, window: Duration) -> WindowedBatches<Self::Item>
    where
        Self: Send + 'static,
        Self::Item: Send + 'static,
    {
        WindowedCollector::new(window).collect(self)
    }
}

impl<S: Stream> WindowedExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn delayed<T: Send + 'static>(
        items: Vec<(u64, T)>,
    ) -> impl Stream<Item = T> + Send + 'static {
        futures::stream::iter(items).then(|(delay_ms, item)| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            item
        })
    }

    #[tokio::test]
    async fn test_final_flush_before_first_window() {
        let started = Instant::now();
        let upstream = delayed(vec![(3, 1), (3, 2), (4, 3)]);

        let batches: Vec<Vec<i32>> = WindowedCollector::from_millis(5000)
            .collect(upstream)
            .collect()
            .await;

        assert_eq!(batches, vec![vec![1, 2, 3]]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_between_items() {
        let upstream = delayed(vec![(0, "a"), (0, "b"), (200, "c")]);

        let batches: Vec<Vec<&str>> = upstream
            .windowed(Duration::from_millis(20))
            .collect()
            .await;

        assert_eq!(batches, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[tokio::test]
    async fn test_batches_are_non_empty_and_ordered() {
        let upstream = delayed((0..60).map(|i| (if i % 7 == 0 { 2 } else { 0 }, i)).collect());

        let batches: Vec<Vec<u32>> = upstream
            .windowed(Duration::from_millis(1))
            .collect()
            .await;

        assert!(batches.iter().all(|batch| !batch.is_empty()));
        let flattened: Vec<u32> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, (0..60).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_zero_and_negative_windows_flush_continuously() {
        for millis in [0, -250] {
            let collector = WindowedCollector::from_millis(millis);
            assert_eq!(collector.window(), Duration::ZERO);

            let batches: Vec<Vec<u8>> = collector.collect(delayed(vec![(1, 1), (5, 2)])).collect().await;
            let flattened: Vec<u8> = batches.into_iter().flatten().collect();
            assert_eq!(flattened, vec![1, 2]);
        }
    }

    #[tokio::test]
    async fn test_empty_upstream_emits_nothing() {
        let batches: Vec<Vec<u8>> = futures::stream::empty()
            .windowed(Duration::from_millis(5))
            .collect()
            .await;
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn test_close_stops_tasks_promptly() {
        let upstream = futures::stream::iter(vec![1u8]).chain(futures::stream::pending());
        let mut batches = upstream.windowed(Duration::from_millis(5));

        assert_eq!(batches.recv().await, Some(vec![1]));
        tokio::time::timeout(Duration::from_secs(1), batches.close())
            .await
            .expect("collector tasks should stop after close");
    }
}
