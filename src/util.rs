//! Utility functions for wiring streams, sources and sinks together.

use async_trait::async_trait;
use std::future::Future;
use tokio_stream::{Stream, StreamExt};

use crate::error::Result;
use crate::traits::{Sink, Source};

/// Helper function to create a simple source from a function.
///
/// The function is called once per demanded item; `Ok(None)` ends the source.
pub fn from_fn<F, Fut, T>(f: F) -> FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    FnSource {
        f,
        done: false,
        _phantom: std::marker::PhantomData,
    }
}

/// A source created from a function
pub struct FnSource<F, Fut, T> {
    f: F,
    done: bool,
    _phantom: std::marker::PhantomData<fn() -> (Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> Source for FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>> {
        let mut items = Vec::with_capacity(demand);
        while !self.done && items.len() < demand {
            match (self.f)().await? {
                Some(item) => items.push(item),
                None => self.done = true,
            }
        }
        Ok(items)
    }
}

/// Pull `source` in batches of `demand` items and flatten it into a stream.
///
/// The stream ends when the source returns an empty batch. An error is
/// yielded once and ends the stream.
pub fn source_stream<S>(source: S, demand: usize) -> impl Stream<Item = Result<S::Item>> + Send
where
    S: Source + Send + 'static,
{
    let demand = demand.max(1);
    let batches = futures::stream::unfold(Some(source), move |state| async move {
        let mut source = state?;
        match source.handle_demand(demand).await {
            Ok(items) if items.is_empty() => None,
            Ok(items) => Some((items.into_iter().map(Ok).collect::<Vec<_>>(), Some(source))),
            Err(e) => Some((vec![Err(e)], None)),
        }
    });
    futures::StreamExt::flat_map(batches, futures::stream::iter)
}

/// Write every batch of `batches` to `sink`, then finish it.
///
/// Returns the number of items written. Empty batches are skipped.
pub async fn forward_batches<S, K>(batches: S, sink: &mut K) -> Result<usize>
where
    S: Stream<Item = Vec<K::Item>> + Unpin,
    K: Sink + Send,
{
    let mut batches = batches;
    let mut written = 0;
    while let Some(batch) = batches.next().await {
        if batch.is_empty() {
            continue;
        }
        written += batch.len();
        sink.write_batch(batch).await?;
    }
    sink.finish().await?;
    tracing::debug!(items = written, "forwarded all batches");
    Ok(written)
}

/// Drain a fallible stream into a vector, stopping at the first error.
pub async fn stream_into_vec<S, T>(stream: S) -> Result<Vec<T>>
where
    S: Stream<Item = Result<T>>,
{
    tokio::pin!(stream);
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item?);
    }
    Ok(items)
}
