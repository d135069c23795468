//! Pull-side and push-side seams around the streaming primitives.
//!
//! [`LineBatches`](crate::lines::LineBatches) and
//! [`OutputStream`](crate::process::OutputStream) are both a `Stream` and a
//! [`Source`], so a caller can either poll them or ask for "up to N" ready
//! items at once. Batches end up in a [`Sink`]; the diagnostic line copy is
//! a [`FileSink`](crate::sinks::FileSink).

use crate::error::Result;
use async_trait::async_trait;

/// Something that hands out whatever is ready, up to a demand.
///
/// `handle_demand` waits for at least one item, then takes only what is
/// already available without waiting further. An empty `Vec` means the
/// source is exhausted and will stay so.
///
/// ```rust,no_run
/// use tributary::lines::LineReader;
/// use tributary::traits::Source;
///
/// # async fn run() -> tributary::Result<()> {
/// let mut batches = LineReader::new("app.log").open().await?;
/// loop {
///     let ready = batches.handle_demand(8).await?;
///     if ready.is_empty() {
///         break;
///     }
///     let lines: usize = ready.iter().map(Vec::len).sum();
///     println!("{} batches, {} lines", ready.len(), lines);
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Source {
    type Item: Send + 'static;

    /// Return between one and `demand` items, or none once exhausted.
    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>>;

    /// Wait for a single item.
    async fn next(&mut self) -> Result<Option<Self::Item>> {
        let items = self.handle_demand(1).await?;
        Ok(items.into_iter().next())
    }
}

/// Batch-first consumer of records.
///
/// ```rust
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use tributary::error::Result;
/// use tributary::traits::Sink;
///
/// /// Keeps only the longest line seen
/// #[derive(Default)]
/// struct LongestLine(Option<Bytes>);
///
/// #[async_trait]
/// impl Sink for LongestLine {
///     type Item = Bytes;
///
///     async fn write_batch(&mut self, lines: Vec<Bytes>) -> Result<()> {
///         for line in lines {
///             if self.0.as_ref().map_or(true, |best| line.len() > best.len()) {
///                 self.0 = Some(line);
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Sink {
    type Item: Send + 'static;

    /// Write one batch, keeping its order.
    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()>;

    async fn write(&mut self, item: Self::Item) -> Result<()> {
        self.write_batch(vec![item]).await
    }

    /// Flush whatever the sink still holds. Called once upstream is done.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
