//! Sink implementations.
//!
//! Batch-first sinks for draining line batches, windowed batches or process
//! output. [`FileSink`] also backs the byte-level diagnostic copy written by
//! [`crate::lines::LineReader::with_copy`].

use async_trait::async_trait;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as TokioMutex;

use crate::error::{IoContext, Result};
use crate::traits::Sink;

/// A sink that collects items into a vector.
pub struct CollectSink<T> {
    items: Arc<TokioMutex<Vec<T>>>,
}

impl<T: Send + 'static + Clone> CollectSink<T> {
    /// Create a new collect sink
    pub fn new() -> Self {
        Self {
            items: Arc::new(TokioMutex::new(Vec::new())),
        }
    }

    /// Get the collected items
    pub async fn into_items(self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    /// Get a clone of the items Arc for external access
    pub fn items(&self) -> Arc<TokioMutex<Vec<T>>> {
        self.items.clone()
    }
}

#[async_trait]
impl<T: Send + 'static + Clone> Sink for CollectSink<T> {
    type Item = T;

    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()> {
        let mut collected = self.items.lock().await;
        collected.extend(items);
        Ok(())
    }
}

impl<T: Send + 'static + Clone> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

/// A sink that counts items and the batches they arrived in
pub struct CountSink<T> {
    counts: Arc<TokioMutex<(usize, usize)>>,
    _phantom: PhantomData<T>,
}

impl<T> CountSink<T> {
    /// Create a new count sink
    pub fn new() -> Self {
        Self {
            counts: Arc::new(TokioMutex::new((0, 0))),
            _phantom: PhantomData,
        }
    }

    /// Number of items written so far
    pub async fn count(&self) -> usize {
        self.counts.lock().await.0
    }

    /// Number of non-empty batches written so far
    pub async fn batches(&self) -> usize {
        self.counts.lock().await.1
    }
}

#[async_trait]
impl<T: Send + 'static> Sink for CountSink<T> {
    type Item = T;

    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut counts = self.counts.lock().await;
        counts.0 += items.len();
        counts.1 += 1;
        Ok(())
    }
}

impl<T> Default for CountSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CountSink<T> {
    fn clone(&self) -> Self {
        Self {
            counts: self.counts.clone(),
            _phantom: PhantomData,
        }
    }
}

/// A sink that writes each byte record to a file followed by a delimiter
pub struct FileSink<T> {
    path: PathBuf,
    writer: tokio::io::BufWriter<tokio::fs::File>,
    delimiter: u8,
    _phantom: PhantomData<T>,
}

impl<T> FileSink<T> {
    /// Create (or truncate) the file at `path`
    pub async fn create<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::create(&path)
            .await
            .io_context(format!("creating {}", path.display()))?;
        Ok(Self {
            path,
            writer: tokio::io::BufWriter::new(file),
            delimiter,
            _phantom: PhantomData,
        })
    }

    /// Create a file sink that appends to an existing file
    pub async fn append<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .io_context(format!("opening {}", path.display()))?;
        Ok(Self {
            path,
            writer: tokio::io::BufWriter::new(file),
            delimiter,
            _phantom: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&mut self) -> Result<()> {
        let context = format!("flushing {}", self.path.display());
        self.writer.flush().await.io_context(context)
    }
}

#[async_trait]
impl<T: AsRef<[u8]> + Send + 'static> Sink for FileSink<T> {
    type Item = T;

    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()> {
        for item in items {
            self.writer
                .write_all(item.as_ref())
                .await
                .io_context("writing record")?;
            self.writer
                .write_u8(self.delimiter)
                .await
                .io_context("writing delimiter")?;
        }
        self.flush().await
    }

    async fn finish(&mut self) -> Result<()> {
        self.flush().await?;
        let context = format!("syncing {}", self.path.display());
        self.writer.get_mut().sync_all().await.io_context(context)
    }
}
