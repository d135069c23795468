//! Lazily stream a file as ordered batches of lines.
//!
//! The file is read in fixed-size chunks. Each chunk is tokenized behind the
//! unterminated tail of the previous one, so a line split across a chunk
//! boundary comes out whole and the output never depends on the chunk size.
//! Lines are [`Bytes`] views into the chunk they were read with; nothing but
//! the tail is ever copied.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use tributary::lines::LineReader;
//!
//! # async fn run() -> tributary::Result<()> {
//! let mut batches = LineReader::new("/var/log/system.log").open().await?;
//! while let Some(batch) = batches.next().await {
//!     for line in batch? {
//!         println!("{}", String::from_utf8_lossy(&line));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, IoContext, Result};
use crate::sinks::FileSink;
use crate::tokenizer::{self, NEWLINE};
use crate::traits::{Sink, Source};

/// Default read size, 256 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default number of lines between progress log events
pub const DEFAULT_PROGRESS_EVERY: u64 = 500_000;

/// Suffix appended to the file name of the diagnostic copy
pub const COPY_SUFFIX: &str = "_copy";

/// An ordered group of lines read from one chunk.
pub type LineBatch = Vec<Bytes>;

/// Configuration for reading a file line by line
#[derive(Debug, Clone)]
pub struct LineReaderConfig {
    /// Maximum bytes read from the file at once
    pub chunk_size: usize,
    /// Record delimiter
    pub delimiter: u8,
    /// Batches buffered between the reader task and the consumer
    pub channel_capacity: usize,
    /// Emit a progress event every this many lines, 0 disables it
    pub progress_every: u64,
    /// Write every line back to this file, followed by the delimiter
    pub copy_to: Option<PathBuf>,
}

impl Default for LineReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: NEWLINE,
            channel_capacity: 16,
            progress_every: DEFAULT_PROGRESS_EVERY,
            copy_to: None,
        }
    }
}

/// Builder for a [`LineBatches`] stream over one file
#[derive(Debug, Clone)]
pub struct LineReader {
    path: PathBuf,
    config: LineReaderConfig,
}

impl LineReader {
    /// Create a reader for `path` with the default configuration
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_config(path, LineReaderConfig::default())
    }

    pub fn with_config<P: Into<PathBuf>>(path: P, config: LineReaderConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    /// Set the chunk size (at least one byte)
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size.max(1);
        self
    }

    /// Set the record delimiter
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    /// Set how many batches may wait for the consumer
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    /// Set the progress interval in lines
    pub fn progress_every(mut self, lines: u64) -> Self {
        self.config.progress_every = lines;
        self
    }

    /// Write every parsed line to `<file>_copy` beside the source so the
    /// two can be compared byte for byte (`cmp file file_copy`).
    pub fn with_copy(mut self) -> Self {
        self.config.copy_to = Some(copy_path_for(&self.path));
        self
    }

    /// Write every parsed line to `path`
    pub fn copy_to<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.copy_to = Some(path.into());
        self
    }

    pub fn config(&self) -> &LineReaderConfig {
        &self.config
    }

    /// Open the file and start streaming it.
    ///
    /// Fails with [`Error::ResourceMissing`] when the file does not exist;
    /// nothing is spawned or allocated in that case.
    pub async fn open(self) -> Result<LineBatches> {
        let LineReader { path, config } = self;

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::resource_missing(path));
            }
            Err(e) => return Err(Error::io(format!("opening {}", path.display()), e)),
        };
        let size = file
            .metadata()
            .await
            .io_context(format!("reading metadata of {}", path.display()))?
            .len();

        let copy = match &config.copy_to {
            Some(copy_path) => Some(FileSink::create(copy_path, config.delimiter).await?),
            None => None,
        };

        tracing::info!(path = %path.display(), bytes = size, "streaming lines");

        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let token = CancellationToken::new();
        let producer = ChunkProducer {
            file,
            path,
            tail: Bytes::new(),
            size,
            consumed: 0,
            lines: 0,
            copy,
            config,
        };
        let handle = tokio::spawn(producer.run(tx, token.clone()));

        Ok(LineBatches {
            rx,
            token,
            handle: Some(handle),
            deferred: None,
        })
    }

    /// Read the whole file and return every line in order.
    pub async fn read_all(self) -> Result<Vec<Bytes>> {
        let mut batches = self.open().await?;
        let mut lines = Vec::new();
        while let Some(batch) = batches.recv().await {
            lines.extend(batch?);
        }
        Ok(lines)
    }
}

/// Path of the diagnostic copy for `path`: the same name with `_copy` appended
pub fn copy_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(COPY_SUFFIX);
    path.with_file_name(name)
}

/// Stream of line batches in file order.
///
/// A read failure is delivered as a final `Err` item. Dropping the stream
/// cancels the reader task; [`LineBatches::close`] also waits for the file
/// handle to be released.
pub struct LineBatches {
    rx: mpsc::Receiver<Result<LineBatch>>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    /// failure read ahead by `handle_demand`, delivered on the next call
    deferred: Option<Error>,
}

impl LineBatches {
    /// Receive the next batch
    pub async fn recv(&mut self) -> Option<Result<LineBatch>> {
        if let Some(e) = self.deferred.take() {
            return Some(Err(e));
        }
        self.rx.recv().await
    }

    /// Stop reading and wait until the reader task has closed the file.
    pub async fn close(mut self) {
        self.token.cancel();
        self.rx.close();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "line reader task failed");
            }
        }
    }
}

impl Stream for LineBatches {
    type Item = Result<LineBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(e) = self.deferred.take() {
            return Poll::Ready(Some(Err(e)));
        }
        self.rx.poll_recv(cx)
    }
}

#[async_trait]
impl Source for LineBatches {
    type Item = LineBatch;

    /// Wait for one batch, then take up to `demand` batches that are
    /// already read. A failure behind ready batches is held back until the
    /// next call.
    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<LineBatch>> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        let mut ready = Vec::new();
        match self.rx.recv().await {
            Some(batch) => ready.push(batch?),
            None => return Ok(ready),
        }
        while ready.len() < demand {
            match self.rx.try_recv() {
                Ok(Ok(batch)) => ready.push(batch),
                Ok(Err(e)) => {
                    self.deferred = Some(e);
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(ready)
    }
}

impl Drop for LineBatches {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Owns the file handle for the lifetime of the reader task.
struct ChunkProducer {
    file: File,
    path: PathBuf,
    tail: Bytes,
    size: u64,
    consumed: u64,
    lines: u64,
    copy: Option<FileSink<Bytes>>,
    config: LineReaderConfig,
}

impl ChunkProducer {
    async fn run(mut self, tx: mpsc::Sender<Result<LineBatch>>, token: CancellationToken) {
        let started = Instant::now();
        let outcome = self.pump(&tx, &token).await;

        if let Some(copy) = self.copy.as_mut() {
            if let Err(e) = copy.finish().await {
                tracing::warn!(path = %copy.path().display(), error = %e, "could not finish line copy");
            }
        }

        match outcome {
            Ok(()) => tracing::info!(
                path = %self.path.display(),
                lines = self.lines,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "finished streaming lines"
            ),
            Err(Error::Shutdown) => tracing::debug!(
                path = %self.path.display(),
                lines = self.lines,
                "line stream cancelled"
            ),
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "line stream failed");
                let _ = tx.send(Err(e)).await;
            }
        }
        // the file handle is released here, whichever way the loop ended
    }

    async fn pump(
        &mut self,
        tx: &mpsc::Sender<Result<LineBatch>>,
        token: &CancellationToken,
    ) -> Result<()> {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Shutdown),
                chunk = self.read_chunk() => chunk?,
            };

            match chunk {
                Some(buf) => {
                    let batch = self.tokenize(buf);
                    if !batch.is_empty() {
                        self.emit(tx, batch).await?;
                    }
                }
                None => {
                    if !self.tail.is_empty() {
                        tracing::debug!(
                            path = %self.path.display(),
                            bytes = self.tail.len(),
                            "emitting unterminated last line"
                        );
                        self.lines += 1;
                        let last = std::mem::take(&mut self.tail);
                        self.emit(tx, vec![last]).await?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Read the next chunk and place it behind the current tail.
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut buf = BytesMut::with_capacity(self.tail.len() + chunk_size);
        buf.extend_from_slice(&self.tail);

        let read = (&mut self.file)
            .take(chunk_size as u64)
            .read_buf(&mut buf)
            .await
            .io_context(format!("reading {}", self.path.display()))?;

        if read == 0 {
            return Ok(None);
        }
        self.consumed += read as u64;
        Ok(Some(buf.freeze()))
    }

    fn tokenize(&mut self, buf: Bytes) -> LineBatch {
        let mut batch = Vec::with_capacity(2048);
        let rest = tokenizer::for_each_span(&buf, self.config.delimiter, false, |span| {
            batch.push(buf.slice(span.range()))
        });
        self.tail = buf.slice(rest.range());

        let before = self.lines;
        self.lines += batch.len() as u64;
        self.report_progress(before);
        batch
    }

    fn report_progress(&self, before: u64) {
        let every = self.config.progress_every;
        if every == 0 || before / every == self.lines / every {
            return;
        }
        tracing::info!(
            path = %self.path.display(),
            lines = self.lines,
            consumed = self.consumed,
            remaining = self.size.saturating_sub(self.consumed),
            "parsed lines"
        );
    }

    async fn emit(&mut self, tx: &mpsc::Sender<Result<LineBatch>>, batch: LineBatch) -> Result<()> {
        if let Some(copy) = self.copy.as_mut() {
            copy.write_batch(batch.clone()).await?;
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_line_batch(batch.len());

        tracing::trace!(lines = batch.len(), "line batch ready");
        tx.send(Ok(batch)).await.map_err(|_| Error::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_copy_path_appends_suffix() {
        assert_eq!(
            copy_path_for(Path::new("/var/log/app.log")),
            PathBuf::from("/var/log/app.log_copy")
        );
        assert_eq!(copy_path_for(Path::new("data")), PathBuf::from("data_copy"));
    }

    #[test]
    fn test_builder_clamps_chunk_size() {
        let reader = LineReader::new("x").chunk_size(0).channel_capacity(0);
        assert_eq!(reader.config().chunk_size, 1);
        assert_eq!(reader.config().channel_capacity, 1);
        assert_eq!(reader.config().delimiter, b'\n');
    }

    #[tokio::test]
    async fn test_missing_file_is_resource_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.log");

        match LineReader::new(&missing).open().await {
            Err(Error::ResourceMissing { path }) => assert_eq!(path, missing),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("missing file should not open"),
        }
    }

    #[tokio::test]
    async fn test_lines_span_chunk_boundaries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"alpha\nbeta\n\ngamma\ndelta").unwrap();

        let lines = LineReader::new(file.path())
            .chunk_size(3)
            .read_all()
            .await
            .unwrap();
        assert_eq!(lines, vec!["alpha", "beta", "gamma", "delta"]);
    }

    #[tokio::test]
    async fn test_custom_delimiter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a,b,,c,").unwrap();

        let lines = LineReader::new(file.path())
            .delimiter(b',')
            .read_all()
            .await
            .unwrap();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_handle_demand_caps_ready_batches() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a\nb\nc\nd\ne\n").unwrap();

        let mut batches = LineReader::new(file.path())
            .chunk_size(2)
            .open()
            .await
            .unwrap();
        // let the reader fill the channel
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut lines = Vec::new();
        loop {
            let ready = batches.handle_demand(2).await.unwrap();
            if ready.is_empty() {
                break;
            }
            assert!(ready.len() <= 2);
            lines.extend(ready.into_iter().flatten());
        }
        assert_eq!(lines, vec!["a", "b", "c", "d", "e"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handle_demand_reports_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut batches = LineReader::new(dir.path()).open().await.unwrap();

        assert!(matches!(batches.handle_demand(4).await, Err(Error::Io { .. })));
        assert!(batches.handle_demand(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_ends_immediately() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut batches = LineReader::new(file.path()).open().await.unwrap();
        assert!(batches.recv().await.is_none());
    }
}
