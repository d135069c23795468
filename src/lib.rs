//! # Tributary
//!
//! Async streaming primitives for feeding a slow consumer from a fast source:
//!
//! - [`lines`]: stream a file as ordered batches of lines, chunk by chunk
//! - [`collector`]: batch any stream into time windows
//! - [`process`]: run a child process, stream its output and kill it on timeout
//! - [`tokenizer`]: the delimiter splitting shared by all of the above
//!
//! Everything is built on tokio. Each stream owns a background task and the
//! resources it holds; dropping the stream cancels the task and releases
//! them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use std::time::Duration;
//! use tributary::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let lines = LineReader::new("access.log").open().await?;
//!
//!     // one batch per second, however fast the file is read
//!     let mut windows = lines.windowed(Duration::from_secs(1));
//!     while let Some(window) = windows.next().await {
//!         let lines: usize = window
//!             .into_iter()
//!             .map(|batch| batch.map(|b| b.len()).unwrap_or(0))
//!             .sum();
//!         println!("{} lines this second", lines);
//!     }
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod error;
pub mod lines;
pub mod process;
pub mod sinks;
pub mod tokenizer;
pub mod traits;
pub mod util;

// Re-export commonly used items
pub mod prelude {
    pub use crate::collector::{CollectorConfig, WindowedBatches, WindowedCollector, WindowedExt};
    pub use crate::error::{Error, Result};
    pub use crate::lines::{LineBatch, LineBatches, LineReader, LineReaderConfig};
    pub use crate::process::{
        OutputEvent, OutputStream, ProcessCommand, ProcessConfig, ProcessOutput,
        TerminationReason,
    };
    pub use crate::sinks::{CollectSink, CountSink, FileSink};
    pub use crate::traits::Sink;
}

// Re-export main error type
pub use error::{Error, Result};

// Feature flags for optional dependencies
#[cfg(feature = "metrics")]
pub mod metrics;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
