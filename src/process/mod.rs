//! Supervised child processes with streamed output and a kill timeout.
//!
//! [`ProcessCommand::start`] launches the command and returns an
//! [`OutputStream`] of stdout/stderr chunks that always ends with exactly one
//! terminal event. If a timeout is set, a watchdog asks the process (and its
//! process group) to terminate once it expires, then kills it after a short
//! grace period.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use std::time::Duration;
//! use tributary::process::{OutputEvent, ProcessCommand};
//!
//! # async fn run() {
//! let mut events = ProcessCommand::new("/bin/ls")
//!     .arg("-la")
//!     .timeout(Duration::from_secs(5))
//!     .start();
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         OutputEvent::Stdout(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
//!         OutputEvent::Stderr(bytes) => eprint!("{}", String::from_utf8_lossy(&bytes)),
//!         OutputEvent::Terminated(reason) => println!("done: {}", reason),
//!         OutputEvent::Error(e) => eprintln!("failed: {}", e),
//!     }
//! }
//! # }
//! ```

pub mod event;
pub mod state;
pub mod supervisor;


use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, IoContext, Result};

pub use event::{OutputEvent, ProcessOutput, TerminationReason};
pub use state::ProcessState;
pub use supervisor::{kill_pid, OutputStream};

/// Configuration for a supervised process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Force the process down after this long, `None` waits forever
    pub timeout: Option<Duration>,
    /// Time between the terminate request and the hard kill
    pub grace_period: Duration,
    /// Bytes read from a pipe at once
    pub read_buffer_size: usize,
    /// Events buffered between the supervisor and the consumer
    pub channel_capacity: usize,
    /// Working directory of the child, inherited when `None`
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child
    pub env: HashMap<String, String>,
    /// How long to keep reading pipes after the process is gone
    pub pipe_drain_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            grace_period: Duration::from_millis(100),
            read_buffer_size: 8 * 1024,
            channel_capacity: 64,
            working_dir: None,
            env: HashMap::new(),
            pipe_drain_timeout: Duration::from_millis(250),
        }
    }
}

/// An executable plus arguments, ready to be supervised
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub(crate) program: PathBuf,
    pub(crate) args: Vec<String>,
    pub(crate) config: ProcessConfig,
}

impl ProcessCommand {
    /// Create a command for `program`, a path or a name looked up in `PATH`
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            config: ProcessConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProcessConfig) -> Self {
        self.config = config;
        self
    }

    /// Append one argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the timeout; a zero duration means no timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Set the timeout in milliseconds; zero or less means no timeout
    pub fn timeout_millis(self, millis: i64) -> Self {
        self.timeout(Duration::from_millis(millis.max(0) as u64))
    }

    /// Set the time between the terminate request and the hard kill
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period = grace;
        self
    }

    pub fn working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// The command line as it would be typed
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Launch the process and stream its output.
    ///
    /// When the executable cannot be resolved the stream holds a single
    /// `Error(CommandNotFound)` event and no process is created. Must be
    /// called from within a tokio runtime.
    pub fn start(self) -> OutputStream {
        let description = self.display();
        match self.resolved() {
            Ok(command) => OutputStream::spawn(command),
            Err(e) => {
                tracing::warn!(command = %description, "command not found");
                OutputStream::failed(e)
            }
        }
    }

    /// Run to completion and gather everything the process wrote.
    ///
    /// A process that was timed out or signalled still yields `Ok`; look at
    /// [`ProcessOutput::reason`] or call [`ProcessOutput::check`].
    pub async fn output(self) -> Result<ProcessOutput> {
        let mut events = self.resolved()?.start();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while let Some(event) = events.recv().await {
            match event {
                OutputEvent::Stdout(bytes) => stdout.extend_from_slice(&bytes),
                OutputEvent::Stderr(bytes) => stderr.extend_from_slice(&bytes),
                OutputEvent::Terminated(reason) => {
                    return Ok(ProcessOutput {
                        stdout,
                        stderr,
                        reason,
                    })
                }
                OutputEvent::Error(e) => return Err(e),
            }
        }
        Err(Error::ChannelClosed)
    }

    /// Blocking flavour of [`ProcessCommand::output`] for callers outside
    /// any async runtime. Panics if called from within one.
    pub fn output_blocking(self) -> Result<ProcessOutput> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .io_context("building process runtime")?;
        runtime.block_on(self.output())
    }

    /// Replace the program with its resolved path, or fail with
    /// `CommandNotFound`.
    fn resolved(mut self) -> Result<Self> {
        match resolve_executable(&self.program) {
            Some(path) => {
                self.program = path;
                Ok(self)
            }
            None => Err(Error::CommandNotFound(self.program.display().to_string())),
        }
    }
}

/// Resolve `program` to an executable file.
///
/// Anything with more than one path component is checked as is; a bare name
/// is looked up in the directories of `PATH`.
pub fn resolve_executable(program: &Path) -> Option<PathBuf> {
    if program.as_os_str().is_empty() {
        return None;
    }
    if program.is_absolute() || program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
