//! Events and results produced by a supervised process.

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Why a supervised process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TerminationReason {
    /// The process exited on its own with this status code
    Exit(i32),
    /// The process was terminated by a signal it did not handle
    UncaughtSignal(i32),
    /// The timeout elapsed and the process was forced down
    TimedOut(Duration),
}

impl TerminationReason {
    /// Whether the process exited on its own with status zero
    pub fn success(&self) -> bool {
        matches!(self, TerminationReason::Exit(0))
    }

    /// The exit code, if the process exited on its own
    pub fn code(&self) -> Option<i32> {
        match self {
            TerminationReason::Exit(code) => Some(*code),
            _ => None,
        }
    }

    /// Map anything but a zero exit to the matching error
    pub fn into_result(self) -> Result<()> {
        match self {
            TerminationReason::Exit(0) => Ok(()),
            TerminationReason::Exit(code) => Err(Error::ExitCode { code }),
            TerminationReason::UncaughtSignal(signal) => Err(Error::UncaughtSignal { signal }),
            TerminationReason::TimedOut(after) => Err(Error::timeout(after.as_millis() as u64)),
        }
    }

    pub(crate) fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return TerminationReason::Exit(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return TerminationReason::UncaughtSignal(signal);
            }
        }
        TerminationReason::Exit(-1)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Exit(code) => write!(f, "exit {}", code),
            TerminationReason::UncaughtSignal(signal) => write!(f, "uncaught signal {}", signal),
            TerminationReason::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

/// One event from a supervised process.
///
/// `Terminated` and `Error` are terminal: exactly one of them ends every
/// stream and nothing follows it. Bytes within one channel keep their order;
/// the two channels are not ordered relative to each other.
#[derive(Debug, Clone)]
pub enum OutputEvent {
    /// Bytes read from the child's stdout
    Stdout(Bytes),
    /// Bytes read from the child's stderr
    Stderr(Bytes),
    /// The child is gone and has been reaped
    Terminated(TerminationReason),
    /// The child could not be found, launched or waited on
    Error(Error),
}

impl OutputEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutputEvent::Terminated(_) | OutputEvent::Error(_))
    }
}

/// Everything a process wrote plus how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub reason: TerminationReason,
}

impl ProcessOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Keep the output only if the process exited with status zero
    pub fn check(self) -> Result<Self> {
        self.reason.into_result()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_into_result() {
        assert!(TerminationReason::Exit(0).into_result().is_ok());
        assert!(matches!(
            TerminationReason::Exit(3).into_result(),
            Err(Error::ExitCode { code: 3 })
        ));
        assert!(matches!(
            TerminationReason::UncaughtSignal(9).into_result(),
            Err(Error::UncaughtSignal { signal: 9 })
        ));
        assert!(matches!(
            TerminationReason::TimedOut(Duration::from_millis(500)).into_result(),
            Err(Error::Timeout { duration_ms: 500 })
        ));
    }

    #[test]
    fn test_terminal_events() {
        assert!(OutputEvent::Terminated(TerminationReason::Exit(0)).is_terminal());
        assert!(OutputEvent::Error(Error::CommandNotFound("x".into())).is_terminal());
        assert!(!OutputEvent::Stdout(Bytes::from_static(b"A")).is_terminal());
    }

    #[test]
    fn test_output_strings_and_check() {
        let output = ProcessOutput {
            stdout: b"hello\n".to_vec(),
            stderr: vec![0xff],
            reason: TerminationReason::Exit(1),
        };
        assert_eq!(output.stdout_string(), "hello\n");
        assert_eq!(output.stderr_string(), "\u{fffd}");
        assert!(output.check().is_err());
    }
}
