//! Lifecycle of a supervised process.
//!
//! ```text
//! NotStarted ──► Running ──► Exited
//!     │              │
//!     │              └──► Terminating ──► Killed
//!     └──► LaunchFailed
//! ```
//!
//! States only move forward. `Terminating` covers the gentle request and the
//! grace period; `Killed` is reached whether the gentle request or the hard
//! kill brought the process down.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessState {
    #[default]
    NotStarted,
    Running,
    Terminating,
    Killed,
    Exited,
    LaunchFailed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Killed | ProcessState::Exited | ProcessState::LaunchFailed
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (NotStarted, Running)
                | (NotStarted, LaunchFailed)
                | (Running, Exited)
                | (Running, Terminating)
                | (Terminating, Killed)
        )
    }

    /// Move to `next` if that is legal. Returns whether the state changed.
    pub fn advance(&mut self, next: ProcessState) -> bool {
        if !self.can_advance(next) {
            tracing::warn!(from = %self, to = %next, "ignoring invalid process transition");
            return false;
        }
        tracing::trace!(from = %self, to = %next, "process transition");
        *self = next;
        true
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::NotStarted => "not-started",
            ProcessState::Running => "running",
            ProcessState::Terminating => "terminating",
            ProcessState::Killed => "killed",
            ProcessState::Exited => "exited",
            ProcessState::LaunchFailed => "launch-failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let mut state = ProcessState::default();
        assert!(state.advance(ProcessState::Running));
        assert!(state.advance(ProcessState::Exited));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_forced_lifecycle() {
        let mut state = ProcessState::NotStarted;
        assert!(state.advance(ProcessState::Running));
        assert!(state.advance(ProcessState::Terminating));
        assert!(!state.is_terminal());
        assert!(state.advance(ProcessState::Killed));
        assert_eq!(state, ProcessState::Killed);
    }

    #[test]
    fn test_states_never_move_backwards() {
        let mut state = ProcessState::Exited;
        assert!(!state.advance(ProcessState::Running));
        assert!(!state.advance(ProcessState::Terminating));
        assert_eq!(state, ProcessState::Exited);

        let mut state = ProcessState::NotStarted;
        assert!(!state.advance(ProcessState::Killed));
        assert!(state.advance(ProcessState::LaunchFailed));
        assert!(!state.advance(ProcessState::Running));
    }
}
