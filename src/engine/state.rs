// src/engine/state.rs

//! Per-run lifecycle state machine.
//!
//! ```text
//! Pending -> Provisioning -> InstallFailed                  (terminal)
//!                         -> Installed -> Running -> TimedOut   (terminal)
//!                                                -> Completed  (terminal)
//! ```
//!
//! The tracker never blocks a run: an unexpected transition is logged and
//! applied anyway, since the record produced at the end is what matters.

use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Provisioning,
    InstallFailed,
    Installed,
    Running,
    TimedOut,
    Completed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::InstallFailed | RunPhase::TimedOut | RunPhase::Completed
        )
    }

    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Provisioning, InstallFailed)
                | (Provisioning, Installed)
                | (Installed, Running)
                | (Running, TimedOut)
                | (Running, Completed)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Pending => "pending",
            RunPhase::Provisioning => "provisioning",
            RunPhase::InstallFailed => "install_failed",
            RunPhase::Installed => "installed",
            RunPhase::Running => "running",
            RunPhase::TimedOut => "timed_out",
            RunPhase::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Tracks and traces the phase of one run.
#[derive(Debug)]
pub struct RunTracker {
    test_id: String,
    downstream: String,
    phase: RunPhase,
}

impl RunTracker {
    pub fn new(test_id: impl Into<String>, downstream: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            downstream: downstream.into(),
            phase: RunPhase::Pending,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Move to `next`; returns whether the transition was a legal one.
    pub fn advance(&mut self, next: RunPhase) -> bool {
        let legal = self.phase.can_advance_to(next);
        if legal {
            debug!(
                test_id = %self.test_id,
                downstream = %self.downstream,
                from = %self.phase,
                to = %next,
                "run phase transition"
            );
        } else {
            warn!(
                test_id = %self.test_id,
                downstream = %self.downstream,
                from = %self.phase,
                to = %next,
                "unexpected run phase transition"
            );
        }
        self.phase = next;
        legal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let mut t = RunTracker::new("id", "pkg");
        assert!(t.advance(RunPhase::Provisioning));
        assert!(t.advance(RunPhase::Installed));
        assert!(t.advance(RunPhase::Running));
        assert!(t.advance(RunPhase::Completed));
        assert!(t.phase().is_terminal());
    }

    #[test]
    fn install_failure_is_terminal_and_skips_running() {
        let mut t = RunTracker::new("id", "pkg");
        t.advance(RunPhase::Provisioning);
        assert!(t.advance(RunPhase::InstallFailed));
        assert!(t.phase().is_terminal());
        assert!(!RunPhase::InstallFailed.can_advance_to(RunPhase::Running));
    }

    #[test]
    fn terminal_phases_have_no_successors() {
        for terminal in [RunPhase::InstallFailed, RunPhase::TimedOut, RunPhase::Completed] {
            for next in [
                RunPhase::Pending,
                RunPhase::Provisioning,
                RunPhase::Installed,
                RunPhase::Running,
                RunPhase::Completed,
            ] {
                assert!(!terminal.can_advance_to(next));
            }
        }
    }

    #[test]
    fn skipping_a_phase_is_reported() {
        let mut t = RunTracker::new("id", "pkg");
        assert!(!t.advance(RunPhase::Running));
        assert_eq!(t.phase(), RunPhase::Running);
    }
}
