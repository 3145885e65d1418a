//! Run-time states for tests and scenario runs.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TestRunState
// ---------------------------------------------------------------------------

/// Per-test state within one scenario run. Transitions are monotonic: once a
/// terminal state is reached it is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRunState {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl TestRunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestRunState::Passed | TestRunState::Failed | TestRunState::Skipped
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_become(&self, next: TestRunState) -> bool {
        match self {
            TestRunState::Pending => next != TestRunState::Pending,
            TestRunState::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestRunState::Pending => "pending",
            TestRunState::Running => "running",
            TestRunState::Passed => "passed",
            TestRunState::Failed => "failed",
            TestRunState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TestRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StopReason
// ---------------------------------------------------------------------------

/// Which stop hook applies when a test or scenario is wound down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Success,
    Fail,
}

impl StopReason {
    pub fn for_state(state: TestRunState) -> StopReason {
        if state == TestRunState::Passed {
            StopReason::Success
        } else {
            StopReason::Fail
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario run status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    Operator,
    Timeout,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::Operator => "aborted by operator",
            AbortReason::Timeout => "scenario timed out",
        }
    }
}

/// Lifecycle of one scenario run: `Idle → Running → {Completed, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed(ScenarioResult),
    Aborted(AbortReason),
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Completed(_) | RunStatus::Aborted(_))
    }

    pub fn is_running(&self) -> bool {
        *self == RunStatus::Running
    }

    /// HTTP-style code reported in `FINISH`: 200 on success, 500 plus the
    /// failure count on failure, 499 on operator abort, 408 on timeout.
    pub fn finish_code(&self, failures: usize) -> u16 {
        match self {
            RunStatus::Completed(ScenarioResult::Success) => 200,
            RunStatus::Completed(ScenarioResult::Failure) => {
                500u16.saturating_add(failures.min(99) as u16)
            }
            RunStatus::Aborted(AbortReason::Operator) => 499,
            RunStatus::Aborted(AbortReason::Timeout) => 408,
            RunStatus::Idle | RunStatus::Running => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TestRunState::Pending.is_terminal());
        assert!(!TestRunState::Running.is_terminal());
        assert!(TestRunState::Passed.is_terminal());
        assert!(TestRunState::Failed.is_terminal());
        assert!(TestRunState::Skipped.is_terminal());
    }

    #[test]
    fn transitions_are_monotonic() {
        assert!(TestRunState::Pending.can_become(TestRunState::Running));
        assert!(TestRunState::Pending.can_become(TestRunState::Skipped));
        assert!(TestRunState::Running.can_become(TestRunState::Failed));
        assert!(!TestRunState::Running.can_become(TestRunState::Pending));
        assert!(!TestRunState::Passed.can_become(TestRunState::Failed));
        assert!(!TestRunState::Skipped.can_become(TestRunState::Running));
    }

    #[test]
    fn stop_reason_follows_state() {
        assert_eq!(StopReason::for_state(TestRunState::Passed), StopReason::Success);
        assert_eq!(StopReason::for_state(TestRunState::Skipped), StopReason::Fail);
        assert_eq!(StopReason::for_state(TestRunState::Failed), StopReason::Fail);
    }

    #[test]
    fn finish_codes() {
        assert_eq!(RunStatus::Completed(ScenarioResult::Success).finish_code(0), 200);
        assert_eq!(RunStatus::Completed(ScenarioResult::Failure).finish_code(2), 502);
        assert_eq!(RunStatus::Aborted(AbortReason::Operator).finish_code(0), 499);
        assert_eq!(RunStatus::Aborted(AbortReason::Timeout).finish_code(3), 408);
    }

    #[test]
    fn run_status_serde() {
        let status = RunStatus::Aborted(AbortReason::Timeout);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"aborted\""));
        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
