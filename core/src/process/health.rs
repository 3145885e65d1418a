//! Periodic daemon health checks.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::supervisor::{ProcessEvent, ProcessHandle, ProcessSpec};
use crate::error::ProcessError;
use crate::types::test::CommandSpec;

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub command: CommandSpec,
    pub interval: Duration,
}

/// Run `check` every `interval` until the returned sender is dropped. The
/// first failing check calls `on_fail` with its exit code and ends the loop.
pub fn spawn<F>(
    unit: &str,
    check: HealthCheck,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    on_fail: F,
) -> Sender<()>
where
    F: FnOnce(Option<i32>) + Send + 'static,
{
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let unit = unit.to_string();
    let name = format!("check {}", unit);
    let spawned = thread::Builder::new().name(name).spawn(move || loop {
        match stop_rx.recv_timeout(check.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
        match run_once(&unit, &check, working_dir.clone(), env.clone()) {
            Ok(()) => debug!(unit = %unit, "daemon check passed"),
            Err(code) => {
                on_fail(code);
                return;
            }
        }
    });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot start daemon check thread");
    }
    stop_tx
}

fn run_once(
    unit: &str,
    check: &HealthCheck,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
) -> Result<(), Option<i32>> {
    let mut spec = ProcessSpec::simple(unit, check.command.as_str(), check.interval);
    spec.working_dir = working_dir;
    spec.env = env;
    let handle = ProcessHandle::start(spec).map_err(|e| {
        warn!(unit, error = %e, "daemon check did not start");
        None
    })?;
    for event in handle.events() {
        if let ProcessEvent::Exited(outcome) = event {
            return match outcome.result {
                Ok(()) => Ok(()),
                Err(ProcessError::ExitCode { code }) => Err(Some(code)),
                Err(_) => Err(None),
            };
        }
    }
    Err(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_check_reports_code() {
        let (tx, rx) = mpsc::channel();
        let check = HealthCheck {
            command: CommandSpec::new("exit 4"),
            interval: Duration::from_millis(50),
        };
        let _guard = spawn("d", check, None, Vec::new(), move |code| {
            let _ = tx.send(code);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Some(4));
    }

    #[test]
    fn dropping_guard_stops_checks() {
        let (tx, rx) = mpsc::channel();
        let check = HealthCheck {
            command: CommandSpec::new("exit 1"),
            interval: Duration::from_millis(200),
        };
        let guard = spawn("d", check, None, Vec::new(), move |code| {
            let _ = tx.send(code);
        });
        drop(guard);
        assert!(rx.recv_timeout(Duration::from_millis(600)).is_err());
    }
}
