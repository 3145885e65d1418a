//! Run-to-completion hooks (`ExecStart` of a scenario, `ExecStop*`).

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::supervisor::{ProcessEvent, ProcessHandle, ProcessReport, ProcessSpec, Reporter};
use crate::error::ProcessError;
use crate::types::event::UnitType;
use crate::types::test::CommandSpec;

/// One hook invocation. Output is reported under `unit`.
#[derive(Debug, Clone)]
pub struct HookSpec {
    pub unit: String,
    pub unit_type: UnitType,
    pub command: CommandSpec,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

/// Run the hook until it exits or its timeout expires, forwarding output
/// to `reporter`.
pub fn run(hook: &HookSpec, reporter: &dyn Reporter) -> Result<(), ProcessError> {
    if hook.command.is_blank() {
        return Ok(());
    }
    debug!(unit = %hook.unit, command = hook.command.as_str(), "running hook");
    let mut spec = ProcessSpec::simple(&hook.unit, hook.command.as_str(), hook.timeout);
    spec.unit_type = hook.unit_type;
    spec.working_dir = hook.working_dir.clone();
    spec.env = hook.env.clone();
    let handle = ProcessHandle::start(spec)?;

    for event in handle.events() {
        match event {
            ProcessEvent::Output { .. } => reporter.report(ProcessReport {
                id: handle.id(),
                unit: hook.unit.clone(),
                unit_type: hook.unit_type,
                event,
            }),
            ProcessEvent::Exited(outcome) => return outcome.result,
            _ => {}
        }
    }
    Err(ProcessError::Stopped)
}

/// Run the hook on its own thread. Its output, then a
/// [`ProcessEvent::HookDone`] carrying `id`, reach `reporter`.
pub fn spawn(id: u64, hook: HookSpec, reporter: Arc<dyn Reporter>) -> Result<(), ProcessError> {
    thread::Builder::new()
        .name(format!("hook {}", hook.unit))
        .spawn(move || {
            let result = run(&hook, reporter.as_ref());
            if let Err(e) = &result {
                warn!(unit = %hook.unit, error = %e, "hook failed");
            }
            reporter.report(ProcessReport {
                id,
                unit: hook.unit,
                unit_type: hook.unit_type,
                event: ProcessEvent::HookDone(result),
            });
        })
        .map(|_| ())
        .map_err(ProcessError::from)
}
