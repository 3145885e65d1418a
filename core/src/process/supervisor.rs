//! Owns one child process from spawn to reap.
//!
//! Each handle runs four threads: a reader per output stream, a waiter that
//! blocks on the child, and a monitor. The monitor is the only consumer of
//! the internal channel and the only producer of [`ProcessReport`]s, so a
//! process's output is reported in order and its `Exited` report always
//! follows it. Stopping a handle runs on one more thread, which reports
//! `HookDone` once the group is gone and the stop hook has finished.

use std::io::{self, BufReader, Read};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, warn};

use super::command::{kill_group, shell};
use super::framing::{FrameReader, DEFAULT_MAX_FRAME};
use super::health::{self, HealthCheck};
use super::hook::{self, HookSpec};
use crate::error::ProcessError;
use crate::types::event::{Timestamp, UnitType};
use crate::types::state::StopReason;
use crate::types::test::CommandSpec;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A fresh report id, unique among handles and hooks.
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ProcessMode {
    /// Runs to completion; the exit code decides the result.
    Simple,
    /// Ready on the first stdout line matching `ready`, or at once when
    /// there is no pattern. Runs until stopped.
    Daemon {
        ready: Option<Regex>,
        check: Option<HealthCheck>,
    },
}

impl ProcessMode {
    pub fn is_daemon(&self) -> bool {
        matches!(self, ProcessMode::Daemon { .. })
    }
}

/// Hooks run by [`ProcessHandle::stop`] after the process is gone.
#[derive(Debug, Clone, Default)]
pub struct StopHooks {
    pub success: Option<CommandSpec>,
    pub fail: Option<CommandSpec>,
    pub success_timeout: Duration,
    pub fail_timeout: Duration,
}

impl StopHooks {
    fn for_reason(&self, reason: StopReason) -> Option<(&CommandSpec, Duration)> {
        match reason {
            StopReason::Success => self.success.as_ref().map(|c| (c, self.success_timeout)),
            StopReason::Fail => self.fail.as_ref().map(|c| (c, self.fail_timeout)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub unit: String,
    pub unit_type: UnitType,
    pub command: CommandSpec,
    pub mode: ProcessMode,
    /// Deadline for a simple process to exit or a daemon to become ready.
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// How long to wait for a killed group to be reaped.
    pub grace: Duration,
    /// Largest line or binary frame accepted from the process.
    pub max_frame: usize,
    pub stop_hooks: StopHooks,
}

impl ProcessSpec {
    pub fn simple(unit: &str, command: &str, timeout: Duration) -> Self {
        ProcessSpec {
            unit: unit.to_string(),
            unit_type: UnitType::Test,
            command: CommandSpec::new(command),
            mode: ProcessMode::Simple,
            timeout,
            working_dir: None,
            env: Vec::new(),
            grace: Duration::from_secs(5),
            max_frame: DEFAULT_MAX_FRAME,
            stop_hooks: StopHooks::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Lifecycle of a supervised process. Simple processes go
/// `Running -> Stopped | Failed`; daemons go `Starting -> Ready -> Running`
/// and are handed off to run in the background once ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No process has been spawned for the unit yet.
    NotStarted,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub result: Result<(), ProcessError>,
    /// Last stdout line, or empty when nothing was printed.
    pub last_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output {
        stream: Stream,
        text: String,
        timestamp: Timestamp,
    },
    Ready,
    HealthCheckFailed { code: Option<i32> },
    Exited(ProcessOutcome),
    /// Teardown after [`ProcessHandle::stop`], or a spawned hook, finished.
    /// Carries the hook's result; `Ok` when there was no hook.
    HookDone(Result<(), ProcessError>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// Identifies the handle that produced the report.
    pub id: u64,
    pub unit: String,
    pub unit_type: UnitType,
    pub event: ProcessEvent,
}

/// Where a handle delivers its reports.
pub trait Reporter: Send + Sync + 'static {
    fn report(&self, report: ProcessReport);
}

impl Reporter for Mutex<Sender<ProcessReport>> {
    fn report(&self, report: ProcessReport) {
        if let Ok(tx) = self.lock() {
            let _ = tx.send(report);
        }
    }
}

enum Internal {
    Frame(Stream, String, Timestamp),
    Closed,
    Exited(std::io::Result<ExitStatus>),
    CheckFailed(Option<i32>),
    Stop,
}

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

pub struct ProcessHandle {
    id: u64,
    unit: String,
    pid: u32,
    control: Sender<Internal>,
    state: Arc<Mutex<ProcessState>>,
    monitor: Option<JoinHandle<()>>,
    events: Option<Receiver<ProcessReport>>,
    reporter: Arc<dyn Reporter>,
    spec: ProcessSpec,
    stopping: bool,
}

impl ProcessHandle {
    /// Spawn `spec` and collect its reports for [`ProcessHandle::events`].
    pub fn start(spec: ProcessSpec) -> Result<ProcessHandle, ProcessError> {
        let (tx, rx) = mpsc::channel();
        let mut handle = Self::start_with(spec, Arc::new(Mutex::new(tx)))?;
        handle.events = Some(rx);
        Ok(handle)
    }

    /// Spawn `spec`, delivering every report to `reporter`.
    pub fn start_with(
        spec: ProcessSpec,
        reporter: Arc<dyn Reporter>,
    ) -> Result<ProcessHandle, ProcessError> {
        let id = next_id();
        let mut child = shell(&spec.command, spec.working_dir.as_deref(), &spec.env)
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                command: spec.command.as_str().to_string(),
                error: e.to_string(),
            })?;
        let pid = child.id();
        debug!(unit = %spec.unit, pid, command = spec.command.as_str(), "spawned");

        let (control, internal) = mpsc::channel();
        spawn_reader(&mut child, Stream::Stdout, control.clone(), &spec);
        spawn_reader(&mut child, Stream::Stderr, control.clone(), &spec);
        spawn_waiter(child, control.clone(), &spec.unit);

        let initial = if spec.mode.is_daemon() {
            ProcessState::Starting
        } else {
            ProcessState::Running
        };
        let state = Arc::new(Mutex::new(initial));

        let check_stop = match &spec.mode {
            ProcessMode::Daemon {
                check: Some(check), ..
            } => {
                let tx = control.clone();
                Some(health::spawn(
                    &spec.unit,
                    check.clone(),
                    spec.working_dir.clone(),
                    spec.env.clone(),
                    move |code| {
                        let _ = tx.send(Internal::CheckFailed(code));
                    },
                ))
            }
            _ => None,
        };

        let monitor = Monitor {
            id,
            unit: spec.unit.clone(),
            unit_type: spec.unit_type,
            pgid: pid,
            mode: spec.mode.clone(),
            timeout: spec.timeout,
            grace: spec.grace,
            rx: internal,
            reporter: reporter.clone(),
            state: state.clone(),
            check_stop,
        };
        let monitor = thread::Builder::new()
            .name(format!("monitor {}", spec.unit))
            .spawn(move || monitor.run())
            .map_err(ProcessError::from)?;

        Ok(ProcessHandle {
            id,
            unit: spec.unit.clone(),
            pid,
            control,
            state,
            monitor: Some(monitor),
            events: None,
            reporter,
            spec,
            stopping: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ProcessState::Failed)
    }

    /// Events of a handle made with [`ProcessHandle::start`], ending after
    /// `Exited`, or after `HookDone` once the handle is stopping. Empty for
    /// handles made with `start_with`.
    pub fn events(&self) -> Events<'_> {
        Events {
            rx: self.events.as_ref(),
            until_hook: self.stopping,
            done: false,
        }
    }

    /// Kill the process group, then run the stop hook for `reason`, on a
    /// thread of its own. Returns at once: `Exited` (if not yet reported)
    /// and then `HookDone` follow through the reporter. Safe to call after
    /// the process has exited; only the first call does anything.
    pub fn stop(&mut self, reason: StopReason) -> Result<(), ProcessError> {
        if self.stopping {
            return Ok(());
        }
        let monitor = self.monitor.take();
        let _ = self.control.send(Internal::Stop);
        let hook = self
            .spec
            .stop_hooks
            .for_reason(reason)
            .map(|(cmd, timeout)| self.hook_spec(cmd, timeout));

        let id = self.id;
        let pid = self.pid;
        let unit = self.unit.clone();
        let unit_type = self.spec.unit_type;
        let reporter = self.reporter.clone();
        thread::Builder::new()
            .name(format!("stop {}", self.unit))
            .spawn(move || {
                if let Some(monitor) = monitor {
                    if monitor.join().is_err() {
                        warn!(unit = %unit, "monitor thread panicked");
                    }
                }
                kill_group(pid);
                let result = match hook {
                    Some(hook) => hook::run(&hook, reporter.as_ref()),
                    None => Ok(()),
                };
                reporter.report(ProcessReport {
                    id,
                    unit,
                    unit_type,
                    event: ProcessEvent::HookDone(result),
                });
            })
            .map_err(|e| {
                kill_group(pid);
                ProcessError::from(e)
            })?;
        self.stopping = true;
        Ok(())
    }

    fn hook_spec(&self, cmd: &CommandSpec, timeout: Duration) -> HookSpec {
        let mut env = self.spec.env.clone();
        env.retain(|(k, _)| k != "JIG20_TIMEOUT_SECS");
        env.push(("JIG20_TIMEOUT_SECS".into(), timeout.as_secs().to_string()));
        HookSpec {
            unit: self.unit.clone(),
            unit_type: self.spec.unit_type,
            command: cmd.clone(),
            working_dir: self.spec.working_dir.clone(),
            env,
            timeout,
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.monitor.is_some() {
            let _ = self.control.send(Internal::Stop);
            kill_group(self.pid);
        }
    }
}

pub struct Events<'a> {
    rx: Option<&'a Receiver<ProcessReport>>,
    until_hook: bool,
    done: bool,
}

impl Iterator for Events<'_> {
    type Item = ProcessEvent;

    fn next(&mut self) -> Option<ProcessEvent> {
        if self.done {
            return None;
        }
        let report = self.rx?.recv().ok()?;
        self.done = match report.event {
            ProcessEvent::HookDone(_) => true,
            ProcessEvent::Exited(_) => !self.until_hook,
            _ => false,
        };
        Some(report.event)
    }
}

fn spawn_reader(child: &mut Child, stream: Stream, tx: Sender<Internal>, spec: &ProcessSpec) {
    let unit = spec.unit.clone();
    let limit = spec.max_frame;
    let name = format!("{} {:?}", unit, stream).to_lowercase();
    let spawned = match stream {
        Stream::Stdout => child.stdout.take().map(|out| {
            thread::Builder::new()
                .name(name)
                .spawn(move || read_frames(out, stream, limit, tx, &unit))
        }),
        Stream::Stderr => child.stderr.take().map(|err| {
            thread::Builder::new()
                .name(name)
                .spawn(move || read_frames(err, stream, limit, tx, &unit))
        }),
    };
    if let Some(Err(e)) = spawned {
        warn!(unit = %spec.unit, error = %e, "cannot start output reader");
    }
}

fn read_frames<R: Read>(input: R, stream: Stream, limit: usize, tx: Sender<Internal>, unit: &str) {
    let mut reader = FrameReader::with_limit(BufReader::new(input), limit);
    for frame in reader.by_ref() {
        match frame {
            Ok(frame) => {
                let msg = Internal::Frame(stream, frame.into_text(), Timestamp::now());
                if tx.send(msg).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(unit, ?stream, error = %e, "output stream error, discarding the rest");
                break;
            }
        }
    }
    // Keep the pipe drained so the child never blocks on a full buffer.
    let _ = io::copy(&mut reader.into_inner(), &mut io::sink());
    let _ = tx.send(Internal::Closed);
}

fn spawn_waiter(mut child: Child, tx: Sender<Internal>, unit: &str) {
    let spawned = thread::Builder::new()
        .name(format!("wait {}", unit))
        .spawn(move || {
            let status = child.wait();
            let _ = tx.send(Internal::Exited(status));
        });
    if let Err(e) = spawned {
        warn!(unit, error = %e, "cannot start waiter");
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

struct Monitor {
    id: u64,
    unit: String,
    unit_type: UnitType,
    pgid: u32,
    mode: ProcessMode,
    timeout: Duration,
    grace: Duration,
    rx: Receiver<Internal>,
    reporter: Arc<dyn Reporter>,
    state: Arc<Mutex<ProcessState>>,
    check_stop: Option<Sender<()>>,
}

impl Monitor {
    fn run(mut self) {
        let mut deadline = Some(Instant::now() + self.timeout);
        let mut open_streams = 2;
        let mut exit: Option<std::io::Result<ExitStatus>> = None;
        let mut forced: Option<ProcessError> = None;
        let mut last_line = String::new();
        let mut ready = false;

        let pattern = match &self.mode {
            ProcessMode::Daemon { ready, .. } => ready.clone(),
            ProcessMode::Simple => None,
        };
        if self.mode.is_daemon() && pattern.is_none() {
            ready = true;
            deadline = None;
            self.mark_ready();
        }

        loop {
            if exit.is_some() && open_streams == 0 {
                break;
            }
            match self.next(deadline) {
                Ok(Internal::Frame(stream, text, timestamp)) => {
                    if stream == Stream::Stdout {
                        if !ready && forced.is_none() {
                            if let Some(re) = &pattern {
                                if re.is_match(&text) {
                                    ready = true;
                                    deadline = None;
                                    self.mark_ready();
                                }
                            }
                        }
                        last_line = text.clone();
                    }
                    // Output is forwarded before any readiness it caused.
                    self.emit(ProcessEvent::Output {
                        stream,
                        text,
                        timestamp,
                    });
                }
                Ok(Internal::Closed) => open_streams -= 1,
                Ok(Internal::Exited(status)) => {
                    exit = Some(status);
                    if open_streams > 0 {
                        // Stray descendants may still hold the pipes.
                        kill_group(self.pgid);
                        deadline = Some(Instant::now() + self.grace);
                    }
                }
                Ok(Internal::CheckFailed(code)) => {
                    if forced.is_none() && exit.is_none() {
                        warn!(unit = %self.unit, ?code, "daemon check failed");
                        forced = Some(ProcessError::DaemonCheckFailed { code });
                        self.emit(ProcessEvent::HealthCheckFailed { code });
                        self.kill(&mut deadline);
                    }
                }
                Ok(Internal::Stop) => {
                    if forced.is_none() && exit.is_none() {
                        forced = Some(ProcessError::Stopped);
                        self.kill(&mut deadline);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if exit.is_some() || forced.is_some() {
                        debug!(unit = %self.unit, "gave up waiting after kill");
                        break;
                    }
                    warn!(unit = %self.unit, timeout = ?self.timeout, "timed out");
                    forced = Some(ProcessError::Timeout {
                        timeout: self.timeout,
                    });
                    self.kill(&mut deadline);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.check_stop.take();
        let result = match forced {
            Some(e) => Err(e),
            None => match exit {
                Some(Ok(status)) => classify(status, self.mode.is_daemon()),
                Some(Err(e)) => Err(e.into()),
                None => Err(ProcessError::Stopped),
            },
        };
        let final_state = match &result {
            Ok(()) | Err(ProcessError::Stopped) => ProcessState::Stopped,
            Err(_) => ProcessState::Failed,
        };
        self.set_state(final_state);
        debug!(unit = %self.unit, ?result, "process finished");
        self.emit(ProcessEvent::Exited(ProcessOutcome { result, last_line }));
    }

    fn next(&self, deadline: Option<Instant>) -> Result<Internal, RecvTimeoutError> {
        match deadline {
            Some(at) => {
                let now = Instant::now();
                if at <= now {
                    return Err(RecvTimeoutError::Timeout);
                }
                self.rx.recv_timeout(at - now)
            }
            None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        }
    }

    fn kill(&self, deadline: &mut Option<Instant>) {
        self.set_state(ProcessState::Stopping);
        kill_group(self.pgid);
        *deadline = Some(Instant::now() + self.grace);
    }

    /// Report readiness, then hand the daemon off to run in the background.
    fn mark_ready(&self) {
        self.set_state(ProcessState::Ready);
        self.emit(ProcessEvent::Ready);
        self.set_state(ProcessState::Running);
    }

    fn set_state(&self, state: ProcessState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }

    fn emit(&self, event: ProcessEvent) {
        self.reporter.report(ProcessReport {
            id: self.id,
            unit: self.unit.clone(),
            unit_type: self.unit_type,
            event,
        });
    }
}

fn classify(status: ExitStatus, daemon: bool) -> Result<(), ProcessError> {
    if daemon {
        return Err(ProcessError::DaemonExited {
            code: status.code(),
        });
    }
    match (status.code(), status.signal()) {
        (Some(0), _) => Ok(()),
        (Some(code), _) => Err(ProcessError::ExitCode { code }),
        (None, Some(signal)) => Err(ProcessError::Signal { signal }),
        (None, None) => Err(ProcessError::Io {
            error: "unknown exit status".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(spec: ProcessSpec) -> Vec<ProcessEvent> {
        let handle = ProcessHandle::start(spec).unwrap();
        handle.events().collect()
    }

    fn outcome(events: &[ProcessEvent]) -> &ProcessOutcome {
        events
            .iter()
            .find_map(|e| match e {
                ProcessEvent::Exited(o) => Some(o),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no Exited in {:?}", events))
    }

    fn stdout_lines(events: &[ProcessEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ProcessEvent::Output {
                    stream: Stream::Stdout,
                    text,
                    ..
                } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn simple_pass_keeps_last_line() {
        let events = run(ProcessSpec::simple(
            "t",
            "echo one; echo two",
            Duration::from_secs(10),
        ));
        assert_eq!(stdout_lines(&events), vec!["one", "two"]);
        let o = outcome(&events);
        assert_eq!(o.result, Ok(()));
        assert_eq!(o.last_line, "two");
    }

    #[test]
    fn simple_failure_exit_code() {
        let events = run(ProcessSpec::simple("t", "exit 3", Duration::from_secs(10)));
        let o = outcome(&events);
        assert_eq!(o.result, Err(ProcessError::ExitCode { code: 3 }));
        assert_eq!(o.last_line, "");
    }

    #[test]
    fn stderr_is_separate_stream() {
        let events = run(ProcessSpec::simple(
            "t",
            "echo oops 1>&2",
            Duration::from_secs(10),
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            ProcessEvent::Output { stream: Stream::Stderr, text, .. } if text == "oops"
        )));
        assert!(stdout_lines(&events).is_empty());
    }

    #[test]
    fn timeout_kills_group() {
        let start = Instant::now();
        let events = run(ProcessSpec::simple(
            "t",
            "sleep 30",
            Duration::from_millis(300),
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(matches!(
            outcome(&events).result,
            Err(ProcessError::Timeout { .. })
        ));
    }

    #[test]
    fn daemon_ready_on_pattern() {
        let mut spec = ProcessSpec::simple(
            "d",
            "echo booting; sleep 0.1; echo READY; sleep 30",
            Duration::from_secs(10),
        );
        spec.mode = ProcessMode::Daemon {
            ready: Some(Regex::new("READY").unwrap()),
            check: None,
        };
        let mut handle = ProcessHandle::start(spec).unwrap();
        let mut seen = Vec::new();
        for event in handle.events() {
            let is_ready = event == ProcessEvent::Ready;
            seen.push(event);
            if is_ready {
                break;
            }
        }
        assert_eq!(handle.state(), ProcessState::Running);
        assert!(handle.pid() > 0);
        // Both lines precede the Ready event.
        assert_eq!(stdout_lines(&seen), vec!["booting", "READY"]);

        handle.stop(StopReason::Success).unwrap();
        let rest: Vec<ProcessEvent> = handle.events().collect();
        assert_eq!(outcome(&rest).result, Err(ProcessError::Stopped));
        assert_eq!(rest.last(), Some(&ProcessEvent::HookDone(Ok(()))));
        assert_eq!(handle.state(), ProcessState::Stopped);
    }

    #[test]
    fn daemon_without_pattern_is_ready_at_once() {
        let mut spec = ProcessSpec::simple("d", "sleep 30", Duration::from_secs(10));
        spec.mode = ProcessMode::Daemon {
            ready: None,
            check: None,
        };
        let mut handle = ProcessHandle::start(spec).unwrap();
        assert_eq!(handle.events().next(), Some(ProcessEvent::Ready));
        let stopped = Instant::now();
        handle.stop(StopReason::Fail).unwrap();
        assert!(stopped.elapsed() < Duration::from_millis(500), "stop does not wait");
        let rest: Vec<ProcessEvent> = handle.events().collect();
        assert!(matches!(rest.last(), Some(ProcessEvent::HookDone(Ok(())))));
    }

    #[test]
    fn daemon_exit_is_failure() {
        let mut spec = ProcessSpec::simple("d", "echo READY; exit 0", Duration::from_secs(10));
        spec.mode = ProcessMode::Daemon {
            ready: Some(Regex::new("READY").unwrap()),
            check: None,
        };
        let events = run(spec);
        assert!(events.contains(&ProcessEvent::Ready));
        assert_eq!(
            outcome(&events).result,
            Err(ProcessError::DaemonExited { code: Some(0) })
        );
    }

    #[test]
    fn stop_runs_matching_hook() {
        let marker = std::env::temp_dir().join(format!("jig20-hook-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);
        let mut spec = ProcessSpec::simple("t", "true", Duration::from_secs(10));
        spec.stop_hooks = StopHooks {
            success: Some(CommandSpec::new(&format!("echo ok > {}", marker.display()))),
            fail: Some(CommandSpec::new("exit 1")),
            success_timeout: Duration::from_secs(5),
            fail_timeout: Duration::from_secs(5),
        };
        let mut handle = ProcessHandle::start(spec).unwrap();
        let _: Vec<ProcessEvent> = handle.events().collect();
        handle.stop(StopReason::Success).unwrap();
        let rest: Vec<ProcessEvent> = handle.events().collect();
        assert_eq!(rest, vec![ProcessEvent::HookDone(Ok(()))]);
        assert!(marker.exists());
        let _ = std::fs::remove_file(&marker);
    }

    #[test]
    fn failing_stop_hook_is_reported() {
        let mut spec = ProcessSpec::simple("t", "exit 1", Duration::from_secs(10));
        spec.stop_hooks = StopHooks {
            fail: Some(CommandSpec::new("echo tidy; exit 2")),
            fail_timeout: Duration::from_secs(5),
            ..StopHooks::default()
        };
        let mut handle = ProcessHandle::start(spec).unwrap();
        let events: Vec<ProcessEvent> = handle.events().collect();
        assert_eq!(outcome(&events).result, Err(ProcessError::ExitCode { code: 1 }));
        handle.stop(StopReason::Fail).unwrap();
        handle.stop(StopReason::Fail).unwrap();
        let rest: Vec<ProcessEvent> = handle.events().collect();
        assert_eq!(stdout_lines(&rest), vec!["tidy"]);
        assert_eq!(
            rest.last(),
            Some(&ProcessEvent::HookDone(Err(ProcessError::ExitCode { code: 2 })))
        );
    }

    #[test]
    fn oversized_line_is_cut_and_stream_drained() {
        let mut spec = ProcessSpec::simple(
            "t",
            "printf '%0100d\\n' 0; echo after",
            Duration::from_secs(10),
        );
        spec.max_frame = 64;
        let events = run(spec);
        let lines = stdout_lines(&events);
        assert_eq!(lines[0].len(), 64);
        assert_eq!(lines.last().map(String::as_str), Some("after"));
        assert_eq!(outcome(&events).result, Ok(()));
    }

    #[test]
    fn spawn_in_missing_dir_fails() {
        let mut spec = ProcessSpec::simple("t", "true", Duration::from_secs(1));
        spec.working_dir = Some(PathBuf::from("/nonexistent/jig20/dir"));
        let err = ProcessHandle::start(spec).err().unwrap();
        assert_eq!(err.as_label(), "process_spawn_failed");
    }
}
