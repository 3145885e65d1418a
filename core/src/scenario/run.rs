//! One scenario run: walks a [`DependencyGraph`] in order, one test at a
//! time, and owns every test's [`TestRunState`].
//!
//! Run lifecycle: `Idle -> Running -> {Completed, Aborted}`.
//!
//! The run never blocks. It starts a process or a hook and returns; the
//! supervisor's reports come back through [`ScenarioRun::on_report`] and
//! move the run forward. A daemon counts as satisfying its dependents once
//! it reports ready, so the run moves on while the daemon keeps running.
//! A test's turn ends when its teardown (kill, reap, stop hook) reports
//! `HookDone`, and the run only finishes once every teardown has.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bus::Publish;
use crate::config::EngineConfig;
use crate::error::ProcessError;
use crate::graph::DependencyGraph;
use crate::process::command::ProcessEnv;
use crate::process::health::HealthCheck;
use crate::process::hook::{self, HookSpec};
use crate::process::supervisor::next_id;
use crate::process::{
    ProcessEvent, ProcessHandle, ProcessMode, ProcessReport, ProcessSpec, ProcessState, Reporter,
    StopHooks, Stream,
};
use crate::types::event::{Event, EventKind, TestOutcome, Timestamp, UnitType};
use crate::types::jig::JigDef;
use crate::types::scenario::ScenarioDef;
use crate::types::state::{AbortReason, RunStatus, ScenarioResult, StopReason, TestRunState};
use crate::types::test::{CommandSpec, TestDef};

/// What a run needs from its surroundings.
#[derive(Clone)]
pub struct RunContext {
    pub config: EngineConfig,
    pub jig: JigDef,
    pub reporter: Arc<dyn Reporter>,
}

/// Where a `Running` run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Scenario `exec_start` is running.
    Starting,
    /// Tests are being sequenced.
    Testing,
    /// Waiting on test teardowns; the run ends as the carried status.
    TearingDown(RunStatus),
    /// Scenario stop hook is running; the run ends as the carried status.
    StopHook(RunStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    NotRequested,
    Pending,
    Done,
}

pub struct ScenarioRun {
    def: ScenarioDef,
    graph: DependencyGraph,
    ctx: RunContext,
    states: Vec<TestRunState>,
    handles: Vec<Option<ProcessHandle>>,
    ready: Vec<bool>,
    teardown: Vec<Teardown>,
    /// Test whose turn gates the next start.
    waiting: Option<usize>,
    next: usize,
    status: RunStatus,
    phase: Phase,
    /// Report id of the running scenario hook.
    hook: Option<u64>,
    deadline: Option<Instant>,
}

impl ScenarioRun {
    pub fn new(def: ScenarioDef, graph: DependencyGraph, ctx: RunContext) -> Self {
        let n = graph.len();
        ScenarioRun {
            def,
            graph,
            ctx,
            states: vec![TestRunState::Pending; n],
            handles: (0..n).map(|_| None).collect(),
            ready: vec![false; n],
            teardown: vec![Teardown::NotRequested; n],
            waiting: None,
            next: 0,
            status: RunStatus::Idle,
            phase: Phase::Starting,
            hook: None,
            deadline: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn scenario(&self) -> &str {
        &self.def.name
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn state_of(&self, test: &str) -> Option<TestRunState> {
        self.graph.index_of(test).map(|i| self.states[i])
    }

    /// Supervisor state of `test`'s process, `NotStarted` before it spawns.
    pub fn process_state(&self, test: &str) -> Option<ProcessState> {
        self.graph.index_of(test).map(|i| {
            self.handles[i]
                .as_ref()
                .map(|h| h.state())
                .unwrap_or(ProcessState::NotStarted)
        })
    }

    /// `(test, state)` pairs in execution order.
    pub fn states(&self) -> Vec<(&str, TestRunState)> {
        self.graph
            .nodes()
            .iter()
            .zip(self.states.iter())
            .map(|(n, s)| (n.name.as_str(), *s))
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == TestRunState::Failed)
            .count()
    }

    /// When the scenario's wall-clock budget runs out. Once the run is
    /// finishing, only hook timeouts apply.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.status, self.phase) {
            (RunStatus::Running, Phase::Starting | Phase::Testing) => self.deadline,
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    pub fn start(&mut self, out: &dyn Publish) {
        if self.status != RunStatus::Idle {
            return;
        }
        let budget = self.def.timeout(self.ctx.config.scenario_timeout());
        self.status = RunStatus::Running;
        self.deadline = Some(Instant::now() + budget);
        info!(scenario = %self.def.name, tests = self.graph.len(), "scenario started");
        out.publish(self.scenario_event(EventKind::Start {
            scenario: self.def.name.clone(),
        }));

        match self.def.exec_start.clone() {
            Some(cmd) => {
                self.phase = Phase::Starting;
                let timeout = self.clamp(self.ctx.config.scenario_start_timeout());
                if let Err(e) = self.spawn_scenario_hook(&cmd, timeout) {
                    self.start_failed(e, out);
                }
            }
            None => self.begin_tests(out),
        }
    }

    /// Stop everything still running, skip what has not finished, and run
    /// the scenario's failure hook. A running test is skipped only once its
    /// supervisor confirms the process is gone.
    pub fn abort(&mut self, reason: AbortReason, out: &dyn Publish) {
        if !self.status.is_running() || !matches!(self.phase, Phase::Starting | Phase::Testing) {
            return;
        }
        info!(scenario = %self.def.name, reason = reason.as_str(), "aborting scenario");
        for i in 0..self.states.len() {
            if self.states[i].is_terminal() {
                continue;
            }
            self.stop(i, StopReason::Fail, out);
            if self.teardown[i] != Teardown::Pending {
                self.skip(i, reason.as_str(), out);
            }
        }
        self.waiting = None;
        self.finish(RunStatus::Aborted(reason), out);
    }

    /// Abort with `Timeout` once the scenario budget is spent.
    pub fn check_deadline(&mut self, now: Instant, out: &dyn Publish) {
        if let Some(deadline) = self.next_deadline() {
            if now >= deadline {
                warn!(scenario = %self.def.name, "scenario timed out");
                self.abort(AbortReason::Timeout, out);
            }
        }
    }

    /// Feed one supervisor report into the run.
    pub fn on_report(&mut self, report: ProcessReport, out: &dyn Publish) {
        if self.hook == Some(report.id) {
            if let ProcessEvent::HookDone(result) = report.event {
                self.hook = None;
                self.scenario_hook_done(result, out);
            }
            return;
        }
        let owner = self
            .handles
            .iter()
            .position(|h| h.as_ref().map(|h| h.id()) == Some(report.id));
        let Some(i) = owner else {
            // Hook output, or a late report from a hook that was abandoned.
            if let ProcessEvent::Output {
                stream,
                text,
                timestamp,
            } = report.event
            {
                out.publish(output_event(&report.unit, report.unit_type, stream, text, timestamp));
            }
            return;
        };

        match report.event {
            ProcessEvent::Output {
                stream,
                text,
                timestamp,
            } => out.publish(output_event(&report.unit, UnitType::Test, stream, text, timestamp)),
            ProcessEvent::Ready => {
                self.ready[i] = true;
                debug!(test = %report.unit, "daemon ready");
                out.publish(self.test_debug(i, "daemon ready".to_string()));
                if self.waiting == Some(i) {
                    self.waiting = None;
                    self.advance(out);
                }
            }
            ProcessEvent::HealthCheckFailed { code } => {
                let detail = code.map(|c| format!(" (exit {})", c)).unwrap_or_default();
                out.publish(self.test_debug(i, format!("daemon check failed{}", detail)));
            }
            ProcessEvent::Exited(outcome) => {
                if let Phase::TearingDown(RunStatus::Aborted(reason)) = self.phase {
                    // Termination is confirmed; the abort's skip lands now.
                    self.skip(i, reason.as_str(), out);
                    return;
                }
                if self.states[i].is_terminal() {
                    return;
                }
                let (state, message) = match outcome.result {
                    Ok(()) => (TestRunState::Passed, outcome.last_line),
                    Err(e) => (TestRunState::Failed, e.to_string()),
                };
                self.conclude(i, state, &message, out);
                if self.teardown[i] != Teardown::Pending {
                    self.release(i, out);
                }
            }
            ProcessEvent::HookDone(result) => {
                if let Err(e) = result {
                    out.publish(self.test_debug(i, format!("stop hook failed: {}", e)));
                }
                self.release(i, out);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn begin_tests(&mut self, out: &dyn Publish) {
        self.phase = Phase::Testing;
        for i in 0..self.graph.len() {
            if self.graph.node(i).assumed {
                self.states[i] = TestRunState::Passed;
                out.publish(self.result_event(i, TestOutcome::Pass, "assumed"));
            }
        }
        self.advance(out);
    }

    fn start_failed(&mut self, error: ProcessError, out: &dyn Publish) {
        warn!(scenario = %self.def.name, error = %error, "scenario exec_start failed");
        out.publish(Event::debug(
            &self.def.name,
            UnitType::Scenario,
            format!("exec_start failed: {}", error),
        ));
        for i in 0..self.states.len() {
            self.skip(i, "scenario start failed", out);
        }
        self.close(RunStatus::Completed(ScenarioResult::Failure), out);
    }

    fn scenario_hook_done(&mut self, result: Result<(), ProcessError>, out: &dyn Publish) {
        match (self.phase, result) {
            (Phase::Starting, Ok(())) => self.begin_tests(out),
            (Phase::Starting, Err(e)) => self.start_failed(e, out),
            (Phase::StopHook(status), result) => {
                if let Err(e) = result {
                    out.publish(Event::debug(
                        &self.def.name,
                        UnitType::Scenario,
                        format!("stop hook failed: {}", e),
                    ));
                }
                self.close(status, out);
            }
            _ => {}
        }
    }

    fn advance(&mut self, out: &dyn Publish) {
        while self.phase == Phase::Testing && self.waiting.is_none() && self.next < self.graph.len() {
            let i = self.next;
            self.next += 1;
            if self.states[i].is_terminal() {
                continue;
            }
            if let Some(reason) = self.blocked_by(i) {
                self.skip(i, &reason, out);
                continue;
            }
            self.launch(i, out);
        }
        if self.phase == Phase::Testing && self.waiting.is_none() && self.next >= self.graph.len() {
            self.complete(out);
        }
    }

    /// A failed or skipped hard dependency, described.
    fn blocked_by(&self, i: usize) -> Option<String> {
        self.graph.node(i).requires.iter().find_map(|&dep| {
            let state = self.states[dep];
            match state {
                TestRunState::Failed | TestRunState::Skipped => Some(format!(
                    "requires {} which {}",
                    self.graph.node(dep).name,
                    state
                )),
                _ => None,
            }
        })
    }

    fn launch(&mut self, i: usize, out: &dyn Publish) {
        let Some(test) = self.graph.node(i).test.clone() else {
            self.skip(i, "no test definition", out);
            return;
        };
        let spec = self.process_spec(&test);
        self.states[i] = TestRunState::Running;
        out.publish(Event::test(EventKind::TestStart, &test.name));
        debug!(test = %test.name, daemon = test.is_daemon(), timeout = ?spec.timeout, "starting test");

        match ProcessHandle::start_with(spec, self.ctx.reporter.clone()) {
            Ok(handle) => {
                self.handles[i] = Some(handle);
                self.waiting = Some(i);
            }
            Err(e) => {
                warn!(test = %test.name, error = %e, "test did not start");
                self.conclude(i, TestRunState::Failed, &e.to_string(), out);
            }
        }
    }

    fn process_spec(&self, test: &TestDef) -> ProcessSpec {
        let config = &self.ctx.config;
        let timeout = self.clamp(test.timeout(config.test_timeout()));
        let env = ProcessEnv {
            jig: self.ctx.jig.name.clone(),
            scenario: self.def.name.clone(),
            test: test.name.clone(),
            unit_type: Some(UnitType::Test),
            timeout: Some(timeout),
        };
        let mode = if test.is_daemon() {
            ProcessMode::Daemon {
                // Patterns were validated when the graph was built.
                ready: test.ready_pattern().ok().flatten(),
                check: test.daemon_check.as_ref().map(|cmd| HealthCheck {
                    command: cmd.clone(),
                    interval: test.check_interval(config.daemon_check_interval()),
                }),
            }
        } else {
            ProcessMode::Simple
        };
        ProcessSpec {
            unit: test.name.clone(),
            unit_type: UnitType::Test,
            command: test.exec_start.clone(),
            mode,
            timeout,
            working_dir: test
                .working_directory
                .clone()
                .or_else(|| self.ctx.jig.working_directory.clone()),
            env: env.vars(),
            grace: config.termination_grace(),
            max_frame: config.max_frame_bytes,
            stop_hooks: StopHooks {
                success: test.stop_command(StopReason::Success).cloned(),
                fail: test.stop_command(StopReason::Fail).cloned(),
                success_timeout: config.test_success_timeout(),
                fail_timeout: config.test_failure_timeout(),
            },
        }
    }

    /// Record a terminal state, publish it, and start tearing the process
    /// down.
    fn conclude(&mut self, i: usize, state: TestRunState, message: &str, out: &dyn Publish) {
        if !self.states[i].can_become(state) {
            return;
        }
        self.states[i] = state;
        let outcome = match state {
            TestRunState::Passed => TestOutcome::Pass,
            TestRunState::Skipped => TestOutcome::Skip,
            _ => TestOutcome::Fail,
        };
        info!(test = %self.graph.node(i).name, %state, detail = message, "test finished");
        out.publish(self.result_event(i, outcome, message));
        self.stop(i, StopReason::for_state(state), out);
    }

    /// Ask test `i`'s supervisor to tear down, once.
    fn stop(&mut self, i: usize, reason: StopReason, out: &dyn Publish) {
        if self.teardown[i] != Teardown::NotRequested {
            return;
        }
        let Some(handle) = self.handles[i].as_mut() else {
            return;
        };
        match handle.stop(reason) {
            Ok(()) => self.teardown[i] = Teardown::Pending,
            Err(e) => {
                self.teardown[i] = Teardown::Done;
                out.publish(self.test_debug(i, format!("stop failed: {}", e)));
            }
        }
    }

    /// Test `i` is torn down; let the run move on.
    fn release(&mut self, i: usize, out: &dyn Publish) {
        self.teardown[i] = Teardown::Done;
        if self.waiting == Some(i) {
            self.waiting = None;
        }
        match self.phase {
            Phase::Testing => self.advance(out),
            Phase::TearingDown(_) => self.wrap_up(out),
            Phase::Starting | Phase::StopHook(_) => {}
        }
    }

    fn skip(&mut self, i: usize, reason: &str, out: &dyn Publish) {
        if !self.states[i].can_become(TestRunState::Skipped) {
            return;
        }
        self.states[i] = TestRunState::Skipped;
        debug!(test = %self.graph.node(i).name, reason, "test skipped");
        out.publish(self.result_event(i, TestOutcome::Skip, reason));
    }

    fn complete(&mut self, out: &dyn Publish) {
        // Whatever is still running is a ready daemon that never failed.
        for i in 0..self.states.len() {
            if !self.states[i].is_terminal() {
                self.conclude(i, TestRunState::Passed, "daemon stopped", out);
            }
        }
        let result = if self.failures() == 0 {
            ScenarioResult::Success
        } else {
            ScenarioResult::Failure
        };
        self.finish(RunStatus::Completed(result), out);
    }

    fn finish(&mut self, status: RunStatus, out: &dyn Publish) {
        self.phase = Phase::TearingDown(status);
        self.wrap_up(out);
    }

    /// Once no teardown is pending, run the scenario stop hook, then close.
    fn wrap_up(&mut self, out: &dyn Publish) {
        let Phase::TearingDown(status) = self.phase else {
            return;
        };
        if self.teardown.contains(&Teardown::Pending) {
            return;
        }
        let reason = match status {
            RunStatus::Completed(ScenarioResult::Success) => StopReason::Success,
            _ => StopReason::Fail,
        };
        let Some(cmd) = self.def.stop_command(reason).cloned() else {
            self.close(status, out);
            return;
        };
        let timeout = match reason {
            StopReason::Success => self.ctx.config.scenario_success_timeout(),
            StopReason::Fail => self.ctx.config.scenario_failure_timeout(),
        };
        self.phase = Phase::StopHook(status);
        if let Err(e) = self.spawn_scenario_hook(&cmd, timeout) {
            self.scenario_hook_done(Err(e), out);
        }
    }

    fn spawn_scenario_hook(&mut self, cmd: &CommandSpec, timeout: Duration) -> Result<(), ProcessError> {
        let env = ProcessEnv {
            jig: self.ctx.jig.name.clone(),
            scenario: self.def.name.clone(),
            test: String::new(),
            unit_type: Some(UnitType::Scenario),
            timeout: Some(timeout),
        };
        let spec = HookSpec {
            unit: self.def.name.clone(),
            unit_type: UnitType::Scenario,
            command: cmd.clone(),
            working_dir: self.ctx.jig.working_directory.clone(),
            env: env.vars(),
            timeout,
        };
        let id = next_id();
        hook::spawn(id, spec, self.ctx.reporter.clone())?;
        self.hook = Some(id);
        Ok(())
    }

    fn close(&mut self, status: RunStatus, out: &dyn Publish) {
        self.status = status;
        self.deadline = None;
        self.hook = None;
        let code = status.finish_code(self.failures());
        info!(scenario = %self.def.name, code, "scenario finished");
        out.publish(self.scenario_event(EventKind::Finish {
            code,
            scenario: self.def.name.clone(),
        }));
    }

    /// `limit`, cut down to what is left of the scenario budget.
    fn clamp(&self, limit: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => limit.min(deadline.saturating_duration_since(Instant::now())),
            None => limit,
        }
    }

    fn scenario_event(&self, kind: EventKind) -> Event {
        Event::new(kind, &self.def.name, UnitType::Scenario)
    }

    fn result_event(&self, i: usize, outcome: TestOutcome, message: &str) -> Event {
        Event::test(
            EventKind::TestResult {
                outcome,
                message: message.to_string(),
            },
            &self.graph.node(i).name,
        )
    }

    fn test_debug(&self, i: usize, message: String) -> Event {
        Event::debug(&self.graph.node(i).name, UnitType::Test, message)
    }
}

fn output_event(
    unit: &str,
    unit_type: UnitType,
    stream: Stream,
    text: String,
    timestamp: Timestamp,
) -> Event {
    let kind = match stream {
        Stream::Stdout => EventKind::Stdout { text },
        Stream::Stderr => EventKind::Stderr { text },
    };
    Event::at(kind, unit, unit_type, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Publish for Recorder {
        fn publish(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn results(&self) -> Vec<(String, TestOutcome)> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match &e.kind {
                    EventKind::TestResult { outcome, .. } => Some((e.unit.clone(), *outcome)),
                    _ => None,
                })
                .collect()
        }

        fn finish_code(&self) -> Option<u16> {
            self.events.lock().unwrap().iter().find_map(|e| match e.kind {
                EventKind::Finish { code, .. } => Some(code),
                _ => None,
            })
        }
    }

    fn new_run(tests: &[TestDef], scenario: ScenarioDef) -> (ScenarioRun, Receiver<ProcessReport>) {
        let graph = graph::build(tests, &scenario, "bench").unwrap();
        let (tx, rx) = mpsc::channel();
        let ctx = RunContext {
            config: EngineConfig::default(),
            jig: JigDef::new("bench"),
            reporter: Arc::new(Mutex::new(tx)),
        };
        (ScenarioRun::new(scenario, graph, ctx), rx)
    }

    fn drive(run: &mut ScenarioRun, rx: &Receiver<ProcessReport>, out: &Recorder) {
        let give_up = Instant::now() + Duration::from_secs(30);
        while !run.status().is_finished() && Instant::now() < give_up {
            let wait = run
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_secs(1))
                .min(Duration::from_secs(1));
            match rx.recv_timeout(wait) {
                Ok(report) => run.on_report(report, out),
                Err(RecvTimeoutError::Timeout) => run.check_deadline(Instant::now(), out),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn test(name: &str, cmd: &str) -> TestDef {
        TestDef::new(name, cmd)
    }

    #[test]
    fn failed_requirement_skips_dependent() {
        let mut b = test("b", "true");
        b.requires = vec!["a".into()];
        let (mut run, rx) = new_run(&[test("a", "exit 1"), b], ScenarioDef::new("s", &["b"]));
        let out = Recorder::default();
        run.start(&out);
        drive(&mut run, &rx, &out);

        assert_eq!(run.state_of("a"), Some(TestRunState::Failed));
        assert_eq!(run.state_of("b"), Some(TestRunState::Skipped));
        assert_eq!(run.status(), RunStatus::Completed(ScenarioResult::Failure));
        assert_eq!(out.finish_code(), Some(501));
    }

    #[test]
    fn failed_suggestion_still_runs() {
        let mut b = test("b", "echo done");
        b.suggests = vec!["a".into()];
        let (mut run, rx) = new_run(&[test("a", "exit 1"), b], ScenarioDef::new("s", &["b"]));
        let out = Recorder::default();
        run.start(&out);
        drive(&mut run, &rx, &out);

        assert_eq!(run.state_of("b"), Some(TestRunState::Passed));
        assert_eq!(
            out.results(),
            vec![("a".into(), TestOutcome::Fail), ("b".into(), TestOutcome::Pass)]
        );
    }

    #[test]
    fn all_passing_is_success() {
        let (mut run, rx) = new_run(
            &[test("a", "echo one"), test("b", "echo two")],
            ScenarioDef::new("s", &["a", "b"]),
        );
        let out = Recorder::default();
        run.start(&out);
        drive(&mut run, &rx, &out);
        assert_eq!(run.status(), RunStatus::Completed(ScenarioResult::Success));
        assert_eq!(out.finish_code(), Some(200));
    }

    #[test]
    fn failing_exec_start_skips_everything() {
        let mut s = ScenarioDef::new("s", &["a"]);
        s.exec_start = Some("exit 2".into());
        let (mut run, rx) = new_run(&[test("a", "true")], s);
        let out = Recorder::default();
        run.start(&out);
        assert_eq!(run.status(), RunStatus::Running, "exec_start runs off the caller's thread");
        drive(&mut run, &rx, &out);
        assert_eq!(run.state_of("a"), Some(TestRunState::Skipped));
        assert_eq!(run.process_state("a"), Some(ProcessState::NotStarted));
        assert_eq!(run.status(), RunStatus::Completed(ScenarioResult::Failure));
    }

    #[test]
    fn assumed_tests_never_run() {
        let mut b = test("b", "true");
        b.requires = vec!["a".into()];
        let mut s = ScenarioDef::new("s", &["b"]);
        s.assume = vec!["a".into()];
        let (mut run, rx) = new_run(&[test("a", "exit 1"), b], s);
        let out = Recorder::default();
        run.start(&out);
        drive(&mut run, &rx, &out);
        assert_eq!(run.state_of("a"), Some(TestRunState::Passed));
        assert_eq!(run.state_of("b"), Some(TestRunState::Passed));
    }

    #[test]
    fn abort_skips_pending_and_running() {
        let (mut run, rx) = new_run(
            &[test("a", "sleep 30"), test("b", "true"), test("c", "true")],
            ScenarioDef::new("s", &["a", "b", "c"]),
        );
        let out = Recorder::default();
        run.start(&out);
        assert_eq!(run.state_of("a"), Some(TestRunState::Running));
        run.abort(AbortReason::Operator, &out);
        // The running test is skipped only once its process is gone.
        assert_eq!(run.state_of("a"), Some(TestRunState::Running));
        assert_eq!(run.state_of("b"), Some(TestRunState::Skipped));
        drive(&mut run, &rx, &out);
        assert_eq!(run.status(), RunStatus::Aborted(AbortReason::Operator));
        assert_eq!(run.process_state("a"), Some(ProcessState::Stopped));
        for name in ["a", "b", "c"] {
            assert_eq!(run.state_of(name), Some(TestRunState::Skipped));
        }
        assert_eq!(out.finish_code(), Some(499));
    }

    #[test]
    fn scenario_timeout_aborts() {
        let mut s = ScenarioDef::new("s", &["a"]);
        s.timeout_ms = Some(300);
        let (mut run, rx) = new_run(&[test("a", "sleep 30")], s);
        let out = Recorder::default();
        run.start(&out);
        drive(&mut run, &rx, &out);
        assert_eq!(run.status(), RunStatus::Aborted(AbortReason::Timeout));
        assert_eq!(out.finish_code(), Some(408));
    }

    #[test]
    fn output_precedes_result() {
        let (mut run, rx) = new_run(
            &[test("a", "echo first; echo second")],
            ScenarioDef::new("s", &["a"]),
        );
        let out = Recorder::default();
        run.start(&out);
        drive(&mut run, &rx, &out);
        let kinds: Vec<&'static str> = out
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.unit == "a")
            .map(|e| e.message_type())
            .collect();
        assert_eq!(kinds, vec!["test-start", "stdout", "stdout", "test-result"]);
    }

    #[test]
    fn next_test_waits_for_stop_hook() {
        let mut a = test("a", "true");
        a.exec_stop = Some("sleep 0.3; echo a cleaned".into());
        let (mut run, rx) = new_run(&[a, test("b", "echo b")], ScenarioDef::new("s", &["a", "b"]));
        let out = Recorder::default();
        let started = Instant::now();
        run.start(&out);
        assert!(started.elapsed() < Duration::from_millis(250));
        drive(&mut run, &rx, &out);
        assert_eq!(run.status(), RunStatus::Completed(ScenarioResult::Success));

        let events = out.events.lock().unwrap();
        let cleaned = events
            .iter()
            .position(|e| matches!(&e.kind, EventKind::Stdout { text } if text == "a cleaned"))
            .unwrap();
        let b_start = events
            .iter()
            .position(|e| e.unit == "b" && e.kind == EventKind::TestStart)
            .unwrap();
        assert!(cleaned < b_start);
    }

    #[test]
    fn scenario_stop_hook_precedes_finish() {
        let mut s = ScenarioDef::new("s", &["a"]);
        s.exec_stop_success = Some("sleep 0.2; echo wrapped".into());
        let (mut run, rx) = new_run(&[test("a", "true")], s);
        let out = Recorder::default();
        run.start(&out);
        drive(&mut run, &rx, &out);
        assert_eq!(out.finish_code(), Some(200));
        let events = out.events.lock().unwrap();
        let wrapped = events
            .iter()
            .position(|e| matches!(&e.kind, EventKind::Stdout { text } if text == "wrapped"))
            .unwrap();
        let finish = events
            .iter()
            .position(|e| matches!(e.kind, EventKind::Finish { .. }))
            .unwrap();
        assert!(wrapped < finish);
    }
}
