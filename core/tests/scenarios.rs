//! Whole scenarios driven through the engine, observed through an
//! in-memory sink speaking the interface text protocol.

use std::time::{Duration, Instant};

use jig20_core::bus::{CaptureSink, Format};
use jig20_core::graph::EdgeKind;
use jig20_core::types::state::{AbortReason, RunStatus, ScenarioResult, TestRunState};
use jig20_core::{Engine, EngineConfig, Manifest, UnitSet};

fn engine(manifest: &str) -> (Engine, CaptureSink) {
    let manifest = Manifest::parse(manifest).unwrap();
    let units = UnitSet::from_manifest(manifest).unwrap();
    let mut engine = Engine::new(units, EngineConfig::default(), None).unwrap();
    let capture = CaptureSink::new("capture");
    engine.attach_sink(Box::new(capture.clone()), Format::Text, &[]);
    (engine, capture)
}

fn lines(engine: &Engine, capture: &CaptureSink) -> Vec<String> {
    assert!(engine.bus().flush(Duration::from_secs(5)));
    capture.lines()
}

fn position(lines: &[String], prefix: &str) -> usize {
    lines
        .iter()
        .position(|l| l.starts_with(prefix))
        .unwrap_or_else(|| panic!("no line starting with {:?} in {:#?}", prefix, lines))
}

#[test]
fn failed_requirement_skips_dependent() {
    let (mut engine, capture) = engine(
        r#"
jigs:
  - name: bench
    default_scenario: s
tests:
  - name: a
    exec_start: "exit 1"
  - name: b
    requires: [a]
    exec_start: "echo b"
scenarios:
  - name: s
    tests: [b]
"#,
    );
    engine.start(None).unwrap();
    let status = engine.run_until_finished();
    assert_eq!(status, RunStatus::Completed(ScenarioResult::Failure));

    let run = engine.run_state().unwrap();
    assert_eq!(run.graph().order(), vec!["a", "b"]);
    let edges: Vec<_> = run.graph().node(1).edges().collect();
    assert_eq!(edges, vec![(0, EdgeKind::Hard)]);
    assert_eq!(run.state_of("a"), Some(TestRunState::Failed));
    assert_eq!(run.state_of("b"), Some(TestRunState::Skipped));

    let lines = lines(&engine, &capture);
    assert!(lines.contains(&"FAIL a exited with code 1".to_string()));
    assert!(!lines.contains(&"RUNNING b".to_string()));
    assert!(position(&lines, "SKIP b") < position(&lines, "FINISH 501 s"));
}

#[test]
fn undefined_suggestion_is_ignored() {
    let (mut engine, capture) = engine(
        r#"
tests:
  - name: a
    suggests: [x]
    exec_start: "echo fine"
scenarios:
  - name: s
    tests: [a]
"#,
    );
    engine.start(Some("s")).unwrap();
    assert_eq!(
        engine.run_until_finished(),
        RunStatus::Completed(ScenarioResult::Success)
    );
    let run = engine.run_state().unwrap();
    assert_eq!(run.graph().len(), 1);
    assert!(run.graph().node(0).suggests.is_empty());
    assert!(lines(&engine, &capture).contains(&"PASS a fine".to_string()));
}

#[test]
fn dependent_starts_once_daemon_is_ready() {
    let (mut engine, capture) = engine(
        r#"
tests:
  - name: d
    type: daemon
    daemon_ready_text: READY
    exec_start: "sleep 0.2; echo READY; sleep 30"
  - name: e
    requires: [d]
    exec_start: "echo using daemon"
scenarios:
  - name: s
    tests: [e]
"#,
    );
    let started = Instant::now();
    engine.start(Some("s")).unwrap();
    assert_eq!(
        engine.run_until_finished(),
        RunStatus::Completed(ScenarioResult::Success)
    );
    assert!(started.elapsed() < Duration::from_secs(10));

    let lines = lines(&engine, &capture);
    let ready = position(&lines, "LOG stdout\td\t");
    let e_running = position(&lines, "RUNNING e");
    let e_pass = position(&lines, "PASS e");
    let d_pass = position(&lines, "PASS d");
    assert!(ready < e_running);
    assert!(e_pass < d_pass, "daemon is stopped only after the scenario completes");
}

#[test]
fn timeout_kills_and_runs_failure_hook() {
    let (mut engine, capture) = engine(
        r#"
tests:
  - name: t
    timeout_ms: 1000
    exec_start: "sleep 30"
    exec_stop_fail: "echo cleaned up"
scenarios:
  - name: s
    tests: [t]
"#,
    );
    let started = Instant::now();
    engine.start(Some("s")).unwrap();
    assert_eq!(
        engine.run_until_finished(),
        RunStatus::Completed(ScenarioResult::Failure)
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(10));

    let lines = lines(&engine, &capture);
    assert!(lines.iter().any(|l| l.starts_with("FAIL t timed out")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("LOG stdout\tt\ttest\t") && l.ends_with("cleaned up")));
}

#[test]
fn abort_skips_pending_tests() {
    let (mut engine, capture) = engine(
        r#"
tests:
  - name: slow
    exec_start: "sleep 30"
  - name: b
    exec_start: "true"
  - name: c
    exec_start: "true"
scenarios:
  - name: s
    tests: [slow, b, c]
    exec_stop_failure: "echo scenario failed"
"#,
    );
    engine.start(Some("s")).unwrap();
    engine.handle().abort().unwrap();
    assert_eq!(
        engine.run_until_finished(),
        RunStatus::Aborted(AbortReason::Operator)
    );

    let run = engine.run_state().unwrap();
    for name in ["slow", "b", "c"] {
        assert_eq!(run.state_of(name), Some(TestRunState::Skipped), "{}", name);
    }

    let lines = lines(&engine, &capture);
    assert!(lines.contains(&"SKIP b aborted by operator".to_string()));
    assert!(lines.contains(&"SKIP c aborted by operator".to_string()));
    assert!(lines.contains(&"FINISH 499 s".to_string()));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("LOG stdout\ts\tscenario\t") && l.ends_with("scenario failed")));
}

#[test]
fn scenario_timeout_reports_408() {
    let (mut engine, capture) = engine(
        r#"
tests:
  - name: slow
    exec_start: "sleep 30"
scenarios:
  - name: s
    timeout_ms: 500
    tests: [slow]
"#,
    );
    engine.start(Some("s")).unwrap();
    assert_eq!(
        engine.run_until_finished(),
        RunStatus::Aborted(AbortReason::Timeout)
    );
    assert!(lines(&engine, &capture).contains(&"FINISH 408 s".to_string()));
}

#[test]
fn cycle_is_reported_as_config_error() {
    let (mut engine, capture) = engine(
        r#"
tests:
  - name: a
    requires: [b]
    exec_start: "true"
  - name: b
    requires: [a]
    exec_start: "true"
scenarios:
  - name: s
    tests: [a]
"#,
    );
    let err = engine.start(Some("s")).unwrap_err();
    assert_eq!(err.as_label(), "graph_cycle_detected");
    assert_eq!(engine.status(), RunStatus::Idle);
    assert!(lines(&engine, &capture)
        .iter()
        .any(|l| l.starts_with("LOG config-error\ts\tscenario\t")));
}

#[test]
fn failing_daemon_check_fails_the_daemon() {
    let (mut engine, capture) = engine(
        r#"
tests:
  - name: d
    type: daemon
    daemon_check: "exit 3"
    daemon_check_interval_ms: 100
    exec_start: "sleep 30"
  - name: e
    requires: [d]
    exec_start: "sleep 1"
scenarios:
  - name: s
    tests: [e]
"#,
    );
    engine.start(Some("s")).unwrap();
    assert_eq!(
        engine.run_until_finished(),
        RunStatus::Completed(ScenarioResult::Failure)
    );

    let run = engine.run_state().unwrap();
    assert_eq!(run.state_of("d"), Some(TestRunState::Failed));
    assert_eq!(run.state_of("e"), Some(TestRunState::Passed));

    let lines = lines(&engine, &capture);
    assert!(lines.iter().any(|l| l.starts_with("FAIL d daemon check failed")));
    assert!(position(&lines, "FAIL d") < position(&lines, "PASS e"));
    assert!(lines.contains(&"FINISH 501 s".to_string()));
}

#[test]
fn exited_daemon_skips_later_dependents() {
    let (mut engine, capture) = engine(
        r#"
tests:
  - name: d
    type: daemon
    exec_start: "sleep 0.2; exit 0"
  - name: e
    requires: [d]
    exec_start: "sleep 1"
  - name: f
    requires: [d]
    exec_start: "echo too late"
scenarios:
  - name: s
    tests: [e, f]
"#,
    );
    engine.start(Some("s")).unwrap();
    assert_eq!(
        engine.run_until_finished(),
        RunStatus::Completed(ScenarioResult::Failure)
    );

    let run = engine.run_state().unwrap();
    assert_eq!(run.graph().order(), vec!["d", "e", "f"]);
    assert_eq!(run.state_of("d"), Some(TestRunState::Failed));
    assert_eq!(run.state_of("e"), Some(TestRunState::Passed));
    assert_eq!(run.state_of("f"), Some(TestRunState::Skipped));

    let lines = lines(&engine, &capture);
    assert!(lines.iter().any(|l| l.starts_with("FAIL d daemon exited unexpectedly")));
    assert!(lines.iter().any(|l| l.starts_with("SKIP f requires d")));
    assert!(!lines.contains(&"RUNNING f".to_string()));
    assert!(lines.contains(&"FINISH 501 s".to_string()));
}
