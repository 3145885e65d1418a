//! jig20 CLI: the command-line entry point for the Jig-20 engine.
//!
//! # Usage
//!
//! ```text
//! jig20 run units.yaml --scenario smoke
//! jig20 serve units.yaml --jig bench
//! jig20 scenarios units.yaml
//! jig20 tests units.yaml smoke
//! ```

mod args;

use std::path::{Path, PathBuf};
use std::process;

use jig20_core::bus::console::ConsoleSink;
use jig20_core::bus::Format;
use jig20_core::config;
use jig20_core::graph;
use jig20_core::types::state::{RunStatus, ScenarioResult};
use jig20_core::{Engine, EngineConfig, EngineError, Manifest, UnitSet};
use tracing::info;
use tracing_subscriber::EnvFilter;

use args::{parse_args, Command, USAGE};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args[1..].iter().map(|s| s.as_str()).collect();

    let cmd = match parse_args(&arg_refs) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("jig20: {}", e);
            process::exit(1);
        }
    };

    init_logging();

    let code = match execute(cmd) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("jig20: {}", e);
            1
        }
    };
    process::exit(code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("JIG20_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(cmd: Command) -> Result<i32, EngineError> {
    match cmd {
        Command::Help => {
            println!("{}", USAGE);
            Ok(0)
        }
        Command::Run {
            manifest,
            jig,
            scenario,
        } => {
            let mut engine = open_engine(&manifest, jig.as_deref())?;
            engine.attach_sink(Box::new(ConsoleSink::new()), Format::Console, &[]);
            engine.spawn_endpoints();
            let started = engine.start(scenario.as_deref());
            let status = match started {
                Ok(()) => engine.run_until_finished(),
                Err(e) => {
                    engine.close();
                    return Err(e);
                }
            };
            engine.close();
            Ok(exit_code(status))
        }
        Command::Serve { manifest, jig } => {
            let mut engine = open_engine(&manifest, jig.as_deref())?;
            engine.attach_sink(Box::new(ConsoleSink::new()), Format::Console, &[]);
            engine.spawn_endpoints();
            engine.run()?;
            Ok(0)
        }
        Command::Scenarios { manifest, jig } => {
            let units = load_units(&manifest)?;
            let jig = resolve_jig(&units, jig.as_deref())?;
            for name in units.scenario_names_for(&jig) {
                println!("{}", name);
            }
            Ok(0)
        }
        Command::Tests {
            manifest,
            jig,
            scenario,
        } => {
            let units = load_units(&manifest)?;
            let jig = resolve_jig(&units, jig.as_deref())?;
            let def = units
                .scenario(&scenario)
                .ok_or(EngineError::UnknownScenario { name: scenario })?;
            let graph = graph::build(units.tests(), def, &jig)?;
            for name in graph.order() {
                println!("{}", name);
            }
            Ok(0)
        }
    }
}

fn open_engine(manifest: &Path, jig: Option<&str>) -> Result<Engine, EngineError> {
    info!(manifest = %manifest.display(), "loading units");
    let units = load_units(manifest)?;
    let config = load_config()?;
    Engine::new(units, config, jig)
}

fn load_units(path: &Path) -> Result<UnitSet, EngineError> {
    let manifest = Manifest::load(path)?;
    Ok(UnitSet::from_manifest(manifest)?)
}

fn load_config() -> Result<EngineConfig, EngineError> {
    let path = resolve_config_dir().join("config.yaml");
    Ok(config::load_or_default(&path)?)
}

fn resolve_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("JIG20_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config").join("jig20")
}

/// Name of the jig a command applies to.
fn resolve_jig(units: &UnitSet, jig: Option<&str>) -> Result<String, EngineError> {
    match jig {
        Some(name) => units
            .jig(name)
            .map(|j| j.name.clone())
            .ok_or(EngineError::NoJig),
        None => Ok(units
            .jigs()
            .first()
            .map(|j| j.name.clone())
            .unwrap_or_else(|| "default".to_string())),
    }
}

fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed(ScenarioResult::Success) => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jig20_core::types::state::AbortReason;

    #[test]
    fn resolve_config_dir_from_env() {
        std::env::set_var("JIG20_CONFIG_DIR", "/tmp/test-jig20-config");
        let dir = resolve_config_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-jig20-config"));
        std::env::remove_var("JIG20_CONFIG_DIR");
    }

    #[test]
    fn resolve_jig_defaults() {
        let units = UnitSet::new();
        assert_eq!(resolve_jig(&units, None).unwrap(), "default");
        assert_eq!(resolve_jig(&units, Some("lathe")), Err(EngineError::NoJig));
    }

    #[test]
    fn only_success_exits_zero() {
        assert_eq!(exit_code(RunStatus::Completed(ScenarioResult::Success)), 0);
        assert_eq!(exit_code(RunStatus::Completed(ScenarioResult::Failure)), 1);
        assert_eq!(exit_code(RunStatus::Aborted(AbortReason::Timeout)), 1);
    }

    #[test]
    fn load_units_reports_missing_file() {
        let err = load_units(Path::new("/nonexistent/jig20/units.yaml")).unwrap_err();
        assert_eq!(err.as_label(), "config_read");
    }
}
