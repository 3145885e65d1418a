use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::state::StopReason;
use super::test::{jigs_allow, CommandSpec};
use super::unit::UnitKind;

/// A named, ordered selection of terminal tests plus scenario-level hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDef {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tests: Vec<String>,
    #[serde(default)]
    pub exec_start: Option<CommandSpec>,
    #[serde(default)]
    pub exec_stop: Option<CommandSpec>,
    #[serde(default)]
    pub exec_stop_success: Option<CommandSpec>,
    #[serde(default)]
    pub exec_stop_failure: Option<CommandSpec>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Tests treated as already passed. Never executed.
    #[serde(default)]
    pub assume: Vec<String>,
    #[serde(default)]
    pub jigs: Vec<String>,
}

impl ScenarioDef {
    pub fn new(name: &str, tests: &[&str]) -> Self {
        ScenarioDef {
            name: UnitKind::Scenario.base_name(name).to_string(),
            display_name: None,
            description: String::new(),
            tests: tests.iter().map(|t| t.to_string()).collect(),
            exec_start: None,
            exec_stop: None,
            exec_stop_success: None,
            exec_stop_failure: None,
            timeout_ms: None,
            assume: Vec::new(),
            jigs: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn compatible_with(&self, jig: &str) -> bool {
        jigs_allow(&self.jigs, jig)
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    pub fn stop_command(&self, reason: StopReason) -> Option<&CommandSpec> {
        let specific = match reason {
            StopReason::Success => self.exec_stop_success.as_ref(),
            StopReason::Fail => self.exec_stop_failure.as_ref(),
        };
        specific.or(self.exec_stop.as_ref())
    }

    pub fn is_assumed(&self, name: &str) -> bool {
        let wanted = UnitKind::Test.base_name(name);
        self.assume
            .iter()
            .any(|a| UnitKind::Test.base_name(a) == wanted)
    }
}
