//! The set of already-parsed units available to one engine instance.
//!
//! Unit files themselves are parsed elsewhere; this module accepts their
//! records through a YAML manifest and offers name lookup with suffix
//! elision (`boot` and `boot.test` name the same test).

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::endpoint::{InterfaceDef, LoggerDef, TriggerDef};
use crate::types::jig::JigDef;
use crate::types::scenario::ScenarioDef;
use crate::types::test::TestDef;
use crate::types::unit::UnitKind;

/// On-disk manifest listing every unit by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub jigs: Vec<JigDef>,
    pub tests: Vec<TestDef>,
    pub scenarios: Vec<ScenarioDef>,
    pub loggers: Vec<LoggerDef>,
    pub interfaces: Vec<InterfaceDef>,
    pub triggers: Vec<TriggerDef>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Manifest::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Manifest, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnitSet {
    jigs: Vec<JigDef>,
    tests: Vec<TestDef>,
    scenarios: Vec<ScenarioDef>,
    loggers: Vec<LoggerDef>,
    interfaces: Vec<InterfaceDef>,
    triggers: Vec<TriggerDef>,
}

impl UnitSet {
    pub fn new() -> Self {
        UnitSet::default()
    }

    /// Normalize names and reject duplicates within a kind.
    pub fn from_manifest(manifest: Manifest) -> Result<UnitSet, ConfigError> {
        let mut set = UnitSet::new();
        for jig in manifest.jigs {
            set.add_jig(jig)?;
        }
        for test in manifest.tests {
            set.add_test(test)?;
        }
        for scenario in manifest.scenarios {
            set.add_scenario(scenario)?;
        }
        for mut logger in manifest.loggers {
            logger.name = normalize(&logger.name, UnitKind::Logger, &set.logger_names())?;
            set.loggers.push(logger);
        }
        for mut iface in manifest.interfaces {
            iface.name = normalize(&iface.name, UnitKind::Interface, &set.interface_names())?;
            set.interfaces.push(iface);
        }
        for mut trigger in manifest.triggers {
            trigger.name = normalize(&trigger.name, UnitKind::Trigger, &set.trigger_names())?;
            set.triggers.push(trigger);
        }
        Ok(set)
    }

    pub fn add_jig(&mut self, mut jig: JigDef) -> Result<(), ConfigError> {
        let existing: HashSet<String> = self.jigs.iter().map(|j| j.name.clone()).collect();
        jig.name = normalize(&jig.name, UnitKind::Jig, &existing)?;
        self.jigs.push(jig);
        Ok(())
    }

    pub fn add_test(&mut self, mut test: TestDef) -> Result<(), ConfigError> {
        let existing: HashSet<String> = self.tests.iter().map(|t| t.name.clone()).collect();
        test.name = normalize(&test.name, UnitKind::Test, &existing)?;
        self.tests.push(test);
        Ok(())
    }

    pub fn add_scenario(&mut self, mut scenario: ScenarioDef) -> Result<(), ConfigError> {
        let existing: HashSet<String> = self.scenarios.iter().map(|s| s.name.clone()).collect();
        scenario.name = normalize(&scenario.name, UnitKind::Scenario, &existing)?;
        self.scenarios.push(scenario);
        Ok(())
    }

    pub fn test(&self, name: &str) -> Option<&TestDef> {
        let wanted = UnitKind::Test.base_name(name);
        self.tests.iter().find(|t| t.name == wanted)
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioDef> {
        let wanted = UnitKind::Scenario.base_name(name);
        self.scenarios.iter().find(|s| s.name == wanted)
    }

    pub fn jig(&self, name: &str) -> Option<&JigDef> {
        let wanted = UnitKind::Jig.base_name(name);
        self.jigs.iter().find(|j| j.name == wanted)
    }

    pub fn tests(&self) -> &[TestDef] {
        &self.tests
    }

    pub fn scenarios(&self) -> &[ScenarioDef] {
        &self.scenarios
    }

    pub fn jigs(&self) -> &[JigDef] {
        &self.jigs
    }

    pub fn loggers(&self) -> &[LoggerDef] {
        &self.loggers
    }

    pub fn interfaces(&self) -> &[InterfaceDef] {
        &self.interfaces
    }

    pub fn triggers(&self) -> &[TriggerDef] {
        &self.triggers
    }

    /// Scenario names usable on `jig`, in manifest order.
    pub fn scenario_names_for(&self, jig: &str) -> Vec<String> {
        self.scenarios
            .iter()
            .filter(|s| s.compatible_with(jig))
            .map(|s| s.name.clone())
            .collect()
    }

    fn logger_names(&self) -> HashSet<String> {
        self.loggers.iter().map(|l| l.name.clone()).collect()
    }

    fn interface_names(&self) -> HashSet<String> {
        self.interfaces.iter().map(|i| i.name.clone()).collect()
    }

    fn trigger_names(&self) -> HashSet<String> {
        self.triggers.iter().map(|t| t.name.clone()).collect()
    }
}

fn normalize(name: &str, kind: UnitKind, existing: &HashSet<String>) -> Result<String, ConfigError> {
    let base = kind.base_name(name);
    if base.is_empty() {
        return Err(ConfigError::Invalid {
            field: format!("{} name", kind),
            reason: "must not be empty".into(),
        });
    }
    if existing.contains(base) {
        return Err(ConfigError::Duplicate {
            kind,
            name: base.to_string(),
        });
    }
    Ok(base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
jigs:
  - name: bench.jig
    default_scenario: smoke
tests:
  - name: power.test
    exec_start: "true"
  - name: network
    exec_start: "./netd"
    type: daemon
    requires: [power]
scenarios:
  - name: smoke
    tests: [network]
  - name: other
    tests: [power]
    jigs: [lab]
loggers:
  - name: file
    exec_start: "cat > /dev/null"
"#;

    #[test]
    fn manifest_parses_and_normalizes() {
        let set = UnitSet::from_manifest(Manifest::parse(MANIFEST).unwrap()).unwrap();
        assert!(set.test("power").is_some());
        assert!(set.test("power.test").is_some());
        assert_eq!(set.jig("bench").unwrap().default_scenario.as_deref(), Some("smoke"));
        assert_eq!(set.loggers().len(), 1);
    }

    #[test]
    fn scenario_names_filtered_by_jig() {
        let set = UnitSet::from_manifest(Manifest::parse(MANIFEST).unwrap()).unwrap();
        assert_eq!(set.scenario_names_for("bench"), vec!["smoke".to_string()]);
        assert_eq!(set.scenario_names_for("lab").len(), 2);
    }

    #[test]
    fn duplicate_after_elision_rejected() {
        let mut set = UnitSet::new();
        set.add_test(TestDef::new("boot", "true")).unwrap();
        let err = set.add_test(TestDef::new("boot.test", "true")).unwrap_err();
        assert_eq!(err.as_label(), "config_duplicate");
    }

    #[test]
    fn empty_manifest_is_valid() {
        let set = UnitSet::from_manifest(Manifest::parse("{}").unwrap()).unwrap();
        assert!(set.tests().is_empty());
    }
}
