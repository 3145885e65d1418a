//! Events flowing from producers (engine, supervisors) to bus sinks.
//!
//! An `Event` is created once by its producer, handed to the bus, and never
//! mutated afterward. Each sink renders it into its own wire format.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::unit::UnitKind;

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Wall-clock time split the way loggers expect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: u64,
    pub nsecs: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            secs: since.as_secs(),
            nsecs: since.subsec_nanos(),
        }
    }
}

// ---------------------------------------------------------------------------
// UnitType
// ---------------------------------------------------------------------------

/// The kind of unit an event is about. `Internal` covers engine-originated
/// events with no backing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Test,
    Scenario,
    Jig,
    Trigger,
    Logger,
    Interface,
    Internal,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Internal => "internal",
            other => match other.kind() {
                Some(kind) => kind.as_str(),
                None => "internal",
            },
        }
    }

    pub fn kind(&self) -> Option<UnitKind> {
        match self {
            UnitType::Test => Some(UnitKind::Test),
            UnitType::Scenario => Some(UnitKind::Scenario),
            UnitType::Jig => Some(UnitKind::Jig),
            UnitType::Trigger => Some(UnitKind::Trigger),
            UnitType::Logger => Some(UnitKind::Logger),
            UnitType::Interface => Some(UnitKind::Interface),
            UnitType::Internal => None,
        }
    }

    pub fn parse(s: &str) -> Option<UnitType> {
        if s.eq_ignore_ascii_case("internal") {
            return Some(UnitType::Internal);
        }
        UnitKind::parse(s).map(UnitType::from)
    }
}

impl From<UnitKind> for UnitType {
    fn from(kind: UnitKind) -> Self {
        match kind {
            UnitKind::Test => UnitType::Test,
            UnitKind::Scenario => UnitType::Scenario,
            UnitKind::Jig => UnitType::Jig,
            UnitKind::Trigger => UnitType::Trigger,
            UnitKind::Logger => UnitType::Logger,
            UnitKind::Interface => UnitType::Interface,
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Pass,
    Fail,
    Skip,
}

impl TestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOutcome::Pass => "pass",
            TestOutcome::Fail => "fail",
            TestOutcome::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventKind {
    Stdout { text: String },
    Stderr { text: String },
    ConfigError { message: String },
    Unloading,
    Debug { message: String },
    Log { message: String },
    TestStart,
    TestResult { outcome: TestOutcome, message: String },
    Hello { version: String },
    Jig { name: String },
    Describe {
        item_type: UnitType,
        field: String,
        item: String,
        value: String,
    },
    Scenarios { names: Vec<String> },
    Scenario { name: String },
    Tests { scenario: String, tests: Vec<String> },
    Start { scenario: String },
    Finish { code: u16, scenario: String },
    Ping { id: String },
    Exit,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub unit: String,
    pub unit_type: UnitType,
    pub timestamp: Timestamp,
}

impl Event {
    pub fn new(kind: EventKind, unit: &str, unit_type: UnitType) -> Self {
        Event::at(kind, unit, unit_type, Timestamp::now())
    }

    pub fn at(kind: EventKind, unit: &str, unit_type: UnitType, timestamp: Timestamp) -> Self {
        Event {
            kind,
            unit: unit.to_string(),
            unit_type,
            timestamp,
        }
    }

    /// An engine-originated event not tied to a unit.
    pub fn internal(kind: EventKind) -> Self {
        Event::new(kind, "", UnitType::Internal)
    }

    pub fn test(kind: EventKind, test: &str) -> Self {
        Event::new(kind, test, UnitType::Test)
    }

    pub fn debug(unit: &str, unit_type: UnitType, message: impl Into<String>) -> Self {
        Event::new(
            EventKind::Debug {
                message: message.into(),
            },
            unit,
            unit_type,
        )
    }

    /// The `message-type` column used by loggers.
    pub fn message_type(&self) -> &'static str {
        match &self.kind {
            EventKind::Stdout { .. } => "stdout",
            EventKind::Stderr { .. } => "stderr",
            EventKind::ConfigError { .. } => "config-error",
            EventKind::Unloading => "unloading",
            EventKind::Debug { .. } => "debug",
            EventKind::Log { .. } => "log",
            EventKind::TestStart => "test-start",
            EventKind::TestResult { .. } => "test-result",
            EventKind::Hello { .. } => "hello",
            EventKind::Jig { .. } => "jig",
            EventKind::Describe { .. } => "describe",
            EventKind::Scenarios { .. } => "scenarios",
            EventKind::Scenario { .. } => "scenario",
            EventKind::Tests { .. } => "tests",
            EventKind::Start { .. } => "start",
            EventKind::Finish { .. } => "finish",
            EventKind::Ping { .. } => "ping",
            EventKind::Exit => "exit",
        }
    }

    /// The free-text `message` column used by loggers.
    pub fn message(&self) -> String {
        match &self.kind {
            EventKind::Stdout { text } | EventKind::Stderr { text } => text.clone(),
            EventKind::ConfigError { message }
            | EventKind::Debug { message }
            | EventKind::Log { message } => message.clone(),
            EventKind::Unloading | EventKind::TestStart | EventKind::Exit => String::new(),
            EventKind::TestResult { outcome, message } => {
                if message.is_empty() {
                    outcome.as_str().to_string()
                } else {
                    format!("{} {}", outcome.as_str(), message)
                }
            }
            EventKind::Hello { version } => version.clone(),
            EventKind::Jig { name } | EventKind::Scenario { name } => name.clone(),
            EventKind::Describe {
                item_type,
                field,
                item,
                value,
            } => format!("{} {} {} {}", item_type, field, item, value),
            EventKind::Scenarios { names } => names.join(" "),
            EventKind::Tests { scenario, tests } => {
                let mut parts = vec![scenario.clone()];
                parts.extend(tests.iter().cloned());
                parts.join(" ")
            }
            EventKind::Start { scenario } => scenario.clone(),
            EventKind::Finish { code, scenario } => format!("{} {}", code, scenario),
            EventKind::Ping { id } => id.clone(),
        }
    }
}
