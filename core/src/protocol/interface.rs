//! Interface protocol: server lines rendered from events, client commands
//! parsed from lines. Verbs are case-insensitive on input.

use serde::{Deserialize, Serialize};

use crate::bus::format::to_tsv;
use crate::error::ProtocolError;
use crate::types::event::{Event, EventKind, TestOutcome};

/// A command sent by an interface program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", content = "arg", rename_all = "lowercase")]
pub enum ClientCommand {
    Hello(String),
    Jig,
    Scenarios,
    Scenario(String),
    Tests(Option<String>),
    Start(Option<String>),
    Abort,
    Pong(String),
    Log(String),
    Shutdown(Option<String>),
}

impl ClientCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            ClientCommand::Hello(_) => "HELLO",
            ClientCommand::Jig => "JIG",
            ClientCommand::Scenarios => "SCENARIOS",
            ClientCommand::Scenario(_) => "SCENARIO",
            ClientCommand::Tests(_) => "TESTS",
            ClientCommand::Start(_) => "START",
            ClientCommand::Abort => "ABORT",
            ClientCommand::Pong(_) => "PONG",
            ClientCommand::Log(_) => "LOG",
            ClientCommand::Shutdown(_) => "SHUTDOWN",
        }
    }
}

/// Parse one text-protocol line.
pub fn parse(line: &str) -> Result<ClientCommand, ProtocolError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    if verb.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let first = rest.split_whitespace().next().map(|w| w.to_string());
    let required = |verb: &str| {
        first.clone().ok_or_else(|| ProtocolError::MissingArgument {
            verb: verb.to_uppercase(),
        })
    };

    match verb.to_ascii_lowercase().as_str() {
        "hello" => Ok(ClientCommand::Hello(rest.to_string())),
        "jig" => Ok(ClientCommand::Jig),
        "scenarios" => Ok(ClientCommand::Scenarios),
        "scenario" => Ok(ClientCommand::Scenario(required(verb)?)),
        "tests" => Ok(ClientCommand::Tests(first.clone())),
        "start" => Ok(ClientCommand::Start(first.clone())),
        "abort" => Ok(ClientCommand::Abort),
        "pong" => Ok(ClientCommand::Pong(required(verb)?)),
        "log" => Ok(ClientCommand::Log(rest.to_string())),
        "shutdown" => Ok(ClientCommand::Shutdown(
            (!rest.is_empty()).then(|| rest.to_string()),
        )),
        other => Err(ProtocolError::UnknownVerb {
            verb: other.to_string(),
        }),
    }
}

/// Parse a JSON-format interface line, e.g. `{"verb":"scenario","arg":"smoke"}`.
pub fn parse_json(line: &str) -> Result<ClientCommand, ProtocolError> {
    if line.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(line).map_err(|e| ProtocolError::UnknownVerb {
        verb: e.to_string(),
    })
}

/// Server-to-client line for `event`. Events without a dedicated verb are
/// wrapped as `LOG <tsv>`.
pub fn encode(event: &Event) -> String {
    match &event.kind {
        EventKind::Hello { version } => format!("HELLO {}", version),
        EventKind::Jig { name } => format!("JIG {}", name),
        EventKind::Describe {
            item_type,
            field,
            item,
            value,
        } => format!(
            "DESCRIBE {} {} {} {}",
            item_type.as_str().to_uppercase(),
            field.to_uppercase(),
            item,
            value
        ),
        EventKind::Scenarios { names } => format!("SCENARIOS {}", names.join(" ")),
        EventKind::Scenario { name } => format!("SCENARIO {}", name),
        EventKind::Tests { scenario, tests } => {
            format!("TESTS {} {}", scenario, tests.join(" "))
        }
        EventKind::Start { scenario } => format!("START {}", scenario),
        EventKind::TestStart => format!("RUNNING {}", event.unit),
        EventKind::TestResult { outcome, message } => {
            let verb = match outcome {
                TestOutcome::Pass => "PASS",
                TestOutcome::Fail => "FAIL",
                TestOutcome::Skip => "SKIP",
            };
            format!("{} {} {}", verb, event.unit, one_line(message))
        }
        EventKind::Finish { code, scenario } => format!("FINISH {} {}", code, scenario),
        EventKind::Ping { id } => format!("PING {}", id),
        EventKind::Exit => "EXIT".to_string(),
        EventKind::Stdout { .. }
        | EventKind::Stderr { .. }
        | EventKind::ConfigError { .. }
        | EventKind::Unloading
        | EventKind::Debug { .. }
        | EventKind::Log { .. } => format!("LOG {}", to_tsv(event)),
    }
}

fn one_line(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}
