//! Error types for the execution engine.
//!
//! One enum per concern:
//!
//! - [`GraphError`]: fatal graph-build failures, reported as `config-error`.
//! - [`ProcessError`]: failures local to a single test process.
//! - [`ProtocolError`]: malformed or out-of-order inbound traffic; the
//!   offending source is dropped.
//! - [`SinkError`]: delivery failures; the sink is degraded, then removed.
//! - [`ConfigError`]: engine configuration and manifest loading.
//! - [`EngineError`]: top-level control failures.
//!
//! Every enum exposes `as_label()`, a stable snake_case label for logs.

use std::time::Duration;

use thiserror::Error;

use crate::types::unit::UnitKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("'{alias}' is provided by more than one test: {}", candidates.join(", "))]
    AmbiguousProvider {
        alias: String,
        candidates: Vec<String>,
    },

    #[error("test '{test}' is not compatible with jig '{jig}'")]
    IncompatibleJig { test: String, jig: String },

    #[error("unknown unit '{name}'")]
    UnknownUnit { name: String },

    #[error("test '{test}' has an invalid ready pattern: {error}")]
    InvalidReadyPattern { test: String, error: String },
}

impl GraphError {
    pub fn as_label(&self) -> &'static str {
        match self {
            GraphError::CycleDetected { .. } => "graph_cycle_detected",
            GraphError::AmbiguousProvider { .. } => "graph_ambiguous_provider",
            GraphError::IncompatibleJig { .. } => "graph_incompatible_jig",
            GraphError::UnknownUnit { .. } => "graph_unknown_unit",
            GraphError::InvalidReadyPattern { .. } => "graph_invalid_ready_pattern",
        }
    }
}

/// Why a single process did not pass. Carried in result messages; never
/// retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("failed to spawn '{command}': {error}")]
    Spawn { command: String, error: String },

    #[error("exited with code {code}")]
    ExitCode { code: i32 },

    #[error("killed by signal {signal}")]
    Signal { signal: i32 },

    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("daemon exited unexpectedly")]
    DaemonExited { code: Option<i32> },

    #[error("daemon check failed")]
    DaemonCheckFailed { code: Option<i32> },

    #[error("stopped")]
    Stopped,

    #[error("i/o error: {error}")]
    Io { error: String },
}

impl ProcessError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::Spawn { .. } => "process_spawn_failed",
            ProcessError::ExitCode { .. } => "process_exit_code",
            ProcessError::Signal { .. } => "process_signal",
            ProcessError::Timeout { .. } => "process_timeout",
            ProcessError::DaemonExited { .. } => "process_daemon_exited",
            ProcessError::DaemonCheckFailed { .. } => "process_daemon_check_failed",
            ProcessError::Stopped => "process_stopped",
            ProcessError::Io { .. } => "process_io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(e: std::io::Error) -> Self {
        ProcessError::Io {
            error: e.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("unknown verb '{verb}'")]
    UnknownVerb { verb: String },

    #[error("'{verb}' needs an argument")]
    MissingArgument { verb: String },

    #[error("PONG '{id}' does not match an outstanding PING")]
    UnexpectedPong { id: String },

    #[error("no PONG for '{id}' within {window:?}")]
    PongTimeout { id: String, window: Duration },

    #[error("trigger sent '{verb}' before Ready")]
    NotReady { verb: String },
}

impl ProtocolError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ProtocolError::Empty => "protocol_empty",
            ProtocolError::UnknownVerb { .. } => "protocol_unknown_verb",
            ProtocolError::MissingArgument { .. } => "protocol_missing_argument",
            ProtocolError::UnexpectedPong { .. } => "protocol_unexpected_pong",
            ProtocolError::PongTimeout { .. } => "protocol_pong_timeout",
            ProtocolError::NotReady { .. } => "protocol_not_ready",
        }
    }

    /// Whether the source that produced this error must be dropped.
    pub fn drops_source(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnexpectedPong { .. } | ProtocolError::PongTimeout { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("write to '{sink}' failed: {error}")]
    Write { sink: String, error: String },

    #[error("sink '{sink}' disconnected")]
    Disconnected { sink: String },

    #[error("queue for '{sink}' is full")]
    QueueFull { sink: String },
}

impl SinkError {
    pub fn as_label(&self) -> &'static str {
        match self {
            SinkError::Write { .. } => "sink_write_failed",
            SinkError::Disconnected { .. } => "sink_disconnected",
            SinkError::QueueFull { .. } => "sink_queue_full",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read '{path}': {error}")]
    Read { path: String, error: String },

    #[error("cannot parse configuration: {error}")]
    Parse { error: String },

    #[error("invalid '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: UnitKind, name: String },
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::Duplicate { .. } => "config_duplicate",
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse {
            error: e.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no scenario selected")]
    NoScenario,

    #[error("unknown scenario '{name}'")]
    UnknownScenario { name: String },

    #[error("scenario '{scenario}' is not compatible with jig '{jig}'")]
    IncompatibleScenario { scenario: String, jig: String },

    #[error("no jig loaded")]
    NoJig,

    #[error("a scenario is already running")]
    Busy,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("engine channel closed")]
    ChannelClosed,
}

impl EngineError {
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::NoScenario => "engine_no_scenario",
            EngineError::UnknownScenario { .. } => "engine_unknown_scenario",
            EngineError::IncompatibleScenario { .. } => "engine_incompatible_scenario",
            EngineError::NoJig => "engine_no_jig",
            EngineError::Busy => "engine_busy",
            EngineError::Graph(e) => e.as_label(),
            EngineError::Config(e) => e.as_label(),
            EngineError::Process(e) => e.as_label(),
            EngineError::ChannelClosed => "engine_channel_closed",
        }
    }
}
