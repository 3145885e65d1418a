//! Trigger protocol.
//!
//! A trigger program must announce `Ready` before anything else. `Monitor`
//! asks for results, `Go` starts a run unless one is active, `Stop` aborts.
//! The engine answers each finished run with `Pass` or `Fail`.

use crate::error::ProtocolError;
use crate::types::event::{Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    Ready,
    Monitor,
    Go,
    Stop,
}

pub fn parse(line: &str) -> Result<TriggerCommand, ProtocolError> {
    let word = line.split_whitespace().next().ok_or(ProtocolError::Empty)?;
    match word.to_ascii_lowercase().as_str() {
        "ready" => Ok(TriggerCommand::Ready),
        "monitor" => Ok(TriggerCommand::Monitor),
        "go" => Ok(TriggerCommand::Go),
        "stop" => Ok(TriggerCommand::Stop),
        other => Err(ProtocolError::UnknownVerb {
            verb: other.to_string(),
        }),
    }
}

/// `Pass` or `Fail` for a `FINISH` event; nothing for anything else.
pub fn encode(event: &Event) -> Option<String> {
    match &event.kind {
        EventKind::Finish { code, .. } if *code == 200 => Some("Pass".to_string()),
        EventKind::Finish { .. } => Some("Fail".to_string()),
        _ => None,
    }
}

/// What the engine should do in response to a trigger command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Nothing,
    Start,
    Abort,
}

/// Per-trigger protocol state.
#[derive(Debug, Default, Clone)]
pub struct TriggerSession {
    ready: bool,
    monitoring: bool,
}

impl TriggerSession {
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// Validate `cmd` against the session. `running` says whether a
    /// scenario is active; `Go` during a run is ignored.
    pub fn accept(
        &mut self,
        cmd: TriggerCommand,
        running: bool,
    ) -> Result<TriggerAction, ProtocolError> {
        if !self.ready && cmd != TriggerCommand::Ready {
            return Err(ProtocolError::NotReady {
                verb: format!("{:?}", cmd),
            });
        }
        Ok(match cmd {
            TriggerCommand::Ready => {
                self.ready = true;
                TriggerAction::Nothing
            }
            TriggerCommand::Monitor => {
                self.monitoring = true;
                TriggerAction::Nothing
            }
            TriggerCommand::Go if running => TriggerAction::Nothing,
            TriggerCommand::Go => TriggerAction::Start,
            TriggerCommand::Stop if running => TriggerAction::Abort,
            TriggerCommand::Stop => TriggerAction::Nothing,
        })
    }
}
