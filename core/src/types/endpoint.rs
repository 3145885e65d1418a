//! Logger, Interface and Trigger units. The engine only sees these at their
//! process boundary: a command to spawn and a wire format.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::test::{jigs_allow, CommandSpec};

/// Wire format spoken to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Tsv,
    Json,
    Text,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Tsv => "tsv",
            WireFormat::Json => "json",
            WireFormat::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub exec_start: CommandSpec,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// `tsv` or `json`.
    #[serde(default)]
    pub format: WireFormat,
    #[serde(default)]
    pub jigs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub exec_start: CommandSpec,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// `text` or `json`.
    #[serde(default = "default_interface_format")]
    pub format: WireFormat,
    #[serde(default)]
    pub jigs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub exec_start: CommandSpec,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub jigs: Vec<String>,
}

fn default_interface_format() -> WireFormat {
    WireFormat::Text
}

impl LoggerDef {
    pub fn compatible_with(&self, jig: &str) -> bool {
        jigs_allow(&self.jigs, jig)
    }
}

impl InterfaceDef {
    pub fn compatible_with(&self, jig: &str) -> bool {
        jigs_allow(&self.jigs, jig)
    }
}

impl TriggerDef {
    pub fn compatible_with(&self, jig: &str) -> bool {
        jigs_allow(&self.jigs, jig)
    }
}
