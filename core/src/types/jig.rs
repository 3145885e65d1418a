use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::unit::UnitKind;

/// The physical test fixture the engine is driving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JigDef {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_scenario: Option<String>,
    /// Used by tests that do not set their own working directory.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

impl JigDef {
    pub fn new(name: &str) -> Self {
        JigDef {
            name: UnitKind::Jig.base_name(name).to_string(),
            display_name: None,
            description: String::new(),
            default_scenario: None,
            working_directory: None,
        }
    }

    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}
