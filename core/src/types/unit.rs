use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Test,
    Scenario,
    Jig,
    Trigger,
    Logger,
    Interface,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Test => "test",
            UnitKind::Scenario => "scenario",
            UnitKind::Jig => "jig",
            UnitKind::Trigger => "trigger",
            UnitKind::Logger => "logger",
            UnitKind::Interface => "interface",
        }
    }

    /// The file extension a unit of this kind carries on disk, e.g. `.test`.
    pub fn suffix(&self) -> &'static str {
        match self {
            UnitKind::Test => ".test",
            UnitKind::Scenario => ".scenario",
            UnitKind::Jig => ".jig",
            UnitKind::Trigger => ".trigger",
            UnitKind::Logger => ".logger",
            UnitKind::Interface => ".interface",
        }
    }

    pub fn parse(s: &str) -> Option<UnitKind> {
        match s.to_ascii_lowercase().as_str() {
            "test" => Some(UnitKind::Test),
            "scenario" => Some(UnitKind::Scenario),
            "jig" => Some(UnitKind::Jig),
            "trigger" => Some(UnitKind::Trigger),
            "logger" => Some(UnitKind::Logger),
            "interface" => Some(UnitKind::Interface),
            _ => None,
        }
    }

    /// Strip this kind's suffix from `name`, if present.
    pub fn base_name<'a>(&self, name: &'a str) -> &'a str {
        let trimmed = name.trim();
        trimmed.strip_suffix(self.suffix()).unwrap_or(trimmed)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one unit within a run. Two refs are equal when their kinds
/// match and their names match after suffix elision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitRef {
    name: String,
    kind: UnitKind,
}

impl UnitRef {
    pub fn new(name: &str, kind: UnitKind) -> Self {
        UnitRef {
            name: kind.base_name(name).to_string(),
            kind,
        }
    }

    pub fn test(name: &str) -> Self {
        UnitRef::new(name, UnitKind::Test)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.kind.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_elided() {
        assert_eq!(UnitKind::Test.base_name("boot.test"), "boot");
        assert_eq!(UnitKind::Test.base_name("boot"), "boot");
        // Only the matching kind's suffix is stripped.
        assert_eq!(UnitKind::Test.base_name("boot.scenario"), "boot.scenario");
    }

    #[test]
    fn refs_compare_after_elision() {
        assert_eq!(UnitRef::test("flash.test"), UnitRef::test("flash"));
        assert_ne!(
            UnitRef::new("flash", UnitKind::Test),
            UnitRef::new("flash", UnitKind::Scenario)
        );
    }

    #[test]
    fn display_restores_suffix() {
        let r = UnitRef::new("main", UnitKind::Scenario);
        assert_eq!(r.to_string(), "main.scenario");
        assert_eq!(r.name(), "main");
    }

    #[test]
    fn kind_parse_is_case_insensitive() {
        assert_eq!(UnitKind::parse("Logger"), Some(UnitKind::Logger));
        assert_eq!(UnitKind::parse("coupon"), None);
    }

    #[test]
    fn kind_serde() {
        let json = serde_json::to_string(&UnitKind::Interface).unwrap();
        assert_eq!(json, "\"interface\"");
    }
}
