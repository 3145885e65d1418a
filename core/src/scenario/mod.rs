pub mod run;

pub use run::{RunContext, ScenarioRun};
