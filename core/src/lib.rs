//! Jig-20 execution engine.
//!
//! Resolves a scenario's tests into a dependency graph, runs them as
//! supervised shell processes, and fans every event out to loggers,
//! interfaces and triggers over the event bus.

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod process;
pub mod protocol;
pub mod scenario;
pub mod types;
pub mod units;

pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle};
pub use error::{ConfigError, EngineError, GraphError, ProcessError, ProtocolError, SinkError};
pub use units::{Manifest, UnitSet};
