//! Wire protocols spoken with interface and trigger programs.

pub mod interface;
pub mod liveness;
pub mod trigger;

pub use interface::ClientCommand;
pub use liveness::Liveness;
pub use trigger::{TriggerAction, TriggerCommand, TriggerSession};
