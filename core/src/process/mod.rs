//! Process supervision: spawning, output capture, readiness, timeouts and
//! stop hooks.

pub mod command;
pub mod framing;
pub mod health;
pub mod hook;
pub mod supervisor;

pub use command::ProcessEnv;
pub use supervisor::{
    ProcessEvent, ProcessHandle, ProcessMode, ProcessOutcome, ProcessReport, ProcessSpec,
    ProcessState, Reporter, StopHooks, Stream,
};
