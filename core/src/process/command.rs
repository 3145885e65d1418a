//! Shell command construction and process-group control.
//!
//! Every command runs as `sh -c <cmd>` in a fresh process group whose id is
//! the child's pid, so the whole tree can be killed at once.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::debug;

use crate::types::event::UnitType;
use crate::types::test::CommandSpec;

/// Environment handed to every spawned unit command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessEnv {
    pub jig: String,
    pub scenario: String,
    pub test: String,
    pub unit_type: Option<UnitType>,
    pub timeout: Option<Duration>,
}

impl ProcessEnv {
    pub fn vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("JIG20_JIG".to_string(), self.jig.clone()),
            ("JIG20_SCENARIO".to_string(), self.scenario.clone()),
            ("JIG20_TEST".to_string(), self.test.clone()),
        ];
        if let Some(t) = self.unit_type {
            vars.push(("JIG20_UNIT_TYPE".to_string(), t.as_str().to_string()));
        }
        if let Some(timeout) = self.timeout {
            vars.push(("JIG20_TIMEOUT_SECS".to_string(), timeout.as_secs().to_string()));
        }
        vars
    }
}

/// Build `sh -c <cmd>` with piped stdout/stderr in its own process group.
pub fn shell(cmd: &CommandSpec, working_dir: Option<&Path>, env: &[(String, String)]) -> Command {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }
    for (k, v) in env {
        command.env(k, v);
    }
    command
}

/// Like [`shell`], but with stdin piped for programs that take input.
pub fn shell_interactive(
    cmd: &CommandSpec,
    working_dir: Option<&Path>,
    env: &[(String, String)],
) -> Command {
    let mut command = shell(cmd, working_dir, env);
    command.stdin(Stdio::piped());
    command
}

/// SIGKILL every process in the group led by `pgid`. A group that is
/// already gone is not an error.
pub fn kill_group(pgid: u32) {
    let Ok(pgid) = i32::try_from(pgid) else {
        return;
    };
    if pgid <= 0 {
        return;
    }
    // SAFETY: kill(2) with a negative pid only signals; no memory is touched.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "kill process group");
    }
}
