//! External logger, interface and trigger programs.
//!
//! Each program is spawned through the shell with stdin and stdout piped.
//! Its stdin becomes a bus [`Sink`]; lines it prints on stdout are handed to
//! a callback as inbound traffic. Stderr is logged.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ChildStdin;
use std::thread;

use tracing::{debug, warn};

use super::sink::Sink;
use crate::error::{ProcessError, SinkError};
use crate::process::command::{kill_group, shell_interactive};
use crate::types::event::UnitType;
use crate::types::test::CommandSpec;

/// Writes rendered lines to a child's stdin.
pub struct ChildSink {
    name: String,
    stdin: ChildStdin,
}

impl Sink for ChildSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        let result = writeln!(self.stdin, "{}", line).and_then(|_| self.stdin.flush());
        result.map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                SinkError::Disconnected {
                    sink: self.name.clone(),
                }
            } else {
                SinkError::Write {
                    sink: self.name.clone(),
                    error: e.to_string(),
                }
            }
        })
    }
}

/// Owns the child's process group; dropping it kills the program.
pub struct ChildGuard {
    name: String,
    unit_type: UnitType,
    pgid: u32,
}

impl ChildGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_type(&self) -> UnitType {
        self.unit_type
    }

    pub fn kill(&self) {
        debug!(unit = %self.name, "stopping endpoint program");
        kill_group(self.pgid);
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Everything needed to launch one endpoint program.
pub struct ChildSpec {
    pub name: String,
    pub unit_type: UnitType,
    pub command: CommandSpec,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Spawn the program. `on_line` receives each stdout line; `on_close`
/// runs once when stdout ends.
pub fn spawn<L, C>(
    spec: ChildSpec,
    mut on_line: L,
    on_close: C,
) -> Result<(ChildSink, ChildGuard), ProcessError>
where
    L: FnMut(String) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let mut child = shell_interactive(&spec.command, spec.working_dir.as_deref(), &spec.env)
        .spawn()
        .map_err(|e| ProcessError::Spawn {
            command: spec.command.as_str().to_string(),
            error: e.to_string(),
        })?;
    let pgid = child.id();
    let stdin = child.stdin.take().ok_or_else(|| ProcessError::Io {
        error: "child stdin not piped".into(),
    })?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let name = spec.name.clone();

    if let Some(stdout) = stdout {
        let unit = name.clone();
        thread::Builder::new()
            .name(format!("{} {} in", spec.unit_type, name))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    match line {
                        Ok(line) => on_line(line),
                        Err(e) => {
                            debug!(unit = %unit, error = %e, "endpoint stdout error");
                            break;
                        }
                    }
                }
                on_close();
            })?;
    }
    if let Some(stderr) = stderr {
        let unit = name.clone();
        thread::Builder::new()
            .name(format!("{} {} err", spec.unit_type, name))
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!(unit = %unit, "{}", line);
                }
            })?;
    }
    {
        let unit = name.clone();
        thread::Builder::new()
            .name(format!("{} {} wait", spec.unit_type, name))
            .spawn(move || match child.wait() {
                Ok(status) => debug!(unit = %unit, %status, "endpoint program exited"),
                Err(e) => warn!(unit = %unit, error = %e, "endpoint program wait failed"),
            })?;
    }

    debug!(unit = %name, pid = pgid, "endpoint program started");
    Ok((
        ChildSink {
            name: name.clone(),
            stdin,
        },
        ChildGuard {
            name,
            unit_type: spec.unit_type,
            pgid,
        },
    ))
}
