use std::io::Write;

use super::sink::Sink;
use crate::error::SinkError;

/// Prints events on the terminal, one per line.
pub struct ConsoleSink {
    name: String,
}

impl ConsoleSink {
    pub fn new() -> Self {
        ConsoleSink {
            name: "console".into(),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line).map_err(|e| SinkError::Write {
            sink: self.name.clone(),
            error: e.to_string(),
        })
    }
}
