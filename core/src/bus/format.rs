//! Wire renderings of [`Event`]s.

use serde::{Deserialize, Serialize};

use crate::protocol::{interface, trigger};
use crate::types::endpoint::WireFormat;
use crate::types::event::Event;

/// How a subscription wants events rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Logger TSV line.
    Tsv,
    /// One JSON object per line.
    Json,
    /// Interface text protocol.
    Text,
    /// Trigger protocol: only `Pass`/`Fail` at the end of a run.
    Trigger,
    /// Human-readable terminal output.
    Console,
}

impl From<WireFormat> for Format {
    fn from(w: WireFormat) -> Self {
        match w {
            WireFormat::Tsv => Format::Tsv,
            WireFormat::Json => Format::Json,
            WireFormat::Text => Format::Text,
        }
    }
}

/// Render `event` for `format`. `None` means the format has nothing to say
/// about this event.
pub fn render(format: Format, event: &Event) -> Option<String> {
    match format {
        Format::Tsv => Some(to_tsv(event)),
        Format::Json => serde_json::to_string(&JsonRecord::from(event)).ok(),
        Format::Text => Some(interface::encode(event)),
        Format::Trigger => trigger::encode(event),
        Format::Console => Some(to_console(event)),
    }
}

// ---------------------------------------------------------------------------
// TSV
// ---------------------------------------------------------------------------

/// Escape backslash, tab and newline. Every other character passes through.
pub fn escape_tsv(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_tsv`]. Unknown escapes are kept as written.
pub fn unescape_tsv(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// `message-type \t unit \t unit-type \t secs \t nsecs \t message`
pub fn to_tsv(event: &Event) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        event.message_type(),
        escape_tsv(&event.unit),
        event.unit_type.as_str(),
        event.timestamp.secs,
        event.timestamp.nsecs,
        escape_tsv(&event.message())
    )
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRecord {
    pub message_type: String,
    pub unit: String,
    pub unit_type: String,
    pub unix_time: u64,
    pub unix_time_nsecs: u32,
    pub message: String,
}

impl From<&Event> for JsonRecord {
    fn from(event: &Event) -> Self {
        JsonRecord {
            message_type: event.message_type().to_string(),
            unit: event.unit.clone(),
            unit_type: event.unit_type.as_str().to_string(),
            unix_time: event.timestamp.secs,
            unix_time_nsecs: event.timestamp.nsecs,
            message: event.message(),
        }
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

fn to_console(event: &Event) -> String {
    let who = if event.unit.is_empty() {
        event.unit_type.as_str().to_string()
    } else {
        event.unit.clone()
    };
    let message = event.message();
    if message.is_empty() {
        format!("[{}] {}", who, event.message_type())
    } else {
        format!("[{}] {}: {}", who, event.message_type(), message)
    }
}
