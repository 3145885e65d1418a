//! Sinks and the per-sink delivery worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::SinkError;

/// A consumer of rendered event lines.
pub trait Sink: Send + 'static {
    fn name(&self) -> &str;
    fn write_line(&mut self, line: &str) -> Result<(), SinkError>;
}

/// Delivery counters shared between the bus and a subscription handle.
#[derive(Debug, Default)]
pub struct SinkStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    degraded: AtomicBool,
    failed: AtomicBool,
}

impl SinkStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// At least one event was dropped because the queue was full.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// The sink hit its failure limit and was removed.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.degraded.store(true, Ordering::Relaxed);
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }
}

pub(crate) enum Delivery {
    Line(String),
    /// Acknowledged once every earlier line has been written.
    Barrier(Sender<bool>),
}

/// Report from a worker back to the dispatcher.
pub(crate) struct WorkerFault {
    pub error: SinkError,
    pub fatal: bool,
}

/// Drain `rx` into `sink` until the queue closes or the sink fails
/// `max_failures` times in a row.
pub(crate) fn run_worker(
    mut sink: Box<dyn Sink>,
    rx: Receiver<Delivery>,
    stats: Arc<SinkStats>,
    max_failures: u32,
    mut on_fault: impl FnMut(WorkerFault),
) {
    let mut consecutive = 0u32;
    for delivery in rx {
        match delivery {
            Delivery::Line(line) => match sink.write_line(&line) {
                Ok(()) => {
                    consecutive = 0;
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    consecutive += 1;
                    debug!(sink = sink.name(), error = %error, consecutive, "sink write failed");
                    let fatal = consecutive >= max_failures;
                    if fatal {
                        stats.mark_failed();
                    }
                    on_fault(WorkerFault { error, fatal });
                    if fatal {
                        return;
                    }
                }
            },
            Delivery::Barrier(ack) => {
                let _ = ack.send(true);
            }
        }
    }
}

/// In-memory sink; every written line is kept in a shared buffer.
#[derive(Clone, Default)]
pub struct CaptureSink {
    name: String,
    lines: Arc<Mutex<Vec<String>>>,
}

impl CaptureSink {
    pub fn new(name: &str) -> Self {
        CaptureSink {
            name: name.to_string(),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl Sink for CaptureSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        let mut lines = self.lines.lock().map_err(|_| SinkError::Write {
            sink: self.name.clone(),
            error: "buffer poisoned".into(),
        })?;
        lines.push(line.to_string());
        Ok(())
    }
}
