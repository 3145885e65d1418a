//! Event bus: one dispatcher thread fans events out to subscribed sinks.
//!
//! Producers hand events to the bus through a single ingestion channel, so
//! publication order is admission order and every sink sees the same total
//! order. Each sink owns a bounded queue drained by its own worker thread.
//! The dispatcher never waits on a sink: when a queue is full the event is
//! dropped for that sink only and the sink is marked degraded.

pub mod child;
pub mod console;
pub mod format;
pub mod sink;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use format::Format;
pub use sink::{CaptureSink, Sink, SinkStats};

use crate::config::EngineConfig;
use crate::types::event::{Event, UnitType};
use sink::{Delivery, WorkerFault};

pub type SubscriptionId = u64;

/// Anything events can be published to.
pub trait Publish {
    fn publish(&self, event: Event);
}

/// Handle to one subscribed sink.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    name: String,
    stats: Arc<SinkStats>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }
}

struct Entry {
    id: SubscriptionId,
    name: String,
    format: Format,
    filter: HashSet<UnitType>,
    queue: SyncSender<Delivery>,
    stats: Arc<SinkStats>,
    worker: Option<JoinHandle<()>>,
}

impl Entry {
    fn accepts(&self, event: &Event) -> bool {
        self.filter.is_empty() || self.filter.contains(&event.unit_type)
    }

    /// Queue `event`. Returns false when the worker is gone.
    fn deliver(&self, event: &Event) -> bool {
        let Some(line) = format::render(self.format, event) else {
            return true;
        };
        match self.queue.try_send(Delivery::Line(line)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.record_drop();
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Close the queue; with `join`, also wait for the worker to drain it.
    fn close(mut self, join: bool) {
        drop(self.queue);
        if let Some(worker) = self.worker.take() {
            if join {
                let _ = worker.join();
            }
        }
    }
}

enum BusMsg {
    Publish(Event),
    SendTo(SubscriptionId, Event),
    Subscribe(Entry),
    Unsubscribe(SubscriptionId),
    Fault(SubscriptionId, WorkerFault),
    Flush(Sender<bool>),
    Shutdown,
}

pub struct EventBus {
    tx: SyncSender<BusMsg>,
    dispatcher: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    sink_queue: usize,
    max_failures: u32,
}

impl EventBus {
    pub fn new(config: &EngineConfig) -> Self {
        let (tx, rx) = mpsc::sync_channel(config.bus_capacity.max(1));
        let dispatcher = thread::Builder::new()
            .name("bus".into())
            .spawn(move || Dispatcher::default().run(rx))
            .map_err(|e| warn!(error = %e, "cannot start bus dispatcher"))
            .ok();
        EventBus {
            tx,
            dispatcher,
            next_id: AtomicU64::new(1),
            sink_queue: config.sink_queue.max(1),
            max_failures: config.max_sink_failures.max(1),
        }
    }

    /// Attach `sink`. An empty `filter` accepts every unit type.
    pub fn subscribe(
        &self,
        sink: Box<dyn Sink>,
        format: Format,
        filter: &[UnitType],
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = sink.name().to_string();
        let stats = Arc::new(SinkStats::default());
        let (queue, rx) = mpsc::sync_channel(self.sink_queue);

        let faults = self.tx.clone();
        let worker_stats = stats.clone();
        let max_failures = self.max_failures;
        let worker = thread::Builder::new()
            .name(format!("sink {}", name))
            .spawn(move || {
                sink::run_worker(sink, rx, worker_stats, max_failures, |fault| {
                    let _ = faults.try_send(BusMsg::Fault(id, fault));
                })
            })
            .map_err(|e| warn!(sink = %name, error = %e, "cannot start sink worker"))
            .ok();

        let entry = Entry {
            id,
            name: name.clone(),
            format,
            filter: filter.iter().copied().collect(),
            queue,
            stats: stats.clone(),
            worker,
        };
        let _ = self.tx.send(BusMsg::Subscribe(entry));
        debug!(sink = %name, id, ?format, "subscribed");
        Subscription { id, name, stats }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let _ = self.tx.send(BusMsg::Unsubscribe(id));
    }

    /// Deliver `event` to one subscription only, bypassing its filter.
    pub fn send_to(&self, id: SubscriptionId, event: Event) {
        let _ = self.tx.send(BusMsg::SendTo(id, event));
    }

    /// Wait until every sink has written everything published so far.
    /// Returns false if `timeout` expired first or a sink's queue was too
    /// full to take the barrier.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack, done) = mpsc::channel();
        if self.tx.send(BusMsg::Flush(ack)).is_err() {
            return false;
        }
        wait_disconnected(&done, Instant::now() + timeout)
    }

    pub fn shutdown(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = self.tx.send(BusMsg::Shutdown);
            let _ = dispatcher.join();
        }
    }
}

impl Publish for EventBus {
    fn publish(&self, event: Event) {
        let _ = self.tx.send(BusMsg::Publish(event));
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Block until every sender of `rx` is gone or `until` passes. A `false`
/// acknowledgement fails the wait at once.
fn wait_disconnected(rx: &Receiver<bool>, until: Instant) -> bool {
    loop {
        let now = Instant::now();
        if now >= until {
            return false;
        }
        match rx.recv_timeout(until - now) {
            Ok(true) => continue,
            Ok(false) => return false,
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}

#[derive(Default)]
struct Dispatcher {
    entries: Vec<Entry>,
}

impl Dispatcher {
    fn run(mut self, rx: Receiver<BusMsg>) {
        for msg in rx.iter() {
            match msg {
                BusMsg::Publish(event) => self.publish(&event, None),
                BusMsg::SendTo(id, event) => {
                    if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
                        if !self.entries[pos].deliver(&event) {
                            self.remove(id);
                        }
                    }
                }
                BusMsg::Subscribe(entry) => self.entries.push(entry),
                BusMsg::Unsubscribe(id) => self.remove(id),
                BusMsg::Fault(id, fault) => self.fault(id, fault),
                BusMsg::Flush(ack) => {
                    for entry in &self.entries {
                        match entry.queue.try_send(Delivery::Barrier(ack.clone())) {
                            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                            Err(TrySendError::Full(_)) => {
                                debug!(sink = %entry.name, "queue full, flush incomplete");
                                let _ = ack.send(false);
                            }
                        }
                    }
                }
                BusMsg::Shutdown => break,
            }
        }
        for entry in self.entries.drain(..) {
            entry.close(true);
        }
    }

    fn publish(&mut self, event: &Event, skip: Option<SubscriptionId>) {
        let mut gone = Vec::new();
        for entry in &self.entries {
            if Some(entry.id) == skip || !entry.accepts(event) {
                continue;
            }
            if !entry.deliver(event) {
                gone.push(entry.id);
            }
        }
        for id in gone {
            self.remove(id);
        }
    }

    fn fault(&mut self, id: SubscriptionId, fault: WorkerFault) {
        let Some(name) = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.clone())
        else {
            return;
        };
        let message = if fault.fatal {
            format!("sink {} removed: {}", name, fault.error)
        } else {
            format!("sink {}: {}", name, fault.error)
        };
        self.publish(&Event::debug("bus", UnitType::Internal, message), Some(id));
        if fault.fatal {
            warn!(sink = %name, label = fault.error.as_label(), "sink removed after repeated failures");
            self.remove(id);
        }
    }

    fn remove(&mut self, id: SubscriptionId) {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            self.entries.remove(pos).close(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::types::event::EventKind;

    fn bus() -> EventBus {
        EventBus::new(&EngineConfig::default())
    }

    fn log(unit: &str, unit_type: UnitType, msg: &str) -> Event {
        Event::new(
            EventKind::Log {
                message: msg.into(),
            },
            unit,
            unit_type,
        )
    }

    #[test]
    fn sinks_see_same_order() {
        let bus = bus();
        let a = CaptureSink::new("a");
        let b = CaptureSink::new("b");
        bus.subscribe(Box::new(a.clone()), Format::Console, &[]);
        bus.subscribe(Box::new(b.clone()), Format::Console, &[]);
        for i in 0..50 {
            bus.publish(log("t", UnitType::Test, &format!("m{}", i)));
        }
        assert!(bus.flush(Duration::from_secs(5)));
        assert_eq!(a.lines().len(), 50);
        assert_eq!(a.lines(), b.lines());
        assert_eq!(a.lines()[0], "[t] log: m0");
    }

    #[test]
    fn filter_by_unit_type() {
        let bus = bus();
        let only_scenarios = CaptureSink::new("s");
        bus.subscribe(
            Box::new(only_scenarios.clone()),
            Format::Console,
            &[UnitType::Scenario],
        );
        bus.publish(log("t", UnitType::Test, "skip me"));
        bus.publish(log("main", UnitType::Scenario, "keep me"));
        assert!(bus.flush(Duration::from_secs(5)));
        assert_eq!(only_scenarios.lines(), vec!["[main] log: keep me"]);
    }

    #[test]
    fn send_to_reaches_one_subscription() {
        let bus = bus();
        let a = CaptureSink::new("a");
        let b = CaptureSink::new("b");
        let sub = bus.subscribe(Box::new(a.clone()), Format::Console, &[UnitType::Test]);
        bus.subscribe(Box::new(b.clone()), Format::Console, &[]);
        bus.send_to(sub.id(), log("", UnitType::Internal, "hi"));
        assert!(bus.flush(Duration::from_secs(5)));
        assert_eq!(a.lines().len(), 1);
        assert!(b.lines().is_empty());
    }

    #[test]
    fn unsubscribed_sink_gets_nothing_more() {
        let bus = bus();
        let a = CaptureSink::new("a");
        let sub = bus.subscribe(Box::new(a.clone()), Format::Console, &[]);
        bus.publish(log("t", UnitType::Test, "one"));
        bus.unsubscribe(sub.id());
        bus.publish(log("t", UnitType::Test, "two"));
        assert!(bus.flush(Duration::from_secs(5)));
        assert_eq!(a.lines().len(), 1);
    }

    struct Slow {
        gate: Receiver<()>,
    }

    impl Sink for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn write_line(&mut self, _line: &str) -> Result<(), SinkError> {
            let _ = self.gate.recv();
            Ok(())
        }
    }

    #[test]
    fn full_queue_drops_and_degrades() {
        let config = EngineConfig {
            sink_queue: 2,
            ..EngineConfig::default()
        };
        let bus = EventBus::new(&config);
        let (open, gate) = mpsc::channel();
        let fast = CaptureSink::new("fast");
        let slow = bus.subscribe(Box::new(Slow { gate }), Format::Tsv, &[]);
        bus.subscribe(Box::new(fast.clone()), Format::Tsv, &[]);
        for i in 0..20 {
            bus.publish(log("t", UnitType::Test, &format!("m{}", i)));
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while fast.lines().len() < 20 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(fast.lines().len(), 20);
        assert!(slow.stats().is_degraded());
        assert!(slow.stats().dropped() > 0);
        drop(open);
    }

    #[test]
    fn flush_fails_when_barrier_cannot_be_queued() {
        let config = EngineConfig {
            sink_queue: 2,
            ..EngineConfig::default()
        };
        let bus = EventBus::new(&config);
        let (open, gate) = mpsc::channel();
        let slow = bus.subscribe(Box::new(Slow { gate }), Format::Tsv, &[]);
        for i in 0..20 {
            bus.publish(log("t", UnitType::Test, &format!("m{}", i)));
        }
        let started = Instant::now();
        assert!(!bus.flush(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(slow.stats().dropped() > 0);
        drop(open);
    }

    struct Failing;

    impl Sink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn write_line(&mut self, _line: &str) -> Result<(), SinkError> {
            Err(SinkError::Write {
                sink: "failing".into(),
                error: "broken pipe".into(),
            })
        }
    }

    #[test]
    fn failing_sink_is_removed_and_reported() {
        let bus = bus();
        let watcher = CaptureSink::new("watch");
        let bad = bus.subscribe(Box::new(Failing), Format::Tsv, &[]);
        bus.subscribe(Box::new(watcher.clone()), Format::Console, &[]);
        for i in 0..3 {
            bus.publish(log("t", UnitType::Test, &format!("m{}", i)));
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while !bad.stats().is_failed() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(bad.stats().is_failed());
        assert!(bus.flush(Duration::from_secs(5)));
        assert!(watcher
            .lines()
            .iter()
            .any(|l| l.contains("debug") && l.contains("failing")));
    }
}
