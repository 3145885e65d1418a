//! Engine: the Jig-20 main event loop.
//!
//! The engine is single-threaded for state mutation. Process supervisors,
//! interface programs and trigger programs run on their own threads and talk
//! to the engine through one mpsc channel; the engine is its only consumer.
//!
//! # Main loop tick
//!
//! 1. Block on the channel until a message arrives or the nearest deadline
//!    (scenario timeout, PONG window, next PING) passes
//! 2. Drain the channel, handling each message in arrival order
//! 3. Fire expired timers
//! 4. Tell monitoring triggers how a finished run ended
//!
//! Nothing on this thread waits on a process or a hook: teardowns and hooks
//! run on supervisor threads and report back through the channel.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::bus::child::{self, ChildGuard, ChildSpec};
use crate::bus::{EventBus, Format, Publish, Sink, Subscription, SubscriptionId};
use crate::config::{EngineConfig, PROTOCOL_VERSION};
use crate::error::{EngineError, ProtocolError};
use crate::graph;
use crate::process::{ProcessEnv, ProcessEvent, ProcessReport, Reporter};
use crate::protocol::{interface, trigger};
use crate::protocol::{ClientCommand, Liveness, TriggerAction, TriggerSession};
use crate::scenario::{RunContext, ScenarioRun};
use crate::types::event::{Event, EventKind, UnitType};
use crate::types::jig::JigDef;
use crate::types::state::{AbortReason, RunStatus};
use crate::types::test::CommandSpec;
use crate::units::UnitSet;

/// Messages delivered to the engine's main loop.
#[derive(Debug)]
pub enum EngineMsg {
    /// A line received from an interface, stamped when it was read.
    Interface {
        name: String,
        line: String,
        received: Instant,
    },
    /// A line received from a trigger.
    Trigger { name: String, line: String },
    /// An endpoint program closed its output.
    EndpointClosed { unit_type: UnitType, name: String },
    Process(ProcessReport),
    Start(Option<String>),
    Abort,
    Select(String),
    Shutdown,
}

/// Clonable sender side of the engine's channel.
#[derive(Clone)]
pub struct EngineHandle {
    sender: Sender<EngineMsg>,
}

impl EngineHandle {
    fn send(&self, msg: EngineMsg) -> Result<(), EngineError> {
        self.sender.send(msg).map_err(|_| EngineError::ChannelClosed)
    }

    pub fn start(&self, scenario: Option<&str>) -> Result<(), EngineError> {
        self.send(EngineMsg::Start(scenario.map(str::to_string)))
    }

    pub fn abort(&self) -> Result<(), EngineError> {
        self.send(EngineMsg::Abort)
    }

    pub fn select_scenario(&self, name: &str) -> Result<(), EngineError> {
        self.send(EngineMsg::Select(name.to_string()))
    }

    /// Feed a line as if interface `name` had written it.
    pub fn interface_line(&self, name: &str, line: &str) -> Result<(), EngineError> {
        self.send(EngineMsg::Interface {
            name: name.to_string(),
            line: line.to_string(),
            received: Instant::now(),
        })
    }

    /// Feed a line as if trigger `name` had written it.
    pub fn trigger_line(&self, name: &str, line: &str) -> Result<(), EngineError> {
        self.send(EngineMsg::Trigger {
            name: name.to_string(),
            line: line.to_string(),
        })
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineMsg::Shutdown)
    }
}

/// Routes supervisor reports into the engine's channel.
struct Forwarder(Mutex<Sender<EngineMsg>>);

impl Reporter for Forwarder {
    fn report(&self, report: ProcessReport) {
        if let Ok(tx) = self.0.lock() {
            let _ = tx.send(EngineMsg::Process(report));
        }
    }
}

/// A subscribed logger, interface or trigger.
struct Endpoint {
    id: SubscriptionId,
    format: Format,
    session: TriggerSession,
    /// Present when the endpoint is an external program.
    guard: Option<ChildGuard>,
}

type EndpointKey = (UnitType, String);

pub struct Engine {
    config: EngineConfig,
    units: UnitSet,
    jig: JigDef,
    scenario: Option<String>,
    bus: EventBus,
    run: Option<ScenarioRun>,
    announced: bool,
    receiver: Receiver<EngineMsg>,
    handle: EngineHandle,
    reporter: Arc<dyn Reporter>,
    liveness: Liveness,
    endpoints: HashMap<EndpointKey, Endpoint>,
    next_ping: Instant,
    closed: bool,
}

impl Engine {
    /// Load `units` onto a jig. With no jig named, the first one defined is
    /// used, or an empty `default` jig when there are none.
    pub fn new(units: UnitSet, config: EngineConfig, jig: Option<&str>) -> Result<Engine, EngineError> {
        config.validate()?;
        let jig = match jig {
            Some(name) => units.jig(name).cloned().ok_or(EngineError::NoJig)?,
            None => units
                .jigs()
                .first()
                .cloned()
                .unwrap_or_else(|| JigDef::new("default")),
        };

        let scenario = jig.default_scenario.as_deref().and_then(|name| {
            match units.scenario(name) {
                Some(s) if s.compatible_with(&jig.name) => Some(s.name.clone()),
                _ => {
                    warn!(jig = %jig.name, scenario = name, "default scenario not usable on this jig");
                    None
                }
            }
        });

        let (sender, receiver) = mpsc::channel();
        let reporter: Arc<dyn Reporter> = Arc::new(Forwarder(Mutex::new(sender.clone())));
        let bus = EventBus::new(&config);
        info!(jig = %jig.name, scenario = ?scenario, "engine loaded");

        Ok(Engine {
            liveness: Liveness::new(config.pong_window()),
            next_ping: Instant::now() + config.ping_interval(),
            config,
            units,
            jig,
            scenario,
            bus,
            run: None,
            announced: true,
            receiver,
            handle: EngineHandle { sender },
            reporter,
            endpoints: HashMap::new(),
            closed: false,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn jig(&self) -> &JigDef {
        &self.jig
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn run_state(&self) -> Option<&ScenarioRun> {
        self.run.as_ref()
    }

    pub fn status(&self) -> RunStatus {
        self.run.as_ref().map(|r| r.status()).unwrap_or(RunStatus::Idle)
    }

    fn is_running(&self) -> bool {
        self.status().is_running()
    }

    // -----------------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------------

    /// Subscribe a logger-style sink.
    pub fn attach_sink(&mut self, sink: Box<dyn Sink>, format: Format, filter: &[UnitType]) -> Subscription {
        let name = sink.name().to_string();
        let sub = self.bus.subscribe(sink, format, filter);
        self.register(UnitType::Logger, &name, &sub, format, None);
        sub
    }

    /// Subscribe an interface sink and send it the greeting. Lines it
    /// writes back arrive through [`EngineHandle::interface_line`].
    pub fn connect_interface(&mut self, sink: Box<dyn Sink>, format: Format) -> Subscription {
        let name = sink.name().to_string();
        let sub = self.bus.subscribe(sink, format, &[]);
        self.register(UnitType::Interface, &name, &sub, format, None);
        self.greet(sub.id());
        sub
    }

    /// Subscribe a trigger sink. Triggers only ever receive run results,
    /// and only after sending `Monitor`.
    pub fn connect_trigger(&mut self, sink: Box<dyn Sink>) -> Subscription {
        let name = sink.name().to_string();
        let sub = self.bus.subscribe(sink, Format::Trigger, &[UnitType::Trigger]);
        self.register(UnitType::Trigger, &name, &sub, Format::Trigger, None);
        sub
    }

    fn register(
        &mut self,
        unit_type: UnitType,
        name: &str,
        sub: &Subscription,
        format: Format,
        guard: Option<ChildGuard>,
    ) {
        let endpoint = Endpoint {
            id: sub.id(),
            format,
            session: TriggerSession::default(),
            guard,
        };
        if let Some(old) = self.endpoints.insert((unit_type, name.to_string()), endpoint) {
            self.bus.unsubscribe(old.id);
        }
    }

    /// Launch every logger, interface and trigger program usable on the
    /// jig. A program that fails to start is reported and skipped.
    pub fn spawn_endpoints(&mut self) {
        let jig = self.jig.name.clone();
        let loggers: Vec<_> = self
            .units
            .loggers()
            .iter()
            .filter(|l| l.compatible_with(&jig))
            .map(|l| (l.name.clone(), l.exec_start.clone(), l.working_directory.clone(), Format::from(l.format)))
            .collect();
        let interfaces: Vec<_> = self
            .units
            .interfaces()
            .iter()
            .filter(|i| i.compatible_with(&jig))
            .map(|i| (i.name.clone(), i.exec_start.clone(), i.working_directory.clone(), Format::from(i.format)))
            .collect();
        let triggers: Vec<_> = self
            .units
            .triggers()
            .iter()
            .filter(|t| t.compatible_with(&jig))
            .map(|t| (t.name.clone(), t.exec_start.clone(), t.working_directory.clone(), Format::Trigger))
            .collect();

        for (name, cmd, dir, format) in loggers {
            self.spawn_endpoint(UnitType::Logger, &name, cmd, dir, format);
        }
        for (name, cmd, dir, format) in interfaces {
            self.spawn_endpoint(UnitType::Interface, &name, cmd, dir, format);
        }
        for (name, cmd, dir, format) in triggers {
            self.spawn_endpoint(UnitType::Trigger, &name, cmd, dir, format);
        }
    }

    fn spawn_endpoint(
        &mut self,
        unit_type: UnitType,
        name: &str,
        command: CommandSpec,
        working_dir: Option<std::path::PathBuf>,
        format: Format,
    ) {
        let env = ProcessEnv {
            jig: self.jig.name.clone(),
            scenario: self.scenario.clone().unwrap_or_default(),
            test: String::new(),
            unit_type: Some(unit_type),
            timeout: None,
        };
        let spec = ChildSpec {
            name: name.to_string(),
            unit_type,
            command,
            working_dir: working_dir.or_else(|| self.jig.working_directory.clone()),
            env: env.vars(),
        };

        let lines = self.handle.sender.clone();
        let closed = self.handle.sender.clone();
        let unit = name.to_string();
        let on_line = move |line: String| {
            let msg = match unit_type {
                UnitType::Interface => EngineMsg::Interface {
                    name: unit.clone(),
                    line,
                    received: Instant::now(),
                },
                UnitType::Trigger => EngineMsg::Trigger {
                    name: unit.clone(),
                    line,
                },
                _ => {
                    debug!(unit = %unit, "{}", line);
                    return;
                }
            };
            let _ = lines.send(msg);
        };
        let closed_name = name.to_string();
        let on_close = move || {
            let _ = closed.send(EngineMsg::EndpointClosed {
                unit_type,
                name: closed_name,
            });
        };

        match child::spawn(spec, on_line, on_close) {
            Ok((sink, guard)) => {
                let filter: &[UnitType] = match unit_type {
                    UnitType::Trigger => &[UnitType::Trigger],
                    _ => &[],
                };
                let sub = self.bus.subscribe(Box::new(sink), format, filter);
                info!(unit = %name, %unit_type, "endpoint started");
                self.register(unit_type, name, &sub, format, Some(guard));
                if unit_type == UnitType::Interface {
                    self.greet(sub.id());
                }
            }
            Err(e) => {
                warn!(unit = %name, %unit_type, error = %e, "endpoint failed to start");
                self.bus
                    .publish(Event::debug(name, unit_type, format!("failed to start: {}", e)));
            }
        }
    }

    fn drop_endpoint(&mut self, key: &EndpointKey, reason: &str) {
        if let Some(endpoint) = self.endpoints.remove(key) {
            warn!(unit = %key.1, unit_type = %key.0, reason, "dropping endpoint");
            self.bus.unsubscribe(endpoint.id);
            self.liveness.forget(endpoint.id);
            if let Some(guard) = endpoint.guard.as_ref() {
                guard.kill();
            }
            self.bus
                .publish(Event::debug(&key.1, key.0, format!("dropped: {}", reason)));
        }
    }

    fn key_for(&self, id: SubscriptionId) -> Option<EndpointKey> {
        self.endpoints
            .iter()
            .find(|(_, e)| e.id == id)
            .map(|(k, _)| k.clone())
    }

    // -----------------------------------------------------------------------
    // Announcements
    // -----------------------------------------------------------------------

    fn greet(&self, id: SubscriptionId) {
        self.bus.send_to(
            id,
            Event::internal(EventKind::Hello {
                version: PROTOCOL_VERSION.to_string(),
            }),
        );
        for event in self.jig_events() {
            self.bus.send_to(id, event);
        }
        self.bus.send_to(id, self.scenarios_event());
        if let Some(name) = self.scenario.clone() {
            for event in self.scenario_events(&name) {
                self.bus.send_to(id, event);
            }
        }
    }

    fn jig_events(&self) -> Vec<Event> {
        vec![
            Event::new(
                EventKind::Jig {
                    name: self.jig.name.clone(),
                },
                &self.jig.name,
                UnitType::Jig,
            ),
            describe(UnitType::Jig, "name", &self.jig.name, self.jig.title()),
            describe(UnitType::Jig, "description", &self.jig.name, &self.jig.description),
        ]
    }

    fn scenarios_event(&self) -> Event {
        Event::internal(EventKind::Scenarios {
            names: self.units.scenario_names_for(&self.jig.name),
        })
    }

    /// `SCENARIO`, its description and its `TESTS` list.
    fn scenario_events(&self, name: &str) -> Vec<Event> {
        let mut events = vec![Event::new(
            EventKind::Scenario {
                name: name.to_string(),
            },
            name,
            UnitType::Scenario,
        )];
        if let Some(def) = self.units.scenario(name) {
            events.push(describe(UnitType::Scenario, "name", name, def.title()));
            events.push(describe(
                UnitType::Scenario,
                "description",
                name,
                &def.description,
            ));
        }
        let tests = self.test_list(name);
        for test in &tests {
            if let Some(def) = self.units.test(test) {
                events.push(describe(UnitType::Test, "name", test, def.title()));
            }
        }
        events.push(Event::new(
            EventKind::Tests {
                scenario: name.to_string(),
                tests,
            },
            name,
            UnitType::Scenario,
        ));
        events
    }

    /// Tests of `scenario` in execution order, or as listed when the graph
    /// does not resolve.
    fn test_list(&self, scenario: &str) -> Vec<String> {
        let Some(def) = self.units.scenario(scenario) else {
            return Vec::new();
        };
        match graph::build(self.units.tests(), def, &self.jig.name) {
            Ok(g) => g.order().into_iter().map(str::to_string).collect(),
            Err(_) => def.tests.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    pub fn select_scenario(&mut self, name: &str) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::Busy);
        }
        let def = self
            .units
            .scenario(name)
            .ok_or_else(|| EngineError::UnknownScenario {
                name: name.to_string(),
            })?;
        if !def.compatible_with(&self.jig.name) {
            return Err(EngineError::IncompatibleScenario {
                scenario: def.name.clone(),
                jig: self.jig.name.clone(),
            });
        }
        let name = def.name.clone();
        info!(scenario = %name, "scenario selected");
        self.scenario = Some(name.clone());
        for event in self.scenario_events(&name) {
            self.bus.publish(event);
        }
        Ok(())
    }

    /// Start a run of `scenario`, or of the selected scenario.
    pub fn start(&mut self, scenario: Option<&str>) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::Busy);
        }
        if let Some(name) = scenario {
            self.select_scenario(name)?;
        }
        let name = self.scenario.clone().ok_or(EngineError::NoScenario)?;
        let def = self
            .units
            .scenario(&name)
            .cloned()
            .ok_or(EngineError::UnknownScenario { name: name.clone() })?;

        let graph = match graph::build(self.units.tests(), &def, &self.jig.name) {
            Ok(g) => g,
            Err(e) => {
                warn!(scenario = %name, error = %e, "cannot resolve scenario");
                self.bus.publish(Event::new(
                    EventKind::ConfigError {
                        message: e.to_string(),
                    },
                    &name,
                    UnitType::Scenario,
                ));
                return Err(e.into());
            }
        };

        let ctx = RunContext {
            config: self.config.clone(),
            jig: self.jig.clone(),
            reporter: self.reporter.clone(),
        };
        let mut run = ScenarioRun::new(def, graph, ctx);
        self.announced = false;
        run.start(&self.bus);
        self.run = Some(run);
        Ok(())
    }

    pub fn abort(&mut self, reason: AbortReason) {
        if let Some(run) = self.run.as_mut() {
            run.abort(reason, &self.bus);
        }
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run the main loop until shutdown is requested.
    pub fn run(&mut self) -> Result<(), EngineError> {
        while !self.tick() {}
        self.close();
        Ok(())
    }

    /// Tick until the current run finishes. Returns its final status, or
    /// `Idle` when there was nothing to wait for.
    pub fn run_until_finished(&mut self) -> RunStatus {
        let mut shutdown = false;
        while self.is_running() && !shutdown {
            shutdown = self.tick();
        }
        // Publish whatever is already queued, such as output of abandoned hooks.
        shutdown |= self.drain_channel();
        self.announce_result();
        if shutdown {
            self.close();
        }
        self.status()
    }

    /// Run exactly one tick of the main loop.
    /// Returns true if shutdown was requested.
    pub fn tick(&mut self) -> bool {
        let wait = self
            .next_wakeup()
            .saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(wait) {
            Ok(msg) => {
                if self.handle_msg(msg) {
                    return true;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return true,
        }
        if self.drain_channel() {
            return true;
        }
        self.fire_timers(Instant::now());
        self.announce_result();
        false
    }

    fn next_wakeup(&self) -> Instant {
        let mut at = self.next_ping;
        if let Some(d) = self.run.as_ref().and_then(|r| r.next_deadline()) {
            at = at.min(d);
        }
        if let Some(d) = self.liveness.next_deadline() {
            at = at.min(d);
        }
        at
    }

    /// Handle everything already queued. Returns true on shutdown.
    fn drain_channel(&mut self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => {
                    if self.handle_msg(msg) {
                        return true;
                    }
                }
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    fn handle_msg(&mut self, msg: EngineMsg) -> bool {
        match msg {
            EngineMsg::Process(report) => self.on_report(report),
            EngineMsg::Interface {
                name,
                line,
                received,
            } => return self.on_interface_line(&name, &line, received),
            EngineMsg::Trigger { name, line } => self.on_trigger_line(&name, &line),
            EngineMsg::EndpointClosed { unit_type, name } => {
                self.drop_endpoint(&(unit_type, name), "program exited");
            }
            EngineMsg::Start(scenario) => self.request_start(scenario.as_deref()),
            EngineMsg::Abort => self.abort(AbortReason::Operator),
            EngineMsg::Select(name) => {
                if let Err(e) = self.select_scenario(&name) {
                    self.report_error(&name, UnitType::Scenario, &e);
                }
            }
            EngineMsg::Shutdown => return true,
        }
        false
    }

    fn on_report(&mut self, report: ProcessReport) {
        match self.run.as_mut() {
            Some(run) => run.on_report(report, &self.bus),
            None => {
                if let ProcessEvent::Output { .. } = report.event {
                    debug!(unit = %report.unit, "output with no active run");
                }
            }
        }
    }

    /// `START` while a run is active is a no-op.
    fn request_start(&mut self, scenario: Option<&str>) {
        match self.start(scenario) {
            Ok(()) => {}
            Err(EngineError::Busy) => debug!("start ignored, scenario already running"),
            Err(EngineError::Graph(_)) => {}
            Err(e) => {
                let unit = scenario.unwrap_or_default().to_string();
                self.report_error(&unit, UnitType::Scenario, &e);
            }
        }
    }

    fn report_error(&self, unit: &str, unit_type: UnitType, error: &EngineError) {
        warn!(unit, error = %error, label = error.as_label(), "request failed");
        self.bus.publish(Event::new(
            EventKind::ConfigError {
                message: error.to_string(),
            },
            unit,
            unit_type,
        ));
    }

    fn on_interface_line(&mut self, name: &str, line: &str, received: Instant) -> bool {
        let key = (UnitType::Interface, name.to_string());
        let Some(endpoint) = self.endpoints.get(&key) else {
            debug!(interface = name, "line from unknown interface");
            return false;
        };
        let (id, format) = (endpoint.id, endpoint.format);
        let parsed = match format {
            Format::Json => interface::parse_json(line),
            _ => interface::parse(line),
        };
        match parsed {
            Ok(cmd) => self.on_command(&key, id, cmd, received),
            Err(ProtocolError::Empty) => false,
            Err(e) => {
                self.on_protocol_error(&key, e);
                false
            }
        }
    }

    fn on_command(
        &mut self,
        key: &EndpointKey,
        id: SubscriptionId,
        cmd: ClientCommand,
        received: Instant,
    ) -> bool {
        debug!(interface = %key.1, verb = cmd.verb(), "interface command");
        match cmd {
            ClientCommand::Hello(who) => info!(interface = %key.1, id = %who, "interface said hello"),
            ClientCommand::Jig => {
                for event in self.jig_events() {
                    self.bus.send_to(id, event);
                }
            }
            ClientCommand::Scenarios => self.bus.send_to(id, self.scenarios_event()),
            ClientCommand::Scenario(name) => {
                if let Err(e) = self.select_scenario(&name) {
                    self.report_error(&name, UnitType::Scenario, &e);
                }
            }
            ClientCommand::Tests(name) => {
                if let Some(name) = name.or_else(|| self.scenario.clone()) {
                    for event in self.scenario_events(&name) {
                        self.bus.send_to(id, event);
                    }
                }
            }
            ClientCommand::Start(name) => self.request_start(name.as_deref()),
            ClientCommand::Abort => self.abort(AbortReason::Operator),
            ClientCommand::Pong(ping) => {
                if let Err(e) = self.liveness.pong(id, &ping, received) {
                    self.on_protocol_error(key, e);
                }
            }
            ClientCommand::Log(message) => self.bus.publish(Event::new(
                EventKind::Log { message },
                &key.1,
                UnitType::Interface,
            )),
            ClientCommand::Shutdown(reason) => {
                info!(interface = %key.1, reason = ?reason, "shutdown requested");
                return true;
            }
        }
        false
    }

    fn on_trigger_line(&mut self, name: &str, line: &str) {
        let key = (UnitType::Trigger, name.to_string());
        let running = self.is_running();
        let Some(endpoint) = self.endpoints.get_mut(&key) else {
            debug!(trigger = name, "line from unknown trigger");
            return;
        };
        let action = trigger::parse(line).and_then(|cmd| endpoint.session.accept(cmd, running));
        match action {
            Ok(TriggerAction::Nothing) => {}
            Ok(TriggerAction::Start) => self.request_start(None),
            Ok(TriggerAction::Abort) => self.abort(AbortReason::Operator),
            Err(ProtocolError::Empty) => {}
            Err(e) => self.on_protocol_error(&key, e),
        }
    }

    fn on_protocol_error(&mut self, key: &EndpointKey, error: ProtocolError) {
        if error.drops_source() {
            self.drop_endpoint(key, &error.to_string());
        } else {
            debug!(unit = %key.1, error = %error, "protocol error");
            self.bus
                .publish(Event::debug(&key.1, key.0, error.to_string()));
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        if let Some(run) = self.run.as_mut() {
            run.check_deadline(now, &self.bus);
        }
        for (id, error) in self.liveness.expired(now) {
            if let Some(key) = self.key_for(id) {
                self.on_protocol_error(&key, error);
            }
        }
        if now >= self.next_ping {
            let ids: Vec<SubscriptionId> = self
                .endpoints
                .iter()
                .filter(|(k, _)| k.0 == UnitType::Interface)
                .map(|(_, e)| e.id)
                .collect();
            for id in ids {
                if let Some(ping) = self.liveness.ping(id, now) {
                    self.bus.send_to(id, Event::internal(EventKind::Ping { id: ping }));
                }
            }
            self.next_ping = now + self.config.ping_interval();
        }
    }

    /// Send the finished run's result to triggers that asked to monitor.
    fn announce_result(&mut self) {
        if self.announced {
            return;
        }
        let Some(run) = self.run.as_ref() else {
            return;
        };
        let status = run.status();
        if !status.is_finished() {
            return;
        }
        self.announced = true;
        let finish = Event::new(
            EventKind::Finish {
                code: status.finish_code(run.failures()),
                scenario: run.scenario().to_string(),
            },
            run.scenario(),
            UnitType::Scenario,
        );
        for (key, endpoint) in &self.endpoints {
            if key.0 == UnitType::Trigger && endpoint.session.is_monitoring() {
                self.bus.send_to(endpoint.id, finish.clone());
            }
        }
    }

    /// Feed supervisor reports to an aborting run until it has finished.
    /// Everything else arriving meanwhile is dropped.
    fn settle(&mut self) {
        let give_up = Instant::now()
            + self.config.termination_grace()
            + self.config.test_failure_timeout()
            + self.config.scenario_failure_timeout();
        while self.is_running() {
            let wait = give_up.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(wait) {
                Ok(EngineMsg::Process(report)) => self.on_report(report),
                Ok(other) => debug!(?other, "ignored while closing"),
                Err(_) => {
                    warn!("run did not finish tearing down before shutdown");
                    break;
                }
            }
        }
    }

    /// Abort any active run, announce unloading, say `EXIT` to interfaces
    /// and stop every endpoint.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.is_running() {
            self.abort(AbortReason::Operator);
            self.settle();
        }
        self.announce_result();
        self.bus.publish(Event::new(
            EventKind::Unloading,
            &self.jig.name,
            UnitType::Jig,
        ));
        for (key, endpoint) in &self.endpoints {
            if key.0 == UnitType::Interface {
                self.bus.send_to(endpoint.id, Event::internal(EventKind::Exit));
            }
        }
        if !self.bus.flush(self.config.termination_grace()) {
            warn!("sinks did not drain before shutdown");
        }
        self.endpoints.clear();
        self.bus.shutdown();
        info!(jig = %self.jig.name, "engine stopped");
    }
}

fn describe(item_type: UnitType, field: &str, item: &str, value: &str) -> Event {
    Event::internal(EventKind::Describe {
        item_type,
        field: field.to_string(),
        item: item.to_string(),
        value: value.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
