//! Live monitoring pipeline
//!
//! A `Pipeline` turns the monitors opened by the user into a set of server
//! subscriptions and moves data from the transport to the presenter.
//!
//! Two contexts are involved:
//! - the delivery context, where the transport calls the `Delivery` sink.
//!   It only validates events and pushes them to the bounded queues.
//! - the render context, which owns the `Pipeline` itself. It opens and
//!   closes monitors and runs the consumer `step` once per host frame via
//!   `tick`.
//!
//! The queues, the subscription registry and the counters are the only
//! state shared by the two, behind a single lock.

mod delivery;
mod flow;
mod graph;
mod monitor;
mod presenter;
mod queue;
mod registry;
mod resolver;
mod schedule;
mod shared;

pub use delivery::Delivery;
pub use flow::FlowController;
pub use graph::{Graph, GraphView, NodeInfo};
pub use monitor::{CloseReason, Monitor, MonitorId, MonitorStatus};
pub use presenter::{Presenter, RenderInfo, View};
pub use queue::{BoundedQueue, DataItem, StatusItem};
pub use registry::{Registry, Subscribed, Unsubscribed};
pub use resolver::{Resolver, DEFAULT_OUTPUT};
pub use schedule::FrameSchedule;
pub use shared::Stats;

use crate::config::PipelineConfig;
use crate::error::{ConfigError, PresentError, TransportError};
use crate::transport::{ConnectionCell, ConnectionState, InboundSink, Transport};
use crate::wire::Outbound;
use crossbeam::channel::{self, Receiver};
use delivery::Control;
use shared::{Shared, SharedRef};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Client name announced by the diagnostic handshake.
pub const CLIENT_NAME: &str = "node_editor";

/// How many idle periods the loop may miss before `supervise` restarts it.
const STALL_IDLE_PERIODS: u64 = 4;

/// Result of one consumer step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Status items applied.
    pub statuses: usize,
    pub rendered: usize,
    /// Items parked in a pending slot.
    pub deferred: usize,
    /// Items addressed to monitors that no longer exist.
    pub discarded: usize,
    /// Data items left in the queue.
    pub queued: usize,
    /// Host frames until the next step.
    pub rearm_frames: u64,
    /// Delay after which the next frame should be requested, if any.
    pub request_after: Option<Duration>,
}

pub struct Pipeline<G, P: Presenter> {
    config: PipelineConfig,
    graph: G,
    presenter: P,
    transport: Arc<dyn Transport>,
    state: Arc<ConnectionCell>,
    shared: SharedRef,
    flow: FlowController,
    delivery: Delivery,
    control: Receiver<Control>,
    resolver: Resolver,
    monitors: BTreeMap<MonitorId, Monitor<P::Target>>,
    schedule: FrameSchedule,
}

impl<G: GraphView, P: Presenter> Pipeline<G, P> {
    pub fn new(
        config: PipelineConfig,
        graph: G,
        presenter: P,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = Arc::new(ConnectionCell::new());
        let shared = Shared::new(config.data_capacity, config.status_capacity);
        let flow = FlowController::new(transport.clone(), state.clone(), shared.clone());
        let (control_tx, control_rx) = channel::bounded(16);
        let delivery = Delivery::new(shared.clone(), state.clone(), flow.clone(), control_tx);
        Ok(Pipeline {
            resolver: Resolver::new(config.type_names.clone()),
            config,
            graph,
            presenter,
            transport,
            state,
            shared,
            flow,
            delivery,
            control: control_rx,
            monitors: BTreeMap::new(),
            schedule: FrameSchedule::default(),
        })
    }

    /// Sink to hand to a transport connected outside of `connect`.
    pub fn sink(&self) -> InboundSink {
        self.delivery.clone().into_sink()
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        let url = self.config.server_url.clone();
        self.connect_to(&url)
    }

    pub fn connect_to(&mut self, url: &str) -> Result<(), TransportError> {
        info!(url, "connecting");
        self.state.set(ConnectionState::Connecting);
        if let Err(e) = self.transport.connect(url, self.sink()) {
            self.state.set(ConnectionState::Disconnected);
            shared::lock(&self.shared).broadcast_status(MonitorStatus::Disconnected);
            return Err(e);
        }
        let hello = Outbound::TestConnection {
            client: CLIENT_NAME.to_string(),
        };
        if let Err(e) = self.transport.emit(&hello) {
            debug!("connection test not sent: {}", e);
        }
        Ok(())
    }

    /// Drops the current link, if any, and connects again.
    pub fn reconnect(&mut self) -> Result<(), TransportError> {
        if self.state.get() != ConnectionState::Disconnected {
            self.transport.disconnect();
        }
        self.connect()
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        self.state.set(ConnectionState::Disconnected);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Opens a monitor on `output` of `node_id`, subscribing to the resolved
    /// server output.
    pub fn open(&mut self, node_id: &str, output: &str) -> Result<MonitorId, PresentError> {
        self.poll_control();
        let output = if output.is_empty() {
            DEFAULT_OUTPUT
        } else {
            output
        };
        let server_name = self.resolver.resolve(&self.graph, node_id, output);
        let id = self.allocate_id(node_id, output);
        let title = match self.graph.node(node_id) {
            Some(node) if !node.name.is_empty() => format!("{}.{}", node.name, output),
            _ => server_name.clone(),
        };
        let target = self.presenter.open_target(&id, &title)?;
        let mut monitor = Monitor::new(
            id.clone(),
            node_id,
            output,
            server_name.clone(),
            self.config.default_interval(),
            self.config.history_len,
            target,
        );

        monitor.status = self.subscribe(&id, &server_name, false);
        self.presenter.set_status(&monitor.target, &monitor.status);
        self.monitors.insert(id.clone(), monitor);
        info!(monitor = %id, output = %server_name, "opened monitor");

        if !self.schedule.is_running() {
            self.schedule.start();
        }
        Ok(id)
    }

    fn allocate_id(&self, node_id: &str, output: &str) -> MonitorId {
        let base = MonitorId::new(node_id, output, chrono::Utc::now().timestamp_millis());
        let mut id = base.clone();
        let mut n = 1;
        while self.monitors.contains_key(&id) {
            id = base.with_suffix(n);
            n += 1;
        }
        id
    }

    /// Registers `id` for `name` and puts the name on the wire when needed.
    /// Returns the status the monitor should show.
    fn subscribe(&self, id: &MonitorId, name: &str, force_request: bool) -> MonitorStatus {
        let mut shared = shared::lock(&self.shared);
        let outcome = shared.registry.subscribe(id, name);
        if !self.state.is_connected() {
            debug!(monitor = %id, output = name, "subscription deferred until connected");
            return MonitorStatus::Disconnected;
        }
        if (outcome == Subscribed::First || force_request) && !self.flow.request_locked(&mut shared)
        {
            return MonitorStatus::Connected;
        }
        MonitorStatus::Subscribed
    }

    /// Re-runs the subscription of one monitor and re-issues the frame
    /// request. Returns false for unknown monitors.
    pub fn resubscribe(&mut self, id: &MonitorId) -> bool {
        let Some(name) = self.monitors.get(id).map(|m| m.server_name.clone()) else {
            return false;
        };
        let status = self.subscribe(id, &name, true);
        self.set_status(id, status);
        true
    }

    fn set_status(&mut self, id: &MonitorId, status: MonitorStatus) {
        if let Some(monitor) = self.monitors.get_mut(id) {
            monitor.status = status;
            self.presenter.set_status(&monitor.target, &monitor.status);
        }
    }

    /// Closes a monitor. Safe to call again, or on a monitor the sweep
    /// already removed; returns whether anything was closed.
    pub fn close(&mut self, id: &MonitorId) -> bool {
        self.close_with(id, CloseReason::User)
    }

    fn close_with(&mut self, id: &MonitorId, reason: CloseReason) -> bool {
        let Some(monitor) = self.monitors.remove(id) else {
            return false;
        };
        let purged = {
            let mut shared = shared::lock(&self.shared);
            if shared.registry.unsubscribe(id, &monitor.server_name) == Unsubscribed::Last {
                let msg = Outbound::Unsubscribe {
                    output: monitor.server_name.clone(),
                };
                self.flow.emit_locked(&mut shared, &msg);
            }
            shared.data.purge(id) + shared.status.purge(id)
        };
        debug!(monitor = %id, ?reason, purged, "closed monitor");

        if reason != CloseReason::TargetGone {
            self.presenter.release_target(monitor.target);
        }
        if self.monitors.is_empty() {
            self.schedule.stop();
        }
        true
    }

    /// Closes every monitor whose render target disappeared.
    pub fn sweep(&mut self) -> usize {
        let gone: Vec<MonitorId> = self
            .monitors
            .iter()
            .filter(|(_, m)| !self.presenter.target_exists(&m.target))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &gone {
            self.close_with(id, CloseReason::TargetGone);
        }
        gone.len()
    }

    /// Compacts the data queue to the newest item per monitor once it holds
    /// more than the configured threshold.
    pub fn check_queue_health(&mut self) -> usize {
        let mut shared = shared::lock(&self.shared);
        let queued = shared.data.len();
        if queued <= self.config.compact_above {
            return 0;
        }
        let removed = shared.data.compact_latest();
        shared.stats.compacted += removed as u64;
        debug!(queued, removed, "compacted data queue");
        removed
    }

    fn poll_control(&mut self) {
        while let Ok(msg) = self.control.try_recv() {
            match msg {
                Control::Listing(listing) => {
                    let added = self.resolver.apply_listing(&self.graph, &listing);
                    debug!(added, "applied node listing");
                }
            }
        }
    }

    /// One consumer pass. Never blocks and never sleeps; the returned
    /// outcome says when to run again and whether to request a frame.
    pub fn step(&mut self, now: Instant) -> StepOutcome {
        self.poll_control();
        let mut outcome = StepOutcome::default();

        let (statuses, batch) = {
            let mut shared = shared::lock(&self.shared);
            (
                shared.status.drain_all(),
                shared.data.pop_batch(self.config.batch_size),
            )
        };

        for item in statuses {
            match self.monitors.get_mut(&item.monitor) {
                Some(monitor) => {
                    monitor.status = item.status;
                    self.presenter.set_status(&monitor.target, &monitor.status);
                    outcome.statuses += 1;
                }
                None => outcome.discarded += 1,
            }
        }

        let mut failed = Vec::new();
        for item in batch {
            let Some(monitor) = self.monitors.get_mut(&item.monitor) else {
                outcome.discarded += 1;
                continue;
            };
            if monitor.is_due(now) {
                // Anything parked earlier is older than this item.
                monitor.pending = None;
                match monitor.render(&mut self.presenter, &item.sample, &self.config.throttle, now) {
                    Ok(()) => outcome.rendered += 1,
                    Err(e) => failed.push((item.monitor, e)),
                }
            } else {
                monitor.pending = Some(item);
                outcome.deferred += 1;
            }
        }

        for (id, monitor) in self.monitors.iter_mut() {
            if monitor.pending.is_none() || !monitor.is_due(now) {
                continue;
            }
            if let Some(item) = monitor.pending.take() {
                match monitor.render(&mut self.presenter, &item.sample, &self.config.throttle, now) {
                    Ok(()) => outcome.rendered += 1,
                    Err(e) => failed.push((id.clone(), e)),
                }
            }
        }

        for (id, err) in failed {
            self.present_failed(&id, err);
        }

        let queued = {
            let mut shared = shared::lock(&self.shared);
            shared.stats.stale += outcome.discarded as u64;
            shared.stats.renders += outcome.rendered as u64;
            shared.stats.skipped += outcome.deferred as u64;
            shared.data.len()
        };
        outcome.queued = queued;
        if outcome.rendered > 0 && self.state.is_connected() && queued < self.config.request_gate {
            outcome.request_after = Some(self.config.request_delay());
        }
        outcome.rearm_frames = self.config.rearm.frames_for(queued);
        outcome
    }

    fn present_failed(&mut self, id: &MonitorId, err: PresentError) {
        match err {
            PresentError::TargetGone => {
                debug!(monitor = %id, "render target gone");
                self.close_with(id, CloseReason::TargetGone);
            }
            PresentError::Failed(msg) => {
                warn!(monitor = %id, "render failed: {}", msg);
                self.set_status(id, MonitorStatus::Error(msg));
            }
        }
    }

    /// Host frame callback. Runs housekeeping on its periods and the
    /// consumer step when it is due, then re-arms it. Housekeeping and the
    /// step share one unwind guard; the loop is re-armed even if either
    /// panics. Returns the step outcome when a step ran.
    pub fn tick(&mut self, now: Instant) -> Option<StepOutcome> {
        self.schedule.advance();
        let health = self.schedule.every(self.config.health_every_frames);
        let sweep = self.schedule.every(self.config.sweep_every_frames);
        if !(health || sweep || self.schedule.due()) {
            return None;
        }

        let guarded = panic::catch_unwind(AssertUnwindSafe(|| {
            if health {
                self.check_queue_health();
            }
            if sweep {
                self.sweep();
            }
            if self.schedule.due() {
                Some(self.step(now))
            } else {
                None
            }
        }));
        match guarded {
            Ok(None) => None,
            Ok(Some(outcome)) => {
                if let Some(delay) = outcome.request_after {
                    self.flow.request_after(delay);
                }
                if self.schedule.is_running() {
                    self.schedule.rearm(outcome.rearm_frames);
                }
                Some(outcome)
            }
            Err(_) => {
                error!("frame callback panicked");
                if self.schedule.is_running() {
                    self.schedule.rearm(self.config.rearm.idle_frames);
                }
                None
            }
        }
    }

    /// Supervisory check, meant to run from a timer independent of `tick`.
    /// Restarts the consumer loop if monitors are open but the loop is
    /// stopped or has missed its schedule.
    pub fn supervise(&mut self) -> bool {
        if self.monitors.is_empty() {
            return false;
        }
        let patience = self
            .config
            .rearm
            .idle_frames
            .saturating_mul(STALL_IDLE_PERIODS);
        if self.schedule.is_running() && !self.schedule.stalled(patience) {
            return false;
        }
        warn!(frame = self.schedule.frame(), "restarting consumer loop");
        self.schedule.start();
        true
    }

    /// Requests the next frame right away.
    pub fn request_next_frame(&self) -> bool {
        self.flow.request_next_frame()
    }

    /// Global teardown: unsubscribes everything, stops the loop, closes
    /// every monitor and finally disconnects.
    pub fn shutdown(&mut self) {
        {
            let mut shared = shared::lock(&self.shared);
            for name in shared.registry.clear() {
                self.flow
                    .emit_locked(&mut shared, &Outbound::Unsubscribe { output: name });
            }
            shared.data.clear();
            shared.status.clear();
        }
        self.schedule.stop();
        let ids: Vec<MonitorId> = self.monitors.keys().cloned().collect();
        for id in &ids {
            self.set_status(id, MonitorStatus::Unsubscribed);
            self.close_with(id, CloseReason::Teardown);
        }
        self.transport.disconnect();
        self.state.set(ConnectionState::Disconnected);
        info!(closed = ids.len(), "pipeline shut down");
    }

    pub fn stats(&self) -> Stats {
        shared::lock(&self.shared).stats.clone()
    }

    /// Number of data and status items queued.
    pub fn queued(&self) -> (usize, usize) {
        let shared = shared::lock(&self.shared);
        (shared.data.len(), shared.status.len())
    }

    /// True if any queued item is addressed to `id`.
    pub fn queue_references(&self, id: &MonitorId) -> bool {
        let shared = shared::lock(&self.shared);
        shared.data.references(id) || shared.status.references(id)
    }

    /// Number of monitors subscribed to the server output `name`.
    pub fn subscribers(&self, name: &str) -> usize {
        shared::lock(&self.shared).registry.refcount(name)
    }

    pub fn subscribed_names(&self) -> Vec<String> {
        shared::lock(&self.shared).registry.names()
    }

    pub fn resolve(&mut self, node_id: &str, output: &str) -> String {
        self.poll_control();
        self.resolver.resolve(&self.graph, node_id, output)
    }

    pub fn monitor(&self, id: &MonitorId) -> Option<&Monitor<P::Target>> {
        self.monitors.get(id)
    }

    pub fn monitors(&self) -> impl Iterator<Item = &Monitor<P::Target>> {
        self.monitors.values()
    }

    pub fn is_running(&self) -> bool {
        self.schedule.is_running()
    }

    pub fn frame(&self) -> u64 {
        self.schedule.frame()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }
}
