//! Inbound event handlers
//!
//! Runs in whatever context the transport delivers on. Handlers only
//! validate, route and enqueue; nothing here touches monitors or the
//! presenter. Node listings are forwarded to the render context over a
//! channel, since the resolver lives there.

use super::flow::FlowController;
use super::monitor::MonitorStatus;
use super::queue::DataItem;
use super::shared::{self, SharedRef};
use crate::error::WireError;
use crate::transport::{ConnectionCell, ConnectionState, InboundSink};
use crate::wire::{DataUpdate, Inbound, NodeListing, Outbound};
use crossbeam::channel::{Sender, TrySendError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Messages from the delivery context to the render context.
#[derive(Debug)]
pub(crate) enum Control {
    Listing(NodeListing),
}

#[derive(Clone)]
pub struct Delivery {
    shared: SharedRef,
    state: Arc<ConnectionCell>,
    flow: FlowController,
    control: Sender<Control>,
}

impl Delivery {
    pub(crate) fn new(
        shared: SharedRef,
        state: Arc<ConnectionCell>,
        flow: FlowController,
        control: Sender<Control>,
    ) -> Delivery {
        Delivery {
            shared,
            state,
            flow,
            control,
        }
    }

    /// Wraps this handle into a transport sink.
    pub fn into_sink(self) -> InboundSink {
        Arc::new(move |event| self.deliver(event))
    }

    pub fn deliver(&self, event: Result<Inbound, WireError>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                debug!("dropping malformed event: {}", e);
                shared::lock(&self.shared).stats.malformed += 1;
                return;
            }
        };
        trace!(event = event.event_name(), "inbound");
        match event {
            Inbound::Connect => self.on_connect(),
            Inbound::ConnectError(reason) => {
                warn!("connection failed: {}", reason);
                self.on_link_lost();
            }
            Inbound::Disconnect => {
                info!("disconnected");
                self.on_link_lost();
            }
            Inbound::Params(listing) => self.on_params(listing),
            Inbound::DataUpdate(update) => self.on_data(update),
            Inbound::Done(_) => {
                self.flow.request_next_frame();
            }
            Inbound::SpeedReport(report) => {
                shared::lock(&self.shared).stats.speed_report = Some(report);
            }
        }
    }

    fn on_connect(&self) {
        info!("connected");
        self.state.set(ConnectionState::Connected);
        let mut shared = shared::lock(&self.shared);
        self.flow.emit_locked(&mut shared, &Outbound::GetParams);
        shared.broadcast_status(MonitorStatus::Connected);
        // Everything still registered goes back on the wire.
        if self.flow.request_locked(&mut shared) {
            shared.broadcast_status(MonitorStatus::Subscribed);
        }
    }

    fn on_link_lost(&self) {
        self.state.set(ConnectionState::Disconnected);
        shared::lock(&self.shared).broadcast_status(MonitorStatus::Disconnected);
    }

    fn on_params(&self, listing: NodeListing) {
        debug!(nodes = listing.nodes.len(), "received node listing");
        match self.control.try_send(Control::Listing(listing)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("listing dropped, render context is behind"),
            Err(TrySendError::Disconnected(_)) => return,
        }
        shared::lock(&self.shared).broadcast_status(MonitorStatus::Connected);
    }

    fn on_data(&self, update: DataUpdate) {
        let mut shared = shared::lock(&self.shared);
        let monitors = shared.registry.monitors_for(&update.name);
        if monitors.is_empty() {
            trace!(output = %update.name, "no monitor for data");
            shared.stats.unrouted += 1;
            return;
        }
        let sample = Arc::new(update.sample);
        let received = Instant::now();
        for monitor in monitors {
            shared.push_data(DataItem {
                monitor,
                sample: sample.clone(),
                received,
            });
        }
    }
}
