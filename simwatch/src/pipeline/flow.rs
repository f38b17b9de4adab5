//! Pull-based flow control
//!
//! The server sends one frame per request. A request carries every
//! subscribed output name; the server answers with data events and a final
//! `done`, which triggers the next request. At most one frame is in flight
//! per request chain.

use super::shared::{self, Shared, SharedRef};
use crate::transport::{ConnectionCell, Transport};
use crate::wire::Outbound;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{trace, warn};

#[derive(Clone)]
pub struct FlowController {
    transport: Arc<dyn Transport>,
    state: Arc<ConnectionCell>,
    shared: SharedRef,
}

impl FlowController {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        state: Arc<ConnectionCell>,
        shared: SharedRef,
    ) -> FlowController {
        FlowController {
            transport,
            state,
            shared,
        }
    }

    /// Requests the next frame for every subscribed output. No-op when
    /// disconnected or when nothing is subscribed. Returns whether a request
    /// went out.
    pub fn request_next_frame(&self) -> bool {
        let mut shared = shared::lock(&self.shared);
        self.request_locked(&mut shared)
    }

    /// Same as `request_next_frame`, for callers already holding the lock.
    pub(crate) fn request_locked(&self, shared: &mut Shared) -> bool {
        if !self.state.is_connected() || shared.registry.is_empty() {
            return false;
        }
        let names = shared.registry.names();
        trace!(outputs = names.len(), "requesting next frame");
        match self.transport.emit(&Outbound::NewData(names)) {
            Ok(()) => {
                shared.stats.frame_requests += 1;
                true
            }
            Err(e) => {
                warn!("frame request failed: {}", e);
                shared.stats.emit_failures += 1;
                false
            }
        }
    }

    /// Emits an event on behalf of a locked caller, counting failures.
    pub(crate) fn emit_locked(&self, shared: &mut Shared, msg: &Outbound) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        match self.transport.emit(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!(event = msg.event_name(), "emit failed: {}", e);
                shared.stats.emit_failures += 1;
                false
            }
        }
    }

    /// Requests the next frame after `delay` from a detached thread, so the
    /// caller never waits.
    pub fn request_after(&self, delay: Duration) {
        let flow = self.clone();
        let spawned = thread::Builder::new()
            .name("simwatch-request".to_string())
            .spawn(move || {
                thread::sleep(delay);
                flow.request_next_frame();
            });
        if let Err(e) = spawned {
            warn!("could not schedule frame request: {}", e);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}
