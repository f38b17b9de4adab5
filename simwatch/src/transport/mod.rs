//! Event transport
//!
//! A `Transport` is a bidirectional, event-based link to the simulation
//! server. It exposes connect/disconnect/emit and pushes every inbound event
//! (or the reason it could not be decoded) into an `InboundSink` callback.
//!
//! The sink is invoked from whatever context the transport delivers on,
//! typically a dedicated I/O thread, and must not block.

mod linebuf;
mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

use crate::error::{TransportError, WireError};
use crate::wire::{Inbound, Outbound};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Callback receiving inbound events from the transport.
pub type InboundSink = Arc<dyn Fn(Result<Inbound, WireError>) + Send + Sync>;

pub trait Transport: Send + Sync {
    /// Opens the link. Once established, the transport delivers
    /// `Inbound::Connect` to `sink` before any other event, and
    /// `Inbound::Disconnect` when the link goes away for any reason.
    fn connect(&self, url: &str, sink: InboundSink) -> Result<(), TransportError>;

    /// Closes the link. No-op if not connected.
    fn disconnect(&self);

    /// Queues an event for the server without blocking. Callers may hold
    /// locks the sink also takes, so this must never call into the sink.
    fn emit(&self, msg: &Outbound) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Process-wide connection state, readable from both the delivery and the
/// render context.
#[derive(Debug)]
pub struct ConnectionCell(AtomicU8);

impl ConnectionCell {
    pub fn new() -> ConnectionCell {
        ConnectionCell(AtomicU8::new(ConnectionState::Disconnected.into()))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::try_from(self.0.load(Ordering::Acquire))
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        let old = self.0.swap(state.into(), Ordering::AcqRel);
        ConnectionState::try_from(old).unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }
}

impl Default for ConnectionCell {
    fn default() -> Self {
        Self::new()
    }
}
