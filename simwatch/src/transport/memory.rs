//! In-process transport
//!
//! `MemoryTransport` records every emitted event and lets the caller play
//! the server's part by injecting inbound events. Deliveries run on the
//! calling thread, which makes it suitable for deterministic tests and for
//! embedding the pipeline next to an in-process simulation.

use super::{InboundSink, Transport};
use crate::error::{TransportError, WireError};
use crate::wire::{self, Inbound, Outbound};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    sink: Option<InboundSink>,
    connected: bool,
    refuse: Option<String>,
    sent: Vec<Outbound>,
    url: Option<String>,
}

#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<Inner>,
}

impl MemoryTransport {
    pub fn new() -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport::default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes subsequent `connect` calls fail with `reason`, or succeed again
    /// when `None`.
    pub fn refuse_connections(&self, reason: Option<&str>) {
        self.lock().refuse = reason.map(str::to_string);
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn url(&self) -> Option<String> {
        self.lock().url.clone()
    }

    /// Delivers an event as if the server had sent it. Returns false if no
    /// sink is attached.
    pub fn deliver(&self, event: Inbound) -> bool {
        self.deliver_result(Ok(event))
    }

    /// Delivers a raw JSON line, decoding it the way a stream transport would.
    pub fn deliver_line(&self, line: &[u8]) -> bool {
        self.deliver_result(wire::decode_line(line))
    }

    fn deliver_result(&self, event: Result<Inbound, WireError>) -> bool {
        let sink = self.lock().sink.clone();
        match sink {
            Some(sink) => {
                sink(event);
                true
            }
            None => false,
        }
    }

    /// Simulates the server dropping the link.
    pub fn drop_link(&self) {
        let sink = {
            let mut inner = self.lock();
            inner.connected = false;
            inner.sink.clone()
        };
        if let Some(sink) = sink {
            sink(Ok(Inbound::Disconnect));
        }
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<Outbound> {
        std::mem::take(&mut self.lock().sent)
    }

    /// Number of emitted events matching `pred`.
    pub fn count_sent<F: Fn(&Outbound) -> bool>(&self, pred: F) -> usize {
        self.lock().sent.iter().filter(|m| pred(m)).count()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, url: &str, sink: InboundSink) -> Result<(), TransportError> {
        {
            let mut inner = self.lock();
            if let Some(reason) = &inner.refuse {
                let reason = reason.clone();
                drop(inner);
                sink(Ok(Inbound::ConnectError(reason.clone())));
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    reason,
                )));
            }
            inner.connected = true;
            inner.url = Some(url.to_string());
            inner.sink = Some(sink.clone());
        }
        sink(Ok(Inbound::Connect));
        Ok(())
    }

    fn disconnect(&self) {
        let sink = {
            let mut inner = self.lock();
            if !inner.connected {
                return;
            }
            inner.connected = false;
            inner.sink.clone()
        };
        if let Some(sink) = sink {
            sink(Ok(Inbound::Disconnect));
        }
    }

    fn emit(&self, msg: &Outbound) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        inner.sent.push(msg.clone());
        Ok(())
    }
}
