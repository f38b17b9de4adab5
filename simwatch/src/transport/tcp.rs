//! TCP transport
//!
//! Carries JSON-lines events over a TCP stream. A dedicated thread owns the
//! socket and bridges `mio` with a crossbeam channel: outbound lines are
//! queued on the channel and the thread is woken through a `mio::Waker`,
//! inbound lines are decoded and handed to the sink on the same thread.
//!
//! Accepted urls are `tcp://address[:port]` or a bare `address[:port]`.
//! The port defaults to 5000.

use super::linebuf::{FillError, LineBuf};
use super::{InboundSink, Transport};
use crate::error::TransportError;
use crate::wire::{self, Inbound, Outbound};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Default TCP port of the simulation server.
pub const DEFAULT_PORT: u16 = 5000;

/// Size of the outbound line queue.
const TX_QUEUE_SIZE: usize = 64;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const WAKER: mio::Token = mio::Token(0);
const STREAM: mio::Token = mio::Token(1);

struct Link {
    tx: Sender<Vec<u8>>,
    waker: Arc<mio::Waker>,
    closed: Arc<AtomicBool>,
    sink: InboundSink,
}

impl Link {
    /// Marks the link closed. Returns true for the caller that actually
    /// closed it, which is then responsible for announcing the disconnect.
    fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

#[derive(Default)]
pub struct TcpTransport {
    link: Mutex<Option<Link>>,
}

fn parse_url(url: &str) -> Result<SocketAddr, TransportError> {
    let addr = match url.split_once("://") {
        Some(("tcp", addr)) => addr,
        Some(_) => return Err(TransportError::InvalidUrl(url.to_string())),
        None => url,
    };
    let addr = addr.trim_end_matches('/');
    if addr.is_empty() {
        return Err(TransportError::InvalidUrl(url.to_string()));
    }
    // Try as-is first, then with the default port appended.
    let mut iter = match addr.to_socket_addrs() {
        Ok(iter) => iter,
        Err(_) => format!("{}:{}", addr, DEFAULT_PORT)
            .to_socket_addrs()
            .map_err(|_| TransportError::InvalidUrl(url.to_string()))?,
    };
    iter.next()
        .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))
}

impl TcpTransport {
    pub fn new() -> Arc<TcpTransport> {
        Arc::new(TcpTransport::default())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_stream(addr: &SocketAddr) -> io::Result<mio::net::TcpStream> {
        let stream = std::net::TcpStream::connect_timeout(addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(mio::net::TcpStream::from_std(stream))
    }

    /// Thread event loop. Runs until the peer goes away, an I/O error
    /// occurs, or the link is closed locally.
    fn poller_thread(
        mut stream: mio::net::TcpStream,
        mut poll: mio::Poll,
        sink: InboundSink,
        tx: Receiver<Vec<u8>>,
        closed: Arc<AtomicBool>,
        go: Receiver<()>,
    ) {
        // Nothing is delivered until `connect` has published the link, so
        // the sink can emit from its connect handler.
        if go.recv().is_err() {
            return;
        }
        sink(Ok(Inbound::Connect));

        if let Err(e) = Self::ioloop(&mut stream, &mut poll, &sink, &tx, &closed) {
            warn!("link failed: {}", e);
        }

        if !closed.swap(true, Ordering::AcqRel) {
            sink(Ok(Inbound::Disconnect));
        }
    }

    fn ioloop(
        stream: &mut mio::net::TcpStream,
        poll: &mut mio::Poll,
        sink: &InboundSink,
        tx: &Receiver<Vec<u8>>,
        closed: &AtomicBool,
    ) -> io::Result<()> {
        let mut events = mio::Events::with_capacity(4);
        let mut rxbuf = LineBuf::new();
        let mut txbuf = LineBuf::new();
        let mut writable_interest = false;

        poll.registry()
            .register(stream, STREAM, mio::Interest::READABLE)?;

        loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }
            if closed.load(Ordering::Acquire) {
                return Ok(());
            }

            let mut check_tx_channel = false;
            for event in events.iter() {
                match event.token() {
                    WAKER => check_tx_channel = true,
                    STREAM => {
                        if event.is_writable() {
                            check_tx_channel = true;
                        }
                        loop {
                            match rxbuf.refill(stream) {
                                Ok(_) => {}
                                Err(FillError::NotReady) => break,
                                Err(FillError::Disconnected) => {
                                    debug!("server closed the stream");
                                    return Ok(());
                                }
                                Err(FillError::Overlong) => {
                                    return Err(io::Error::new(
                                        io::ErrorKind::InvalidData,
                                        "inbound line too long",
                                    ));
                                }
                                Err(FillError::IO(e)) => return Err(e),
                            }
                            while let Some(line) = rxbuf.next_line() {
                                if line.iter().all(u8::is_ascii_whitespace) {
                                    continue;
                                }
                                sink(wire::decode_line(&line));
                            }
                        }
                    }
                    _ => {}
                }
            }

            if check_tx_channel {
                loop {
                    match tx.try_recv() {
                        Ok(line) => txbuf.add_data(&line),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => return Ok(()),
                    }
                }
                let drained = txbuf.drain(stream)?;
                // Only ask for writable events while there is a backlog.
                if drained == writable_interest {
                    let interest = if drained {
                        mio::Interest::READABLE
                    } else {
                        mio::Interest::READABLE.add(mio::Interest::WRITABLE)
                    };
                    poll.registry().reregister(stream, STREAM, interest)?;
                    writable_interest = !drained;
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&self, url: &str, sink: InboundSink) -> Result<(), TransportError> {
        self.disconnect();

        let addr = parse_url(url)?;
        let stream = match Self::open_stream(&addr) {
            Ok(stream) => stream,
            Err(e) => {
                sink(Ok(Inbound::ConnectError(e.to_string())));
                return Err(TransportError::Io(e));
            }
        };
        let poll = mio::Poll::new()?;
        let waker = Arc::new(mio::Waker::new(poll.registry(), WAKER)?);
        let (tx, ttx) = channel::bounded::<Vec<u8>>(TX_QUEUE_SIZE);
        let (go_tx, go_rx) = channel::bounded::<()>(1);
        let closed = Arc::new(AtomicBool::new(false));

        let thread_sink = sink.clone();
        let thread_closed = closed.clone();
        thread::Builder::new()
            .name("simwatch-tcp".to_string())
            .spawn(move || {
                TcpTransport::poller_thread(stream, poll, thread_sink, ttx, thread_closed, go_rx)
            })?;

        *self.lock() = Some(Link {
            tx,
            waker,
            closed,
            sink,
        });
        debug!("connected to {}", addr);
        go_tx.send(()).map_err(|_| TransportError::WorkerGone)
    }

    fn disconnect(&self) {
        let link = self.lock().take();
        if let Some(link) = link {
            if link.close() {
                // Wake the thread so it notices and drops the socket.
                let _ = link.waker.wake();
                (link.sink)(Ok(Inbound::Disconnect));
            }
        }
    }

    fn emit(&self, msg: &Outbound) -> Result<(), TransportError> {
        let line = wire::encode_line(msg)?;
        let guard = self.lock();
        let link = guard.as_ref().ok_or(TransportError::NotConnected)?;
        if link.closed.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        match link.tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(TransportError::QueueFull),
            Err(TrySendError::Disconnected(_)) => return Err(TransportError::WorkerGone),
        }
        link.waker.wake()?;
        Ok(())
    }
}
