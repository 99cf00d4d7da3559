//! Application-facing client: the socket-like surface over the serial link.
//!
//! Three contexts meet here. The application thread calls `connect`,
//! `write`, `read` and `stop`. The transport's receive context feeds bytes to
//! the parser and dispatches frames. The timer context drives
//! retransmission. Both callbacks hold only a `Weak` handle to the shared
//! state, and none of them holds the connection lock while bytes go out on
//! the line. The callbacks never wait: a frame that cannot go out at once is
//! skipped and recovered by the peer's retransmission or the next tick.
//!
//! Lock order is framer, then connection, then timer.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::ack_manager::RetransmitDecision;
use crate::connection::{Connection, ConnectionState, Reaction, Teardown};
use crate::contracts::{Command, Destination, Frame};
use crate::errors::{BridgeError, Result};
use crate::lock;
use crate::metrics::{Counters, LinkMetrics};
use crate::receiver::Receiver;
use crate::timer::PeriodicTimer;
use crate::transmitter::Transmitter;
use crate::transport::ByteTransport;
use crate::{
    CONNECT_TIMEOUT_MS, DEFAULT_LINK_TIMEOUT_MS, MAX_FRAME_PAYLOAD, MAX_PUBLISH_CHUNK,
    MAX_RETRANSMIT_ATTEMPTS, RETRANSMIT_INTERVAL_MS,
};

/// ClientBuilder - Fluent interface for client configuration
pub struct ClientBuilder {
    connect_timeout_ms: u64,
    retransmit_interval_ms: u64,
    max_retries: u32,
    link_timeout_ms: u64,
}

impl ClientBuilder {
    /// Create a new ClientBuilder with the protocol defaults
    pub fn new() -> Self {
        Self {
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            retransmit_interval_ms: RETRANSMIT_INTERVAL_MS,
            max_retries: MAX_RETRANSMIT_ATTEMPTS,
            link_timeout_ms: DEFAULT_LINK_TIMEOUT_MS,
        }
    }

    /// Set how long `connect` waits for CONNECT_ACK
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Set the retransmission timer period
    pub fn with_retransmit_interval_ms(mut self, interval_ms: u64) -> Self {
        self.retransmit_interval_ms = interval_ms;
        self
    }

    /// Set the retry ceiling that tears the connection down
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set how long the framer waits for transport capacity
    pub fn with_link_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.link_timeout_ms = timeout_ms;
        self
    }

    pub fn get_connect_timeout_ms(&self) -> u64 {
        self.connect_timeout_ms
    }

    pub fn get_retransmit_interval_ms(&self) -> u64 {
        self.retransmit_interval_ms
    }

    pub fn get_max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn get_link_timeout_ms(&self) -> u64 {
        self.link_timeout_ms
    }

    /// Wire a client to its serial line and retransmission timer
    pub fn build<T, Tm>(self, transport: T, timer: Tm) -> BridgeClient<T, Tm>
    where
        T: ByteTransport + 'static,
        Tm: PeriodicTimer + 'static,
    {
        let inner = Arc::new(Inner {
            link: Mutex::new(Connection::new(self.max_retries)),
            changed: Condvar::new(),
            tx: Mutex::new(Transmitter::new(Duration::from_millis(self.link_timeout_ms))),
            rx: Mutex::new(Receiver::new()),
            transport,
            timer,
            counters: Counters::default(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retransmit_interval: Duration::from_millis(self.retransmit_interval_ms),
        });

        let handle = Arc::downgrade(&inner);
        inner.transport.attach_receiver(Box::new(move |byte| {
            if let Some(inner) = handle.upgrade() {
                inner.on_byte(byte);
            }
        }));

        let handle = Arc::downgrade(&inner);
        inner.timer.set_callback(Box::new(move || {
            if let Some(inner) = handle.upgrade() {
                inner.on_tick();
            }
        }));

        BridgeClient { inner }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner<T, Tm> {
    link: Mutex<Connection>,
    /// Signalled on handshake completion, acknowledgment and teardown
    changed: Condvar,
    tx: Mutex<Transmitter>,
    rx: Mutex<Receiver>,
    transport: T,
    timer: Tm,
    counters: Counters,
    connect_timeout: Duration,
    retransmit_interval: Duration,
}

impl<T: ByteTransport, Tm: PeriodicTimer> Inner<T, Tm> {
    /// Blocking send, application thread only
    fn send_frame(&self, command: u8, payload: &[u8]) -> Result<usize> {
        self.send_with(&mut lock(&self.tx), command, payload)
    }

    fn send_with(&self, tx: &mut Transmitter, command: u8, payload: &[u8]) -> Result<usize> {
        let sent = tx.send(&self.transport, command, payload)?;
        self.counters.frame_sent();
        Ok(sent)
    }

    /// Framer, unless another context is mid-frame
    fn try_tx(&self) -> Option<MutexGuard<'_, Transmitter>> {
        match self.tx.try_lock() {
            Ok(tx) => Some(tx),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Non-blocking send for the receive and timer contexts
    fn try_send_with(&self, tx: &mut Transmitter, command: u8, payload: &[u8]) -> bool {
        match tx.try_send(&self.transport, command, payload) {
            Ok(Some(_)) => {
                self.counters.frame_sent();
                true
            }
            Ok(None) => {
                self.counters.skipped_send();
                debug!(command, "line short of room, frame skipped");
                false
            }
            Err(err) => {
                self.counters.skipped_send();
                warn!(%err, command, "frame send failed");
                false
            }
        }
    }

    fn send_ack(&self, seq: bool) {
        let Some(mut tx) = self.try_tx() else {
            self.counters.skipped_send();
            debug!(seq, "framer busy, ack skipped");
            return;
        };
        self.try_send_with(&mut tx, Command::Ack.with_flag(seq), &[]);
    }

    /// Receive context: one byte from the line
    fn on_byte(&self, byte: u8) {
        let mut rx = lock(&self.rx);
        match rx.push(byte) {
            Ok(Some(frame)) => {
                self.counters.frame_received();
                self.dispatch(&frame);
            }
            Ok(None) => {}
            Err(err) => {
                self.counters.integrity_failure();
                debug!(%err, "dropping corrupted frame");
            }
        }
    }

    fn dispatch(&self, frame: &Frame<'_>) {
        let reaction = {
            let mut link = lock(&self.link);
            let reaction = link.on_frame(frame);
            if matches!(reaction, Reaction::Acknowledged | Reaction::PeerClosed) {
                self.timer.disarm();
            }
            reaction
        };

        match reaction {
            Reaction::Established | Reaction::PeerClosed | Reaction::Acknowledged => {
                self.changed.notify_all();
            }
            Reaction::Delivered { seq, len } => {
                self.counters.delivered(len);
                self.send_ack(seq);
            }
            Reaction::Duplicate { seq } => {
                self.counters.duplicate();
                self.send_ack(seq);
            }
            Reaction::Backpressure { .. } => self.counters.backpressure_drop(),
            Reaction::Ignored => {}
        }
    }

    /// Timer context: retransmission period elapsed
    fn on_tick(&self) {
        // Held across decide and resend so `write` cannot abort in between
        let Some(mut tx) = self.try_tx() else {
            debug!("framer busy, tick deferred");
            return;
        };

        let decision = {
            let mut link = lock(&self.link);
            let decision = link.on_timeout();
            if !matches!(decision, RetransmitDecision::Resend(_)) {
                self.timer.disarm();
            }
            decision
        };

        match decision {
            RetransmitDecision::Idle => {}
            RetransmitDecision::Resend(frame) => {
                if self.try_send_with(&mut tx, frame.command(), frame.payload()) {
                    self.counters.retransmission();
                }
            }
            RetransmitDecision::Exhausted => {
                self.changed.notify_all();
                self.try_send_with(&mut tx, Command::Disconnect.with_flag(false), &[]);
            }
        }
    }
}

/// Socket-like client for one TCP connection relayed over a serial bridge
pub struct BridgeClient<T, Tm>
where
    T: ByteTransport + 'static,
    Tm: PeriodicTimer + 'static,
{
    inner: Arc<Inner<T, Tm>>,
}

impl<T, Tm> BridgeClient<T, Tm>
where
    T: ByteTransport + 'static,
    Tm: PeriodicTimer + 'static,
{
    /// Client with the default protocol timing
    pub fn new(transport: T, timer: Tm) -> Self {
        ClientBuilder::new().build(transport, timer)
    }

    fn link(&self) -> MutexGuard<'_, Connection> {
        lock(&self.inner.link)
    }

    /// Ask the bridge to connect to an IPv4 address
    pub fn connect(&self, ip: Ipv4Addr, port: u16) -> Result<()> {
        self.connect_to(Destination::Address(SocketAddrV4::new(ip, port)))
    }

    /// Ask the bridge to resolve `host` and connect to it
    ///
    /// Hostnames longer than 248 bytes fail with `Truncated` before anything
    /// is sent.
    pub fn connect_host(&self, host: &str, port: u16) -> Result<()> {
        self.connect_to(Destination::Host { name: host, port })
    }

    /// Send CONNECT and block until CONNECT_ACK or the connect timeout
    ///
    /// # Errors
    /// - `Truncated` for an oversized hostname
    /// - `Timeout` if no CONNECT_ACK arrives in time; the state stays
    ///   `Disconnected`
    /// - `NotConnected` if `stop` is called while waiting
    /// - `LinkFailure`/`Io` if the CONNECT frame cannot be sent
    ///
    /// An open session is closed first, and any `write` blocked on it fails
    /// with `NotConnected`.
    pub fn connect_to(&self, destination: Destination<'_>) -> Result<()> {
        let mut payload = [0u8; MAX_FRAME_PAYLOAD];
        let len = destination.encode(&mut payload)?;

        let previous = {
            let mut link = self.link();
            self.inner.timer.disarm();
            link.begin_connect()
        };
        self.inner.changed.notify_all();

        if previous == ConnectionState::Connected {
            if let Err(err) = self
                .inner
                .send_frame(Command::Disconnect.with_flag(false), &[])
            {
                warn!(%err, "could not close previous session");
            }
        }

        info!(?destination, "connecting");
        if let Err(err) = self
            .inner
            .send_frame(destination.command_byte(), &payload[..len])
        {
            self.link().abandon_connect();
            return Err(err);
        }

        let deadline = Instant::now() + self.inner.connect_timeout;
        let mut link = self.link();
        loop {
            match link.state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => return Err(BridgeError::NotConnected),
                ConnectionState::Connecting => {}
            }

            let now = Instant::now();
            if now >= deadline {
                link.abandon_connect();
                warn!(timeout = ?self.inner.connect_timeout, "no CONNECT_ACK from bridge");
                return Err(BridgeError::Timeout(self.inner.connect_timeout));
            }
            link = self
                .inner
                .changed
                .wait_timeout(link, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until no frame is in flight on the session identified by `epoch`
    fn wait_for_idle(&self, epoch: u64) -> Result<MutexGuard<'_, Connection>> {
        let mut link = self.link();
        loop {
            if link.epoch() != epoch {
                return Err(match link.last_teardown() {
                    Some(Teardown::RetryExhausted) => BridgeError::RetryExhausted,
                    _ => BridgeError::NotConnected,
                });
            }
            if !link.is_connected() {
                return Err(BridgeError::NotConnected);
            }
            if !link.ack_outstanding() {
                return Ok(link);
            }
            link = self
                .inner
                .changed
                .wait(link)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Send `data` reliably, returning once every byte is acknowledged
    ///
    /// Data is split into PUBLISH frames of up to 245 bytes, each sent under
    /// stop-and-wait.
    ///
    /// # Errors
    /// - `NotConnected` if the connection is or becomes closed
    /// - `RetryExhausted` if a chunk went unacknowledged until teardown
    /// - `LinkFailure`/`Io` if a frame cannot be put on the line
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let epoch = self.link().epoch();

        for chunk in data.chunks(MAX_PUBLISH_CHUNK) {
            self.send_chunk(epoch, chunk)?;
        }

        drop(self.wait_for_idle(epoch)?);
        Ok(data.len())
    }

    /// Hand one chunk to the ack manager and put its first copy on the line
    ///
    /// The framer is held from `begin_publish` until the send settles, so the
    /// timer context can only retransmit a frame whose first copy went out.
    fn send_chunk(&self, epoch: u64, chunk: &[u8]) -> Result<()> {
        loop {
            drop(self.wait_for_idle(epoch)?);

            let mut tx = lock(&self.inner.tx);
            let frame = {
                let mut link = self.link();
                if link.epoch() != epoch || link.ack_outstanding() {
                    continue;
                }
                let frame = link.begin_publish(chunk)?;
                self.inner.timer.arm(self.inner.retransmit_interval);
                frame
            };

            return match self.inner.send_with(&mut tx, frame.command(), frame.payload()) {
                Ok(_) => Ok(()),
                Err(err) => {
                    let mut link = self.link();
                    link.abort_publish();
                    self.inner.timer.disarm();
                    Err(err)
                }
            };
        }
    }

    pub fn write_byte(&self, byte: u8) -> Result<usize> {
        self.write(&[byte])
    }

    /// Next received byte, or `None` if nothing is buffered
    pub fn read_byte(&self) -> Option<u8> {
        self.link().ring_mut().read()
    }

    /// Drain up to `buf.len()` received bytes, returning how many were copied
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.link().ring_mut().read_into(buf)
    }

    pub fn peek(&self) -> Option<u8> {
        self.link().ring().peek()
    }

    /// Received bytes waiting to be read
    pub fn available(&self) -> usize {
        self.link().ring().available()
    }

    /// Block until the transport has drained
    pub fn flush(&self) -> Result<()> {
        self.inner.transport.flush()?;
        Ok(())
    }

    /// Tear the connection down and notify the bridge
    ///
    /// Any blocked `write` or `connect` fails with `NotConnected`. The
    /// DISCONNECT notice is best effort; its failure is returned but the
    /// local state is reset regardless.
    pub fn stop(&self) -> Result<()> {
        let previous = {
            let mut link = self.link();
            self.inner.timer.disarm();
            link.teardown(Teardown::Stopped)
        };
        self.inner.changed.notify_all();

        if previous == ConnectionState::Disconnected {
            return Ok(());
        }
        self.inner
            .send_frame(Command::Disconnect.with_flag(false), &[])?;
        self.flush()
    }

    pub fn connected(&self) -> bool {
        self.link().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.link().state()
    }

    pub fn metrics(&self) -> LinkMetrics {
        self.inner.counters.snapshot()
    }
}
