//! Shared harness: a scripted bridge on the far end of a [`MemoryPort`] and a
//! hand-fired retransmission timer.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver as FrameQueue, RecvTimeoutError};
use serial_bridge_core::contracts::MAX_FRAME_LEN;
use serial_bridge_core::receiver::Receiver;
use serial_bridge_core::transmitter::Transmitter;
use serial_bridge_core::{
    BridgeClient, ByteTransport, ClientBuilder, Command, MemoryPort, PeriodicTimer, TickCallback,
};

pub const LINE_CAPACITY: usize = 1024;
pub const FRAME_WAIT: Duration = Duration::from_secs(2);

/// Time for the writer to release the framer after its last byte
pub const SETTLE: Duration = Duration::from_millis(20);

pub fn subscribe() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A frame as the bridge saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenFrame {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl SeenFrame {
    pub fn new(command: u8, payload: &[u8]) -> Self {
        Self {
            command,
            payload: payload.to_vec(),
        }
    }
}

/// Bridge end of the line: parses every frame the client sends and lets the
/// test script replies.
pub struct FakeBridge {
    port: MemoryPort,
    frames: FrameQueue<SeenFrame>,
}

impl FakeBridge {
    pub fn new(port: MemoryPort) -> Self {
        let (seen_tx, frames) = crossbeam_channel::unbounded();
        let mut parser = Receiver::new();
        port.attach_receiver(Box::new(move |byte| {
            if let Ok(Some(frame)) = parser.push(byte) {
                let _ = seen_tx.send(SeenFrame::new(frame.command_byte, frame.payload));
            }
        }));
        Self { port, frames }
    }

    pub fn expect_frame(&self) -> SeenFrame {
        match self.frames.recv_timeout(FRAME_WAIT) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => panic!("client sent nothing within {FRAME_WAIT:?}"),
            Err(RecvTimeoutError::Disconnected) => panic!("bridge line closed"),
        }
    }

    pub fn no_frame_within(&self, window: Duration) {
        if let Ok(frame) = self.frames.recv_timeout(window) {
            panic!("unexpected frame from client: {frame:?}");
        }
    }

    /// Encode and send one frame to the client
    pub fn send(&self, command: u8, payload: &[u8]) {
        let mut wire = [0u8; MAX_FRAME_LEN];
        let len = Transmitter::encode(command, payload, &mut wire).unwrap();
        self.send_raw(&wire[..len]);
    }

    pub fn send_raw(&self, bytes: &[u8]) {
        for &byte in bytes {
            self.port.write_byte(byte).unwrap();
        }
        self.port.flush().unwrap();
    }

    pub fn ack(&self, seq: bool) {
        self.send(Command::Ack.with_flag(seq), &[]);
    }
}

/// Timer fired explicitly by the test
#[derive(Default)]
pub struct ManualTimer {
    armed: AtomicBool,
    arms: AtomicUsize,
    callback: Mutex<Option<TickCallback>>,
}

impl ManualTimer {
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn arm_count(&self) -> usize {
        self.arms.load(Ordering::SeqCst)
    }

    /// Run one expiry, as the hardware compare-match would
    pub fn fire(&self) {
        let mut slot = self.callback.lock().unwrap();
        if let Some(on_tick) = slot.as_mut() {
            on_tick();
        }
    }
}

impl PeriodicTimer for ManualTimer {
    fn set_callback(&self, on_tick: TickCallback) {
        *self.callback.lock().unwrap() = Some(on_tick);
    }

    fn arm(&self, _interval: Duration) {
        self.arms.fetch_add(1, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

/// Client-side line that can be made to refuse every byte
pub struct GatedLine {
    port: MemoryPort,
    stalled: AtomicBool,
}

impl GatedLine {
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }
}

impl ByteTransport for GatedLine {
    fn available_for_write(&self) -> usize {
        if self.is_stalled() {
            0
        } else {
            self.port.available_for_write()
        }
    }

    fn write_byte(&self, byte: u8) -> io::Result<()> {
        if self.is_stalled() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "line stalled"));
        }
        self.port.write_byte(byte)
    }

    fn flush(&self) -> io::Result<()> {
        self.port.flush()
    }

    fn attach_receiver(&self, on_byte: serial_bridge_core::RxCallback) {
        self.port.attach_receiver(on_byte)
    }
}

pub type Client<T> = BridgeClient<T, Arc<ManualTimer>>;
pub type TestClient = Client<MemoryPort>;

pub fn harness_with(builder: ClientBuilder) -> (TestClient, FakeBridge, Arc<ManualTimer>) {
    subscribe();
    let (line, bridge_end) = MemoryPort::pair(LINE_CAPACITY);
    let timer = Arc::new(ManualTimer::default());
    let client = builder.build(line, Arc::clone(&timer));
    (client, FakeBridge::new(bridge_end), timer)
}

pub fn harness() -> (TestClient, FakeBridge, Arc<ManualTimer>) {
    harness_with(ClientBuilder::new())
}

/// Connected client whose line the test can stall
pub fn gated(
    builder: ClientBuilder,
) -> (Client<Arc<GatedLine>>, FakeBridge, Arc<ManualTimer>, Arc<GatedLine>) {
    subscribe();
    let (line, bridge_end) = MemoryPort::pair(LINE_CAPACITY);
    let line = Arc::new(GatedLine {
        port: line,
        stalled: AtomicBool::new(false),
    });
    let timer = Arc::new(ManualTimer::default());
    let client = builder.build(Arc::clone(&line), Arc::clone(&timer));
    let bridge = FakeBridge::new(bridge_end);
    handshake(&client, &bridge);
    (client, bridge, timer, line)
}

/// Run connect against the bridge and answer with CONNECT_ACK
pub fn handshake<T: ByteTransport + 'static>(client: &Client<T>, bridge: &FakeBridge) {
    thread::scope(|s| {
        let pending = s.spawn(|| client.connect([127, 0, 0, 1].into(), 80));
        let connect = bridge.expect_frame();
        assert_eq!(connect.command, Command::Connect.with_flag(false));
        bridge.send(Command::ConnectAck.with_flag(false), &[]);
        pending.join().unwrap().unwrap();
    });
}

/// Harness whose client has completed the handshake
pub fn connected() -> (TestClient, FakeBridge, Arc<ManualTimer>) {
    let (client, bridge, timer) = harness();
    handshake(&client, &bridge);
    (client, bridge, timer)
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
