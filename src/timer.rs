//! Periodic timer seam used for retransmission timeouts.
//!
//! [`PeriodicTimer`] mirrors a hardware compare-match timer: once armed it
//! invokes its callback every interval until disarmed. [`IntervalTimer`] is a
//! thread-backed implementation; re-arming restarts the period.

use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::lock;

/// Tick callback, run in the timer's own context
pub type TickCallback = Box<dyn FnMut() + Send + 'static>;

pub trait PeriodicTimer: Send + Sync {
    /// Register the expiry callback
    ///
    /// The callback may call [`arm`](Self::arm) and [`disarm`](Self::disarm).
    fn set_callback(&self, on_tick: TickCallback);

    /// Start (or restart) ticking every `interval`
    fn arm(&self, interval: Duration);

    /// Stop ticking
    fn disarm(&self);
}

impl<T: PeriodicTimer + ?Sized> PeriodicTimer for Arc<T> {
    fn set_callback(&self, on_tick: TickCallback) {
        (**self).set_callback(on_tick)
    }

    fn arm(&self, interval: Duration) {
        (**self).arm(interval)
    }

    fn disarm(&self) {
        (**self).disarm()
    }
}

struct Control {
    interval: Option<Duration>,
    /// Bumped by every arm/disarm so a waiting period can be abandoned
    generation: u64,
    shutdown: bool,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    callback: Mutex<Option<TickCallback>>,
}

/// Thread-backed periodic timer
pub struct IntervalTimer {
    shared: Arc<Shared>,
}

impl IntervalTimer {
    /// Spawn the timer thread, initially disarmed
    pub fn new() -> io::Result<Self> {
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                interval: None,
                generation: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
            callback: Mutex::new(None),
        });

        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name("interval-timer".into())
            .spawn(move || run(&worker))?;

        Ok(Self { shared })
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.shared.control).interval.is_some()
    }
}

fn run(shared: &Shared) {
    let mut control = lock(&shared.control);
    loop {
        if control.shutdown {
            break;
        }
        let Some(interval) = control.interval else {
            control = shared.wake.wait(control).unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let generation = control.generation;
        let deadline = Instant::now() + interval;
        while !control.shutdown && control.generation == generation {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            control = shared
                .wake
                .wait_timeout(control, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if control.shutdown || control.generation != generation {
            continue;
        }

        // Callback runs unlocked so it can arm/disarm
        drop(control);
        let mut callback = lock(&shared.callback);
        {
            // A disarm or re-arm after the deadline passed supersedes this tick
            let current = lock(&shared.control);
            if current.shutdown || current.generation != generation {
                drop(current);
                drop(callback);
                control = lock(&shared.control);
                continue;
            }
        }
        trace!("timer tick");
        if let Some(on_tick) = callback.as_mut() {
            on_tick();
        }
        drop(callback);
        control = lock(&shared.control);
    }
    trace!("interval timer stopped");
}

impl PeriodicTimer for IntervalTimer {
    fn set_callback(&self, on_tick: TickCallback) {
        *lock(&self.shared.callback) = Some(on_tick);
    }

    fn arm(&self, interval: Duration) {
        let mut control = lock(&self.shared.control);
        control.interval = Some(interval);
        control.generation += 1;
        self.shared.wake.notify_all();
    }

    fn disarm(&self) {
        let mut control = lock(&self.shared.control);
        if control.interval.take().is_some() {
            control.generation += 1;
            self.shared.wake.notify_all();
        }
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        // Not joined: the last client handle may be dropped from a tick
        lock(&self.shared.control).shutdown = true;
        self.shared.wake.notify_all();
    }
}
