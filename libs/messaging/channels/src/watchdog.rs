//! Background establishment retries for non-blocking channels
//!
//! Channels built with `should_wait = false` probe once and hand themselves to
//! a watchdog. The watchdog keeps only weak references, so dropping a channel
//! removes it from the sweep without any deregistration call. Entries leave the
//! list once established or dropped.

use crate::error::ChannelError;
use crate::link::Establish;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

static GLOBAL: Lazy<Watchdog> =
    Lazy::new(|| Watchdog::new(config::defaults::watchdog_interval()));

#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<Inner>,
}

struct Inner {
    pending: Mutex<Vec<Weak<dyn Establish>>>,
    interval: Duration,
    autostart: bool,
    started: AtomicBool,
    sweeps: AtomicU64,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("interval", &self.inner.interval)
            .field("pending", &self.inner.pending.lock().len())
            .field("sweeps", &self.sweeps())
            .finish()
    }
}

impl Watchdog {
    /// Watchdog whose sweep thread starts on the first registration
    pub fn new(interval: Duration) -> Self {
        Self::with_autostart(interval, true)
    }

    /// Watchdog that only sweeps when [`Watchdog::sweep`] is called
    pub fn manual() -> Self {
        Self::with_autostart(config::defaults::watchdog_interval(), false)
    }

    fn with_autostart(interval: Duration, autostart: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(Vec::new()),
                interval,
                autostart,
                started: AtomicBool::new(false),
                sweeps: AtomicU64::new(0),
            }),
        }
    }

    /// Process-wide watchdog, created on first use
    pub fn global() -> &'static Watchdog {
        &GLOBAL
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Add a channel to the sweep list
    pub fn register(&self, channel: Weak<dyn Establish>) {
        if let Some(live) = channel.upgrade() {
            debug!("Watchdog tracking '{}'", live.name());
        }
        self.inner.pending.lock().push(channel);
        if self.inner.autostart {
            self.ensure_started();
        }
    }

    /// Channels still waiting for establishment
    pub fn pending(&self) -> usize {
        self.inner
            .pending
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|channel| !channel.is_established())
            .count()
    }

    /// Completed sweeps since creation
    pub fn sweeps(&self) -> u64 {
        self.inner.sweeps.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Run one pass over every pending channel, returning how many remain
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    fn ensure_started(&self) {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.interval;
        let spawned = thread::Builder::new()
            .name("conduit-watchdog".to_string())
            .spawn(move || run(weak, interval));

        match spawned {
            Ok(_) => info!("Watchdog started (interval {:?})", interval),
            Err(e) => {
                error!("Failed to start watchdog thread: {}", e);
                self.inner.started.store(false, Ordering::Release);
            }
        }
    }
}

fn run(inner: Weak<Inner>, interval: Duration) {
    loop {
        thread::sleep(interval);
        match inner.upgrade() {
            Some(inner) => {
                inner.sweep();
            }
            None => {
                debug!("Watchdog dropped, stopping sweep thread");
                break;
            }
        }
    }
}

impl Inner {
    fn sweep(&self) -> usize {
        // Snapshot so channel establish() never runs under the list lock
        let snapshot: Vec<Arc<dyn Establish>> = {
            let mut pending = self.pending.lock();
            pending.retain(|channel| channel.strong_count() > 0);
            pending.iter().filter_map(Weak::upgrade).collect()
        };

        let mut retired: Vec<*const ()> = Vec::new();
        for channel in &snapshot {
            if channel.is_established() {
                continue;
            }
            let attempt = catch_unwind(AssertUnwindSafe(|| channel.establish(Some(1))));
            match attempt {
                Ok(Ok(true)) => info!("Watchdog established '{}'", channel.name()),
                Ok(Ok(false)) => debug!("'{}' still not established", channel.name()),
                Ok(Err(ChannelError::Closed { .. })) => {
                    debug!("'{}' closed, no longer retried", channel.name());
                    retired.push(Arc::as_ptr(channel) as *const ());
                }
                Ok(Err(e)) => warn!("Watchdog establish of '{}' failed: {}", channel.name(), e),
                Err(_) => error!("Watchdog establish of '{}' panicked", channel.name()),
            }
        }
        drop(snapshot);

        let mut pending = self.pending.lock();
        pending.retain(|channel| match channel.upgrade() {
            Some(channel) => {
                !channel.is_established() && !retired.contains(&(Arc::as_ptr(&channel) as *const ()))
            }
            None => false,
        });
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        pending.len()
    }
}
