//! Connection establishment policy
//!
//! Every channel waits for its transport the same way: probe, sleep a fixed
//! interval, probe again. Probes are cheap existence checks so there is no
//! backoff growth.
//!
//! | `should_wait` | `repeats`  | probes                       |
//! |---------------|------------|------------------------------|
//! | true          | `None`     | until the probe succeeds     |
//! | false         | `None`     | exactly one                  |
//! | any           | `Some(n)`  | at most `n`                  |

use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Probes between "still waiting" log lines during an unbounded wait
const WAIT_LOG_EVERY: u32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Establisher {
    poll_interval: Duration,
}

impl Default for Establisher {
    fn default() -> Self {
        Self::new(config::defaults::poll_interval())
    }
}

impl Establisher {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Probe until connected or the attempt budget runs out
    ///
    /// Returns `true` as soon as `probe` reports connected. Sleeps only between
    /// probes, never after the last one.
    pub fn await_connection<P>(&self, probe: P, should_wait: bool, repeats: Option<u32>) -> bool
    where
        P: FnMut() -> bool,
    {
        self.await_connection_unless(probe, || false, should_wait, repeats)
    }

    /// Like [`Establisher::await_connection`], but gives up once `cancelled` reports true
    pub fn await_connection_unless<P, C>(
        &self,
        mut probe: P,
        cancelled: C,
        should_wait: bool,
        repeats: Option<u32>,
    ) -> bool
    where
        P: FnMut() -> bool,
        C: Fn() -> bool,
    {
        let limit = match repeats {
            Some(n) => Some(n),
            None if should_wait => None,
            None => Some(1),
        };

        let mut attempts: u32 = 0;
        loop {
            if let Some(limit) = limit {
                if attempts >= limit {
                    debug!("Connection not established after {} probe(s)", attempts);
                    return false;
                }
            }

            if cancelled() {
                debug!("Connection attempt cancelled after {} probe(s)", attempts);
                return false;
            }

            attempts = attempts.saturating_add(1);
            if probe() {
                debug!("Connection established after {} probe(s)", attempts);
                return true;
            }
            trace!("Probe {} failed", attempts);

            if limit.is_none() && attempts % WAIT_LOG_EVERY == 0 {
                debug!("Still waiting for connection after {} probes", attempts);
            }

            if limit.map_or(true, |limit| attempts < limit) {
                thread::sleep(self.poll_interval);
            }
        }
    }
}
