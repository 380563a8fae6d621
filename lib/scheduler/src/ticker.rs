//! The 1 Hz pending-run ticker (§4.3.3), grounded directly on the original
//! `Hub.serviceLists`: `for range time.Tick(time.Second) { h.distributeAllPending() }`.

use std::time::Duration;

use tracing::debug;
use waypost_engine::Hub;

use crate::error::SchedulerError;

/// Drives a `Hub`'s pending queue on a fixed interval.
///
/// The interval loop itself (`run`) uses `tokio::time::interval`; tests drive
/// `tick` directly against an injected `Clock`-backed `Hub` instead of
/// spawning the real timer, per the scheduler's test strategy.
pub struct Ticker {
    hub: Hub,
    interval: Duration,
}

impl Ticker {
    /// # Errors
    /// Returns `SchedulerError::InvalidInterval` if `interval_secs` is zero.
    pub fn new(hub: Hub, interval_secs: u64) -> Result<Self, SchedulerError> {
        if interval_secs == 0 {
            return Err(SchedulerError::InvalidInterval { secs: interval_secs });
        }
        Ok(Self {
            hub,
            interval: Duration::from_secs(interval_secs),
        })
    }

    /// Runs one tick's worth of work: attempt dispatch of every pending run.
    pub async fn tick(&self) {
        debug!("scheduler tick");
        self.hub.distribute_all_pending().await;
    }

    /// Runs the ticker forever on its configured interval. Intended to be
    /// spawned as its own task; never returns under normal operation.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}
