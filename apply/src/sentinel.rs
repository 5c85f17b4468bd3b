//! Talks to the source-side control record: waits for `apply = true`,
//! reports replay progress, and refreshes the stop position (spec.md
//! §4.3).

use std::time::Duration;

use tracing::{info, warn};

use crate::replay::ApplyContext;
use crate::shutdown::{sleep_or_shutdown, ShutdownFlags};
use utils::lsn::Lsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel {
    pub startpos: Lsn,
    pub endpos: Lsn,
    pub apply: bool,
}

/// The source control-record seam. The real implementation opens a
/// fresh short-lived `postgres::Client` per call (spec.md §4.3); tests
/// use an in-memory queue of canned responses instead.
pub trait SentinelQuery {
    fn get_sentinel(&mut self) -> anyhow::Result<Sentinel>;
    fn sync_apply(&mut self, previous_lsn: Lsn) -> anyhow::Result<Sentinel>;
}

pub enum WaitOutcome {
    Enabled,
    Shutdown,
}

pub struct SentinelCoordinator<Q> {
    query: Q,
    poll_interval: Duration,
}

impl<Q: SentinelQuery> SentinelCoordinator<Q> {
    pub fn new(query: Q, poll_interval: Duration) -> Self {
        SentinelCoordinator {
            query,
            poll_interval,
        }
    }

    /// Poll until `apply == true`, sleeping `poll_interval` between
    /// attempts. A transient query failure logs a warning and retries;
    /// a shutdown signal returns `Shutdown` without waiting out the
    /// current sleep.
    pub fn wait_for_enable(
        &mut self,
        context: &mut ApplyContext,
        shutdown: &ShutdownFlags,
    ) -> anyhow::Result<WaitOutcome> {
        let mut logged_waiting = false;

        loop {
            if shutdown.requested() {
                return Ok(WaitOutcome::Shutdown);
            }

            if !logged_waiting {
                info!("waiting for sentinel to enable apply");
                logged_waiting = true;
            }

            match self.query.get_sentinel() {
                Ok(sentinel) if sentinel.apply => {
                    context.adopt_sentinel_snapshot(
                        sentinel.startpos,
                        sentinel.endpos,
                        sentinel.apply,
                    );
                    return Ok(WaitOutcome::Enabled);
                }
                Ok(_) => {}
                Err(e) => warn!("sentinel query failed, retrying: {e:#}"),
            }

            if sleep_or_shutdown(self.poll_interval, shutdown) {
                return Ok(WaitOutcome::Shutdown);
            }
        }
    }

    /// Report `previous_lsn` as the replay position and refresh the
    /// context's sentinel snapshot. Failure here is non-fatal: the
    /// engine keeps its previous snapshot and tries again next time.
    pub fn sync(&mut self, context: &mut ApplyContext) {
        match self.query.sync_apply(context.previous_lsn) {
            Ok(sentinel) => {
                context.adopt_sentinel_snapshot(
                    sentinel.startpos,
                    sentinel.endpos,
                    sentinel.apply,
                );
            }
            Err(e) => warn!("sentinel sync failed, continuing with previous snapshot: {e:#}"),
        }
    }
}
