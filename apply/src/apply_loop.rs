//! The top-level driver: decides which file to open next, when to
//! poll, and when to stop (spec.md §4.5).

use tracing::info;

use crate::config::Mode;
use crate::replay::{apply_file, ApplyContext, TargetConnection};
use crate::sentinel::{SentinelCoordinator, SentinelQuery, WaitOutcome};
use crate::shutdown::{sleep_or_shutdown, ShutdownFlags};
use std::time::Duration;
use utils::lsn::Lsn;

pub fn run<Q: SentinelQuery>(
    context: &mut ApplyContext,
    target: &mut dyn TargetConnection,
    mode: Mode,
    sentinel: &mut SentinelCoordinator<Q>,
    shutdown: &ShutdownFlags,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    if mode == Mode::Prefetch {
        if let WaitOutcome::Shutdown = sentinel.wait_for_enable(context, shutdown)? {
            info!("shutdown observed while waiting for sentinel");
            return Ok(());
        }
    }

    loop {
        let current_file = context.sql_file_name.clone();

        if shutdown.requested() {
            info!("shutdown observed, stopping apply loop");
            break;
        }

        if !context.sql_file_name.exists() {
            if sleep_or_shutdown(poll_interval, shutdown) {
                break;
            }
            continue;
        }

        apply_file(context, target)?;
        sentinel.sync(context);

        if !context.reached_end_pos
            && context.endpos != Lsn::INVALID
            && context.endpos <= context.previous_lsn
        {
            context.reached_end_pos = true;
        }

        if context.reached_end_pos {
            info!(previous_lsn = %context.previous_lsn, "reached end position, stopping");
            break;
        }

        context.recompute_file_name();

        if context.sql_file_name == current_file {
            // The writer may still be appending to the current segment;
            // nothing to do but wait for more lines or a SWITCH.
            if sleep_or_shutdown(poll_interval, shutdown) {
                break;
            }
        }
    }

    Ok(())
}
