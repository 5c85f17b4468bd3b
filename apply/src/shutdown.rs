//! Re-exports the process-wide shutdown flags and the one sleep helper
//! every suspension point in the engine uses.
//!
//! Sleeps are bounded, uninterrupted waits of the poll interval; they
//! are not woken up early by a signal. Shutdown is instead checked at
//! the top of every loop iteration and immediately after each sleep
//! (spec.md §5).

use std::thread;
use std::time::Duration;

pub use utils::signals::ShutdownFlags;

/// Sleep for `duration`, then report whether a shutdown signal has been
/// observed in the meantime. Returns `true` if the caller should stop
/// looping.
pub fn sleep_or_shutdown(duration: Duration, shutdown: &ShutdownFlags) -> bool {
    thread::sleep(duration);
    shutdown.requested()
}
