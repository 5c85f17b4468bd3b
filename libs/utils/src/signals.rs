//! Process shutdown flags, set from signal handlers and polled at every
//! loop iteration and suspension point by the caller.
//!
//! Three flags, matching the three signals the apply engine's design
//! distinguishes: a graceful stop, a fast stop, and an immediate quit.
//! None of them unwind the stack from inside the handler; they only
//! flip an `AtomicBool` that the run loop checks on its own schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::flag;

#[derive(Clone)]
pub struct ShutdownFlags {
    /// SIGTERM: finish the current transaction/file, then exit.
    pub stop: Arc<AtomicBool>,
    /// SIGINT: same as `stop`, distinguished for logging purposes only.
    pub stop_fast: Arc<AtomicBool>,
    /// SIGQUIT: set alongside `stop`/`stop_fast` so callers that only
    /// care about "should I keep looping" can check one flag.
    pub quit: Arc<AtomicBool>,
}

impl ShutdownFlags {
    /// Register signal handlers for SIGTERM, SIGINT and SIGQUIT. Safe to
    /// call once per process; calling it a second time would register a
    /// second set of handlers pointing at new flags, which is never what
    /// a caller wants.
    pub fn install() -> anyhow::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_fast = Arc::new(AtomicBool::new(false));
        let quit = Arc::new(AtomicBool::new(false));

        flag::register(SIGTERM, Arc::clone(&stop))?;
        flag::register(SIGTERM, Arc::clone(&quit))?;
        flag::register(SIGINT, Arc::clone(&stop_fast))?;
        flag::register(SIGINT, Arc::clone(&quit))?;
        flag::register(SIGQUIT, Arc::clone(&quit))?;

        Ok(ShutdownFlags {
            stop,
            stop_fast,
            quit,
        })
    }

    /// True once any shutdown signal has been observed.
    pub fn requested(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }
}
