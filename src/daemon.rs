//! Signal handling and the keep-alive daemon loop.
//!
//! The daemon runs on the main thread. OS signals are counted in
//! process-wide atomics by the thinnest possible handlers; the daemon loop
//! observes the counters once per tick.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use tracing::{debug, error, info};

use crate::error::Result;

pub static SIGINT_COUNT: AtomicUsize = AtomicUsize::new(0);
pub static SIGTERM_COUNT: AtomicUsize = AtomicUsize::new(0);
pub static SIGUSR1_COUNT: AtomicUsize = AtomicUsize::new(0);
pub static SIGUSR2_COUNT: AtomicUsize = AtomicUsize::new(0);

static HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install process-wide handlers for SIGINT, SIGTERM, SIGUSR1 and SIGUSR2.
///
/// Each receipt increments the matching counter. The first SIGINT is
/// graceful; the third aborts the process immediately (the handler aborts
/// when the pre-increment count exceeds one). Safe to call more than once;
/// handlers are installed a single time and left in place for process
/// lifetime.
pub fn install_signal_handlers() -> Result<()> {
    if HANDLERS_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    // Handlers stay async-signal-safe: atomics and abort only.
    unsafe {
        signal_hook::low_level::register(SIGINT, || {
            let n = SIGINT_COUNT.fetch_add(1, Ordering::SeqCst);
            if n > 1 {
                std::process::abort();
            }
        })?;
        signal_hook::low_level::register(SIGTERM, || {
            SIGTERM_COUNT.fetch_add(1, Ordering::SeqCst);
        })?;
        signal_hook::low_level::register(SIGUSR1, || {
            SIGUSR1_COUNT.fetch_add(1, Ordering::SeqCst);
        })?;
        signal_hook::low_level::register(SIGUSR2, || {
            SIGUSR2_COUNT.fetch_add(1, Ordering::SeqCst);
        })?;
    }

    Ok(())
}

/// True once a stop signal (SIGINT or SIGTERM) has been received.
pub fn has_stop_signal() -> bool {
    if SIGINT_COUNT.load(Ordering::SeqCst) > 0 {
        debug!("SIGINT received");
        return true;
    }

    if SIGTERM_COUNT.load(Ordering::SeqCst) > 0 {
        debug!("SIGTERM received");
        return true;
    }

    false
}

/// A daemon that keeps the process alive until it is terminated via signal.
///
/// A watchdog closure runs once per tick for periodic background activities;
/// returning false or panicking shuts the daemon down.
pub struct Daemon {
    alive: bool,
}

impl Daemon {
    /// Create the daemon and install the signal handlers.
    pub fn new() -> Result<Self> {
        install_signal_handlers()?;
        Ok(Self { alive: true })
    }

    /// Run the daemon loop on the calling thread. Blocks until a stop signal
    /// arrives or the watchdog asks for shutdown.
    pub fn start<F>(&mut self, interval: Duration, mut watchdog: F)
    where
        F: FnMut() -> bool,
    {
        info!("Starting daemon");

        while self.alive {
            if has_stop_signal() {
                self.stop();
                break;
            }

            match catch_unwind(AssertUnwindSafe(&mut watchdog)) {
                Ok(true) => {}
                Ok(false) => {
                    info!("Watchdog requested shutdown");
                    self.stop();
                    break;
                }
                Err(_) => {
                    error!("The watchdog attached to the daemon panicked");
                    self.stop();
                    break;
                }
            }

            std::thread::sleep(interval);
        }

        info!("Daemon has been stopped");
    }

    fn stop(&mut self) {
        info!("Shutting down...");
        self.alive = false;
    }
}
