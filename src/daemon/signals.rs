//! Signal handling: SIGTERM/SIGINT request a graceful shutdown.
//!
//! Uses `signal-hook` to set an atomic flag. The scan loop polls the flag
//! between cycles and while waiting for the next one.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Granularity of [`SignalHandler::wait_timeout`] polling.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Shutdown flag shared between the OS signal hooks and the scan loop.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register SIGTERM/SIGINT. Registration failures are
    /// reported on stderr but not fatal.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// A handler that only responds to [`request_shutdown`](Self::request_shutdown).
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    /// Sleep up to `timeout`, returning early (with `true`) once shutdown is requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.should_shutdown() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(POLL_SLICE.min(deadline - now));
        }
    }

    fn register_signals(&self) {
        for (name, sig) in [("SIGTERM", SIGTERM), ("SIGINT", SIGINT)] {
            if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&self.shutdown_flag)) {
                eprintln!("[INTAKE-SIGNAL] failed to register {name}: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_running() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.should_shutdown());
    }

    #[test]
    fn programmatic_shutdown_is_seen_by_clones() {
        let handler = SignalHandler::unregistered();
        let clone = handler.clone();
        clone.request_shutdown();
        assert!(handler.should_shutdown());
    }

    #[test]
    fn wait_timeout_elapses_without_shutdown() {
        let handler = SignalHandler::unregistered();
        let start = Instant::now();
        assert!(!handler.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_timeout_returns_early_on_shutdown() {
        let handler = SignalHandler::unregistered();
        let remote = handler.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.request_shutdown();
        });
        let start = Instant::now();
        assert!(handler.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().unwrap();
    }

    #[test]
    fn zero_timeout_returns_immediately() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.wait_timeout(Duration::ZERO));
    }
}
