//! Ctrl+C handling.
//!
//! A SIGINT reaches the whole process group, so in-flight children die on
//! their own and their zero-length walk files force a re-run next time.
//! The engine's own job on interrupt is just to stop *starting* work: the
//! handler sets a shared atomic flag that pool workers check before
//! dequeuing, and the binary exits 130.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared shutdown flag, settable from the signal handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Create a handler with the flag unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag by hand (used by tests).
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// The flag itself, for handing to pool workers.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the Ctrl+C hook and return its handler.
///
/// The hook can only be registered once per process; later calls (and
/// calls racing a hook registered elsewhere) get a handler that still
/// works through [`ShutdownHandler::request_shutdown`].
#[must_use]
pub fn install_handler() -> ShutdownHandler {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        return handler.clone();
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();
    let installed = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = writeln!(std::io::stderr(), "\nInterrupted.");
        let _ = std::io::stderr().flush();
    });
    if installed.is_err() {
        log::debug!("Ctrl+C hook already registered, using unhooked handler");
    }
    let _ = GLOBAL_HANDLER.set(handler.clone());
    GLOBAL_HANDLER.get().cloned().unwrap_or(handler)
}
