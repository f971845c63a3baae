//! SIGTERM wiring for the poller's cooperative shutdown.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Registers a SIGTERM-backed shutdown flag.
///
/// SIGTERM is the poller's only cancellation source. The poll loop checks
/// the flag before every fetch and once per second during sleeps, finishes
/// the in-flight work, persists a final state, and exits 0.
pub fn register_shutdown_flag() -> io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))?;
    Ok(flag)
}
