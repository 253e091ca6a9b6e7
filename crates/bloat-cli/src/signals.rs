//! Signal handling for graceful interruption.
//!
//! SIGINT and SIGTERM trip the search's [`CancelToken`] so the controller
//! stops at the next round boundary, folding in-flight results into the
//! accepted set instead of discarding them. Signal handlers must be
//! async-signal-safe, so they only touch a static atomic; a bridge thread
//! forwards the flag to the token.

use bloat_core::search::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Register interrupt handlers that trip `cancel`.
///
/// On non-Unix platforms this is a no-op; cancellation then only happens
/// through the token directly.
pub fn register(cancel: &CancelToken) {
    #[cfg(unix)]
    register_unix(cancel);
    #[cfg(not(unix))]
    let _ = cancel;
}

#[cfg(unix)]
fn register_unix(cancel: &CancelToken) {
    use std::os::raw::c_int;

    static INTERRUPT_FLAG: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_signal(_: c_int) {
        INTERRUPT_FLAG.store(true, Ordering::Relaxed);
    }

    let token = cancel.clone();
    std::thread::spawn(move || loop {
        if INTERRUPT_FLAG.swap(false, Ordering::Relaxed) {
            info!("interrupt received, finishing the current round");
            token.cancel();
        }
        if token.is_cancelled() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    });

    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
    debug!("signal handlers registered");
}
