use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C lets the current stage finish and cancels the rest; a second
/// one exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current stage...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
