// Path: crates/node/src/lib.rs
#![forbid(unsafe_code)]

//! # ARCA Node
//!
//! The service binaries and their shared glue: hierarchical configuration
//! loading and shutdown wiring. Everything substantive lives in the library
//! crates; a binary here only loads configuration, initializes logging,
//! builds its dependencies, and fails fast when any of that is unusable.

/// Hierarchical configuration loading for the service binaries.
pub mod settings;

use tokio::sync::watch;

/// A shutdown channel that fires on SIGINT/SIGTERM.
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(target: "node", error = %e, "failed to install SIGTERM handler");
                    ctrl_c.await.ok();
                    let _ = tx.send(true);
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        let _ = tx.send(true);
    });
    rx
}
