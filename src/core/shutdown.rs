//! Process shutdown coordination
//!
//! Turns OS signals into cancellation of a root [`CancellationContext`]. Every
//! scope derived from that root (consumer loops, in-flight connects) observes
//! the shutdown. A second signal forces an immediate exit.

use crate::core::cancellation::CancellationContext;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Coordinates graceful shutdown across the application
pub struct ShutdownCoordinator {
    root: CancellationContext,
    signal_count: Arc<AtomicUsize>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            root: CancellationContext::new(),
            signal_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Root scope cancelled when shutdown is triggered
    pub fn context(&self) -> CancellationContext {
        self.root.clone()
    }

    pub fn trigger_shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Wait for the shutdown signal
    pub async fn wait(&self) {
        self.root.cancelled().await;
    }

    /// Install signal handlers that trigger this coordinator
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_signal_handlers(&self) {
        setup_signal_handlers(self.root.clone(), self.signal_count.clone());
    }
}

fn on_signal(root: &CancellationContext, signal_count: &AtomicUsize, name: &str) {
    let previous = signal_count.fetch_add(1, Ordering::AcqRel);
    if previous >= 1 {
        log::warn!("{} received again; exiting", name);
        std::process::exit(130);
    }
    log::info!("{} received; shutting down", name);
    root.cancel();
}

fn setup_signal_handlers(root: CancellationContext, signal_count: Arc<AtomicUsize>) {
    #[cfg(unix)]
    {
        // SAFETY: restoring the default disposition for SIGPIPE has no
        // preconditions and is done before any pipe is written.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }

        use tokio::signal::unix::{signal, SignalKind};
        let signals = [
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
            (SignalKind::quit(), "SIGQUIT"),
        ];

        for (kind, name) in signals {
            let root = root.clone();
            let counter = signal_count.clone();

            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut sig) => {
                        while sig.recv().await.is_some() {
                            on_signal(&root, &counter, name);
                        }
                    }
                    Err(e) => log::debug!("Could not install {} handler: {}", name, e),
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                on_signal(&root, &signal_count, "Ctrl-C");
            }
        });
    }
}
