//! Process shutdown coordination
//!
//! A single [`Shutdown`] owned by `main` hands out [`ShutdownToken`]s to the
//! stream supervisor, the watchdog and the config watcher. Requesting shutdown
//! wakes every token, including tokens created after the request.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown (SIGQUIT)
    Urgent,
}

impl ShutdownSignal {
    /// How long background tasks get to finish. `None` means abort them at once.
    pub fn drain_timeout(&self) -> Option<Duration> {
        match self {
            ShutdownSignal::Graceful => Some(Duration::from_secs(5)),
            ShutdownSignal::Urgent => None,
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Shutdown coordinator
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<Option<ShutdownSignal>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The accepted request, if any
    pub fn signal(&self) -> Option<ShutdownSignal> {
        *self.tx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        let accepted = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signal);
            true
        });

        if accepted {
            info!("Shutdown requested: {}", signal);
        } else {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
        }
    }

    /// Create a token that can be used to await shutdown in async tasks
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Token for awaiting shutdown in async tasks
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Resolve once shutdown is requested.
    ///
    /// If the coordinator is dropped without a request the token resolves as urgent.
    pub async fn cancelled(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.rx.borrow_and_update() {
                return signal;
            }
            if self.rx.changed().await.is_err() {
                return (*self.rx.borrow()).unwrap_or(ShutdownSignal::Urgent);
            }
        }
    }
}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<Shutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name, level) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = shutdown.clone();
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        info!("Received {}", name);
                        shutdown.request_shutdown(level);
                    });
                }
                Err(e) => error!("Failed to install {} handler: {}", name, e),
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Graceful.to_string(), "graceful");
        assert_eq!(ShutdownSignal::Urgent.to_string(), "urgent");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();

        assert!(!shutdown.is_shutdown_requested());
        assert!(!token.is_shutdown_requested());

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(shutdown.is_shutdown_requested());
        assert!(token.is_shutdown_requested());

        // Duplicate request should be ignored
        shutdown.request_shutdown(ShutdownSignal::Urgent);
        let mut late = shutdown.token();
        assert_eq!(late.cancelled().await, ShutdownSignal::Graceful);
    }

    #[test]
    fn test_urgent_signal_skips_drain() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.signal(), None);

        shutdown.request_shutdown(ShutdownSignal::Urgent);
        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert_eq!(shutdown.signal(), Some(ShutdownSignal::Urgent));
        assert_eq!(ShutdownSignal::Urgent.drain_timeout(), None);
        assert_eq!(
            ShutdownSignal::Graceful.drain_timeout(),
            Some(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_token_wakes_waiting_task() {
        let shutdown = Shutdown::new();
        let mut token = shutdown.token();

        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.request_shutdown(ShutdownSignal::Urgent);

        let signal = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal, ShutdownSignal::Urgent);
    }
}
