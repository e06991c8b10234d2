//! Cooperative cancellation for reactors.
//!
//! A [`ShutdownController`] owns a `watch` channel. Every reactor selects on a
//! [`ShutdownSignal`] alongside its sockets and timers and leaves its loop once
//! the controller fires.

use tokio::sync::watch;

/// Triggers shutdown for every signal it has handed out.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
        }
    }

    /// Returns a signal that resolves once shutdown is triggered.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: Some(self.shutdown_signal.subscribe()),
        }
    }

    /// Signals every listener. Idempotent.
    pub fn trigger_shutdown(&self) {
        // send_replace never fails, even with no receivers alive.
        self.shutdown_signal.send_replace(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.shutdown_signal.borrow()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half handed to a reactor.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that never fires, for roles driven only by their own
    /// liveness.
    #[must_use]
    pub fn never() -> Self {
        Self { rx: None }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once shutdown has been triggered. Cancel-safe.
    ///
    /// If the controller is dropped without triggering, this never resolves.
    pub async fn recv(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
