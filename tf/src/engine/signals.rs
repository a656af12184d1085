//! Cooperative cancellation from process signals

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const INTERRUPT_BANNER: &str = "************ SIGINT RECEIVED - SHUTTING DOWN! ************";

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag checked by the run loop
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        debug!("CancelToken::trigger: called");
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `trigger` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Exit status when a second signal cuts the shutdown short
pub const FORCED_EXIT_CODE: i32 = 130;

/// What the listener does with one received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop submitting and drain running jobs
    Cancel,
    /// Any later signal: exit without waiting
    ForceExit,
}

/// Cancel on the first signal, force the exit on every one after it
pub fn handle_signal(token: &CancelToken) -> SignalAction {
    if token.is_cancelled() {
        return SignalAction::ForceExit;
    }
    println!("{}", INTERRUPT_BANNER.red().bold());
    token.trigger();
    SignalAction::Cancel
}

fn act(token: &CancelToken) {
    if handle_signal(token) == SignalAction::ForceExit {
        warn!("Second signal received, exiting without waiting for running jobs");
        eprintln!("{}", "Forced exit.".red().bold());
        std::process::exit(FORCED_EXIT_CODE);
    }
}

/// Map SIGINT and SIGTERM onto `token`, printing the shutdown banner
///
/// The listener keeps running after the first signal so that a second one
/// can end the process while jobs are still draining.
pub fn spawn_signal_listener(token: CancelToken) -> std::io::Result<JoinHandle<()>> {
    debug!("spawn_signal_listener: called");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(()) = sigint.recv() => {
                        debug!("spawn_signal_listener: SIGINT received");
                        warn!("SIGINT received");
                    }
                    Some(()) = sigterm.recv() => {
                        debug!("spawn_signal_listener: SIGTERM received");
                        warn!("SIGTERM received");
                    }
                    else => break,
                }
                act(&token);
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received");
                act(&token);
            }
        }))
    }
}
