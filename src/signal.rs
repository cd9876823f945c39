//! Stop requests from SIGINT/SIGTERM.
//!
//! The first request asks the scan loop to drain and disarm the controller.
//! A second request means the user is done waiting, and the process exits
//! immediately from the listener task.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::{error, info};

/// Exit code used when a repeated stop request cuts shutdown short.
pub const EXIT_FORCED: i32 = 1;

/// Signals that request a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Interrupt => f.write_str("SIGINT"),
            StopSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// What a stop request amounts to, given the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStage {
    /// First request: finish the current step and shut down cleanly.
    Graceful,
    /// Any later request: exit without cleanup.
    Forced,
}

#[derive(Debug, Default)]
struct Shared {
    requests: AtomicUsize,
    notify: Notify,
}

/// Shared stop state between the signal listener and the scan loop.
#[derive(Debug, Clone, Default)]
pub struct SignalCoordinator {
    shared: Arc<Shared>,
}

impl SignalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stop request and wake the scan loop.
    pub fn request_stop(&self, signal: StopSignal) -> StopStage {
        let previous = self.shared.requests.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            info!(%signal, "stop requested; disarming after the current step");
            // Stores a permit if nobody is waiting yet.
            self.shared.notify.notify_one();
            StopStage::Graceful
        } else {
            StopStage::Forced
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.requests.load(Ordering::SeqCst) > 0
    }

    /// Resolve once a stop has been requested.
    pub async fn notified(&self) {
        if self.stop_requested() {
            return;
        }
        self.shared.notify.notified().await;
    }

    /// Spawn a task that turns SIGINT/SIGTERM into stop requests.
    ///
    /// Handlers are installed before this returns, so a signal arriving right
    /// after is not lost.
    #[cfg(unix)]
    pub fn listen(&self) -> std::io::Result<tokio::task::JoinHandle<()>> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let coordinator = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = interrupt.recv() => StopSignal::Interrupt,
                    Some(()) = terminate.recv() => StopSignal::Terminate,
                    else => return,
                };
                coordinator.handle(received, |code| std::process::exit(code));
            }
        }))
    }

    /// Apply one delivered signal. A repeated request calls `exit` with
    /// [`EXIT_FORCED`] instead of waiting for the scan loop to drain.
    pub fn handle(&self, signal: StopSignal, exit: impl FnOnce(i32)) -> StopStage {
        let stage = self.request_stop(signal);
        if stage == StopStage::Forced {
            error!(%signal, "multiple stop requests; exiting without disarming");
            exit(EXIT_FORCED);
        }
        stage
    }
}
