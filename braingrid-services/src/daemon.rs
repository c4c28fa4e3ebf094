//! Stoppable periodic background task.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A periodic task with an explicit stop signal.
///
/// Each tick starts `interval` after the previous one started; a tick that
/// overruns the interval is followed immediately by the next.
pub struct Daemon {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Daemon {
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            debug!("Daemon {} started", name);
            loop {
                let started = Instant::now();
                tick().await;

                let delay = interval.saturating_sub(started.elapsed());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }
            }
            debug!("Daemon {} stopped", name);
        });

        Self {
            name,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signals the task and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("Daemon {} ended abnormally: {}", self.name, e);
        }
    }
}
