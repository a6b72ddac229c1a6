//! Single-shot, re-armable timer owned by one tracker.
//!
//! [`DelayTimer`] hosts a current-thread tokio runtime on a dedicated worker
//! thread. Arming replaces the pending deadline; when it elapses the expiry
//! callback runs on the worker thread. Each tracker owns its own timer, so
//! independent trackers never share timer state.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error};

/// Owned timer with one pending deadline at a time.
pub trait Timer: Send + Sync {
    /// Fires once after `delay`, replacing any previously armed deadline.
    fn arm(&self, delay: Duration);
    /// Drops the pending deadline, if any.
    fn cancel(&self);
}

impl<T: Timer + ?Sized> Timer for std::sync::Arc<T> {
    fn arm(&self, delay: Duration) {
        (**self).arm(delay)
    }

    fn cancel(&self) {
        (**self).cancel()
    }
}

pub struct DelayTimer {
    deadline_tx: watch::Sender<Option<Instant>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl DelayTimer {
    /// Starts the worker thread; `on_expire` runs each time a deadline elapses.
    pub fn spawn<F>(name: impl Into<String>, on_expire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (deadline_tx, deadline_rx) = watch::channel::<Option<Instant>>(None);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let name = name.into();

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        error!("{name}: timer runtime failed to start: {err}");
                        return;
                    }
                };
                runtime.block_on(run_timer_worker(deadline_rx, shutdown_rx, on_expire));
            });
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("timer worker thread failed to spawn: {err}");
                None
            }
        };

        Self {
            deadline_tx,
            shutdown_tx: Some(shutdown_tx),
            worker,
        }
    }
}

impl Timer for DelayTimer {
    fn arm(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        self.deadline_tx.send_replace(Some(deadline));
    }

    fn cancel(&self) {
        self.deadline_tx.send_replace(None);
    }
}

impl Drop for DelayTimer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            // The last tracker handle may be released from inside the expiry
            // callback, i.e. on the worker itself.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

async fn run_timer_worker<F>(
    mut deadline_rx: watch::Receiver<Option<Instant>>,
    mut shutdown_rx: oneshot::Receiver<()>,
    on_expire: F,
) where
    F: Fn(),
{
    let mut last_fired: Option<Instant> = None;

    loop {
        let current = *deadline_rx.borrow_and_update();
        let deadline = current.filter(|at| Some(*at) != last_fired);

        match deadline {
            Some(at) => {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(at) => {
                        last_fired = Some(at);
                        debug!("timer expired");
                        on_expire();
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
