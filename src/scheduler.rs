//! The single repeating frame timer.
//!
//! At most one timer thread exists per [`Scheduler`]. Starting always
//! stops (and joins) the previous timer first, so two producers never
//! tick against the device at the same time.
//!
//! Every start bumps a generation counter. A tick that was already in
//! flight when its timer got replaced sees a stale generation and is
//! dropped instead of drawing over the new mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Timer {
    interval: Duration,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    timer: Option<Timer>,
    generation: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `interval` until stopped or restarted.
    ///
    /// The caller must not hold a lock that `tick` takes: starting joins
    /// the previous timer thread. A zero interval is refused and leaves the
    /// current timer untouched.
    pub fn start<F>(&mut self, interval: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        if interval.is_zero() {
            tracing::error!("Refusing to start a timer with a zero interval");
            return;
        }
        self.stop();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("matrix-timer".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if current.load(Ordering::SeqCst) != generation {
                                break;
                            }
                            tick();
                        }
                        // Stop signal or scheduler dropped.
                        _ => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                tracing::debug!("Timer started at {}ms", interval.as_millis());
                self.timer = Some(Timer {
                    interval,
                    stop_tx,
                    handle,
                });
            }
            Err(e) => tracing::error!("Failed to spawn timer thread: {}", e),
        }
    }

    /// Stop the running timer, if any. Returns once its thread has exited.
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            let _ = timer.stop_tx.send(());
            if timer.handle.join().is_err() {
                tracing::warn!("Timer thread panicked");
            }
            tracing::debug!("Timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Interval of the running timer.
    pub fn interval(&self) -> Option<Duration> {
        self.timer.as_ref().map(|t| t.interval)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
