//! Restarts capture when the default output device changes.

use super::backend::{DataFlow, EndpointNotificationClient, Role};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Wait between a default-device change and the capture restart. Restarting
/// straight from the notification can tear down a stream that is still
/// initializing.
pub const RESTART_DELAY: Duration = Duration::from_millis(50);

type RestartFn = Arc<dyn Fn() + Send + Sync>;

/// Tracks which endpoint is being captured and schedules a debounced
/// restart when the default render endpoint moves elsewhere.
pub struct EndpointWatcher {
    current: Mutex<Option<String>>,
    audio_active: AtomicBool,
    delay: Duration,
    restart: RestartFn,
}

impl EndpointWatcher {
    pub fn new(restart: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_delay(RESTART_DELAY, restart)
    }

    pub fn with_delay(delay: Duration, restart: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            current: Mutex::new(None),
            audio_active: AtomicBool::new(false),
            delay,
            restart: Arc::new(restart),
        }
    }

    /// Endpoint currently being captured (or about to be).
    pub fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_current(&self, id: Option<String>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    pub fn set_audio_active(&self, active: bool) {
        self.audio_active.store(active, Ordering::SeqCst);
    }

    pub fn audio_active(&self) -> bool {
        self.audio_active.load(Ordering::SeqCst)
    }

    /// Record `id` as current unless it already is; true when it changed.
    fn claim(&self, id: &str) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() == Some(id) {
            return false;
        }
        *current = Some(id.to_string());
        true
    }
}

impl EndpointNotificationClient for EndpointWatcher {
    fn on_default_device_changed(&self, flow: DataFlow, role: Role, device_id: &str) {
        if self.current().as_deref() == Some(device_id) {
            return;
        }
        if flow != DataFlow::Render || role != Role::Console || !self.audio_active() {
            return;
        }

        // Claim the new id before the restart so a burst of duplicate
        // notifications schedules only one.
        if !self.claim(device_id) {
            return;
        }
        tracing::info!("Default audio output changed to {}", device_id);

        let delay = self.delay;
        let restart = Arc::clone(&self.restart);
        let spawned = thread::Builder::new()
            .name("capture-restart".into())
            .spawn(move || {
                thread::sleep(delay);
                restart();
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to schedule capture restart: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn watcher() -> (Arc<EndpointWatcher>, Arc<AtomicUsize>) {
        let restarts = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&restarts);
        let watcher = EndpointWatcher::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        (Arc::new(watcher), restarts)
    }

    fn settle() {
        thread::sleep(RESTART_DELAY * 4);
    }

    #[test]
    fn same_endpoint_is_ignored() {
        let (watcher, restarts) = watcher();
        watcher.set_current(Some("speakers".into()));
        watcher.set_audio_active(true);

        watcher.on_default_device_changed(DataFlow::Render, Role::Console, "speakers");
        settle();
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn change_outside_audio_mode_is_ignored() {
        let (watcher, restarts) = watcher();
        watcher.set_current(Some("speakers".into()));

        watcher.on_default_device_changed(DataFlow::Render, Role::Console, "headphones");
        settle();
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
        assert_eq!(watcher.current().as_deref(), Some("speakers"));
    }

    #[test]
    fn capture_flow_or_other_role_is_ignored() {
        let (watcher, restarts) = watcher();
        watcher.set_audio_active(true);

        watcher.on_default_device_changed(DataFlow::Capture, Role::Console, "mic");
        watcher.on_default_device_changed(DataFlow::Render, Role::Communications, "headset");
        settle();
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn change_in_audio_mode_restarts_once_after_delay() {
        let (watcher, restarts) = watcher();
        watcher.set_current(Some("speakers".into()));
        watcher.set_audio_active(true);

        for _ in 0..5 {
            watcher.on_default_device_changed(DataFlow::Render, Role::Console, "headphones");
        }
        assert_eq!(watcher.current().as_deref(), Some("headphones"));
        assert_eq!(restarts.load(Ordering::SeqCst), 0);

        settle();
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_duplicates_restart_once() {
        let (watcher, restarts) = watcher();
        watcher.set_audio_active(true);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let w = Arc::clone(&watcher);
                thread::spawn(move || {
                    w.on_default_device_changed(DataFlow::Render, Role::Console, "hdmi");
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        settle();
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
    }
}
