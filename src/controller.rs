//! The mode state machine and the worker that runs it.
//!
//! [`MatrixController`] decides, on every "apply current configuration"
//! trigger, whether the display should be lit and which frame producer
//! owns it: a device built-in animation, a still or animated picture, the
//! clock, or the audio visualization.
//!
//! Producers never overlap. Every transition stops the frame timer and
//! tears down audio capture before the next producer starts writing, so
//! the timer thread, the capture callback and activation never draw into
//! the device at the same time.
//!
//! Activation can block on device handshakes, so the host does not call
//! the controller directly: it sends [`ControlCommand`]s to
//! [`control_loop`], which owns the controller on a dedicated thread (the
//! same shape as a render thread owning a non-thread-safe panel).

use crate::audio::backend::{
    AudioBackend, CaptureStream, EndpointNotificationClient, EndpointRegistration,
};
use crate::audio::decode::SampleEncoding;
use crate::audio::{AudioVisualizer, EndpointWatcher};
use crate::config::{self, ConfigStore, RunningMode, Settings};
use crate::device::{BuiltInAnimation, SharedDevice, lock_device};
use crate::error::{MatrixError, Result};
use crate::power::{PowerContext, PowerSource, WakeLatch, settings_allow_display};
use crate::raster::{self, RasterParams, Rendered};
use crate::scheduler::Scheduler;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Clock faces are refreshed once a second.
pub const CLOCK_INTERVAL: Duration = Duration::from_millis(1000);

// ── Modes ────────────────────────────────────────────────────────────

/// What the panel is doing right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Off,
    /// Producers stopped and no new one entered (activation aborted or
    /// failed, or the controller shut down).
    Idle,
    BuiltIn(u8),
    StaticImage(PathBuf),
    AnimatedImage(PathBuf),
    Clock,
    AudioReactive,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Off => write!(f, "off"),
            Mode::Idle => write!(f, "idle"),
            Mode::BuiltIn(i) => write!(f, "builtin:{i}"),
            Mode::StaticImage(p) => write!(f, "picture:{}", p.display()),
            Mode::AnimatedImage(p) => write!(f, "animation:{}", p.display()),
            Mode::Clock => write!(f, "clock"),
            Mode::AudioReactive => write!(f, "audio"),
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// Requests from the host (HTTP handlers, OS event hooks) to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-read settings and re-enter the configured mode.
    Apply { wake: bool },
    /// Show a picture and make it the configured mode.
    ShowPicture(PathBuf),
    /// Make the clock the configured mode.
    ShowClock,
    /// Record the current lid state (injected by the host).
    SetLidClosed(bool),
    /// Lid opened/closed: re-apply if lid awareness is on (or forced).
    LidPolicy { force: bool },
    /// AC plugged/unplugged.
    BatteryPolicy,
    /// Debounced restart after the default audio output changed.
    RestartAudio,
    Shutdown,
}

// ── Status ───────────────────────────────────────────────────────────

/// Snapshot published after every command; read by the HTTP layer.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ControllerStatus {
    /// Active mode (`off`, `idle`, `builtin:N`, `picture:PATH`, `animation:PATH`, `clock`, `audio`)
    pub mode: String,
    /// Whether a matrix device was found at startup
    pub device_present: bool,
    /// Whether the display is powered
    pub display_on: bool,
    /// Brightness level applied at the last activation
    pub brightness: u8,
    /// Frame timer interval in milliseconds, when a timer is running
    pub interval_ms: Option<u64>,
    /// Frames in the playing animation
    pub sequence_frames: Option<usize>,
    /// Audio endpoint being captured
    pub audio_endpoint: Option<String>,
    /// Last lid state reported by the host
    pub lid_closed: bool,
    /// Server version
    pub version: String,
}

impl ControllerStatus {
    pub fn new() -> Self {
        Self {
            mode: Mode::Off.to_string(),
            device_present: false,
            display_on: false,
            brightness: 0,
            interval_ms: None,
            sequence_frames: None,
            audio_endpoint: None,
            lid_closed: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Controller ───────────────────────────────────────────────────────

struct CaptureSession {
    stream: Box<dyn CaptureStream>,
    registration: Option<Box<dyn EndpointRegistration>>,
    /// Cleared before teardown so in-flight callbacks stop drawing.
    live: Arc<AtomicBool>,
}

pub struct MatrixController {
    device: Option<SharedDevice>,
    config: Arc<dyn ConfigStore>,
    power: Arc<dyn PowerSource>,
    audio: Arc<dyn AudioBackend>,
    watcher: Arc<EndpointWatcher>,
    scheduler: Scheduler,
    capture: Option<CaptureSession>,
    wake: WakeLatch,
    lid_closed: bool,
    mode: Mode,
    display_on: bool,
    brightness: u8,
    sequence_frames: Option<usize>,
    status: Arc<Mutex<ControllerStatus>>,
}

impl MatrixController {
    /// `commands` is where the endpoint watcher posts its debounced
    /// [`ControlCommand::RestartAudio`]; normally the worker's own sender.
    pub fn new(
        device: Option<SharedDevice>,
        config: Arc<dyn ConfigStore>,
        power: Arc<dyn PowerSource>,
        audio: Arc<dyn AudioBackend>,
        commands: Sender<ControlCommand>,
    ) -> Self {
        let restart_tx = Mutex::new(commands);
        let watcher = EndpointWatcher::new(move || {
            let tx = restart_tx.lock().unwrap_or_else(PoisonError::into_inner);
            if tx.send(ControlCommand::RestartAudio).is_err() {
                tracing::debug!("Controller gone; dropping capture restart");
            }
        });

        if device.is_none() {
            tracing::warn!("No matrix device; controller is inert");
        }

        let controller = Self {
            device,
            config,
            power,
            audio,
            watcher: Arc::new(watcher),
            scheduler: Scheduler::new(),
            capture: None,
            wake: WakeLatch::default(),
            lid_closed: false,
            mode: Mode::Off,
            display_on: false,
            brightness: 0,
            sequence_frames: None,
            status: Arc::new(Mutex::new(ControllerStatus::new())),
        };
        controller.publish();
        controller
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Interval of the frame timer, if one is running.
    pub fn timer_interval(&self) -> Option<Duration> {
        self.scheduler.interval()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn status(&self) -> Arc<Mutex<ControllerStatus>> {
        Arc::clone(&self.status)
    }

    /// The notification sink registered with the audio backend.
    pub fn endpoint_client(&self) -> Arc<EndpointWatcher> {
        Arc::clone(&self.watcher)
    }

    fn power_context(&self) -> PowerContext {
        PowerContext {
            on_battery: self.power.on_battery(),
            lid_closed: self.lid_closed,
        }
    }

    fn panel(&self, device: &SharedDevice) -> crate::PanelConfig {
        lock_device(device).panel()
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Run one command. Returns `false` once the worker should exit.
    pub fn handle(&mut self, cmd: ControlCommand) -> bool {
        match cmd {
            ControlCommand::Apply { wake } => self.apply_configuration(wake),
            ControlCommand::ShowPicture(path) => {
                let _ = self.set_mode_to_picture(&path);
            }
            ControlCommand::ShowClock => self.set_mode_to_clock(),
            ControlCommand::SetLidClosed(closed) => self.set_lid_closed(closed),
            ControlCommand::LidPolicy { force } => self.set_lid_policy(force),
            ControlCommand::BatteryPolicy => self.set_battery_policy(),
            ControlCommand::RestartAudio => self.restart_audio(),
            ControlCommand::Shutdown => {
                self.shutdown();
                self.publish();
                return false;
            }
        }
        self.publish();
        true
    }

    /// Stop whatever is running, re-evaluate power policy, and enter the
    /// configured mode.
    pub fn apply_configuration(&mut self, wake: bool) {
        let Some(device) = self.device.clone() else {
            tracing::debug!("Apply ignored: no matrix device");
            return;
        };

        let settings = Settings::load(self.config.as_ref());
        self.stop_producers();
        if wake {
            self.wake.arm();
        }

        if let Err(e) = lock_device(&device).acquire_output_provider() {
            tracing::error!("Matrix activation aborted: {}", e);
            return;
        }

        let ctx = self.power_context();
        let active = settings_allow_display(&settings, ctx);
        if !active {
            self.power_off(&device, settings.off_retries);
            return;
        }

        if self.wake.take_if_active(active) {
            if let Err(e) = lock_device(&device).wake() {
                tracing::warn!("Matrix wake failed: {}", e);
            }
        }

        let powered = {
            let mut d = lock_device(&device);
            d.set_display_power(true)
                .and_then(|_| d.set_brightness(settings.brightness))
        };
        if let Err(e) = powered {
            tracing::error!("Matrix activation aborted: {}", e);
            return;
        }
        self.display_on = true;
        self.brightness = settings.brightness;

        match settings.running_mode() {
            RunningMode::Picture => match settings.picture.as_deref() {
                Some(picture) => {
                    let path = PathBuf::from(picture);
                    if let Err(e) = self.enter_picture(&device, &path, &settings) {
                        tracing::error!("Matrix picture failed: {}", e);
                    }
                }
                None => tracing::warn!("Picture mode selected but no picture configured"),
            },
            RunningMode::Clock => self.enter_clock(&device),
            RunningMode::Audio => {
                if let Err(e) = self.enter_audio(&device) {
                    tracing::error!("Matrix audio failed: {}", e);
                }
            }
            RunningMode::BuiltIn(index) => self.enter_builtin(&device, index, &settings),
        }
    }

    /// Decode `path` and show it, making it the configured picture.
    ///
    /// The picture is decoded and rasterized before anything else changes:
    /// on failure the previous mode keeps running and nothing is presented.
    /// While power policy keeps the display off the picture is stored and
    /// the display stays off.
    pub fn set_mode_to_picture(&mut self, path: &Path) -> Result<()> {
        let Some(device) = self.device.clone() else {
            return Err(MatrixError::DeviceUnavailable("no matrix device".into()));
        };

        let settings = Settings::load(self.config.as_ref());
        let rendered = match self.render_picture(&device, path, &settings) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Error loading picture: {}", e);
                return Err(e);
            }
        };

        self.config
            .set_string(config::KEY_PICTURE, &path.to_string_lossy());
        self.config.set_int(config::KEY_RUNNING, config::RUNNING_PICTURE);

        // A dark display only records the choice; the next apply that
        // turns it on shows the picture.
        if !settings_allow_display(&settings, self.power_context()) {
            tracing::info!("Matrix off; {} stored for later", path.display());
            self.apply_configuration(false);
            return Ok(());
        }

        self.stop_producers();
        self.show_rendered(&device, path, rendered);
        Ok(())
    }

    /// Make the clock the configured mode and re-apply.
    pub fn set_mode_to_clock(&mut self) {
        if self.device.is_none() {
            return;
        }
        self.config.set_int(config::KEY_RUNNING, config::RUNNING_CLOCK);
        self.apply_configuration(false);
    }

    /// Record the lid state the next policy evaluation will see.
    pub fn set_lid_closed(&mut self, closed: bool) {
        self.lid_closed = closed;
    }

    /// Lid event: re-apply (arming a wake) when lid awareness is enabled,
    /// or unconditionally with `force`.
    pub fn set_lid_policy(&mut self, force: bool) {
        if self.config.get_bool(config::KEY_LID) || force {
            tracing::info!("Matrix lid closed: {}", self.lid_closed);
            self.apply_configuration(true);
        }
    }

    /// Power source event.
    pub fn set_battery_policy(&mut self) {
        self.apply_configuration(false);
    }

    /// Restart capture against the current default endpoint, if a capture
    /// session is still live.
    pub fn restart_audio(&mut self) {
        let Some(device) = self.device.clone() else {
            return;
        };
        if self.mode != Mode::AudioReactive || !self.is_capturing() {
            tracing::debug!("Capture restart ignored: mode is {}", self.mode);
            return;
        }
        self.stop_audio();
        if let Err(e) = self.enter_audio(&device) {
            self.mode = Mode::Idle;
            tracing::error!("Matrix audio restart failed: {}", e);
        }
    }

    /// Same teardown as a mode switch. Always completes.
    pub fn shutdown(&mut self) {
        self.stop_producers();
        tracing::info!("Matrix controller shut down");
    }

    // ── Producers ────────────────────────────────────────────────────

    fn stop_producers(&mut self) {
        self.scheduler.stop();
        self.stop_audio();
        self.sequence_frames = None;
        if self.mode != Mode::Off {
            self.mode = Mode::Idle;
        }
    }

    fn power_off(&mut self, device: &SharedDevice, retries: u8) {
        {
            let mut d = lock_device(device);
            // Some panels drop the first power-down.
            for _ in 0..retries.max(2) {
                if let Err(e) = d.set_display_power(false) {
                    tracing::warn!("Matrix power-off failed: {}", e);
                }
            }
        }
        self.display_on = false;
        self.mode = Mode::Off;
        tracing::info!("Matrix off");
    }

    fn enter_builtin(&mut self, device: &SharedDevice, index: u8, settings: &Settings) {
        let animation = BuiltInAnimation::with_defaults(index);
        if let Err(e) = lock_device(device).set_builtin_animation(Some(animation)) {
            tracing::error!("Matrix builtin failed: {}", e);
            return;
        }

        let dev = Arc::clone(device);
        self.scheduler.start(settings.builtin_interval(), move || {
            if let Err(e) = lock_device(&dev).advance_builtin_or_clock_frame() {
                tracing::debug!("Builtin tick failed: {}", e);
            }
        });
        self.mode = Mode::BuiltIn(index);
        tracing::info!("Matrix builtin: {}", animation.as_byte());
    }

    fn enter_clock(&mut self, device: &SharedDevice) {
        if let Err(e) = lock_device(device).set_builtin_animation(None) {
            tracing::error!("Matrix clock failed: {}", e);
            return;
        }

        let dev = Arc::clone(device);
        self.scheduler.start(CLOCK_INTERVAL, move || {
            if let Err(e) = lock_device(&dev).advance_builtin_or_clock_frame() {
                tracing::debug!("Clock tick failed: {}", e);
            }
        });
        self.mode = Mode::Clock;
        tracing::info!("Matrix clock");
    }

    fn render_picture(
        &self,
        device: &SharedDevice,
        path: &Path,
        settings: &Settings,
    ) -> Result<Rendered> {
        let decoded = raster::decode(path)?;
        let params = RasterParams::from_settings(settings);
        raster::render(&decoded, self.panel(device), &params, settings.speed)
            .ok_or_else(|| MatrixError::decode(path, "no frames"))
    }

    fn enter_picture(&mut self, device: &SharedDevice, path: &Path, settings: &Settings) -> Result<()> {
        let rendered = self.render_picture(device, path, settings)?;
        self.show_rendered(device, path, rendered);
        Ok(())
    }

    fn show_rendered(&mut self, device: &SharedDevice, path: &Path, rendered: Rendered) {
        if let Err(e) = lock_device(device).set_builtin_animation(None) {
            tracing::warn!("Could not stop builtin animation: {}", e);
        }

        match rendered {
            Rendered::Still(frame) => {
                if let Err(e) = lock_device(device).draw_frame(&frame) {
                    tracing::error!("Presenting {} failed: {}", path.display(), e);
                    return;
                }
                self.mode = Mode::StaticImage(path.to_path_buf());
                tracing::info!("Matrix {}", path.display());
            }
            Rendered::Animated(mut sequence) => {
                {
                    let mut d = lock_device(device);
                    d.begin_animated_sequence();
                    for frame in sequence.frames() {
                        d.add_frame(frame);
                    }
                    d.end_animated_sequence();
                }

                let interval = sequence.interval();
                self.sequence_frames = Some(sequence.len());
                tracing::info!(
                    "Matrix {} ({} frames, {}ms)",
                    path.display(),
                    sequence.len(),
                    interval.as_millis()
                );

                let dev = Arc::clone(device);
                self.scheduler.start(interval, move || {
                    let frame = sequence.advance();
                    if let Err(e) = lock_device(&dev).draw_frame(frame) {
                        tracing::debug!("Animation tick failed: {}", e);
                    }
                });
                self.mode = Mode::AnimatedImage(path.to_path_buf());
            }
        }
    }

    fn enter_audio(&mut self, device: &SharedDevice) -> Result<()> {
        if let Err(e) = lock_device(device).set_builtin_animation(None) {
            tracing::warn!("Could not stop builtin animation: {}", e);
        }
        self.scheduler.stop();
        self.stop_audio();

        let endpoint = self.audio.default_endpoint()?;
        if endpoint.format.encoding == SampleEncoding::Unsupported {
            return Err(MatrixError::AudioEndpoint(format!(
                "unsupported sample format on {}",
                endpoint.id
            )));
        }

        let client: Arc<dyn EndpointNotificationClient> = self.watcher.clone();
        let registration = match self.audio.watch_endpoints(client) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!("Endpoint notifications unavailable: {}", e);
                None
            }
        };

        let live = Arc::new(AtomicBool::new(true));
        let mut visualizer = AudioVisualizer::new(endpoint.format, self.panel(device));
        let dev = Arc::clone(device);
        let flag = Arc::clone(&live);
        let callback = Box::new(move |bytes: &[u8]| {
            if !flag.load(Ordering::SeqCst) {
                return;
            }
            if let Some(frame) = visualizer.process(bytes, Instant::now()) {
                let mut d = lock_device(&dev);
                if flag.load(Ordering::SeqCst) {
                    if let Err(e) = d.draw_frame(frame) {
                        tracing::debug!("Audio frame dropped: {}", e);
                    }
                }
            }
        });

        let stream = self.audio.start_capture(&endpoint, callback)?;

        self.watcher.set_current(Some(endpoint.id.clone()));
        self.watcher.set_audio_active(true);
        self.capture = Some(CaptureSession {
            stream,
            registration,
            live,
        });
        self.mode = Mode::AudioReactive;
        tracing::info!(
            "Matrix audio: {} ({} Hz, {} ch)",
            endpoint.id,
            endpoint.format.sample_rate,
            endpoint.format.channels
        );
        Ok(())
    }

    /// Best-effort capture teardown; safe when nothing is capturing.
    fn stop_audio(&mut self) {
        self.watcher.set_audio_active(false);
        if let Some(session) = self.capture.take() {
            let CaptureSession {
                stream,
                registration,
                live,
            } = session;
            live.store(false, Ordering::SeqCst);
            if let Err(e) = stream.stop() {
                tracing::warn!("{}", e);
            }
            drop(registration);
            tracing::debug!("Capture stopped");
        }
        self.watcher.set_current(None);
    }

    fn publish(&self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.mode = self.mode.to_string();
        status.device_present = self.device.is_some();
        status.display_on = self.display_on;
        status.brightness = self.brightness;
        status.interval_ms = self.scheduler.interval().map(|d| d.as_millis() as u64);
        status.sequence_frames = self.sequence_frames;
        status.audio_endpoint = self.watcher.current();
        status.lid_closed = self.lid_closed;
    }
}

impl Drop for MatrixController {
    fn drop(&mut self) {
        self.stop_producers();
    }
}

// ── Worker loop ──────────────────────────────────────────────────────

/// Worker loop: owns the controller and runs commands until
/// [`ControlCommand::Shutdown`] or until every sender is gone.
pub fn control_loop(rx: Receiver<ControlCommand>, mut controller: MatrixController) {
    tracing::info!("Matrix worker started, waiting for commands...");

    loop {
        let cmd = match rx.recv() {
            Ok(cmd) => cmd,
            Err(_) => {
                tracing::info!("Matrix worker: channel closed, shutting down.");
                controller.shutdown();
                break;
            }
        };

        tracing::debug!("Matrix command: {:?}", cmd);
        if !controller.handle(cmd) {
            break;
        }
    }
}
