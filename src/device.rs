//! The capability surface a physical matrix panel exposes to the engine.
//!
//! The transport that actually pushes bytes to a panel lives behind
//! [`MatrixDevice`]. The engine only ever talks to this trait, so the same
//! controller drives the Raspberry Pi adapter (`hardware` feature) or the
//! in-memory [`SimulatedDevice`] used by tests and `--simulate`.

use crate::error::Result;
use crate::frame::FrameBuffer;
use crate::PanelConfig;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A device shared between the controller, the frame timer and the capture
/// callback. Writers are serialized by the controller's stop-before-start
/// discipline; the mutex only guards individual calls.
pub type SharedDevice = Arc<Mutex<dyn MatrixDevice>>;

/// Lock a shared device, recovering the guard if a producer panicked.
pub fn lock_device(device: &SharedDevice) -> MutexGuard<'_, dyn MatrixDevice + 'static> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

pub trait MatrixDevice: Send {
    fn panel(&self) -> PanelConfig;

    /// Handshake with the output provider before a mode is entered.
    fn acquire_output_provider(&mut self) -> Result<()>;

    fn set_display_power(&mut self, on: bool) -> Result<()>;

    fn set_brightness(&mut self, level: u8) -> Result<()>;

    fn set_pixel(&mut self, x: i32, y: i32, intensity: u8);

    fn clear_frame(&mut self);

    /// Commit the pixels written since the last clear.
    fn present_frame(&mut self) -> Result<()>;

    /// Hand playback to the device's own animation, or take it back (`None`).
    fn set_builtin_animation(&mut self, animation: Option<BuiltInAnimation>) -> Result<()>;

    /// Step the device-side built-in animation or clock face by one frame.
    fn advance_builtin_or_clock_frame(&mut self) -> Result<()>;

    fn wake(&mut self) -> Result<()>;

    // Devices with on-board frame storage get a copy of each animated
    // sequence; everyone else can ignore these.
    fn begin_animated_sequence(&mut self) {}

    fn add_frame(&mut self, _frame: &FrameBuffer) {}

    fn end_animated_sequence(&mut self) {}

    /// Clear, write every LED of `frame`, present.
    fn draw_frame(&mut self, frame: &FrameBuffer) -> Result<()> {
        self.clear_frame();
        for (x, y, v) in frame.lit() {
            self.set_pixel(x, y, v);
        }
        self.present_frame()
    }
}

// ── Built-in animations ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepStyle {
    BannerSwipe = 0,
    Starfield = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownStyle {
    GlitchOut = 0,
    SeeYa = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupStyle {
    GlitchConstruction = 0,
    StaticEmergence = 1,
}

/// A factory animation selected by index, with its sleep/shutdown/startup
/// companions. Panels take the whole selection as one byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltInAnimation {
    pub running: u8,
    pub sleeping: SleepStyle,
    pub shutdown: ShutdownStyle,
    pub startup: StartupStyle,
}

impl BuiltInAnimation {
    /// The selection the controller uses for every running index.
    pub fn with_defaults(running: u8) -> Self {
        Self {
            running,
            sleeping: SleepStyle::Starfield,
            shutdown: ShutdownStyle::SeeYa,
            startup: StartupStyle::StaticEmergence,
        }
    }

    /// Bits 0-2 running, 3-4 sleeping, 5 shutdown, 6-7 startup.
    pub fn as_byte(&self) -> u8 {
        (self.running & 0x07)
            | ((self.sleeping as u8 & 0x03) << 3)
            | ((self.shutdown as u8 & 0x01) << 5)
            | ((self.startup as u8 & 0x03) << 6)
    }
}

// ── Simulated device ───────────────────────────────────────────────

/// One call observed by a [`SimulatedDevice`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceOp {
    AcquireProvider,
    DisplayPower(bool),
    Brightness(u8),
    Present,
    BuiltIn(Option<u8>),
    Advance,
    Wake,
    SequenceFrames(usize),
}

/// In-memory panel. Records every call so behaviour can be asserted
/// without hardware, and keeps the last presented frame.
pub struct SimulatedDevice {
    panel: PanelConfig,
    scratch: FrameBuffer,
    presented: Option<FrameBuffer>,
    ops: Vec<DeviceOp>,
    pending_sequence: usize,
    provider_fails: bool,
}

impl SimulatedDevice {
    pub fn new(panel: PanelConfig) -> Self {
        Self {
            panel,
            scratch: FrameBuffer::new(panel),
            presented: None,
            ops: Vec::new(),
            pending_sequence: 0,
            provider_fails: false,
        }
    }

    /// Make every provider handshake fail from now on.
    pub fn fail_provider(&mut self, fail: bool) {
        self.provider_fails = fail;
    }

    pub fn ops(&self) -> &[DeviceOp] {
        &self.ops
    }

    pub fn count(&self, op: &DeviceOp) -> usize {
        self.ops.iter().filter(|o| *o == op).count()
    }

    pub fn presented(&self) -> Option<&FrameBuffer> {
        self.presented.as_ref()
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl MatrixDevice for SimulatedDevice {
    fn panel(&self) -> PanelConfig {
        self.panel
    }

    fn acquire_output_provider(&mut self) -> Result<()> {
        self.ops.push(DeviceOp::AcquireProvider);
        if self.provider_fails {
            return Err(crate::MatrixError::ProviderAcquisition(
                "simulated handshake failure".into(),
            ));
        }
        Ok(())
    }

    fn set_display_power(&mut self, on: bool) -> Result<()> {
        self.ops.push(DeviceOp::DisplayPower(on));
        Ok(())
    }

    fn set_brightness(&mut self, level: u8) -> Result<()> {
        self.ops.push(DeviceOp::Brightness(level));
        Ok(())
    }

    fn set_pixel(&mut self, x: i32, y: i32, intensity: u8) {
        self.scratch.set(x, y, intensity);
    }

    fn clear_frame(&mut self) {
        self.scratch.clear();
    }

    fn present_frame(&mut self) -> Result<()> {
        self.ops.push(DeviceOp::Present);
        self.presented = Some(self.scratch.clone());
        Ok(())
    }

    fn set_builtin_animation(&mut self, animation: Option<BuiltInAnimation>) -> Result<()> {
        self.ops.push(DeviceOp::BuiltIn(animation.map(|a| a.as_byte())));
        Ok(())
    }

    fn advance_builtin_or_clock_frame(&mut self) -> Result<()> {
        self.ops.push(DeviceOp::Advance);
        Ok(())
    }

    fn wake(&mut self) -> Result<()> {
        self.ops.push(DeviceOp::Wake);
        Ok(())
    }

    fn begin_animated_sequence(&mut self) {
        self.pending_sequence = 0;
    }

    fn add_frame(&mut self, _frame: &FrameBuffer) {
        self.pending_sequence += 1;
    }

    fn end_animated_sequence(&mut self) {
        self.ops.push(DeviceOp::SequenceFrames(self.pending_sequence));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0b0110_1000)]
    #[case(1, 0b0110_1001)]
    #[case(5, 0b0110_1101)]
    #[case(9, 0b0110_1001)] // running is masked to three bits
    fn builtin_byte_packing(#[case] running: u8, #[case] expected: u8) {
        assert_eq!(BuiltInAnimation::with_defaults(running).as_byte(), expected);
    }

    #[test]
    fn draw_frame_presents_exact_pixels() {
        let panel = PanelConfig::new(3, 3);
        let mut device = SimulatedDevice::new(panel);
        let mut frame = FrameBuffer::new(panel);
        frame.set(1, 2, 200);

        device.set_pixel(0, 0, 9);
        device.draw_frame(&frame).unwrap();

        assert_eq!(device.presented(), Some(&frame));
        assert_eq!(device.ops(), &[DeviceOp::Present]);
    }

    #[test]
    fn provider_failure_is_reported() {
        let mut device = SimulatedDevice::new(PanelConfig::default());
        device.fail_provider(true);
        assert!(matches!(
            device.acquire_output_provider(),
            Err(crate::MatrixError::ProviderAcquisition(_))
        ));
    }

    #[test]
    fn shared_device_coerces_and_locks() {
        let sim = Arc::new(Mutex::new(SimulatedDevice::new(PanelConfig::default())));
        let shared: SharedDevice = sim.clone();
        lock_device(&shared).wake().unwrap();
        assert_eq!(sim.lock().unwrap().count(&DeviceOp::Wake), 1);
    }
}
