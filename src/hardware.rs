//! Raspberry Pi panel adapter (feature `hardware`).
//!
//! The `rpi-led-matrix` C library is not thread-safe, so the matrix lives on
//! one dedicated render thread. [`RpiMatrixDevice`] is the `Send` handle the
//! controller talks to: it stages pixels in a local [`FrameBuffer`] and
//! forwards everything else to the render thread as panel commands.

use crate::PanelConfig;
use crate::device::{BuiltInAnimation, MatrixDevice};
use crate::error::{MatrixError, Result};
use crate::frame::FrameBuffer;
use rpi_led_matrix::{LedCanvas, LedFont, LedMatrix, LedMatrixOptions, LedRuntimeOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Highest brightness level the settings layer uses.
pub const MAX_BRIGHTNESS_LEVEL: u8 = 3;

// ── Color ──────────────────────────────────────────────────────────

/// Our own color type, decoupled from the hardware crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Monochrome panels get their intensity on all three channels.
    pub fn grey(intensity: u8) -> Self {
        Self::new(intensity, intensity, intensity)
    }

    /// Fully saturated color for a hue in degrees.
    pub fn from_hue(hue: u16) -> Self {
        let hue = hue % 360;
        let sector = hue / 60;
        let fraction = ((hue % 60) as f32) / 60.0;
        let rising = (fraction * 255.0) as u8;
        let falling = ((1.0 - fraction) * 255.0) as u8;

        match sector {
            0 => Self::new(255, rising, 0),
            1 => Self::new(falling, 255, 0),
            2 => Self::new(0, 255, rising),
            3 => Self::new(0, falling, 255),
            4 => Self::new(rising, 0, 255),
            _ => Self::new(255, 0, falling),
        }
    }

    /// Scale by a 0-100 percentage.
    pub fn apply_brightness(self, percent: u8) -> Self {
        if percent >= 100 {
            return self;
        }
        Self {
            r: ((self.r as u16 * percent as u16) / 100) as u8,
            g: ((self.g as u16 * percent as u16) / 100) as u8,
            b: ((self.b as u16 * percent as u16) / 100) as u8,
        }
    }
}

impl From<Color> for rpi_led_matrix::LedColor {
    fn from(c: Color) -> Self {
        rpi_led_matrix::LedColor {
            red: c.r,
            green: c.g,
            blue: c.b,
        }
    }
}

/// Settings brightness level (0-3) → panel percentage.
pub fn brightness_percent(level: u8) -> u8 {
    (level.min(MAX_BRIGHTNESS_LEVEL) as u16 * 100 / MAX_BRIGHTNESS_LEVEL as u16) as u8
}

/// Hue of LED `(x, y)` in a diagonal sweep for built-in animation
/// `running`, shifted by `phase` degrees.
fn sweep_hue(x: u32, y: u32, running: u8, phase: u16) -> u16 {
    let pitch = 4 + running as u32 * 3;
    (((x + y) * 360 / (pitch * 8) + phase as u32) % 360) as u16
}

// ── Matrix initialization ──────────────────────────────────────────

/// Create a matrix configured for a Pi Zero 2 W + Adafruit Bonnet.
pub fn create_matrix(panel: PanelConfig) -> std::result::Result<LedMatrix, Box<dyn std::error::Error>> {
    let mut options = LedMatrixOptions::new();
    options.set_rows(panel.rows);
    options.set_cols(panel.cols);
    options.set_hardware_mapping("adafruit-hat");
    options.set_pwm_bits(8)?;
    options.set_pwm_lsb_nanoseconds(130);

    let mut rt_options = LedRuntimeOptions::new();
    rt_options.set_gpio_slowdown(2); // Pi Zero 2 W requires slowdown=2

    let matrix = LedMatrix::new(Some(options), Some(rt_options))?;
    Ok(matrix)
}

// ── Render thread ──────────────────────────────────────────────────

/// Work for the render thread.
enum PanelCommand {
    Present(FrameBuffer),
    Power(bool),
    Brightness(u8),
    BuiltIn(Option<BuiltInAnimation>),
    Advance,
    Wake,
}

struct PanelState {
    matrix: LedMatrix,
    /// Offscreen canvas; only `None` while a swap is in flight.
    canvas: Option<LedCanvas>,
    panel: PanelConfig,
    font: Option<LedFont>,
    on: bool,
    brightness: u8,
    builtin: Option<BuiltInAnimation>,
    phase: u16,
    last: Option<FrameBuffer>,
}

impl PanelState {
    fn swap(&mut self, draw: impl FnOnce(&mut LedCanvas, &PanelConfig, u8)) {
        let mut canvas = self
            .canvas
            .take()
            .unwrap_or_else(|| self.matrix.offscreen_canvas());
        canvas.clear();
        if self.on {
            draw(&mut canvas, &self.panel, self.brightness);
        }
        self.canvas = Some(self.matrix.swap(canvas));
    }

    fn draw_last(&mut self) {
        let Some(frame) = self.last.take() else {
            self.swap(|_, _, _| {});
            return;
        };
        self.swap(|canvas, _, brightness| {
            for (x, y, v) in frame.lit() {
                canvas.set(x, y, &Color::grey(v).apply_brightness(brightness).into());
            }
        });
        self.last = Some(frame);
    }

    /// Hue sweep; the animation number picks the stripe pitch.
    fn draw_builtin(&mut self, animation: BuiltInAnimation) {
        let phase = self.phase;
        self.swap(|canvas, panel, brightness| {
            for y in 0..panel.rows as i32 {
                for x in 0..panel.cols as i32 {
                    let hue = sweep_hue(x as u32, y as u32, animation.running, phase);
                    canvas.set(x, y, &Color::from_hue(hue).apply_brightness(brightness).into());
                }
            }
        });
        self.phase = (self.phase + 6) % 360;
    }

    fn draw_clock(&mut self) {
        let Some(font) = self.font.take() else {
            return;
        };
        let now = chrono::Local::now();
        let text = now.format("%H:%M").to_string();
        let y = self.panel.rows as i32 / 2 + 4;
        self.swap(|canvas, _, brightness| {
            let white = Color::grey(255).apply_brightness(brightness);
            canvas.draw_text(&font, &text, 2, y, &white.into(), 0, false);
        });
        self.font = Some(font);
    }

    fn advance(&mut self) {
        match self.builtin {
            Some(animation) => self.draw_builtin(animation),
            None => self.draw_clock(),
        }
    }
}

fn load_font(fonts_dir: &Path) -> Option<LedFont> {
    let path = fonts_dir.join("6x10.bdf");
    match LedFont::new(&path) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!("Failed to load font {}: {}", path.display(), e);
            None
        }
    }
}

fn render_loop(rx: Receiver<PanelCommand>, mut state: PanelState) {
    tracing::info!("Render thread started, waiting for commands...");

    for cmd in rx {
        match cmd {
            PanelCommand::Present(frame) => {
                state.last = Some(frame);
                state.draw_last();
            }
            PanelCommand::Power(on) => {
                state.on = on;
                state.draw_last();
            }
            PanelCommand::Brightness(level) => {
                state.brightness = brightness_percent(level);
                state.draw_last();
            }
            PanelCommand::BuiltIn(animation) => {
                state.builtin = animation;
                state.phase = 0;
            }
            PanelCommand::Advance => state.advance(),
            PanelCommand::Wake => {
                state.on = true;
                state.draw_last();
            }
        }
    }

    tracing::info!("Render thread: channel closed, shutting down.");
}

// ── Device handle ──────────────────────────────────────────────────

pub struct RpiMatrixDevice {
    panel: PanelConfig,
    scratch: FrameBuffer,
    tx: Option<Sender<PanelCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl RpiMatrixDevice {
    /// Bring up the matrix on its own thread. Fails with
    /// [`MatrixError::DeviceUnavailable`] when the panel can't be driven
    /// (not root, no GPIO).
    pub fn open(panel: PanelConfig, fonts_dir: PathBuf) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let handle = thread::Builder::new()
            .name("matrix-render".into())
            .spawn(move || {
                let matrix = match create_matrix(panel) {
                    Ok(m) => m,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let canvas = matrix.offscreen_canvas();
                let state = PanelState {
                    matrix,
                    canvas: Some(canvas),
                    panel,
                    font: load_font(&fonts_dir),
                    on: false,
                    brightness: 100,
                    builtin: None,
                    phase: 0,
                    last: None,
                };
                let _ = ready_tx.send(Ok(()));
                render_loop(rx, state);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                panel,
                scratch: FrameBuffer::new(panel),
                tx: Some(tx),
                handle: Some(handle),
            }),
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(MatrixError::DeviceUnavailable(reason))
            }
            Err(_) => {
                let _ = handle.join();
                Err(MatrixError::DeviceUnavailable("render thread exited".into()))
            }
        }
    }

    fn send(&self, cmd: PanelCommand) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or_else(|| MatrixError::DeviceUnavailable("render thread stopped".into()))?
            .send(cmd)
            .map_err(|_| MatrixError::DeviceUnavailable("render thread stopped".into()))
    }
}

impl MatrixDevice for RpiMatrixDevice {
    fn panel(&self) -> PanelConfig {
        self.panel
    }

    fn acquire_output_provider(&mut self) -> Result<()> {
        if self.handle.as_ref().is_some_and(|h| h.is_finished()) {
            return Err(MatrixError::ProviderAcquisition(
                "render thread is gone".into(),
            ));
        }
        Ok(())
    }

    fn set_display_power(&mut self, on: bool) -> Result<()> {
        self.send(PanelCommand::Power(on))
    }

    fn set_brightness(&mut self, level: u8) -> Result<()> {
        self.send(PanelCommand::Brightness(level))
    }

    fn set_pixel(&mut self, x: i32, y: i32, intensity: u8) {
        self.scratch.set(x, y, intensity);
    }

    fn clear_frame(&mut self) {
        self.scratch.clear();
    }

    fn present_frame(&mut self) -> Result<()> {
        self.send(PanelCommand::Present(self.scratch.clone()))
    }

    fn set_builtin_animation(&mut self, animation: Option<BuiltInAnimation>) -> Result<()> {
        self.send(PanelCommand::BuiltIn(animation))
    }

    fn advance_builtin_or_clock_frame(&mut self) -> Result<()> {
        self.send(PanelCommand::Advance)
    }

    fn wake(&mut self) -> Result<()> {
        self.send(PanelCommand::Wake)
    }
}

impl Drop for RpiMatrixDevice {
    fn drop(&mut self) {
        // Closing the channel ends the render loop.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 33)]
    #[case(2, 66)]
    #[case(3, 100)]
    #[case(9, 100)]
    fn test_brightness_percent(#[case] level: u8, #[case] expected: u8) {
        assert_eq!(brightness_percent(level), expected);
    }

    #[rstest]
    #[case(0, Color::new(255, 0, 0))]
    #[case(120, Color::new(0, 255, 0))]
    #[case(240, Color::new(0, 0, 255))]
    #[case(360, Color::new(255, 0, 0))]
    fn test_from_hue(#[case] hue: u16, #[case] expected: Color) {
        assert_eq!(Color::from_hue(hue), expected);
    }

    #[rstest]
    #[case(0, 0, 0, 0, 0)]
    #[case(4, 0, 0, 0, 45)]
    #[case(0, 0, 0, 300, 300)]
    #[case(127, 127, 0, 0, 337)]
    #[case(255, 255, 0, 359, 336)]
    fn test_sweep_hue(
        #[case] x: u32,
        #[case] y: u32,
        #[case] running: u8,
        #[case] phase: u16,
        #[case] expected: u16,
    ) {
        assert_eq!(sweep_hue(x, y, running, phase), expected);
    }

    #[test]
    fn grey_scales_with_brightness() {
        assert_eq!(Color::grey(200).apply_brightness(50), Color::grey(100));
        assert_eq!(Color::grey(200).apply_brightness(100), Color::grey(200));
    }
}
