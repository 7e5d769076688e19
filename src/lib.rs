//! Control and rendering engine for an addressable LED matrix panel.
//!
//! The engine owns the panel's frame buffer, the timer that paces
//! per-mode frame updates, and the loopback-audio pipeline that turns
//! whatever the machine is playing into a bar-graph spectrum.
//!
//! Modes are built-in animations, static or animated pictures, a clock,
//! and the audio visualization. Which one runs (and whether the display
//! is lit at all) is decided by [`controller::MatrixController`] from the
//! persisted settings plus the current power and lid state.
//!
//! ## Layout
//! - [`device`]: the capability surface a physical panel exposes
//! - [`frame`]: intensity frame buffers and animated sequences
//! - [`raster`]: image → frame rasterization
//! - [`audio`]: capture, spectrum, bars, endpoint watching
//! - [`power`]: battery/lid gating
//! - [`scheduler`]: the single repeating frame timer
//! - [`controller`]: the mode state machine and its worker loop
//! - [`server`]: HTTP surface for the settings layer

pub mod audio;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod frame;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod power;
pub mod raster;
pub mod scheduler;
pub mod server;

pub use error::MatrixError;

// ── Panel configuration ────────────────────────────────────────────

/// Dimensions of the LED panel, in LEDs.
///
/// Passed explicitly through the system instead of living in a global, so
/// every producer (rasterizer, bar renderer, device adapter) agrees on the
/// same bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanelConfig {
    pub rows: u32,
    pub cols: u32,
}

impl PanelConfig {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    /// Total number of LEDs on the panel.
    pub fn pixel_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Whether a signed coordinate lands on the panel.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.cols && (y as u32) < self.rows
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self { rows: 64, cols: 64 }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn panel_config_default_is_64x64() {
        let panel = PanelConfig::default();
        assert_eq!(panel.rows, 64);
        assert_eq!(panel.cols, 64);
    }

    #[rstest]
    #[case(64, 64, 4096)]
    #[case(32, 32, 1024)]
    #[case(41, 42, 1722)]
    #[case(65_536, 65_536, 4_294_967_296)]
    fn test_pixel_count(#[case] rows: u32, #[case] cols: u32, #[case] expected: usize) {
        assert_eq!(PanelConfig::new(rows, cols).pixel_count(), expected);
    }

    #[rstest]
    #[case(0, 0, true)]
    #[case(41, 40, true)]
    #[case(42, 0, false)]
    #[case(0, 41, false)]
    #[case(-1, 5, false)]
    #[case(5, -1, false)]
    fn test_contains(#[case] x: i32, #[case] y: i32, #[case] expected: bool) {
        assert_eq!(PanelConfig::new(41, 42).contains(x, y), expected);
    }
}
