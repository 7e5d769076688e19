//! Spectrum → bar heights → pixels.

use crate::frame::FrameBuffer;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One bar per LED column pair.
pub const BAR_COUNT: usize = 20;

/// Observations kept by the [`SmoothingWindow`].
pub const SMOOTHING_LEN: usize = 20;

/// Floor for both the per-frame maximum and the rolling average, so silence
/// never divides by zero.
pub const MIN_AVERAGE: f64 = 2.0;

/// Minimum gap between two presented audio frames.
pub const PRESENT_GAP: Duration = Duration::from_millis(70);

/// Row the bars grow away from.
pub const CENTER_ROW: i32 = 20;

/// Bar heights for one frame and the largest of them (floored at
/// [`MIN_AVERAGE`]).
#[derive(Clone, Debug, PartialEq)]
pub struct BarFrame {
    pub heights: [f64; BAR_COUNT],
    pub peak: f64,
}

/// `sqrt(magnitude * 10000)` over the first [`BAR_COUNT`] bins. Bins the
/// transform did not produce count as silent.
pub fn bar_heights(magnitudes: &[f64]) -> BarFrame {
    let mut heights = [0.0; BAR_COUNT];
    let mut peak = MIN_AVERAGE;
    for (i, h) in heights.iter_mut().enumerate() {
        let magnitude = magnitudes.get(i).copied().unwrap_or(0.0).max(0.0);
        *h = (magnitude * 10_000.0).sqrt();
        if *h > peak {
            peak = *h;
        }
    }
    BarFrame { heights, peak }
}

/// Rolling window of the last [`SMOOTHING_LEN`] frame peaks, oldest
/// evicted first.
#[derive(Debug, Default)]
pub struct SmoothingWindow {
    peaks: VecDeque<f64>,
}

impl SmoothingWindow {
    pub fn new() -> Self {
        Self {
            peaks: VecDeque::with_capacity(SMOOTHING_LEN + 1),
        }
    }

    /// Record a frame peak and return the new rolling average.
    pub fn push(&mut self, peak: f64) -> f64 {
        self.peaks.push_back(peak);
        while self.peaks.len() > SMOOTHING_LEN {
            self.peaks.pop_front();
        }
        self.average()
    }

    /// Mean of the window, never below [`MIN_AVERAGE`].
    pub fn average(&self) -> f64 {
        if self.peaks.is_empty() {
            return MIN_AVERAGE;
        }
        let mean = self.peaks.iter().sum::<f64>() / self.peaks.len() as f64;
        if mean.is_finite() { mean.max(MIN_AVERAGE) } else { MIN_AVERAGE }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn oldest(&self) -> Option<f64> {
        self.peaks.front().copied()
    }
}

/// Drops frames that arrive less than [`PRESENT_GAP`] after the last
/// presented one, so the device transport is never flooded.
#[derive(Debug)]
pub struct PresentLimiter {
    gap: Duration,
    last: Option<Instant>,
}

impl Default for PresentLimiter {
    fn default() -> Self {
        Self::new(PRESENT_GAP)
    }
}

impl PresentLimiter {
    pub fn new(gap: Duration) -> Self {
        Self { gap, last: None }
    }

    /// Whether a frame may be presented at `now`; records it if so.
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.gap {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

/// Draw one bar of height `h` at column pair `pos`.
///
/// The bar is mirrored around [`CENTER_ROW`]: rows above the centre at full
/// brightness, rows below graded by the bar height. Odd rows are one LED
/// wide, even rows two.
fn draw_bar(frame: &mut FrameBuffer, pos: i32, h: f64) {
    let dx = pos * 2;
    let rows = h - h.rem_euclid(2.0);
    let graded = (h * 255.0 / 30.0).clamp(0.0, 255.0) as u8;
    let limit = frame.panel().rows as i32;

    let mut y = 0;
    while (y as f64) < rows && y < limit {
        for x in 0..(2 - y % 2) {
            frame.set(x + dx, CENTER_ROW + y, graded);
            frame.set(x + dx, CENTER_ROW - y, 255);
        }
        y += 1;
    }
}

/// Clear `frame` and draw all bars, each normalized against the rolling
/// average (`bar * 20 / average`).
pub fn render_bars(frame: &mut FrameBuffer, bars: &BarFrame, average: f64) {
    frame.clear();
    let average = average.max(MIN_AVERAGE);
    for (i, bar) in bars.heights.iter().enumerate() {
        draw_bar(frame, (BAR_COUNT - i) as i32, bar * 20.0 / average);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PanelConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn silent_spectrum_gives_zero_bars_and_floor_peak() {
        let frame = bar_heights(&[0.0; 33]);
        assert_eq!(frame.heights, [0.0; BAR_COUNT]);
        assert_eq!(frame.peak, MIN_AVERAGE);
    }

    #[test]
    fn heights_use_square_root_compression() {
        let mut mags = vec![0.0; 33];
        mags[0] = 0.04;
        mags[3] = 1.0;
        let frame = bar_heights(&mags);
        assert!((frame.heights[0] - 20.0).abs() < 1e-9);
        assert!((frame.heights[3] - 100.0).abs() < 1e-9);
        assert!((frame.peak - 100.0).abs() < 1e-9);
    }

    #[test]
    fn missing_bins_are_silent() {
        let frame = bar_heights(&[1.0; 5]);
        assert!(frame.heights[5..].iter().all(|h| *h == 0.0));
        assert!((frame.heights[4] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn smoothing_window_is_bounded_fifo() {
        let mut window = SmoothingWindow::new();
        for i in 0..25 {
            window.push(i as f64 + 10.0);
            assert!(window.len() <= SMOOTHING_LEN);
        }
        assert_eq!(window.len(), SMOOTHING_LEN);
        assert_eq!(window.oldest(), Some(15.0));
        // mean of 15..=34
        assert!((window.average() - 24.5).abs() < 1e-9);
    }

    #[test]
    fn rolling_average_never_below_floor() {
        let mut window = SmoothingWindow::new();
        assert_eq!(window.average(), MIN_AVERAGE);
        assert_eq!(window.push(0.0), MIN_AVERAGE);
        assert_eq!(window.push(1.0), MIN_AVERAGE);
        assert_eq!(window.push(f64::NAN), MIN_AVERAGE);
    }

    #[test]
    fn limiter_suppresses_frames_inside_gap() {
        let mut limiter = PresentLimiter::default();
        let t0 = Instant::now();
        assert!(limiter.admit(t0));
        assert!(!limiter.admit(t0 + Duration::from_millis(69)));
        assert!(limiter.admit(t0 + Duration::from_millis(70)));
        assert!(!limiter.admit(t0 + Duration::from_millis(100)));
        assert!(limiter.admit(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn silence_renders_blank_frame() {
        let mut frame = FrameBuffer::new(PanelConfig::new(41, 42));
        frame.set(0, 0, 255);
        render_bars(&mut frame, &bar_heights(&[0.0; 33]), MIN_AVERAGE);
        assert!(frame.is_blank());
    }

    #[test]
    fn bar_is_mirrored_around_center() {
        let mut frame = FrameBuffer::new(PanelConfig::new(41, 42));
        let mut bars = BarFrame {
            heights: [0.0; BAR_COUNT],
            peak: MIN_AVERAGE,
        };
        // Last bar sits at column pair 1 (x = 2, 3); normalized height 4.
        bars.heights[BAR_COUNT - 1] = 0.4;
        render_bars(&mut frame, &bars, MIN_AVERAGE);

        let graded = (4.0 * 255.0 / 30.0) as u8;
        assert_eq!(frame.get(2, CENTER_ROW), Some(255));
        assert_eq!(frame.get(3, CENTER_ROW), Some(255));
        assert_eq!(frame.get(2, CENTER_ROW + 1), Some(graded));
        assert_eq!(frame.get(3, CENTER_ROW + 1), Some(0));
        assert_eq!(frame.get(2, CENTER_ROW - 3), Some(255));
        assert_eq!(frame.get(2, CENTER_ROW + 3), Some(graded));
        assert_eq!(frame.get(2, CENTER_ROW - 4), Some(0));
        assert_eq!(frame.get(2, CENTER_ROW + 4), Some(0));
    }

    #[test]
    fn tall_bars_stay_on_panel() {
        let panel = PanelConfig::new(10, 12);
        let mut frame = FrameBuffer::new(panel);
        let bars = BarFrame {
            heights: [1.0e6; BAR_COUNT],
            peak: 1.0e6,
        };
        render_bars(&mut frame, &bars, MIN_AVERAGE);
        assert_eq!(frame.as_bytes().len(), panel.pixel_count());
    }
}
