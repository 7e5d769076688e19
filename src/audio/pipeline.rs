//! Per-callback processing: decode → spectrum → bars → frame.

use super::bars::{self, PresentLimiter, SmoothingWindow};
use super::decode::{self, StreamFormat};
use super::spectrum::SpectrumAnalyzer;
use crate::PanelConfig;
use crate::frame::FrameBuffer;
use std::time::Instant;

/// Turns capture buffers into bar-graph frames.
///
/// Everything is sized at construction; [`process`](Self::process) does
/// not allocate.
pub struct AudioVisualizer {
    format: StreamFormat,
    window: Vec<f64>,
    spectrum: SpectrumAnalyzer,
    limiter: PresentLimiter,
    smoothing: SmoothingWindow,
    frame: FrameBuffer,
}

impl AudioVisualizer {
    pub fn new(format: StreamFormat, panel: PanelConfig) -> Self {
        let window_len = format.window_len();
        Self {
            format,
            window: vec![0.0; window_len],
            spectrum: SpectrumAnalyzer::new(window_len),
            limiter: PresentLimiter::default(),
            smoothing: SmoothingWindow::new(),
            frame: FrameBuffer::new(panel),
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn smoothing(&self) -> &SmoothingWindow {
        &self.smoothing
    }

    /// Feed one capture buffer received at `now`. Returns the frame to
    /// present, or `None` when the rate limiter drops this one.
    pub fn process(&mut self, bytes: &[u8], now: Instant) -> Option<&FrameBuffer> {
        decode::decode_into(&mut self.window, bytes, &self.format);
        let magnitudes = self.spectrum.magnitudes(&self.window);

        if !self.limiter.admit(now) {
            return None;
        }

        let bars = bars::bar_heights(magnitudes);
        let average = self.smoothing.push(bars.peak);
        bars::render_bars(&mut self.frame, &bars, average);
        Some(&self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bars::MIN_AVERAGE;
    use crate::audio::decode::SampleEncoding;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn visualizer() -> AudioVisualizer {
        AudioVisualizer::new(
            StreamFormat {
                sample_rate: 48_000,
                channels: 2,
                encoding: SampleEncoding::Int16,
            },
            PanelConfig::new(41, 42),
        )
    }

    fn tone(len: usize) -> Vec<u8> {
        (0..len)
            .flat_map(|i| {
                let s = ((i as f64 * 0.9).sin() * 8000.0) as i16;
                [s, s]
            })
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    #[test]
    fn window_is_sized_to_one_millisecond() {
        assert_eq!(visualizer().window_len(), 48);
    }

    #[test]
    fn all_zero_pcm_renders_blank_with_floor_average() {
        let mut vis = visualizer();
        let silence = vec![0u8; 48 * 4];
        let frame = vis.process(&silence, Instant::now()).cloned().unwrap();
        assert!(frame.is_blank());
        assert_eq!(vis.smoothing().average(), MIN_AVERAGE);
        assert_eq!(vis.smoothing().len(), 1);
    }

    #[test]
    fn frames_inside_gap_are_suppressed() {
        let mut vis = visualizer();
        let t0 = Instant::now();
        let buf = tone(48);
        assert!(vis.process(&buf, t0).is_some());
        assert!(vis.process(&buf, t0 + Duration::from_millis(30)).is_none());
        assert!(vis.process(&buf, t0 + Duration::from_millis(70)).is_some());
        assert_eq!(vis.smoothing().len(), 2);
    }

    #[test]
    fn tone_lights_some_bars() {
        let mut vis = visualizer();
        let frame = vis.process(&tone(48), Instant::now()).cloned().unwrap();
        assert!(!frame.is_blank());
    }

    #[test]
    fn unsupported_format_still_renders_previous_window() {
        let mut vis = AudioVisualizer::new(
            StreamFormat {
                sample_rate: 48_000,
                channels: 2,
                encoding: SampleEncoding::Unsupported,
            },
            PanelConfig::new(41, 42),
        );
        let frame = vis.process(&[0xAB; 256], Instant::now()).cloned().unwrap();
        assert!(frame.is_blank());
    }
}
