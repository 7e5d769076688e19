//! Intensity frame buffers and animated sequences.
//!
//! A [`FrameBuffer`] is one full panel image, one byte (0-255) per LED,
//! addressed by planar `(x, y)`. Writes outside the panel are dropped, so
//! no producer can ever address an LED that does not exist.

use crate::PanelConfig;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    panel: PanelConfig,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    /// A blank (all-off) frame for the given panel.
    pub fn new(panel: PanelConfig) -> Self {
        Self {
            panel,
            pixels: vec![0; panel.pixel_count()],
        }
    }

    pub fn panel(&self) -> PanelConfig {
        self.panel
    }

    /// Set one LED. Out-of-bounds coordinates are ignored.
    pub fn set(&mut self, x: i32, y: i32, intensity: u8) {
        if self.panel.contains(x, y) {
            let idx = y as usize * self.panel.cols as usize + x as usize;
            self.pixels[idx] = intensity;
        }
    }

    /// Read one LED; `None` when the coordinate is off the panel.
    pub fn get(&self, x: i32, y: i32) -> Option<u8> {
        self.panel
            .contains(x, y)
            .then(|| self.pixels[y as usize * self.panel.cols as usize + x as usize])
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Raw intensities in row-major order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Iterate over lit LEDs as `(x, y, intensity)`.
    pub fn lit(&self) -> impl Iterator<Item = (i32, i32, u8)> + '_ {
        let cols = self.panel.cols as usize;
        self.pixels
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0)
            .map(move |(i, v)| ((i % cols) as i32, (i / cols) as i32, *v))
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|v| *v == 0)
    }
}

/// Pre-rasterized frames of an animated picture plus the interval at
/// which the scheduler replays them.
///
/// Never empty: construction fails on an empty frame list, and playback
/// wraps the index modulo the length.
#[derive(Clone, Debug)]
pub struct AnimatedSequence {
    frames: Vec<FrameBuffer>,
    interval: Duration,
    cursor: usize,
}

impl AnimatedSequence {
    pub fn new(frames: Vec<FrameBuffer>, interval: Duration) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        Some(Self {
            frames,
            interval,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn frames(&self) -> &[FrameBuffer] {
        &self.frames
    }

    /// The frame to show on this tick; moves the cursor forward.
    pub fn advance(&mut self) -> &FrameBuffer {
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.frames.len();
        &self.frames[idx]
    }
}
