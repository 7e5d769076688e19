//! Zero-padded real FFT magnitude.
//!
//! The plan and buffers are allocated once per capture session so the
//! capture callback never allocates.

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

pub struct SpectrumAnalyzer {
    size: usize,
    input: Vec<f64>,
    output: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    magnitudes: Vec<f64>,
    plan: Arc<dyn RealToComplex<f64>>,
}

impl SpectrumAnalyzer {
    /// Analyzer for windows of `window_len` samples, padded to the next
    /// power of two.
    pub fn new(window_len: usize) -> Self {
        let size = window_len.max(2).next_power_of_two();
        let plan = RealFftPlanner::<f64>::new().plan_fft_forward(size);
        let input = plan.make_input_vec();
        let output = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let magnitudes = vec![0.0; output.len()];

        Self {
            size,
            input,
            output,
            scratch,
            magnitudes,
            plan,
        }
    }

    /// Padded transform length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Magnitude per frequency bin (`size / 2 + 1` bins): `|X0| / N` for
    /// DC, `2 |Xk| / N` for the rest.
    pub fn magnitudes(&mut self, window: &[f64]) -> &[f64] {
        for (i, slot) in self.input.iter_mut().enumerate() {
            *slot = window.get(i).copied().unwrap_or(0.0);
        }

        if self
            .plan
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .is_err()
        {
            self.magnitudes.fill(0.0);
            return &self.magnitudes;
        }

        let n = self.size as f64;
        for (k, (mag, c)) in self.magnitudes.iter_mut().zip(&self.output).enumerate() {
            let scale = if k == 0 { 1.0 } else { 2.0 };
            *mag = scale * c.norm() / n;
        }
        &self.magnitudes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pads_to_power_of_two() {
        assert_eq!(SpectrumAnalyzer::new(48).size(), 64);
        assert_eq!(SpectrumAnalyzer::new(44).size(), 64);
        assert_eq!(SpectrumAnalyzer::new(64).size(), 64);
        assert_eq!(SpectrumAnalyzer::new(0).size(), 2);
    }

    #[test]
    fn silence_has_zero_spectrum() {
        let mut fft = SpectrumAnalyzer::new(48);
        let mags = fft.magnitudes(&[0.0; 48]);
        assert_eq!(mags.len(), 33);
        assert!(mags.iter().all(|m| *m == 0.0));
    }

    #[test]
    fn dc_signal_lands_in_bin_zero() {
        let mut fft = SpectrumAnalyzer::new(64);
        let mags = fft.magnitudes(&[3.0; 64]);
        assert!((mags[0] - 3.0).abs() < 1e-9);
        assert!(mags[1..].iter().all(|m| m.abs() < 1e-9));
    }

    #[test]
    fn pure_tone_peaks_in_its_bin() {
        let n = 64;
        let window: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * 4.0 * i as f64 / n as f64).sin())
            .collect();
        let mut fft = SpectrumAnalyzer::new(n);
        let mags = fft.magnitudes(&window);
        assert!((mags[4] - 1.0).abs() < 1e-9);
        assert!(mags[3] < 1e-9 && mags[5] < 1e-9);
    }
}
