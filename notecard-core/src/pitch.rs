//! # Pitch Detection Module
//!
//! This module estimates the dominant fundamental frequency of a sample buffer using a
//! Harmonic Product Spectrum (HPS) over a zero-padded, Hann-windowed FFT.
//!
//! ## Algorithm
//! 1. Hann window over the whole buffer
//! 2. Zero padding to `(1 + zero_padding) x len` points
//! 3. Magnitude of the non-negative half of the spectrum
//! 4. HPS: multiply in the spectrum downsampled by 2..=`num_hps`
//! 5. Zero everything below the frequency floor
//! 6. Frequency of the strongest remaining bin, rounded to 0.01 Hz

use std::borrow::Cow;
use std::sync::Arc;

use rustfft::{Fft, Length};
use serde::{Deserialize, Serialize};

use crate::fft;
use crate::tuning::round_to_hundredths;

/// Candidate bins whose own magnitude is below this fraction of the spectral peak are not
/// eligible as the fundamental. Keeps leakage-only products from winning on pure tones.
const MIN_CANDIDATE_RATIO: f32 = 1e-3;

/// Parameters of the HPS pitch detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Sample rate of the analysed audio in Hz.
    pub sample_rate: u32,
    /// Number of harmonics folded into the product spectrum.
    pub num_hps: usize,
    /// Trailing zeros appended, as a multiple of the buffer length.
    pub zero_padding: usize,
    /// Lowest frequency considered, in Hz.
    pub freq_floor: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            num_hps: 3,
            zero_padding: 3,
            freq_floor: 60.0,
        }
    }
}

/// Estimates the dominant fundamental frequency of a buffer snapshot.
///
/// The window and FFT plan for the expected frame length are computed once; other lengths
/// are planned on demand. Estimation holds no mutable state, so equal inputs always give
/// equal outputs.
pub struct PitchDetector {
    config: DetectorConfig,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl PitchDetector {
    /// Creates a detector tuned for buffers of `frame_len` samples.
    pub fn new(config: DetectorConfig, frame_len: usize) -> Self {
        let window = fft::hann_window(frame_len);
        let fft = fft::plan_forward(padded_len(frame_len, config.zero_padding));
        Self { config, window, fft }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Returns the estimated fundamental frequency of `samples` in Hz.
    ///
    /// Never fails: an empty or silent buffer yields `0.0`, and very low results should be
    /// treated as "no pitch" by the caller.
    pub fn estimate(&self, samples: &[f32]) -> f32 {
        let len = samples.len();
        if len == 0 {
            return 0.0;
        }

        let (window, fft): (Cow<'_, [f32]>, Arc<dyn Fft<f32>>) = if len == self.window.len() {
            (Cow::Borrowed(self.window.as_slice()), Arc::clone(&self.fft))
        } else {
            (
                Cow::Owned(fft::hann_window(len)),
                fft::plan_forward(padded_len(len, self.config.zero_padding)),
            )
        };

        let original = fft::padded_magnitudes(samples, &window, fft.as_ref());
        let mut product = original.clone();
        harmonic_product(&mut product, &original, self.config.num_hps);

        let bin_hz = self.config.sample_rate as f32 / fft.len() as f32;
        mask_below_floor(&mut product, bin_hz, self.config.freq_floor);

        let peak = original.iter().copied().fold(0.0_f32, f32::max);
        let gate = peak * MIN_CANDIDATE_RATIO;
        let best_bin = strongest_bin(&product, |bin| original[bin] >= gate);

        round_to_hundredths(best_bin as f32 * bin_hz)
    }
}

fn padded_len(frame_len: usize, zero_padding: usize) -> usize {
    frame_len * (1 + zero_padding)
}

/// Multiplies `spectrum` in place by `original` downsampled by 2, 3, ..., `num_hps`.
///
/// Downsampling by `i` keeps every i-th bin, which is `ceil(len / i)` values, so only that
/// prefix of `spectrum` is affected.
fn harmonic_product(spectrum: &mut [f32], original: &[f32], num_hps: usize) {
    let len = original.len();
    for factor in 2..=num_hps {
        let hps_len = len.div_ceil(factor);
        for (bin, magnitude) in spectrum.iter_mut().take(hps_len).enumerate() {
            *magnitude *= original[bin * factor];
        }
    }
}

/// Zeroes the bins below the floor.
///
/// With `i` the first bin above `floor`, bins `[0, i - 1)` are cleared.
fn mask_below_floor(spectrum: &mut [f32], bin_hz: f32, floor: f32) {
    if let Some(first_above) = (0..spectrum.len()).find(|&bin| bin as f32 * bin_hz > floor) {
        let end = first_above.saturating_sub(1);
        spectrum[..end].fill(0.0);
    }
}

/// Index of the first strictly largest eligible bin, or 0 when nothing beats zero.
fn strongest_bin(spectrum: &[f32], eligible: impl Fn(usize) -> bool) -> usize {
    let mut best = (0, 0.0_f32);
    for (bin, &magnitude) in spectrum.iter().enumerate() {
        if magnitude > best.1 && eligible(bin) {
            best = (bin, magnitude);
        }
    }
    best.0
}
