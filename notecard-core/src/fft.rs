//! # Fast Fourier Transform (FFT) Module
//!
//! Spectral helpers for the pitch detector: windowing, zero padding and
//! magnitude spectra, built on RustFFT.
//!
//! ## Features
//! - Symmetric Hann window for reduced spectral leakage
//! - Zero padding for finer frequency-bin resolution
//! - Magnitude spectrum restricted to non-negative frequencies

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner, Length};

/// Builds a symmetric Hann window of `len` points.
///
/// The first and last coefficients are zero; a window of a single point is `[1.0]`.
pub fn hann_window(len: usize) -> Vec<f32> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let n_minus_1 = (len - 1) as f32;
            (0..len)
                .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
                .collect()
        }
    }
}

/// Plans a forward FFT of `len` points.
pub fn plan_forward(len: usize) -> Arc<dyn Fft<f32>> {
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(len)
}

/// Windows `signal`, zero-pads it to `fft.len()` points and returns the magnitudes of the
/// non-negative half of its spectrum (`fft.len() / 2` bins).
///
/// Samples past the window's length are treated as zero, as are window coefficients past the
/// signal's length.
pub fn padded_magnitudes(signal: &[f32], window: &[f32], fft: &dyn Fft<f32>) -> Vec<f32> {
    let padded_len = fft.len();
    let mut buffer = vec![Complex { re: 0.0, im: 0.0 }; padded_len];

    for ((slot, &sample), &w) in buffer.iter_mut().zip(signal).zip(window) {
        slot.re = sample * w;
    }

    fft.process(&mut buffer);

    buffer
        .iter()
        .take(padded_len / 2)
        .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
        .collect()
}
