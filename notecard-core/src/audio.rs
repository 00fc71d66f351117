//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! The input stream's callback feeds a sliding `SharedBuffer`; the listener reads snapshots
//! of that buffer on its own thread.
//!
//! ## Features
//! - Default or caller-supplied input device
//! - f32 and i16 device formats, multi-channel input downmixed to mono
//! - Re-framing of device callbacks into fixed-size chunks
//! - Scoped start/stop: the device is released when the guard or the capture is dropped

use std::ops::Deref;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::buffer::{Chunker, SampleSource, SharedBuffer};

/// Errors raised while acquiring or running the capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no audio input device available")]
    NoInputDevice,

    #[error("no f32 or i16 input format available on {device}")]
    NoSupportedConfig { device: String },

    #[error("could not read the input device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[error("could not query input configurations: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("could not build the input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("could not start the input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    /// The backend reported an error after the stream started. Fatal to the session.
    #[error("audio stream failed: {0}")]
    StreamFault(String),
}

/// Capture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per chunk handed to the buffer.
    pub chunk_size: usize,
    /// Buffer length as a multiple of `chunk_size`.
    pub buffer_multiplier: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            chunk_size: 1024,
            buffer_multiplier: 50,
        }
    }
}

impl CaptureConfig {
    /// Number of samples held by the sliding buffer.
    pub fn capacity(&self) -> usize {
        self.chunk_size * self.buffer_multiplier
    }
}

/// Owns an input device and keeps the most recent `capacity()` samples it produced.
///
/// Nothing is opened until [`AudioCapture::start`]; dropping the capture releases the device.
pub struct AudioCapture {
    config: CaptureConfig,
    device: Option<cpal::Device>,
    buffer: SharedBuffer,
    stream: Option<cpal::Stream>,
}

impl AudioCapture {
    /// Creates a capture that will open the host's default input device.
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            device: None,
            buffer: SharedBuffer::new(config.capacity(), config.sample_rate),
            stream: None,
        }
    }

    /// Creates a capture bound to a specific input device.
    pub fn with_device(config: CaptureConfig, device: cpal::Device) -> Self {
        Self {
            config,
            device: Some(device),
            buffer: SharedBuffer::new(config.capacity(), config.sample_rate),
            stream: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Handle to the shared sample buffer.
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the input device and starts streaming into the buffer.
    ///
    /// The returned guard stops the stream when dropped, on every exit path. Calling
    /// `start` on a running capture keeps the existing stream.
    ///
    /// # Errors
    /// Fails fast when no device or no usable input format is available, or when the
    /// backend refuses to build or start the stream.
    pub fn start(&mut self) -> Result<CaptureGuard<'_>, CaptureError> {
        if self.stream.is_none() {
            if self.device.is_none() {
                let host = cpal::default_host();
                self.device = Some(
                    host.default_input_device()
                        .ok_or(CaptureError::NoInputDevice)?,
                );
            }
            let device = self.device.as_ref().ok_or(CaptureError::NoInputDevice)?;

            self.buffer.reset();
            let (stream, sample_rate) = open_stream(device, &self.config, self.buffer.clone())?;
            self.buffer.set_sample_rate(sample_rate);
            self.stream = Some(stream);
        }
        Ok(CaptureGuard { capture: self })
    }

    /// Stops streaming and releases the stream. Safe to call at any time, any number of times.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Error pausing input stream: {}", e);
            }
            drop(stream);
            info!("Audio input released");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SampleSource for AudioCapture {
    fn snapshot(&self) -> Result<Vec<f32>, CaptureError> {
        self.buffer.snapshot()
    }

    fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    fn capacity(&self) -> usize {
        self.config.capacity()
    }

    fn discard_window(&self) {
        self.buffer.discard_window();
    }
}

/// A running capture. Dereferences to the [`AudioCapture`]; stops it when dropped.
pub struct CaptureGuard<'a> {
    capture: &'a mut AudioCapture,
}

impl Deref for CaptureGuard<'_> {
    type Target = AudioCapture;

    fn deref(&self) -> &AudioCapture {
        &*self.capture
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.capture.stop();
    }
}

/// Builds and starts an input stream on `device` that feeds `buffer`.
///
/// # Returns
/// * `Ok((stream, sample_rate))` - running stream and the rate it actually delivers
fn open_stream(
    device: &cpal::Device,
    config: &CaptureConfig,
    buffer: SharedBuffer,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let device_name = device.name()?;
    info!("Using audio input device: {}", device_name);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported = find_supported_config(configs, config.sample_rate)
        .ok_or_else(|| CaptureError::NoSupportedConfig { device: device_name.clone() })?;

    let supported = if covers_rate(&supported, config.sample_rate) {
        supported.with_sample_rate(cpal::SampleRate(config.sample_rate))
    } else {
        warn!(
            "{} Hz not supported by {}, falling back to the device maximum",
            config.sample_rate, device_name
        );
        supported.with_max_sample_rate()
    };

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels as usize;

    info!(
        sample_rate,
        channels,
        format = %sample_format,
        chunk_size = config.chunk_size,
        capacity = config.capacity(),
        "Selected input configuration"
    );

    let fault_buffer = buffer.clone();
    let err_fn = move |err: cpal::StreamError| {
        warn!("An error occurred on the audio stream: {}", err);
        fault_buffer.report_fault(err.to_string());
    };

    let mut chunker = Chunker::new(buffer, config.chunk_size, channels);
    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| chunker.push_i16(data),
            err_fn,
            None,
        )?,
        _ => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| chunker.push(data),
            err_fn,
            None,
        )?,
    };

    stream.play()?;

    Ok((stream, sample_rate))
}

/// Finds the best supported configuration for the target sample rate.
///
/// Only f32 and i16 formats are usable. Among those, mono beats multi-channel, f32 beats
/// i16, and then the range closest to `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .min_by_key(|c| {
            let rate_distance = if covers_rate(c, target_rate) {
                0
            } else {
                let min_diff = c.min_sample_rate().0.abs_diff(target_rate);
                let max_diff = c.max_sample_rate().0.abs_diff(target_rate);
                min_diff.min(max_diff)
            };
            (c.channels() != 1, c.sample_format() != SampleFormat::F32, rate_distance)
        })
}

fn covers_rate(config: &SupportedStreamConfigRange, rate: u32) -> bool {
    config.min_sample_rate().0 <= rate && rate <= config.max_sample_rate().0
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleRate, SupportedBufferSize};

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn default_capacity_is_fifty_chunks() {
        let config = CaptureConfig::default();
        assert_eq!(config.capacity(), 51_200);
    }

    #[test]
    fn prefers_mono_f32_covering_the_target_rate() {
        let configs = vec![
            range(2, 8_000, 96_000, SampleFormat::F32),
            range(1, 8_000, 96_000, SampleFormat::I16),
            range(1, 44_100, 44_100, SampleFormat::F32),
            range(1, 8_000, 96_000, SampleFormat::F32),
            range(1, 8_000, 96_000, SampleFormat::U8),
        ];
        let best = find_supported_config(configs, 48_000).unwrap();
        assert_eq!(best.channels(), 1);
        assert_eq!(best.sample_format(), SampleFormat::F32);
        assert_eq!(best.max_sample_rate(), SampleRate(96_000));
    }

    #[test]
    fn falls_back_to_i16_and_rejects_other_formats() {
        let configs = vec![
            range(1, 8_000, 48_000, SampleFormat::U8),
            range(2, 8_000, 48_000, SampleFormat::I16),
        ];
        let best = find_supported_config(configs, 48_000).unwrap();
        assert_eq!(best.sample_format(), SampleFormat::I16);

        let unusable = vec![range(1, 8_000, 48_000, SampleFormat::U8)];
        assert!(find_supported_config(unusable, 48_000).is_none());
    }

    #[test]
    fn unstarted_capture_stops_cleanly() {
        let mut capture = AudioCapture::new(CaptureConfig {
            chunk_size: 16,
            buffer_multiplier: 4,
            ..CaptureConfig::default()
        });
        assert!(!capture.is_running());
        capture.stop();
        capture.stop();
        assert_eq!(capture.snapshot().unwrap().len(), 64);
        assert_eq!(capture.sample_rate(), 48_000);
    }
}
