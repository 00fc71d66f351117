//! # Note Listener Module
//!
//! Combines a live sample source, the pitch detector and the note mapper into one
//! polling primitive: "has this note been heard within this time?"
//!
//! A listen moves through `waiting` into exactly one of `heard`, `timed out` or
//! `cancelled`. Nothing carries over between listens, so one listener can be reused for
//! every note of a session.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audio::CaptureError;
use crate::buffer::SampleSource;
use crate::cancel::CancelToken;
use crate::pitch::{DetectorConfig, PitchDetector};
use crate::tuning::{self, NearestNote};

/// Listening parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Delay between two estimates, in milliseconds.
    pub poll_interval_ms: u64,
    /// Hz around a standard frequency that still counts as natural.
    pub tolerance_hz: f32,
    /// RMS level below which the window is treated as silence and not analysed.
    pub silence_threshold: f32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            tolerance_hz: tuning::ACCIDENTAL_TOLERANCE,
            silence_threshold: 0.001,
        }
    }
}

impl ListenerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How a listen ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    /// The target note was heard.
    Heard,
    /// The timeout elapsed first.
    TimedOut,
    /// The cancel token fired first.
    Cancelled,
}

/// A single estimate taken from the live window.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Estimated fundamental in Hz; `0.0` when the window is silent.
    pub frequency: f32,
    /// The nearest note, if the estimate has one.
    pub note: Option<NearestNote>,
}

/// Polls a [`SampleSource`] for a target note.
pub struct NoteListener<'a, S: SampleSource + ?Sized> {
    source: &'a S,
    detector: PitchDetector,
    config: ListenerConfig,
}

impl<'a, S: SampleSource + ?Sized> NoteListener<'a, S> {
    /// Creates a listener over `source`. The detector's sample rate is taken from the source.
    pub fn new(source: &'a S, config: ListenerConfig, detector_config: DetectorConfig) -> Self {
        let detector_config = DetectorConfig {
            sample_rate: source.sample_rate(),
            ..detector_config
        };
        Self {
            source,
            detector: PitchDetector::new(detector_config, source.capacity()),
            config,
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Takes one estimate from the current window.
    ///
    /// # Errors
    /// * `CaptureError::StreamFault` - the capture stream died
    pub fn current_note(&self) -> Result<Observation, CaptureError> {
        let samples = self.source.snapshot()?;
        if rms(&samples) < self.config.silence_threshold {
            return Ok(Observation { frequency: 0.0, note: None });
        }
        let frequency = self.detector.estimate(&samples);
        let note = tuning::nearest_note_with_tolerance(frequency, self.config.tolerance_hz);
        Ok(Observation { frequency, note })
    }

    /// Listens until `target` is heard, `timeout` elapses or `cancel` fires.
    ///
    /// `target` may carry both enharmonic spellings ("C#4/Db4"); any spelling matches.
    /// Without a timeout this blocks until the note is heard or the token is cancelled.
    /// Timing out is a normal outcome, not an error.
    ///
    /// # Errors
    /// * `CaptureError::StreamFault` - the capture stream died while listening
    pub fn wait_for(
        &self,
        target: &str,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<ListenOutcome, CaptureError> {
        let started = Instant::now();
        // a timeout too large to represent as an instant means no deadline
        let deadline = timeout.and_then(|t| started.checked_add(t));
        let mut last_heard: Option<String> = None;
        debug!(target_note = target, ?timeout, "Waiting for note");

        loop {
            if cancel.is_cancelled() {
                info!(target_note = target, "Listening cancelled");
                return Ok(ListenOutcome::Cancelled);
            }

            let observation = self.current_note()?;
            if let Some(note) = &observation.note {
                if last_heard.as_deref() != Some(note.name.as_str()) {
                    debug!(
                        heard = %note.name,
                        frequency = observation.frequency,
                        accidental = %note.accidental,
                        "Heard note"
                    );
                    last_heard = Some(note.name.clone());
                }
                if tuning::names_match(&note.name, target) {
                    info!(
                        target_note = target,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Note matched"
                    );
                    return Ok(ListenOutcome::Heard);
                }
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    info!(target_note = target, last_heard = ?last_heard, "Listening timed out");
                    return Ok(ListenOutcome::TimedOut);
                }
                Some(deadline) => self.config.poll_interval().min(deadline - now),
                None => self.config.poll_interval(),
            };
            if cancel.wait(pause) {
                info!(target_note = target, "Listening cancelled");
                return Ok(ListenOutcome::Cancelled);
            }
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SharedBuffer;
    use crate::cancel::cancel_pair;

    const RATE: u32 = 48_000;
    const CAPACITY: usize = 8_192;

    fn fill_with_tone(buffer: &SharedBuffer, freq: f32) {
        let samples: Vec<f32> = (0..CAPACITY)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32;
                0.5 * phase.sin() + 0.25 * (2.0 * phase).sin() + 0.15 * (3.0 * phase).sin()
            })
            .collect();
        buffer.append_chunk(&samples);
    }

    fn listener(buffer: &SharedBuffer) -> NoteListener<'_, SharedBuffer> {
        NoteListener::new(buffer, ListenerConfig::default(), DetectorConfig::default())
    }

    #[test]
    fn silence_has_no_note() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        let observation = listener(&buffer).current_note().unwrap();
        assert_eq!(observation.frequency, 0.0);
        assert!(observation.note.is_none());
    }

    #[test]
    fn current_note_names_the_tone() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        fill_with_tone(&buffer, 261.63);
        let observation = listener(&buffer).current_note().unwrap();
        assert_eq!(observation.note.map(|n| n.name), Some("C4".to_string()));
    }

    #[test]
    fn matching_tone_is_heard_immediately() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        fill_with_tone(&buffer, 277.18);
        let started = Instant::now();
        let outcome = listener(&buffer)
            .wait_for("Db4", Some(Duration::from_secs(5)), &CancelToken::never())
            .unwrap();
        assert_eq!(outcome, ListenOutcome::Heard);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn silence_times_out_within_one_poll() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let outcome = listener(&buffer)
            .wait_for("C4", Some(timeout), &CancelToken::never())
            .unwrap();
        let elapsed = started.elapsed();
        assert_eq!(outcome, ListenOutcome::TimedOut);
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(250), "took {elapsed:?}");
    }

    #[test]
    fn note_played_mid_listen_is_heard_within_one_poll() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        let onset = Duration::from_millis(300);
        let feeder = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(onset);
                fill_with_tone(&buffer, 329.63);
            })
        };

        let started = Instant::now();
        let outcome = listener(&buffer)
            .wait_for("E4", Some(Duration::from_secs(5)), &CancelToken::never())
            .unwrap();
        let elapsed = started.elapsed();
        feeder.join().unwrap();

        assert_eq!(outcome, ListenOutcome::Heard);
        assert!(elapsed >= onset);
        let slack = Duration::from_millis(150);
        assert!(
            elapsed < onset + ListenerConfig::default().poll_interval() + slack,
            "took {elapsed:?}"
        );
    }

    #[test]
    fn unrepresentable_timeout_means_no_deadline() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        let (canceller, token) = cancel_pair();
        canceller.cancel();
        let outcome = listener(&buffer)
            .wait_for("C4", Some(Duration::MAX), &token)
            .unwrap();
        assert_eq!(outcome, ListenOutcome::Cancelled);
    }

    #[test]
    fn wrong_note_times_out() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        fill_with_tone(&buffer, 440.0);
        let outcome = listener(&buffer)
            .wait_for("C4", Some(Duration::from_millis(200)), &CancelToken::never())
            .unwrap();
        assert_eq!(outcome, ListenOutcome::TimedOut);
    }

    #[test]
    fn blocking_listen_is_cancellable() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        let (canceller, token) = cancel_pair();
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            canceller.cancel();
        });
        let outcome = listener(&buffer).wait_for("C4", None, &token).unwrap();
        assert_eq!(outcome, ListenOutcome::Cancelled);
        trigger.join().unwrap();
    }

    #[test]
    fn stream_fault_aborts_the_listen() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        buffer.report_fault("device unplugged");
        let result = listener(&buffer).wait_for("C4", None, &CancelToken::never());
        assert!(matches!(result, Err(CaptureError::StreamFault(_))));
    }
}
