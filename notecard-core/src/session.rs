//! # Game Session Module
//!
//! Runs the call-and-response game: present a note, listen for it, report the outcome,
//! move on. What the player sees is left to an [`Announcer`].
//!
//! ## Round protocol
//! 1. The announcer presents the target note
//! 2. The listener waits for it, up to the guess timeout
//! 3. The outcome is reported as passed or failed
//! 4. After a failure the session can insist: it listens again, without a timeout, until
//!    the note is played, so a round never skips past an unplayed note
//!
//! The window is discarded between rounds, so a note still ringing from the previous round
//! cannot answer the next one.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audio::{AudioCapture, CaptureError};
use crate::buffer::SampleSource;
use crate::cancel::CancelToken;
use crate::instrument::Note;
use crate::listener::{ListenOutcome, ListenerConfig, NoteListener};
use crate::pitch::DetectorConfig;

/// Upper bound on the per-note guess timeout.
pub const MAX_GUESS_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Session parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds the player has to play each note.
    pub guess_timeout_secs: f32,
    /// Whether a missed note must still be played before moving on.
    pub replay_on_timeout: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            guess_timeout_secs: 10.0,
            replay_on_timeout: true,
        }
    }
}

impl SessionConfig {
    /// The guess timeout, clamped to `[0, MAX_GUESS_TIMEOUT]`.
    pub fn guess_timeout(&self) -> Duration {
        Duration::try_from_secs_f32(self.guess_timeout_secs.max(0.0))
            .map_or(MAX_GUESS_TIMEOUT, |timeout| timeout.min(MAX_GUESS_TIMEOUT))
    }
}

/// Result of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub note: Note,
    pub outcome: RoundOutcome,
    /// Time from presenting the note to the outcome.
    pub elapsed: Duration,
}

/// What happened during a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub rounds: Vec<RoundResult>,
    /// Set when the session was cancelled before every note was played.
    pub cancelled: bool,
}

impl SessionSummary {
    pub fn passed(&self) -> usize {
        self.count(RoundOutcome::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(RoundOutcome::Failed)
    }

    fn count(&self, outcome: RoundOutcome) -> usize {
        self.rounds.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// The presentation side of a session.
pub trait Announcer {
    /// Says something to the player.
    fn announce(&mut self, message: &str);

    /// Shows the note the player should play next.
    fn present_note(&mut self, note: &Note);

    /// Tells the player how a round went.
    fn report(&mut self, note: &Note, outcome: RoundOutcome);
}

/// Conducts a sequence of rounds over one sample source.
pub struct GameSession<A: Announcer> {
    config: SessionConfig,
    listener_config: ListenerConfig,
    detector_config: DetectorConfig,
    announcer: A,
    cancel: CancelToken,
}

impl<A: Announcer> GameSession<A> {
    pub fn new(config: SessionConfig, announcer: A) -> Self {
        Self {
            config,
            listener_config: ListenerConfig::default(),
            detector_config: DetectorConfig::default(),
            announcer,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_listener_config(mut self, config: ListenerConfig) -> Self {
        self.listener_config = config;
        self
    }

    pub fn with_detector_config(mut self, config: DetectorConfig) -> Self {
        self.detector_config = config;
        self
    }

    /// Lets the session be aborted from another thread.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn announcer(&self) -> &A {
        &self.announcer
    }

    pub fn into_announcer(self) -> A {
        self.announcer
    }

    /// Starts `capture`, plays every target against it, and releases the device on return.
    ///
    /// # Errors
    /// Device acquisition failures and stream faults end the session.
    pub fn run_with_capture(
        &mut self,
        capture: &mut AudioCapture,
        targets: &[Note],
    ) -> Result<SessionSummary, CaptureError> {
        let active = capture.start()?;
        self.run(&*active, targets)
    }

    /// Plays every target against an already running `source`.
    ///
    /// # Errors
    /// * `CaptureError::StreamFault` - the source failed mid-session
    pub fn run<S: SampleSource + ?Sized>(
        &mut self,
        source: &S,
        targets: &[Note],
    ) -> Result<SessionSummary, CaptureError> {
        let listener = NoteListener::new(source, self.listener_config, self.detector_config);
        let timeout = self.config.guess_timeout();
        let mut summary = SessionSummary::default();
        info!(rounds = targets.len(), ?timeout, "Session started");

        for (round, note) in targets.iter().enumerate() {
            if round > 0 {
                // audio from the previous round must not answer this one
                source.discard_window();
            }
            self.announcer.present_note(note);
            let started = Instant::now();

            let outcome = match listener.wait_for(&note.name, Some(timeout), &self.cancel)? {
                ListenOutcome::Heard => RoundOutcome::Passed,
                ListenOutcome::TimedOut => RoundOutcome::Failed,
                ListenOutcome::Cancelled => {
                    summary.cancelled = true;
                    break;
                }
            };

            self.announcer.report(note, outcome);
            summary.rounds.push(RoundResult {
                note: note.clone(),
                outcome,
                elapsed: started.elapsed(),
            });

            if outcome == RoundOutcome::Failed && self.config.replay_on_timeout {
                self.announcer
                    .announce(&format!("Play {} to continue.", note.name));
                if listener.wait_for(&note.name, None, &self.cancel)? == ListenOutcome::Cancelled {
                    summary.cancelled = true;
                    break;
                }
            }
        }

        info!(
            passed = summary.passed(),
            failed = summary.failed(),
            cancelled = summary.cancelled,
            "Session finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SharedBuffer;
    use crate::cancel::cancel_pair;

    const RATE: u32 = 48_000;
    const CAPACITY: usize = 8_192;

    #[derive(Default)]
    struct Transcript {
        lines: Vec<String>,
    }

    impl Announcer for Transcript {
        fn announce(&mut self, message: &str) {
            self.lines.push(format!("say {message}"));
        }

        fn present_note(&mut self, note: &Note) {
            self.lines.push(format!("show {}", note.name));
        }

        fn report(&mut self, note: &Note, outcome: RoundOutcome) {
            self.lines.push(format!("{} {:?}", note.name, outcome));
        }
    }

    fn tone(freq: f32) -> Vec<f32> {
        (0..CAPACITY)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32;
                0.5 * phase.sin() + 0.3 * (2.0 * phase).sin() + 0.2 * (3.0 * phase).sin()
            })
            .collect()
    }

    fn quick(replay_on_timeout: bool) -> SessionConfig {
        SessionConfig {
            guess_timeout_secs: 0.3,
            replay_on_timeout,
        }
    }

    #[test]
    fn heard_and_missed_notes_are_reported() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        buffer.append_chunk(&tone(440.0));
        let targets = [Note::named("A4"), Note::named("C4")];

        let mut session = GameSession::new(quick(false), Transcript::default());
        let summary = session.run(&buffer, &targets).unwrap();

        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.cancelled);
        assert_eq!(
            session.into_announcer().lines,
            vec!["show A4", "A4 Passed", "show C4", "C4 Failed"]
        );
    }

    #[test]
    fn missed_note_must_be_replayed_before_moving_on() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        let feeder = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(600));
                buffer.append_chunk(&tone(392.0));
            })
        };
        let targets = [Note::named("G4")];

        let started = Instant::now();
        let mut session = GameSession::new(quick(true), Transcript::default());
        let summary = session.run(&buffer, &targets).unwrap();
        feeder.join().unwrap();

        // the run only returns once the replayed note was heard
        assert!(started.elapsed() >= Duration::from_millis(600));
        assert!(!summary.cancelled);
        let outcomes: Vec<RoundOutcome> = summary.rounds.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![RoundOutcome::Failed]);
        assert_eq!(
            session.announcer().lines,
            vec!["show G4", "G4 Failed", "say Play G4 to continue."]
        );
    }

    #[test]
    fn previous_round_audio_does_not_answer_the_next_round() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        buffer.append_chunk(&tone(277.18));
        let targets = [Note::named("C#4/Db4"), Note::named("C#4/Db4")];

        let mut session = GameSession::new(quick(false), Transcript::default());
        let summary = session.run(&buffer, &targets).unwrap();

        let outcomes: Vec<RoundOutcome> = summary.rounds.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![RoundOutcome::Passed, RoundOutcome::Failed]);
    }

    #[test]
    fn guess_timeout_is_clamped() {
        let forever = SessionConfig {
            guess_timeout_secs: f32::INFINITY,
            ..SessionConfig::default()
        };
        assert_eq!(forever.guess_timeout(), MAX_GUESS_TIMEOUT);

        let huge = SessionConfig {
            guess_timeout_secs: 1e20,
            ..SessionConfig::default()
        };
        assert_eq!(huge.guess_timeout(), MAX_GUESS_TIMEOUT);

        let negative = SessionConfig {
            guess_timeout_secs: -3.0,
            ..SessionConfig::default()
        };
        assert_eq!(negative.guess_timeout(), Duration::ZERO);
        assert_eq!(SessionConfig::default().guess_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn cancelling_ends_the_session_early() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        let (canceller, token) = cancel_pair();
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(500));
            canceller.cancel();
        });
        let targets = [Note::named("E4"), Note::named("F4")];

        let mut session = GameSession::new(quick(true), Transcript::default()).with_cancel(token);
        let summary = session.run(&buffer, &targets).unwrap();
        trigger.join().unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.rounds.len(), 1);
    }

    #[test]
    fn stream_fault_ends_the_session_with_an_error() {
        let buffer = SharedBuffer::new(CAPACITY, RATE);
        buffer.report_fault("backend gone");
        let mut session = GameSession::new(quick(false), Transcript::default());
        let result = session.run(&buffer, &[Note::named("A4")]);
        assert!(matches!(result, Err(CaptureError::StreamFault(_))));
    }
}
