// notecard-core/src/lib.rs

//! The core logic for the notecard note-reading game.
//! This crate is responsible for audio capture, pitch detection, note mapping
//! and the listen-for-a-note game protocol. It is completely headless
//! and contains no terminal or GUI code.

pub mod audio;
pub mod buffer;
pub mod cancel;
pub mod fft;
pub mod instrument;
pub mod listener;
pub mod pitch;
pub mod session;
pub mod tuning;

pub use audio::{AudioCapture, CaptureConfig, CaptureError, CaptureGuard};
pub use buffer::{CallbackFlow, ChunkSink, Chunker, SampleBuffer, SampleSource, SharedBuffer};
pub use cancel::{cancel_pair, CancelToken, Canceller};
pub use instrument::{Instrument, InstrumentConfig, InstrumentError, Note};
pub use listener::{ListenOutcome, ListenerConfig, NoteListener, Observation};
pub use pitch::{DetectorConfig, PitchDetector};
pub use session::{Announcer, GameSession, RoundOutcome, RoundResult, SessionConfig, SessionSummary};
pub use tuning::{Accidental, NearestNote};
