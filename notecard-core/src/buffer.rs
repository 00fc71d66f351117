//! # Sample Buffer Module
//!
//! The sliding window of recent audio that the capture callback writes and the
//! listener reads.
//!
//! ## Features
//! - Fixed-capacity window; each appended chunk pushes the oldest samples out
//! - Lock-protected shared handle so snapshots are never torn by a concurrent shift
//! - Typed chunk callback (`ChunkSink`) with a re-framing, downmixing `Chunker`

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::audio::CaptureError;

/// A fixed-capacity window over the most recent samples. Newest samples sit at the tail.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
}

impl SampleBuffer {
    /// Creates a window of `capacity` zeroed samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shifts the window left by `chunk.len()` and writes `chunk` into the freed tail.
    ///
    /// An empty chunk is a no-op. A chunk longer than the window keeps only its last
    /// `capacity` samples.
    pub fn append_chunk(&mut self, chunk: &[f32]) {
        if chunk.is_empty() {
            return;
        }
        let capacity = self.samples.len();
        if chunk.len() >= capacity {
            self.samples.copy_from_slice(&chunk[chunk.len() - capacity..]);
            return;
        }
        self.samples.copy_within(chunk.len().., 0);
        self.samples[capacity - chunk.len()..].copy_from_slice(chunk);
    }

    /// Zeroes every sample.
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }
}

/// Anything the listener can take a consistent copy of the current audio window from.
pub trait SampleSource {
    /// Returns a copy of the current window, or the fault that ended the capture.
    fn snapshot(&self) -> Result<Vec<f32>, CaptureError>;

    /// Sample rate of the window's audio in Hz.
    fn sample_rate(&self) -> u32;

    /// Number of samples in every snapshot.
    fn capacity(&self) -> usize;

    /// Forgets the audio heard so far. A recorded fault is kept.
    fn discard_window(&self);
}

/// Cloneable, thread-safe handle to a `SampleBuffer`.
///
/// The capture callback is the sole writer; readers only ever see whole chunks because both
/// the shift and the copy happen under the same lock.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    window: Arc<Mutex<SampleBuffer>>,
    fault: Arc<Mutex<Option<String>>>,
    sample_rate: u32,
}

impl SharedBuffer {
    pub fn new(capacity: usize, sample_rate: u32) -> Self {
        Self {
            window: Arc::new(Mutex::new(SampleBuffer::new(capacity))),
            fault: Arc::new(Mutex::new(None)),
            sample_rate,
        }
    }

    pub fn capacity(&self) -> usize {
        self.window.lock().capacity()
    }

    pub fn append_chunk(&self, chunk: &[f32]) {
        self.window.lock().append_chunk(chunk);
    }

    /// Copies the window out under the lock.
    pub fn contents(&self) -> Vec<f32> {
        self.window.lock().samples().to_vec()
    }

    /// Records a stream failure; every later snapshot returns it as an error.
    pub fn report_fault(&self, message: impl Into<String>) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(message.into());
        }
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Zeroes the window and forgets any recorded fault.
    pub fn reset(&self) {
        self.window.lock().clear();
        *self.fault.lock() = None;
    }

    pub(crate) fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }
}

impl SampleSource for SharedBuffer {
    fn snapshot(&self) -> Result<Vec<f32>, CaptureError> {
        match self.fault() {
            Some(message) => Err(CaptureError::StreamFault(message)),
            None => Ok(self.contents()),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn capacity(&self) -> usize {
        SharedBuffer::capacity(self)
    }

    fn discard_window(&self) {
        self.window.lock().clear();
    }
}

/// What the capture callback should do after handing over a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFlow {
    Continue,
    Stop,
}

/// Receiver of fixed-size mono chunks from the capture callback.
pub trait ChunkSink: Send + 'static {
    fn on_chunk(&mut self, chunk: &[f32]) -> CallbackFlow;
}

impl ChunkSink for SharedBuffer {
    fn on_chunk(&mut self, chunk: &[f32]) -> CallbackFlow {
        self.append_chunk(chunk);
        CallbackFlow::Continue
    }
}

/// Re-frames arbitrary-sized interleaved device callbacks into exact mono chunks.
///
/// Audio backends rarely honour a requested period size, so incoming data accumulates here
/// until a full `chunk_size` is available. Once the sink answers `Stop`, all further data is
/// discarded.
pub struct Chunker<S: ChunkSink> {
    sink: S,
    chunk_size: usize,
    channels: usize,
    pending: Vec<f32>,
    stopped: bool,
}

impl<S: ChunkSink> Chunker<S> {
    pub fn new(sink: S, chunk_size: usize, channels: usize) -> Self {
        if chunk_size == 0 || channels == 0 {
            warn!(chunk_size, channels, "Invalid chunk layout, using at least one of each");
        }
        let chunk_size = chunk_size.max(1);
        Self {
            sink,
            chunk_size,
            channels: channels.max(1),
            pending: Vec::with_capacity(chunk_size * 2),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Accepts interleaved f32 frames.
    pub fn push(&mut self, data: &[f32]) {
        if self.stopped {
            return;
        }
        if self.channels == 1 {
            self.pending.extend_from_slice(data);
        } else {
            // downmix interleaved frames to mono by averaging channels
            let channels = self.channels;
            self.pending.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
        self.flush_full_chunks();
    }

    /// Accepts interleaved 16-bit frames, scaled to [-1, 1].
    pub fn push_i16(&mut self, data: &[i16]) {
        let converted: Vec<f32> = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
        self.push(&converted);
    }

    fn flush_full_chunks(&mut self) {
        while self.pending.len() >= self.chunk_size {
            let flow = self.sink.on_chunk(&self.pending[..self.chunk_size]);
            self.pending.drain(..self.chunk_size);
            if flow == CallbackFlow::Stop {
                self.stopped = true;
                self.pending.clear();
                break;
            }
        }
    }
}
