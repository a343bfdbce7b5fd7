//! # Recognizer Seam
//!
//! The transcription service talks to speech recognition only through these
//! two traits. A `Recognizer` is the loaded model, shared read-only by every
//! request; a `RecognizerSession` is the per-file decoding state.
//!
//! ## Session lifecycle:
//! 1. `Recognizer::new_session(sample_rate)`: bound to one file's sample rate
//! 2. `accept_waveform(chunk)`: called repeatedly with consecutive 16-bit samples
//! 3. `final_result()`: consumes the session, so it cannot be fed again

use crate::transcription::transcript::{DecodingState, Transcript};
use anyhow::Result;

pub trait Recognizer: Send + Sync {
    /// Start decoding a new stream of mono samples at `sample_rate` Hz.
    fn new_session(&self, sample_rate: u32) -> Result<Box<dyn RecognizerSession>>;

    /// Short identifier reported by `/metrics` and in logs.
    fn name(&self) -> &str;
}

pub trait RecognizerSession: Send {
    /// Feed the next consecutive chunk of samples.
    fn accept_waveform(&mut self, samples: &[i16]) -> Result<DecodingState>;

    /// Flush whatever is buffered and return the transcript of the whole stream.
    fn final_result(self: Box<Self>) -> Result<Transcript>;
}
