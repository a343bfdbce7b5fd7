//! # Transcription Module
//!
//! Speech-to-text for staged canonical waveforms.
//!
//! ## Key Components:
//! - **Recognizer seam**: `Recognizer` / `RecognizerSession` traits
//! - **Whisper backend**: Candle-rs implementation of the seam, loaded at startup
//! - **Transcription Service**: header validation and chunked streaming
//! - **Transcript types**: the JSON returned per file

pub mod mel;
pub mod recognizer;
pub mod service;
pub mod transcript;
pub mod whisper;

pub use service::TranscriptionService;
pub use transcript::Transcript;
pub use whisper::WhisperRecognizer;
