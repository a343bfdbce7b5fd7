//! # Audio Module
//!
//! Waveform container handling for the transcription pipeline.
//!
//! ## Canonical Format:
//! - **Sample Rate**: 16kHz (16,000 Hz), produced by the transcoder
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers, uncompressed

pub mod wav;

#[cfg(test)]
pub(crate) mod fixtures;
