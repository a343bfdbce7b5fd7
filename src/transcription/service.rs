//! # Transcription Service
//!
//! Turns one staged canonical waveform into a transcript.
//!
//! ## Two steps:
//! 1. **validate**: parse the WAV header and check the recognizer's input
//!    contract (mono, 16-bit, PCM). Success yields a `CanonicalWave`.
//! 2. **transcribe**: stream the samples to a fresh recognizer session in
//!    fixed-size chunks and return its final result.
//!
//! `transcribe` only accepts a `CanonicalWave`, and the only way to build one
//! is `validate`, so no unvalidated file can reach the recognizer.
//!
//! Both steps do blocking file I/O and CPU-bound decoding; callers run them on
//! the blocking thread pool.

use crate::audio::wav::{self, PcmReader, SampleEncoding, WaveFile, WaveHeader};
use crate::error::{FileError, ValidationError};
use crate::staging::StagedFile;
use crate::transcription::recognizer::Recognizer;
use crate::transcription::transcript::{DecodingState, Transcript};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// A staged waveform that passed validation, with its reader ready at the data chunk.
pub struct CanonicalWave {
    token: Uuid,
    header: WaveHeader,
    reader: WaveFile,
}

impl CanonicalWave {
    #[cfg(test)]
    pub fn header(&self) -> &WaveHeader {
        &self.header
    }
}

/// Validation plus chunked streaming on top of a shared recognizer.
pub struct TranscriptionService {
    recognizer: Arc<dyn Recognizer>,
    chunk_frames: usize,
}

impl TranscriptionService {
    pub fn new(recognizer: Arc<dyn Recognizer>, chunk_frames: usize) -> Self {
        Self {
            recognizer,
            chunk_frames: chunk_frames.max(1),
        }
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Check that `file` is mono, 16-bit, uncompressed PCM.
    ///
    /// ## Errors:
    /// - `FileError::Decode`: the container is corrupt or not WAV
    /// - `FileError::Validation`: the first violated constraint, in the order
    ///   channels, sample width, encoding. Encodings the WAV reader cannot
    ///   decode at all are reported as `Encoding` before anything else.
    pub fn validate(&self, file: &StagedFile) -> Result<CanonicalWave, FileError> {
        let (header, reader) = wav::open(file.path())?;
        debug!(
            token = %file.token(),
            kind = ?file.kind(),
            channels = header.channels,
            bits = header.bits_per_sample,
            encoding = %header.encoding,
            sample_rate = header.sample_rate,
            "Read waveform header"
        );

        if header.channels != 1 {
            return Err(ValidationError::Channels { found: header.channels }.into());
        }
        if header.bits_per_sample != 16 {
            return Err(ValidationError::SampleWidth {
                found: header.bits_per_sample,
            }
            .into());
        }
        if header.encoding != SampleEncoding::Pcm {
            return Err(ValidationError::Encoding { found: header.encoding }.into());
        }

        Ok(CanonicalWave {
            token: file.token(),
            header,
            reader,
        })
    }

    /// Stream the whole waveform through one recognizer session.
    pub fn transcribe(&self, wave: CanonicalWave) -> Result<Transcript, FileError> {
        let CanonicalWave { token, header, reader } = wave;
        let start_time = Instant::now();

        let mut session = self.recognizer.new_session(header.sample_rate)?;
        let mut pcm = PcmReader::new(reader);

        let mut chunk = Vec::with_capacity(self.chunk_frames);
        let mut chunks = 0usize;
        loop {
            let frames = pcm.read_chunk(self.chunk_frames, &mut chunk)?;
            if frames == 0 {
                break;
            }
            chunks += 1;

            match session.accept_waveform(&chunk)? {
                DecodingState::Finalized { segment } => {
                    debug!(token = %token, chunk = chunks, segment = %segment, "Segment finalized");
                }
                DecodingState::Running { partial: Some(partial) } => {
                    debug!(token = %token, chunk = chunks, partial = %partial, "Partial result");
                }
                DecodingState::Running { partial: None } => {}
            }
        }

        let transcript = session.final_result()?;
        debug!(
            token = %token,
            chunks,
            audio_secs = header.duration_secs(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            words = transcript.result.len(),
            "Transcription finished"
        );
        Ok(transcript)
    }

    /// `validate` followed by `transcribe`.
    pub fn transcribe_file(&self, file: &StagedFile) -> Result<Transcript, FileError> {
        let wave = self.validate(file)?;
        self.transcribe(wave)
    }
}
