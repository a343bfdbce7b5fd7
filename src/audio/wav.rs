//! # Waveform Container Reading
//!
//! Opens staged WAV files with `hound` and streams their 16-bit samples in
//! caller-sized chunks, without loading the data chunk into memory.
//!
//! ## Error split:
//! - **Encoding the reader cannot decode** (A-law, mu-law, ADPCM, ...): the
//!   container is fine but the samples are not PCM, so this is reported as a
//!   `ValidationError::Encoding` like any other format violation
//! - **Everything else** (not RIFF/WAVE, missing chunks, a fmt chunk whose
//!   block align disagrees with its channels and sample width, truncated data):
//!   a `DecodeError`
//!
//! Whether an acceptable container has the right format is decided by the
//! transcription service's validation step, not here.

use crate::error::{FileError, ValidationError};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// A WAV file opened for streaming.
pub type WaveFile = hound::WavReader<BufReader<File>>;

/// How the samples in the `data` chunk are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Pcm,
    Float,
    /// Compressed or otherwise non-PCM format tag
    Unsupported,
}

impl From<hound::SampleFormat> for SampleEncoding {
    fn from(format: hound::SampleFormat) -> Self {
        match format {
            hound::SampleFormat::Int => SampleEncoding::Pcm,
            hound::SampleFormat::Float => SampleEncoding::Float,
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleEncoding::Pcm => write!(f, "integer PCM"),
            SampleEncoding::Float => write!(f, "IEEE float"),
            SampleEncoding::Unsupported => write!(f, "a compressed or unknown"),
        }
    }
}

/// The container is corrupt, truncated or not a WAV file at all.
#[derive(Debug)]
pub struct DecodeError(hound::Error);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            hound::Error::IoError(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                write!(f, "waveform is truncated")
            }
            hound::Error::IoError(err) => write!(f, "failed to read waveform: {}", err),
            hound::Error::FormatError(msg) => write!(f, "malformed WAV container: {}", msg),
            other => write!(f, "unreadable waveform: {}", other),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<hound::Error> for DecodeError {
    fn from(err: hound::Error) -> Self {
        DecodeError(err)
    }
}

/// Everything the pipeline needs to know about a WAV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveHeader {
    pub encoding: SampleEncoding,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Samples per channel in the data chunk
    pub frames: u32,
}

impl WaveHeader {
    pub fn of<R: Read>(reader: &hound::WavReader<R>) -> Self {
        let spec = reader.spec();
        Self {
            encoding: spec.sample_format.into(),
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            frames: reader.duration(),
        }
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        f64::from(self.frames) / f64::from(self.sample_rate)
    }
}

/// Open a WAV file and read its header.
pub fn open(path: &Path) -> Result<(WaveHeader, WaveFile), FileError> {
    match hound::WavReader::open(path) {
        Ok(reader) => Ok((WaveHeader::of(&reader), reader)),
        Err(hound::Error::Unsupported) => Err(ValidationError::Encoding {
            found: SampleEncoding::Unsupported,
        }
        .into()),
        Err(err) => Err(DecodeError::from(err).into()),
    }
}

/// Streams the samples of a mono 16-bit waveform.
pub struct PcmReader<R: Read> {
    samples: hound::WavIntoSamples<R, i16>,
}

impl<R: Read> PcmReader<R> {
    pub fn new(reader: hound::WavReader<R>) -> Self {
        Self {
            samples: reader.into_samples(),
        }
    }

    /// Read up to `frames` samples into `buf`, replacing its contents.
    ///
    /// Returns the number read; 0 means the data chunk is exhausted.
    pub fn read_chunk(&mut self, frames: usize, buf: &mut Vec<i16>) -> Result<usize, DecodeError> {
        buf.clear();
        for sample in self.samples.by_ref().take(frames) {
            buf.push(sample?);
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixtures;
    use std::io::Cursor;

    fn reader(bytes: Vec<u8>) -> hound::Result<hound::WavReader<Cursor<Vec<u8>>>> {
        hound::WavReader::new(Cursor::new(bytes))
    }

    #[test]
    fn test_header_of_canonical_wave() {
        let samples: Vec<i16> = (0..1600).map(|i| (i % 100) as i16).collect();
        let header = WaveHeader::of(&reader(fixtures::pcm16_wav(1, 16000, &samples)).unwrap());

        assert_eq!(header.encoding, SampleEncoding::Pcm);
        assert_eq!(header.channels, 1);
        assert_eq!(header.sample_rate, 16000);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.frames, 1600);
        assert!((header.duration_secs() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_header_reports_stereo_frames_and_float() {
        let header = WaveHeader::of(&reader(fixtures::pcm16_wav(2, 44100, &[0; 16])).unwrap());
        assert_eq!(header.channels, 2);
        assert_eq!(header.frames, 8);

        let header = WaveHeader::of(&reader(fixtures::float_wav(16000, &[0.0; 4])).unwrap());
        assert_eq!(header.encoding, SampleEncoding::Float);
        assert_eq!(header.bits_per_sample, 32);
    }

    #[test]
    fn test_open_splits_encoding_from_decode_errors() {
        let dir = tempfile::tempdir().unwrap();

        let mulaw = dir.path().join("mulaw.wav");
        std::fs::write(&mulaw, fixtures::with_format_tag(fixtures::pcm16_wav(1, 8000, &[0; 8]), 0x0007)).unwrap();
        let err = open(&mulaw).err().unwrap();
        assert!(matches!(
            err,
            FileError::Validation(ValidationError::Encoding {
                found: SampleEncoding::Unsupported
            })
        ));

        let mp3 = dir.path().join("song.mp3");
        std::fs::write(&mp3, b"ID3\x04 definitely an mp3").unwrap();
        assert!(matches!(open(&mp3).err().unwrap(), FileError::Decode(_)));

        let empty = dir.path().join("empty.wav");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(open(&empty).err().unwrap(), FileError::Decode(_)));
    }

    #[test]
    fn test_rejects_riff_that_is_not_wave() {
        let mut bytes = fixtures::pcm16_wav(1, 16000, &[0; 4]);
        bytes[8..12].copy_from_slice(b"AVI ");
        assert!(reader(bytes).is_err());
    }

    #[test]
    fn test_pcm_reader_streams_in_chunks() {
        let samples: Vec<i16> = (0..10).map(|i| i * 100 - 300).collect();
        let mut pcm = PcmReader::new(reader(fixtures::pcm16_wav(1, 16000, &samples)).unwrap());

        let mut buf = Vec::new();
        let mut collected = Vec::new();
        let mut sizes = Vec::new();
        loop {
            let frames = pcm.read_chunk(4, &mut buf).unwrap();
            if frames == 0 {
                break;
            }
            sizes.push(frames);
            collected.extend_from_slice(&buf);
        }

        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(collected, samples);
    }

    #[test]
    fn test_truncated_data_is_decode_error() {
        let mut bytes = fixtures::pcm16_wav(1, 16000, &[7; 10]);
        bytes.truncate(bytes.len() - 5);
        let mut pcm = PcmReader::new(reader(bytes).unwrap());

        let mut buf = Vec::new();
        let err = pcm.read_chunk(100, &mut buf).unwrap_err();
        assert!(matches!(err.0, hound::Error::IoError(_)));
    }
}
