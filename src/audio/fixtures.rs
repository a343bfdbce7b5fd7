//! WAV builders shared by unit tests.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

fn write_wav(spec: WavSpec, write: impl FnOnce(&mut WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        write(&mut writer);
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// 16-bit PCM with interleaved `samples`.
pub fn pcm16_wav(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    write_wav(spec, |writer| {
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
    })
}

/// 8-bit mono PCM.
pub fn pcm8_wav(sample_rate: u32, samples: &[i8]) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 8,
        sample_format: SampleFormat::Int,
    };
    write_wav(spec, |writer| {
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
    })
}

/// 32-bit IEEE float mono.
pub fn float_wav(sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    write_wav(spec, |writer| {
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
    })
}

/// `secs` of digital silence, mono 16 kHz.
pub fn silent_wav(secs: u32) -> Vec<u8> {
    pcm16_wav(1, 16000, &vec![0; (16000 * secs) as usize])
}

/// Offset of the fmt chunk body.
fn fmt_body(bytes: &[u8]) -> usize {
    bytes.windows(4).position(|id| id == b"fmt ").unwrap() + 8
}

/// Rewrite the format tag, e.g. to 0x0007 (mu-law).
pub fn with_format_tag(mut bytes: Vec<u8>, tag: u16) -> Vec<u8> {
    let at = fmt_body(&bytes);
    bytes[at..at + 2].copy_from_slice(&tag.to_le_bytes());
    bytes
}

/// Rewrite the block align field, leaving everything else as written.
pub fn with_block_align(mut bytes: Vec<u8>, block_align: u16) -> Vec<u8> {
    let at = fmt_body(&bytes) + 12;
    bytes[at..at + 2].copy_from_slice(&block_align.to_le_bytes());
    bytes
}
