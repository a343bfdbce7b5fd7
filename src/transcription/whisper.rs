//! # Whisper Recognizer
//!
//! Speech recognition backed by a Whisper model running on Candle-rs, loaded
//! once from a local model directory at startup.
//!
//! ## Model directory layout:
//! - `config.json`: model hyper-parameters (`whisper::Config`)
//! - `tokenizer.json`: HuggingFace tokenizer, also the source of special token ids
//! - `model.safetensors`: weights, memory mapped
//!
//! Any of these missing or unreadable is a startup error; the process never
//! serves requests without a working model.
//!
//! ## Decoding:
//! Whisper sees audio in 30 second windows. A session buffers incoming samples
//! and decodes each window as soon as it is full, so memory stays bounded no
//! matter how long the file is. The tail is decoded by `final_result`.
//! Decoding is greedy, without timestamp tokens. Windows the model considers
//! non-speech are dropped, which is what makes silence come back as `""`.

use crate::transcription::mel;
use crate::transcription::recognizer::{Recognizer, RecognizerSession};
use crate::transcription::transcript::{DecodingState, Transcript, WordTiming};
use anyhow::{anyhow, bail, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// A window is dropped when the model is this sure nothing is being said...
const NO_SPEECH_THRESHOLD: f64 = 0.6;
/// ...and is this unsure about the text it produced anyway.
const LOGPROB_THRESHOLD: f64 = -1.0;

/// Token ids the decoder needs, resolved from the tokenizer at load time.
#[derive(Debug, Clone)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    no_speech: u32,
    language: Option<u32>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer, language: Option<&str>) -> Result<Self> {
        let no_speech = m::NO_SPEECH_TOKENS
            .iter()
            .find_map(|token| tokenizer.token_to_id(token))
            .ok_or_else(|| anyhow!("tokenizer has none of the no-speech tokens {:?}", m::NO_SPEECH_TOKENS))?;

        let language = match language {
            Some(code) => {
                let token = tokenizer.token_to_id(&format!("<|{}|>", code));
                if token.is_none() {
                    // English-only checkpoints carry no language tokens
                    warn!(language = %code, "Model has no token for language, decoding without a hint");
                }
                token
            }
            None => None,
        };

        Ok(Self {
            sot: token_id(tokenizer, m::SOT_TOKEN)?,
            eot: token_id(tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            no_speech,
            language,
        })
    }

    fn prompt(&self) -> Vec<u32> {
        let mut tokens = vec![self.sot];
        tokens.extend(self.language);
        tokens.push(self.transcribe);
        tokens.push(self.no_timestamps);
        tokens
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("tokenizer has no id for {}", token))
}

/// Everything sessions share. Tensors are reference counted, so cloning the
/// model for a session does not copy weights.
struct WhisperShared {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    tokens: SpecialTokens,
    mel_filters: Vec<f32>,
    suppress_tokens: Tensor,
    device: Device,
}

/// A loaded Whisper model.
pub struct WhisperRecognizer {
    shared: Arc<WhisperShared>,
}

impl WhisperRecognizer {
    /// Load the model from `model_dir`.
    ///
    /// ## Errors:
    /// Missing files, malformed `config.json`, a tokenizer without Whisper's
    /// special tokens, or weights that do not match the config.
    pub fn load(model_dir: &Path, language: Option<&str>) -> Result<Self> {
        info!(model_dir = %model_dir.display(), "Loading Whisper model");
        let start_time = Instant::now();

        if !model_dir.is_dir() {
            bail!("model directory {} does not exist", model_dir.display());
        }
        let config_path = model_dir.join("config.json");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let weights_path = model_dir.join("model.safetensors");
        for path in [&config_path, &tokenizer_path, &weights_path] {
            if !path.is_file() {
                bail!("model file {} is missing", path.display());
            }
        }

        let config: Config = serde_json::from_reader(
            std::fs::File::open(&config_path).with_context(|| format!("opening {}", config_path.display()))?,
        )
        .with_context(|| format!("parsing {}", config_path.display()))?;
        debug!(?config, "Model config");

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", tokenizer_path.display(), e))?;
        let tokens = SpecialTokens::resolve(&tokenizer, language)?;

        let device = Device::Cpu;
        // SAFETY: the weights file is not modified while the process runs
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone()).context("loading Whisper weights")?;

        let mel_filters = mel::mel_filter_bank(m::SAMPLE_RATE, m::N_FFT, config.num_mel_bins);

        let suppress_tokens: Vec<f32> = (0..config.vocab_size as u32)
            .map(|id| {
                if config.suppress_tokens.contains(&id) {
                    f32::NEG_INFINITY
                } else {
                    0f32
                }
            })
            .collect();
        let suppress_tokens = Tensor::new(suppress_tokens.as_slice(), &device)?;

        info!(
            elapsed_secs = start_time.elapsed().as_secs_f64(),
            mel_bins = config.num_mel_bins,
            "Whisper model loaded"
        );

        Ok(Self {
            shared: Arc::new(WhisperShared {
                model,
                config,
                tokenizer,
                tokens,
                mel_filters,
                suppress_tokens,
                device,
            }),
        })
    }
}

impl Recognizer for WhisperRecognizer {
    fn new_session(&self, sample_rate: u32) -> Result<Box<dyn RecognizerSession>> {
        if sample_rate as usize != m::SAMPLE_RATE {
            bail!(
                "Whisper expects {} Hz audio, got {} Hz",
                m::SAMPLE_RATE,
                sample_rate
            );
        }
        Ok(Box::new(WhisperSession {
            model: self.shared.model.clone(),
            shared: Arc::clone(&self.shared),
            pending: Vec::with_capacity(m::N_SAMPLES),
            consumed_samples: 0,
            segments: Vec::new(),
        }))
    }

    fn name(&self) -> &str {
        "whisper"
    }
}

/// Outcome of decoding one window.
struct WindowDecoding {
    text: String,
    avg_logprob: f64,
    no_speech_prob: f64,
}

struct WhisperSession {
    model: m::model::Whisper,
    shared: Arc<WhisperShared>,
    /// Samples of the window being filled, scaled to [-1, 1]
    pending: Vec<f32>,
    /// Samples already decoded, for segment offsets
    consumed_samples: usize,
    segments: Vec<Transcript>,
}

impl WhisperSession {
    /// Decode `pending` as one window and append its transcript.
    fn flush_window(&mut self) -> Result<Option<String>> {
        let window = std::mem::take(&mut self.pending);
        let offset = self.consumed_samples as f64 / m::SAMPLE_RATE as f64;
        let span = window.len() as f64 / m::SAMPLE_RATE as f64;
        self.consumed_samples += window.len();

        // Digital silence never reaches the decoder
        if window.iter().all(|sample| *sample == 0.0) {
            debug!(offset, span, "Skipping silent window");
            return Ok(None);
        }

        let decoded = self.decode_window(window)?;
        if decoded.no_speech_prob > NO_SPEECH_THRESHOLD && decoded.avg_logprob < LOGPROB_THRESHOLD {
            debug!(
                offset,
                no_speech_prob = decoded.no_speech_prob,
                avg_logprob = decoded.avg_logprob,
                "Dropping non-speech window"
            );
            return Ok(None);
        }

        let conf = decoded.avg_logprob.exp().clamp(0.0, 1.0) as f32;
        let transcript = Transcript {
            result: word_timings(&decoded.text, offset, span, conf),
            text: decoded.text.trim().to_string(),
        };
        let text = transcript.text.clone();
        self.segments.push(transcript);
        Ok(Some(text))
    }

    fn decode_window(&mut self, mut window: Vec<f32>) -> Result<WindowDecoding> {
        let shared = Arc::clone(&self.shared);
        let device = &shared.device;

        // Whisper is trained on 30 second windows
        window.resize(m::N_SAMPLES, 0.0);
        let mel = m::audio::pcm_to_mel(&shared.config, &window, &shared.mel_filters);
        let n_mels = shared.config.num_mel_bins;
        let mel_len = mel.len();
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), device)?;
        let mel = mel.narrow(2, 0, m::N_FRAMES.min(mel_len / n_mels))?;

        let audio_features = self.model.encoder.forward(&mel, true)?;

        let mut tokens = shared.tokens.prompt();
        let prompt_len = tokens.len();
        let sample_len = shared.config.max_target_positions / 2;
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = f64::NAN;

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            if i == 0 {
                let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                no_speech_prob = softmax(&logits, 0)?
                    .i(shared.tokens.no_speech as usize)?
                    .to_scalar::<f32>()? as f64;
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&shared.suppress_tokens)?;

            let logits_v: Vec<f32> = logits.to_vec1()?;
            let next_token = logits_v
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(id, _)| id as u32)
                .ok_or_else(|| anyhow!("decoder produced empty logits"))?;

            let prob = softmax(&logits, D::Minus1)?
                .i(next_token as usize)?
                .to_scalar::<f32>()? as f64;
            tokens.push(next_token);
            if next_token == shared.tokens.eot || tokens.len() > shared.config.max_target_positions {
                break;
            }
            sum_logprob += prob.ln();
        }

        let generated = tokens.len() - prompt_len;
        let text = shared
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        Ok(WindowDecoding {
            text,
            avg_logprob: sum_logprob / generated.max(1) as f64,
            no_speech_prob,
        })
    }
}

impl RecognizerSession for WhisperSession {
    fn accept_waveform(&mut self, samples: &[i16]) -> Result<DecodingState> {
        let mut finalized: Vec<String> = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let room = m::N_SAMPLES - self.pending.len();
            let (now, later) = rest.split_at(room.min(rest.len()));
            self.pending
                .extend(now.iter().map(|sample| f32::from(*sample) / 32768.0));
            rest = later;

            if self.pending.len() == m::N_SAMPLES {
                finalized.extend(self.flush_window()?);
            }
        }

        if finalized.is_empty() {
            Ok(DecodingState::Running { partial: None })
        } else {
            Ok(DecodingState::Finalized {
                segment: finalized.join(" "),
            })
        }
    }

    fn final_result(mut self: Box<Self>) -> Result<Transcript> {
        if !self.pending.is_empty() {
            self.flush_window()?;
        }
        Ok(Transcript::concat(std::mem::take(&mut self.segments)))
    }
}

/// Spread the words of `text` over `[offset, offset + span]` in proportion to
/// their character position.
///
/// Whisper decoding without timestamp tokens yields text per window only, so
/// this is an estimate, exact at the window boundaries.
fn word_timings(text: &str, offset: f64, span: f64, conf: f32) -> Vec<WordTiming> {
    let text = text.trim();
    let total_chars = text.chars().count();
    if total_chars == 0 {
        return Vec::new();
    }
    let seconds_per_char = span / total_chars as f64;

    let mut timings = Vec::new();
    let mut position = 0usize;
    let mut word_start: Option<usize> = None;
    let mut word = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_whitespace() {
            if let Some(start) = word_start.take() {
                timings.push(WordTiming {
                    word: std::mem::take(&mut word),
                    start: offset + start as f64 * seconds_per_char,
                    end: offset + position as f64 * seconds_per_char,
                    conf,
                });
            }
        } else {
            word_start.get_or_insert(position);
            word.push(c);
        }
        position += 1;
    }
    timings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_timings_cover_the_window() {
        let timings = word_timings(" hello big world", 30.0, 16.0, 0.8);
        let words: Vec<&str> = timings.iter().map(|t| t.word.as_str()).collect();
        assert_eq!(words, vec!["hello", "big", "world"]);

        // 15 characters over 16 seconds
        assert!((timings[0].start - 30.0).abs() < 1e-9);
        assert!((timings[2].end - 46.0).abs() < 1e-9);
        assert!(timings.windows(2).all(|pair| pair[0].end <= pair[1].start));
        assert!(timings.iter().all(|t| t.start < t.end && t.conf == 0.8));
    }

    #[test]
    fn test_word_timings_of_empty_text() {
        assert!(word_timings("   ", 0.0, 30.0, 1.0).is_empty());
    }

    #[test]
    fn test_load_fails_fast_without_model_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = WhisperRecognizer::load(&dir.path().join("missing"), Some("en"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("does not exist"));

        std::fs::write(dir.path().join("config.json"), b"{}").unwrap();
        let err = WhisperRecognizer::load(dir.path(), Some("en")).err().unwrap();
        assert!(err.to_string().contains("tokenizer.json"));
    }
}
