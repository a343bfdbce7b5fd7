//! # Configuration Management
//!
//! This module loads the service configuration from multiple sources:
//! - Default values (built into the code)
//! - An optional TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - A few unprefixed shortcuts commonly set by deployment platforms
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT`, `MODEL_DIR`, `STAGING_DIR`
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_RECOGNIZER__MODEL_DIR`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The configuration is read once at startup and never changes afterwards;
//! handlers receive it through the shared application state.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Sample rate the recognizer accepts.
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Channel count the recognizer accepts.
pub const CANONICAL_CHANNELS: u16 = 1;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each group maps to one collaborator of the transcription pipeline
/// (HTTP server, recognizer, transcoder, staging directory), so a section can be
/// handed to the component that owns it without exposing the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub recognizer: RecognizerConfig,
    pub transcoder: TranscoderConfig,
    pub staging: StagingConfig,
}

/// HTTP server settings and upload limits.
///
/// ## Fields:
/// - `host` / `port`: bind address
/// - `max_upload_bytes`: largest accepted single file
/// - `max_files_per_request`: how many file parts one `/transcribe` call may carry
/// - `max_parallel_files`: files of one request processed at the same time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub max_files_per_request: usize,
    pub max_parallel_files: usize,
}

/// Speech recognizer settings.
///
/// ## Fields:
/// - `model_dir`: directory holding `config.json`, `tokenizer.json` and
///   `model.safetensors`; it must exist when the process starts
/// - `language`: optional language hint such as "en"
/// - `chunk_frames`: frames handed to the recognizer per call; only affects
///   call overhead versus memory footprint, never the transcript
/// - `max_concurrent_sessions`: recognizer sessions running at once across
///   all requests (decoding is CPU bound)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    pub model_dir: PathBuf,
    pub language: Option<String>,
    pub chunk_frames: usize,
    pub max_concurrent_sessions: usize,
}

/// External transcoder (ffmpeg) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Program to execute, looked up on PATH when not absolute
    pub program: String,
    /// Target sample rate of the canonical waveform
    pub sample_rate: u32,
    /// Target channel count of the canonical waveform
    pub channels: u16,
    /// Kill the transcoder after this many seconds (0 disables the limit)
    pub timeout_secs: u64,
}

/// Where uploads are staged while a request is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    pub directory: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                max_upload_bytes: 50 * 1024 * 1024,
                max_files_per_request: 16,
                max_parallel_files: 4,
            },
            recognizer: RecognizerConfig {
                model_dir: PathBuf::from("model"),
                language: Some("en".to_string()),
                chunk_frames: 4000,
                max_concurrent_sessions: 2,
            },
            transcoder: TranscoderConfig {
                program: "ffmpeg".to_string(),
                sample_rate: CANONICAL_SAMPLE_RATE,
                channels: CANONICAL_CHANNELS,
                timeout_secs: 300,
            },
            staging: StagingConfig {
                directory: PathBuf::from("tmp"),
            },
        }
    }
}

impl TranscoderConfig {
    /// The configured timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`: Override server port
    /// - `APP_RECOGNIZER__CHUNK_FRAMES=8000`: Override chunk size
    /// - `APP_TRANSCODER__PROGRAM=/usr/local/bin/ffmpeg`: Override transcoder
    /// - `MODEL_DIR=/models/whisper-base`: Shortcut for the model directory
    /// - `STAGING_DIR=/var/tmp/uploads`: Shortcut for the staging directory
    ///
    /// Sections and keys are separated by a double underscore because many
    /// keys contain single underscores themselves.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms set these without the APP_ prefix
        for (var, key) in [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("MODEL_DIR", "recognizer.model_dir"),
            ("STAGING_DIR", "staging.directory"),
        ] {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Every size and concurrency limit allows at least one unit of work
    /// - The transcoder has a program and targets the format the recognizer
    ///   accepts (16 kHz mono); anything else would fail every request
    ///
    /// The model directory is checked separately when the recognizer loads,
    /// so that the error names the missing file rather than just the directory.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.server.max_files_per_request == 0 {
            return Err(anyhow::anyhow!("Max files per request must be greater than 0"));
        }

        if self.server.max_parallel_files == 0 {
            return Err(anyhow::anyhow!("Max parallel files must be greater than 0"));
        }

        if self.recognizer.chunk_frames == 0 {
            return Err(anyhow::anyhow!("Recognizer chunk size must be greater than 0"));
        }

        if self.recognizer.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent recognizer sessions must be greater than 0"));
        }

        if self.transcoder.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcoder program cannot be empty"));
        }

        if self.transcoder.sample_rate != CANONICAL_SAMPLE_RATE {
            return Err(anyhow::anyhow!(
                "Transcoder sample rate must be {} Hz, got {}",
                CANONICAL_SAMPLE_RATE,
                self.transcoder.sample_rate
            ));
        }

        if self.transcoder.channels != CANONICAL_CHANNELS {
            return Err(anyhow::anyhow!(
                "Transcoder must produce mono audio, got {} channels",
                self.transcoder.channels
            ));
        }

        if self.staging.directory.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Staging directory cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.transcoder.sample_rate, 16000);
        assert_eq!(config.transcoder.channels, 1);
        assert_eq!(config.recognizer.chunk_frames, 4000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recognizer.chunk_frames = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transcoder.program = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.staging.directory = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transcoder_must_target_recognizer_format() {
        let mut config = AppConfig::default();
        config.transcoder.sample_rate = 44100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("16000"));

        let mut config = AppConfig::default();
        config.transcoder.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transcoder.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transcoder_timeout() {
        let mut config = AppConfig::default();
        assert_eq!(config.transcoder.timeout(), Some(Duration::from_secs(300)));
        config.transcoder.timeout_secs = 0;
        assert_eq!(config.transcoder.timeout(), None);
    }

    #[test]
    fn test_defaults_survive_config_layering() {
        // Round-trips the defaults through the same source the loader starts from
        let layered: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(layered.staging.directory, PathBuf::from("tmp"));
        assert_eq!(layered.recognizer.language.as_deref(), Some("en"));
    }
}
