//! # External Transcoder
//!
//! Converts whatever the client uploaded into the canonical waveform
//! (mono, 16-bit PCM, fixed sample rate, uncompressed WAV) by running ffmpeg
//! as a subprocess.
//!
//! ## Contract:
//! - The subprocess is always awaited to completion before transcription starts
//! - Non-zero exit, spawn failure, timeout or a missing/empty output file is an error
//! - Errors carry the tool's captured standard error for diagnosis
//! - The child is killed if the request future is dropped mid-run (`kill_on_drop`)

use crate::config::TranscoderConfig;
use actix_web::http::StatusCode;
use futures_util::future::BoxFuture;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Most stderr kept on an error; ffmpeg prints the real cause last.
const MAX_STDERR_BYTES: usize = 4096;

/// Anything that can turn an arbitrary audio file into the canonical waveform.
pub trait Transcoder: Send + Sync {
    /// Write the canonical form of `input` to `output`. `input` is never modified.
    fn transcode<'a>(&'a self, input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<(), TranscodeError>>;
}

#[derive(Debug)]
pub enum TranscodeError {
    /// The program could not be started or waited on
    Spawn { program: String, source: io::Error },
    /// The program exited unsuccessfully
    Failed { code: Option<i32>, stderr: String },
    /// The program exited successfully but wrote nothing
    MissingOutput { stderr: String },
    /// The program was killed after running too long
    TimedOut { secs: u64 },
}

impl TranscodeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TranscodeError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            TranscodeError::Failed { .. } | TranscodeError::MissingOutput { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            TranscodeError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::Spawn { program, source } => {
                write!(f, "failed to run `{}`: {}", program, source)
            }
            TranscodeError::Failed { code: Some(code), stderr } => {
                write!(f, "transcoder exited with status {}: {}", code, stderr)
            }
            TranscodeError::Failed { code: None, stderr } => {
                write!(f, "transcoder was terminated by a signal: {}", stderr)
            }
            TranscodeError::MissingOutput { stderr } if stderr.is_empty() => {
                write!(f, "transcoder produced no output file")
            }
            TranscodeError::MissingOutput { stderr } => {
                write!(f, "transcoder produced no output file: {}", stderr)
            }
            TranscodeError::TimedOut { secs } => {
                write!(f, "transcoder did not finish within {}s", secs)
            }
        }
    }
}

impl std::error::Error for TranscodeError {}

/// ffmpeg invoked as `<program> ... -i <input> -ac <channels> -ar <rate> ... <output>`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
    sample_rate: u32,
    channels: u16,
    timeout: Option<Duration>,
}

impl FfmpegTranscoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            timeout: config.timeout(),
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-nostdin", "-hide_banner", "-loglevel", "error", "-n", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.push("-ac".into());
        args.push(self.channels.to_string().into());
        args.push("-ar".into());
        args.push(self.sample_rate.to_string().into());
        args.push("-acodec".into());
        args.push("pcm_s16le".into());
        args.push("-f".into());
        args.push("wav".into());
        args.push(output.as_os_str().to_owned());
        args
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let mut command = Command::new(&self.program);
        command
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_error = |source| TranscodeError::Spawn {
            program: self.program.clone(),
            source,
        };

        let child = command.spawn().map_err(spawn_error)?;
        let finished = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| TranscodeError::TimedOut {
                    secs: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(spawn_error)?;

        let stderr = capture_stderr(&finished.stderr);
        if !finished.status.success() {
            return Err(TranscodeError::Failed {
                code: finished.status.code(),
                stderr,
            });
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => {
                debug!(
                    input = %input.display(),
                    output = %output.display(),
                    bytes = meta.len(),
                    "Transcoder finished"
                );
                Ok(())
            }
            _ => Err(TranscodeError::MissingOutput { stderr }),
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode<'a>(&'a self, input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<(), TranscodeError>> {
        Box::pin(self.run(input, output))
    }
}

/// Lossy UTF-8 stderr, trimmed, keeping only the tail when it is long.
fn capture_stderr(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() <= MAX_STDERR_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - MAX_STDERR_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
