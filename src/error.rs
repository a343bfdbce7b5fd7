//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **AppError**: a failure of the whole HTTP request (malformed multipart body,
//!   oversized upload, no files). It implements `ResponseError`, so handlers can
//!   return it with `?`.
//! - **FileError**: a failure of one uploaded file's pipeline. These are never
//!   returned from a handler directly; the batch report turns each one into a
//!   per-file entry so sibling files keep their transcripts.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "expected 1 channel, found 2",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use crate::audio::wav::{DecodeError, SampleEncoding};
use crate::staging::transcoder::TranscodeError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Request-level errors.
///
/// ## Error Categories:
/// - **BadRequest**: Client sent an unusable request (400 errors)
/// - **PayloadTooLarge**: An uploaded file exceeds the configured limit (413 errors)
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid or malformed data
    BadRequest(String),

    /// An uploaded file is larger than `server.max_upload_bytes`
    PayloadTooLarge(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::PayloadTooLarge(msg) => ("payload_too_large", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

/// A staged waveform does not meet the recognizer's input contract.
///
/// Each variant names the violated constraint and what the file actually had.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Channel count is not 1
    Channels { found: u16 },
    /// Sample width is not 16 bits
    SampleWidth { found: u16 },
    /// Samples are not uncompressed integer PCM
    Encoding { found: SampleEncoding },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Channels { found } => {
                write!(f, "audio must be mono: expected 1 channel, found {}", found)
            }
            ValidationError::SampleWidth { found } => {
                write!(f, "audio must be 16-bit: found {}-bit samples", found)
            }
            ValidationError::Encoding { found } => {
                write!(f, "audio must be uncompressed PCM: found {} encoding", found)
            }
        }
    }
}

/// Failure of one file's stage → transcode → validate → transcribe pipeline.
#[derive(Debug)]
pub enum FileError {
    /// Staged file could not be written (disk full, permission denied, ...)
    Storage(std::io::Error),
    /// The external transcoder failed
    Transcode(TranscodeError),
    /// The transcoded file violates the recognizer's format contract
    Validation(ValidationError),
    /// The waveform container is corrupt or truncated
    Decode(DecodeError),
    /// The recognizer itself failed
    Recognizer(String),
    /// The transcript could not be turned into JSON
    Serialize(serde_json::Error),
}

impl FileError {
    /// Machine-readable error type used in per-file JSON entries.
    pub fn error_type(&self) -> &'static str {
        match self {
            FileError::Storage(_) => "storage_error",
            FileError::Transcode(_) => "transcode_error",
            FileError::Validation(_) => "validation_error",
            FileError::Decode(_) => "decode_error",
            FileError::Recognizer(_) => "recognizer_error",
            FileError::Serialize(_) => "serialization_error",
        }
    }

    /// HTTP status this failure would carry on its own.
    ///
    /// ## Mapping:
    /// - Validation / Decode → 400 (the client sent unusable audio)
    /// - Transcode → 422 when ffmpeg rejected the input, 500 when it could not
    ///   run, 504 when it timed out
    /// - Storage / Recognizer / Serialize → 500
    pub fn status_code(&self) -> StatusCode {
        match self {
            FileError::Validation(_) | FileError::Decode(_) => StatusCode::BAD_REQUEST,
            FileError::Transcode(err) => err.status_code(),
            FileError::Storage(_) | FileError::Recognizer(_) | FileError::Serialize(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::Storage(err) => write!(f, "Storage error: {}", err),
            FileError::Transcode(err) => write!(f, "Transcode error: {}", err),
            FileError::Validation(err) => write!(f, "Validation error: {}", err),
            FileError::Decode(err) => write!(f, "Decode error: {}", err),
            FileError::Recognizer(msg) => write!(f, "Recognizer error: {}", msg),
            FileError::Serialize(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for FileError {}

impl From<TranscodeError> for FileError {
    fn from(err: TranscodeError) -> Self {
        FileError::Transcode(err)
    }
}

impl From<ValidationError> for FileError {
    fn from(err: ValidationError) -> Self {
        FileError::Validation(err)
    }
}

impl From<DecodeError> for FileError {
    fn from(err: DecodeError) -> Self {
        FileError::Decode(err)
    }
}

impl From<serde_json::Error> for FileError {
    fn from(err: serde_json::Error) -> Self {
        FileError::Serialize(err)
    }
}

impl From<anyhow::Error> for FileError {
    fn from(err: anyhow::Error) -> Self {
        FileError::Recognizer(format!("{:#}", err))
    }
}

/// Type alias for request handlers.
pub type AppResult<T> = Result<T, AppError>;
