//! # Transcription Endpoint
//!
//! `POST /transcribe` accepts a multipart body with one or more audio files and
//! answers with one transcript (or error) per file.
//!
//! ## Per-file pipeline:
//! 1. **stage**: write the upload under a fresh token in the staging directory
//! 2. **transcode**: ffmpeg converts it to mono 16-bit PCM WAV
//! 3. **validate + transcribe**: on the blocking pool, holding a recognizer slot
//! 4. **cleanup**: every staged path is deleted, whatever happened above
//!
//! Files of one request run concurrently (up to `server.max_parallel_files`),
//! each with its own `StagingLease`, and their failures are isolated from each
//! other. See `report` for how outcomes become the response.
//!
//! ## Request-level rejections:
//! - no file parts → 400
//! - more than `server.max_files_per_request` files → 400
//! - a file larger than `server.max_upload_bytes` → 413
//!
//! These are detected while reading the body, before anything is staged.

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult, FileError};
use crate::handlers::report::{BatchReport, FileOutcome};
use crate::staging::StagingLease;
use crate::state::AppState;
use crate::transcription::Transcript;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// One file part read from the request body.
#[derive(Debug)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub async fn transcribe(state: web::Data<AppState>, mut payload: Multipart) -> AppResult<HttpResponse> {
    let uploads = read_uploads(&mut payload, &state.config.server).await?;
    if uploads.is_empty() {
        return Err(AppError::BadRequest(
            "request contains no audio files; send them as multipart file parts".to_string(),
        ));
    }

    let file_count = uploads.len();
    let start_time = Instant::now();
    let parallel = state.config.server.max_parallel_files.max(1);

    let outcomes: Vec<FileOutcome> = stream::iter(uploads)
        .map(|upload| process_upload(state.clone(), upload))
        .buffered(parallel)
        .collect()
        .await;

    let report = BatchReport::from_outcomes(outcomes);
    info!(
        files = file_count,
        status = report.status().as_u16(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Transcription request finished"
    );
    Ok(report.into_response())
}

/// Read every file part into memory, enforcing the request limits.
///
/// Parts without a filename are ordinary form fields and are skipped.
async fn read_uploads(payload: &mut Multipart, limits: &ServerConfig) -> AppResult<Vec<Upload>> {
    let mut uploads = Vec::new();
    let mut index = 0usize;

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let filename = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .map(str::to_string);

        let Some(filename) = filename else {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        };

        index += 1;
        if uploads.len() == limits.max_files_per_request {
            return Err(AppError::BadRequest(format!(
                "too many files: at most {} per request",
                limits.max_files_per_request
            )));
        }

        let filename = if filename.trim().is_empty() {
            format!("file-{}", index)
        } else {
            filename
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if bytes.len() + chunk.len() > limits.max_upload_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "{} exceeds the {} byte upload limit",
                    filename, limits.max_upload_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        uploads.push(Upload { filename, bytes });
    }

    Ok(uploads)
}

/// Run one file through the pipeline. Never fails: errors become the outcome.
async fn process_upload(state: web::Data<AppState>, upload: Upload) -> FileOutcome {
    let span = info_span!("upload", filename = %upload.filename, bytes = upload.bytes.len());
    async move {
        let start_time = Instant::now();
        let mut lease = state.staging.lease();

        let result = run_pipeline(&state, &mut lease, &upload).await;
        let removed = lease.cleanup();

        match &result {
            Ok(transcript) => info!(
                words = transcript.result.len(),
                chars = transcript.text.len(),
                removed,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "File transcribed"
            ),
            Err(err) => warn!(
                error_type = err.error_type(),
                status = err.status_code().as_u16(),
                error = %err,
                removed,
                "File failed"
            ),
        }
        state.record_file_outcome(result.is_ok());

        FileOutcome {
            filename: upload.filename,
            result,
        }
    }
    .instrument(span)
    .await
}

async fn run_pipeline(
    state: &web::Data<AppState>,
    lease: &mut StagingLease,
    upload: &Upload,
) -> Result<Transcript, FileError> {
    let raw = lease.stage(&upload.filename, &upload.bytes).await?;
    let wave = lease.transcode(state.transcoder.as_ref(), &raw).await?;

    let permit = Arc::clone(&state.recognizer_slots)
        .acquire_owned()
        .await
        .map_err(|_| FileError::Recognizer("recognizer is shutting down".to_string()))?;

    let service = Arc::clone(&state.transcription);
    let session = ActiveSession::start(state.clone());
    web::block(move || {
        // Held until decoding ends, even if the request is dropped meanwhile
        let _slot = (permit, session);
        service.transcribe_file(&wave)
    })
    .await
    .map_err(|e| FileError::Recognizer(format!("transcription task failed: {}", e)))?
}

/// Counts a running recognizer session in the metrics for as long as it lives.
struct ActiveSession(web::Data<AppState>);

impl ActiveSession {
    fn start(state: web::Data<AppState>) -> Self {
        state.increment_active_sessions();
        Self(state)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.decrement_active_sessions();
    }
}
