//! # Transcribe Gateway - Main Application Entry Point
//!
//! HTTP service that turns uploaded audio files into transcripts:
//! upload → ffmpeg transcode → speech recognizer → cleanup → JSON response.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **state**: Shared application state and metrics
//! - **staging**: Per-upload staging paths with guaranteed cleanup, plus the transcoder
//! - **audio**: WAV header parsing and PCM streaming
//! - **transcription**: Recognizer seam, Whisper backend and the transcription service
//! - **handlers**: The `/transcribe` endpoint and its batch report
//! - **health**: `/healthcheck` and `/metrics`
//! - **middleware**: Request logging and endpoint metrics
//! - **error**: Request-level and per-file error types
//!
//! ## Startup order:
//! The recognizer model is loaded before the server binds. If it cannot be
//! loaded the process exits with an error instead of serving requests it
//! could never answer.

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod staging;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use staging::transcoder::FfmpegTranscoder;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{TranscriptionService, WhisperRecognizer};

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting transcribe-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        model_dir = %config.recognizer.model_dir.display(),
        staging_dir = %config.staging.directory.display(),
        transcoder = %config.transcoder.program,
        "Configuration loaded"
    );

    // Fail fast: no model, no server
    let recognizer = WhisperRecognizer::load(&config.recognizer.model_dir, config.recognizer.language.as_deref())
        .context("failed to load the speech recognition model")?;
    let transcription = TranscriptionService::new(Arc::new(recognizer), config.recognizer.chunk_frames);
    let transcoder = Arc::new(FfmpegTranscoder::new(&config.transcoder));

    let app_state = AppState::new(config.clone(), transcription, transcoder);
    app_state.staging.prepare().with_context(|| {
        format!(
            "failed to create staging directory {}",
            app_state.staging.root().display()
        )
    })?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse order of registration for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/healthcheck", web::get().to(health::health_check))
            .route("/transcribe", web::post().to(handlers::transcribe))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Lets in-flight requests finish, so their staged files get cleaned up
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: log filter, e.g. "transcribe_gateway=info"
/// - If not set, defaults to "transcribe_gateway=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcribe_gateway=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Set `SHUTDOWN_SIGNAL` on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers, relying on actix defaults: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once the shutdown flag is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
