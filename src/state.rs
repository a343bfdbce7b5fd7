//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: read once at startup, immutable afterwards, so a plain `Arc`
//! - **transcription**: the loaded recognizer behind the transcription service
//! - **transcoder**: the external transcoder
//! - **staging**: the staging directory handle
//! - **recognizer_slots**: semaphore bounding concurrent recognizer sessions
//! - **metrics**: the only mutable data, behind `Arc<RwLock<T>>`
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every worker thread's copy of `AppState` points at the same metrics
//! - **RwLock**: the `/metrics` snapshot reads while middleware writes
//!
//! A poisoned metrics lock only means some thread panicked mid-increment;
//! counters are still usable, so the guard is recovered instead of panicking.

use crate::config::AppConfig;
use crate::staging::transcoder::Transcoder;
use crate::staging::StagingArea;
use crate::transcription::TranscriptionService;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub transcription: Arc<TranscriptionService>,
    pub transcoder: Arc<dyn Transcoder>,
    pub staging: StagingArea,
    pub recognizer_slots: Arc<Semaphore>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
///
/// ## Fields:
/// - **request_count** / **error_count**: every request, and those answered with 4xx/5xx
/// - **active_sessions**: recognizer sessions running right now
/// - **files_transcribed** / **files_failed**: per uploaded file outcomes
/// - **endpoint_metrics**: per "METHOD /path" statistics
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_sessions: u32,
    pub files_transcribed: u64,
    pub files_failed: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for one endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Assemble the state from already-initialized collaborators.
    pub fn new(
        config: AppConfig,
        transcription: TranscriptionService,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let staging = StagingArea::new(config.staging.directory.clone());
        let recognizer_slots = Arc::new(Semaphore::new(config.recognizer.max_concurrent_sessions));
        Self {
            config: Arc::new(config),
            transcription: Arc::new(transcription),
            transcoder,
            staging,
            recognizer_slots,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    /// Called by middleware for every 4xx/5xx response.
    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record one request against `endpoint` (e.g. "POST /transcribe").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count the outcome of one uploaded file.
    pub fn record_file_outcome(&self, success: bool) {
        let mut metrics = self.metrics_mut();
        if success {
            metrics.files_transcribed += 1;
        } else {
            metrics.files_failed += 1;
        }
    }

    pub fn increment_active_sessions(&self) {
        self.metrics_mut().active_sessions += 1;
    }

    /// Saturates at zero.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Consistent copy of all counters, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::staging::transcoder::TranscodeError;
    use crate::transcription::service::tests::{FakeRecognizer, FakeRecognizerHandle};
    use futures_util::future::BoxFuture;
    use std::path::Path;

    /// Treats every upload as already canonical.
    pub(crate) struct CopyTranscoder;

    impl Transcoder for CopyTranscoder {
        fn transcode<'a>(&'a self, input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<(), TranscodeError>> {
            Box::pin(async move {
                tokio::fs::copy(input, output)
                    .await
                    .map_err(|source| TranscodeError::Spawn {
                        program: "copy".to_string(),
                        source,
                    })?;
                Ok(())
            })
        }
    }

    /// State wired to fakes and a private staging directory.
    pub(crate) fn test_state(staging_dir: &Path) -> (AppState, Arc<FakeRecognizer>) {
        let mut config = AppConfig::default();
        config.staging.directory = staging_dir.to_path_buf();
        let calls = FakeRecognizer::shared();
        let service = TranscriptionService::new(
            Arc::new(FakeRecognizerHandle(Arc::clone(&calls))),
            config.recognizer.chunk_frames,
        );
        (AppState::new(config, service, Arc::new(CopyTranscoder)), calls)
    }

    #[test]
    fn test_endpoint_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path());
        state.record_endpoint_request("POST /transcribe", 30, false);
        state.record_endpoint_request("POST /transcribe", 10, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /transcribe"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_counters() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path());
        state.record_file_outcome(true);
        state.record_file_outcome(false);
        state.record_file_outcome(false);
        state.decrement_active_sessions();
        state.increment_active_sessions();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.files_transcribed, 1);
        assert_eq!(snapshot.files_failed, 2);
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(state.recognizer_slots.available_permits(), 2);
    }
}
