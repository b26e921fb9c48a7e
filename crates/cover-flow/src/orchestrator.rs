//! The coverage orchestrator.
//!
//! Decides, for one `(repository, tag)` request, whether to answer from the
//! cache, report an active run, start a new run under the admission gate, or
//! defer to the overflow queue. Runs execute on detached tasks; `resolve`
//! never waits for one.
//!
//! Store errors on the request path are logged and treated as misses, so a
//! flaky store leads to extra runs rather than stuck requests.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cover_core::{job_span, KvStore};
use futures::FutureExt;
use tracing::Instrument;

use crate::admission::{AdmissionGate, AdmissionPermit, DEFAULT_Q_MAX};
use crate::cache::{ResultCache, DEFAULT_RESULT_TTL};
use crate::error::Result;
use crate::job_key::{CoverageJobKey, SupportedToolchains};
use crate::metrics::CoverMetrics;
use crate::parser;
use crate::queue::OverflowQueue;
use crate::registry::InProgressRegistry;
use crate::result::{
    CoverageResult, Outcome, Resolution, RunFailure, MISSING_REPOSITORY_TEXT, NO_TESTS_TEXT,
};
use crate::runner::{RunReport, Runner, RunnerError, DEFAULT_IMAGE_REPO};

/// Default wall-clock limit of one run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace added to the run timeout before a marker counts as stale.
pub const STALE_MARKER_GRACE: Duration = Duration::from_secs(60);

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Admission tokens per instance.
    pub q_max: usize,
    /// Wall-clock limit of one run.
    pub run_timeout: Duration,
    /// Lifetime of cached results.
    pub result_ttl: Duration,
    /// Age after which an in-progress marker is ignored.
    pub stale_after: Duration,
    /// Accepted toolchain tags.
    pub toolchains: SupportedToolchains,
    /// Image repository named in unsupported-tag messages.
    pub image_repo: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            q_max: DEFAULT_Q_MAX,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            result_ttl: DEFAULT_RESULT_TTL,
            stale_after: DEFAULT_RUN_TIMEOUT + STALE_MARKER_GRACE,
            toolchains: SupportedToolchains::default(),
            image_repo: DEFAULT_IMAGE_REPO.to_string(),
        }
    }
}

/// Composes cache, registry, admission gate, overflow queue and runner.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    cache: ResultCache,
    registry: InProgressRegistry,
    gate: AdmissionGate,
    queue: Arc<dyn OverflowQueue>,
    runner: Arc<dyn Runner>,
    metrics: CoverMetrics,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .field("gate", &self.inner.gate)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        kv: Arc<dyn KvStore>,
        queue: Arc<dyn OverflowQueue>,
        runner: Arc<dyn Runner>,
    ) -> Self {
        let cache = ResultCache::new(Arc::clone(&kv), config.result_ttl);
        let registry = InProgressRegistry::new(kv, config.stale_after);
        let gate = AdmissionGate::new(config.q_max);
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                registry,
                gate,
                queue,
                runner,
                metrics: CoverMetrics::new(),
            }),
        }
    }

    /// Returns the settings.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Returns the admission gate.
    #[must_use]
    pub fn gate(&self) -> &AdmissionGate {
        &self.inner.gate
    }

    /// Returns the result cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    /// Returns the in-progress registry.
    #[must_use]
    pub fn registry(&self) -> &InProgressRegistry {
        &self.inner.registry
    }

    /// Returns the overflow queue.
    #[must_use]
    pub fn queue(&self) -> Arc<dyn OverflowQueue> {
        Arc::clone(&self.inner.queue)
    }

    /// Resolves one coverage request. Always returns promptly.
    pub async fn resolve(&self, repository: &str, tag: &str) -> Resolution {
        let resolution = self
            .resolve_inner(repository, tag)
            .instrument(job_span("resolve", repository, tag))
            .await;
        self.inner.metrics.record_resolve(resolution.outcome.as_str());
        resolution
    }

    async fn resolve_inner(&self, repository: &str, tag: &str) -> Resolution {
        let inner = &self.inner;
        let key = CoverageJobKey::new(repository, tag);

        if !inner.config.toolchains.contains(tag) {
            let text = SupportedToolchains::unsupported_message(&inner.config.image_repo, tag);
            tracing::info!("Unsupported toolchain requested");
            return Resolution::new(
                CoverageResult::failed(&key, text, None),
                Outcome::UnsupportedToolchain,
            );
        }

        if repository.trim().is_empty() {
            return Resolution::new(
                CoverageResult::failed(&key, MISSING_REPOSITORY_TEXT, Some(RunFailure::RepoNotFound)),
                Outcome::RepoNotFound,
            );
        }

        match inner.cache.get(&key).await {
            Ok(Some(result)) => {
                let outcome = result.cached_outcome();
                return Resolution::new(result, outcome);
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, "Result cache read failed; treating as miss"),
        }

        let in_progress = Resolution::new(CoverageResult::placeholder(&key), Outcome::InProgress);

        match inner.registry.is_set(&key).await {
            Ok(true) => return in_progress,
            Ok(false) => {}
            Err(error) => tracing::warn!(%error, "Registry read failed; treating as idle"),
        }

        let Some(permit) = inner.gate.try_acquire() else {
            self.enqueue_overflow(&key).await;
            return Resolution::new(CoverageResult::placeholder(&key), Outcome::Queued);
        };

        match inner.registry.try_set(&key).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Lost in-progress race; another run owns this key");
                return in_progress;
            }
            Err(error) => tracing::warn!(%error, "Registry write failed; running anyway"),
        }

        self.spawn_cover(key, permit);
        in_progress
    }

    async fn enqueue_overflow(&self, key: &CoverageJobKey) {
        let metrics = &self.inner.metrics;
        match self.inner.queue.enqueue(key).await {
            Ok(0) => {
                tracing::debug!("Overflow job published with no dispatcher listening");
                metrics.record_overflow_publish("dropped");
            }
            Ok(_) => metrics.record_overflow_publish("delivered"),
            Err(error) => {
                tracing::warn!(%error, "Overflow publish failed");
                metrics.record_overflow_publish("failed");
            }
        }
    }

    fn spawn_cover(&self, key: CoverageJobKey, permit: AdmissionPermit) {
        let this = self.clone();
        drop(tokio::spawn(async move {
            let _ = this.cover(&key, permit).await;
        }));
    }

    /// Runs the execute-and-cache pipeline for one key.
    ///
    /// Callers claim the key first with [`InProgressRegistry::try_set`] and
    /// hand over the admission permit. On every path the result is cached,
    /// the marker cleared and the permit released before this returns. The
    /// runner's error, if any, is returned after caching.
    ///
    /// # Errors
    ///
    /// Returns the [`RunnerError`] the run ended with.
    pub async fn cover(
        &self,
        key: &CoverageJobKey,
        permit: AdmissionPermit,
    ) -> std::result::Result<(), RunnerError> {
        self.cover_inner(key, permit)
            .instrument(job_span("cover", &key.repository, &key.tag))
            .await
    }

    async fn cover_inner(
        &self,
        key: &CoverageJobKey,
        permit: AdmissionPermit,
    ) -> std::result::Result<(), RunnerError> {
        let inner = &self.inner;
        if let Err(error) = inner.registry.mark(key).await {
            tracing::warn!(%error, "Failed to refresh in-progress marker");
        }
        inner.metrics.set_admission_outstanding(inner.gate.outstanding());
        tracing::info!("Coverage run started");

        let started = Instant::now();
        let report = self.execute_bounded(key).await;
        let elapsed = started.elapsed();

        let result = build_result(key, &report);
        if let Err(error) = inner.cache.put(&result).await {
            tracing::error!(%error, "Failed to cache coverage result");
        }
        if let Err(error) = inner.registry.clear(key).await {
            tracing::error!(%error, "Failed to clear in-progress marker");
        }
        drop(permit);
        inner.metrics.set_admission_outstanding(inner.gate.outstanding());

        match report.error {
            None => {
                inner.metrics.record_run("success", elapsed);
                tracing::info!(
                    cover = %result.coverage_text,
                    has_output = result.has_output,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Coverage run finished"
                );
                Ok(())
            }
            Some(error) => {
                inner.metrics.record_run(error.label(), elapsed);
                tracing::warn!(%error, "Coverage run failed");
                Err(error)
            }
        }
    }

    async fn execute_bounded(&self, key: &CoverageJobKey) -> RunReport {
        let timeout = self.inner.config.run_timeout;
        let execution = AssertUnwindSafe(self.inner.runner.execute(&key.tag, &key.repository))
            .catch_unwind();
        match tokio::time::timeout(timeout, execution).await {
            Ok(Ok(report)) => report,
            Ok(Err(payload)) => RunReport::failed(RunnerError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
            Err(_) => RunReport::failed(RunnerError::TimedOut { after: timeout }),
        }
    }

    /// Returns up to `limit` recent results with measured coverage.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache scan fails.
    pub async fn recent_results(&self, limit: usize) -> Result<Vec<CoverageResult>> {
        self.inner.cache.recent(limit).await
    }
}

/// Builds the cached result from a run report.
///
/// Non-empty stdout is authoritative. Otherwise stderr, then the runner
/// error, then a fixed message become the text.
#[must_use]
pub fn build_result(key: &CoverageJobKey, report: &RunReport) -> CoverageResult {
    let stdout = report.stdout.trim();
    if !stdout.is_empty() {
        let summary = parser::scan(stdout);
        if summary.has_coverage() {
            return CoverageResult::measured(key, summary.text());
        }
        return CoverageResult::failed(key, summary.text(), Some(RunFailure::NoTests));
    }

    let failure = report
        .error
        .as_ref()
        .map_or(RunFailure::NoTests, RunnerError::failure);
    let stderr = report.stderr.trim();
    let text = if !stderr.is_empty() {
        stderr.to_string()
    } else if let Some(error) = &report.error {
        error.to_string()
    } else {
        NO_TESTS_TEXT.to_string()
    };
    CoverageResult::failed(key, text, Some(failure))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
