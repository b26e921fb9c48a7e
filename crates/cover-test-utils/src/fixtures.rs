//! Pre-built orchestration harnesses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cover_core::MemoryBus;
use cover_flow::job_key::CoverageJobKey;
use cover_flow::orchestrator::{Orchestrator, OrchestratorConfig};
use cover_flow::queue::{BusOverflowQueue, DEFAULT_QUEUE_CHANNEL};
use cover_flow::result::CoverageResult;

use crate::runner::ScriptedRunner;
use crate::storage::RecordingKv;

/// Repository used by most tests.
pub const TEST_REPOSITORY: &str = "github.com/acme/widget";

/// Toolchain tag used by most tests.
pub const TEST_TAG: &str = "golang-1.10";

/// Returns the default test job key.
#[must_use]
pub fn test_key() -> CoverageJobKey {
    CoverageJobKey::new(TEST_REPOSITORY, TEST_TAG)
}

/// An orchestrator wired to in-memory collaborators.
pub struct Harness {
    /// Recording store shared by cache and registry.
    pub kv: RecordingKv,
    /// Bus carrying the overflow queue.
    pub bus: MemoryBus,
    /// Scripted runner.
    pub runner: Arc<ScriptedRunner>,
    /// The orchestrator under test.
    pub orchestrator: Orchestrator,
}

impl Harness {
    /// Creates a harness with default settings.
    #[must_use]
    pub fn new(runner: ScriptedRunner) -> Self {
        Self::builder(runner).build()
    }

    /// Starts a harness builder.
    #[must_use]
    pub fn builder(runner: ScriptedRunner) -> HarnessBuilder {
        HarnessBuilder {
            runner,
            config: OrchestratorConfig::default(),
        }
    }

    /// Waits until a result for `key` is cached, or panics after `timeout`.
    pub async fn wait_for_result(&self, key: &CoverageJobKey, timeout: Duration) -> CoverageResult {
        let cache = self.orchestrator.cache().clone();
        let key = key.clone();
        eventually(timeout, || {
            let cache = cache.clone();
            let key = key.clone();
            async move { cache.get(&key).await.ok().flatten() }
        })
        .await
    }

    /// Waits until every admission token is back, or panics after `timeout`.
    pub async fn wait_until_idle(&self, timeout: Duration) {
        let gate = self.orchestrator.gate().clone();
        eventually(timeout, || {
            let gate = gate.clone();
            async move { (gate.outstanding() == 0).then_some(()) }
        })
        .await;
    }
}

/// Builder for [`Harness`].
pub struct HarnessBuilder {
    runner: ScriptedRunner,
    config: OrchestratorConfig,
}

impl HarnessBuilder {
    /// Sets the number of admission tokens.
    #[must_use]
    pub fn q_max(mut self, q_max: usize) -> Self {
        self.config.q_max = q_max;
        self
    }

    /// Sets the run timeout.
    #[must_use]
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.config.run_timeout = timeout;
        self
    }

    /// Builds the harness.
    #[must_use]
    pub fn build(self) -> Harness {
        let kv = RecordingKv::new();
        let bus = MemoryBus::new();
        let runner = Arc::new(self.runner);
        let queue = Arc::new(BusOverflowQueue::new(Arc::new(bus.clone()), DEFAULT_QUEUE_CHANNEL));
        let orchestrator =
            Orchestrator::new(self.config, Arc::new(kv.clone()), queue, runner.clone());
        Harness {
            kv,
            bus,
            runner,
            orchestrator,
        }
    }
}

/// Polls `probe` every few milliseconds until it yields a value.
///
/// # Panics
///
/// Panics if nothing is yielded within `timeout`.
pub async fn eventually<T, F, Fut>(timeout: Duration, mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return value;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
