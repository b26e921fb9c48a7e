//! Scripted runner for orchestration tests.
//!
//! Replays canned output per repository, counts invocations and tracks how
//! many run at once. A held runner parks every invocation until
//! [`ScriptedRunner::release`] is called, which lets tests observe the
//! in-progress state deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cover_flow::runner::{RunReport, Runner, RunnerError};
use tokio::sync::watch;

/// What one invocation does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Returns the given output.
    Output {
        /// Standard output.
        stdout: String,
        /// Standard error.
        stderr: String,
    },
    /// Returns the given error with no output.
    Fail(RunnerError),
    /// Panics with the given message.
    Panic(String),
    /// Never returns.
    Hang,
}

impl Script {
    /// A run printing one coverage line.
    #[must_use]
    pub fn coverage(percent: f64) -> Self {
        Self::Output {
            stdout: format!("ok  \tgithub.com/acme/widget\t0.010s\tcoverage: {percent:.1}% of statements\n"),
            stderr: String::new(),
        }
    }

    /// A run printing only to stderr.
    #[must_use]
    pub fn stderr(text: impl Into<String>) -> Self {
        Self::Output {
            stdout: String::new(),
            stderr: text.into(),
        }
    }
}

/// Runner returning scripted results.
#[derive(Debug)]
pub struct ScriptedRunner {
    default: Script,
    per_repository: Mutex<HashMap<String, Script>>,
    delay: Duration,
    calls: Mutex<Vec<(String, String)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    active_by_key: Mutex<HashMap<String, usize>>,
    max_active_by_key: Mutex<HashMap<String, usize>>,
    gate: watch::Sender<bool>,
}

impl ScriptedRunner {
    /// Creates a runner answering every repository with `default`.
    #[must_use]
    pub fn new(default: Script) -> Self {
        Self {
            default,
            per_repository: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            active_by_key: Mutex::new(HashMap::new()),
            max_active_by_key: Mutex::new(HashMap::new()),
            gate: watch::Sender::new(true),
        }
    }

    /// Creates a runner reporting `percent` coverage for every repository.
    #[must_use]
    pub fn with_coverage(percent: f64) -> Self {
        Self::new(Script::coverage(percent))
    }

    /// Adds a fixed delay to every invocation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Parks every invocation until [`Self::release`] is called.
    #[must_use]
    pub fn held(self) -> Self {
        self.gate.send_replace(false);
        self
    }

    /// Overrides the script for one repository.
    pub fn script(&self, repository: impl Into<String>, script: Script) {
        self.per_repository
            .lock()
            .expect("lock")
            .insert(repository.into(), script);
    }

    /// Lets parked and future invocations proceed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Returns every `(tag, repository)` invocation in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("lock").clone()
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    /// Returns the number of invocations running now.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the highest number of simultaneous invocations seen.
    #[must_use]
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Returns the highest number of simultaneous invocations seen for one
    /// repository and tag.
    #[must_use]
    pub fn max_active_for(&self, tag: &str, repository: &str) -> usize {
        self.max_active_by_key
            .lock()
            .expect("lock")
            .get(&format!("{repository}@{tag}"))
            .copied()
            .unwrap_or(0)
    }

    fn enter(&self, key: &str) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let mut active = self.active_by_key.lock().expect("lock");
        let count = active.entry(key.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        drop(active);
        let mut max = self.max_active_by_key.lock().expect("lock");
        let entry = max.entry(key.to_string()).or_insert(0);
        *entry = (*entry).max(count);
    }

    fn script_for(&self, repository: &str) -> Script {
        self.per_repository
            .lock()
            .expect("lock")
            .get(repository)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Decrements the active counters even when the invocation is dropped.
struct ActiveGuard<'a> {
    runner: &'a ScriptedRunner,
    key: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.runner.active.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut active) = self.runner.active_by_key.lock() {
            if let Some(count) = active.get_mut(&self.key) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn execute(&self, tag: &str, repository: &str) -> RunReport {
        let key = format!("{repository}@{tag}");
        self.calls
            .lock()
            .expect("lock")
            .push((tag.to_string(), repository.to_string()));
        self.enter(&key);
        let _guard = ActiveGuard { runner: self, key };

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.script_for(repository) {
            Script::Output { stdout, stderr } => RunReport::completed(stdout, stderr),
            Script::Fail(error) => RunReport::failed(error),
            Script::Panic(message) => panic!("{message}"),
            Script::Hang => {
                std::future::pending::<()>().await;
                RunReport::default()
            }
        }
    }
}
