//! Test runner trait and the container-backed implementation.
//!
//! A runner takes a repository and a toolchain tag, runs the repository's
//! tests inside the matching image and hands back raw stdout and stderr.
//! Interpreting the output is the orchestrator's job.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::Error;
use crate::result::RunFailure;

/// Default image repository holding one image per toolchain tag.
pub const DEFAULT_IMAGE_REPO: &str = "avelino/cover.run";

/// Default timeout for the repository probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors a runner invocation can end with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    /// The repository probe answered 404.
    #[error("Repository not found")]
    RepoNotFound,

    /// The repository probe answered another error status.
    #[error("Unknown error occurred: repository host answered {status}")]
    Upstream {
        /// HTTP status code of the probe.
        status: u16,
    },

    /// The repository probe request failed.
    #[error("repository probe failed: {message}")]
    Probe {
        /// Description of the failure.
        message: String,
    },

    /// The container could not be started.
    #[error("failed to start container: {message}")]
    Spawn {
        /// Description of the failure.
        message: String,
    },

    /// The container exited unsuccessfully.
    #[error("container exited with {code:?}: {message}")]
    Failed {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Description of the failure.
        message: String,
    },

    /// The run exceeded its wall-clock limit.
    #[error("coverage run timed out after {}s", after.as_secs())]
    TimedOut {
        /// The limit that was exceeded.
        after: Duration,
    },

    /// The runner panicked.
    #[error("runner panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl RunnerError {
    /// Classifies the error for the cached result.
    #[must_use]
    pub const fn failure(&self) -> RunFailure {
        match self {
            Self::RepoNotFound => RunFailure::RepoNotFound,
            Self::Upstream { .. } | Self::Probe { .. } => RunFailure::Upstream,
            Self::TimedOut { .. } => RunFailure::Timeout,
            Self::Spawn { .. } | Self::Failed { .. } | Self::Panicked { .. } => RunFailure::Runner,
        }
    }

    /// Returns the metrics label for this error.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.failure().as_str()
    }
}

/// Raw output of one runner invocation.
///
/// Output captured before a failure is kept alongside the error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Why the invocation failed, if it did.
    pub error: Option<RunnerError>,
}

impl RunReport {
    /// Creates a report for a run that finished.
    #[must_use]
    pub fn completed(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            error: None,
        }
    }

    /// Creates a report for a run that failed before producing output.
    #[must_use]
    pub fn failed(error: RunnerError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Trait for coverage execution.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// Runs the tests of `repository` with toolchain `tag`.
    ///
    /// Must not block the async runtime. Callers enforce the wall-clock
    /// limit by dropping the future.
    async fn execute(&self, tag: &str, repository: &str) -> RunReport;
}

/// Runs coverage inside a container through the docker CLI.
///
/// Probes `https://{repository}` first; the container only starts if the
/// repository exists.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    client: reqwest::Client,
    docker_bin: String,
    image_repo: String,
}

impl ContainerRunner {
    /// Creates a runner using `docker_bin` and images from `image_repo`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpClient`] if the HTTP client cannot be built.
    pub fn new(image_repo: impl Into<String>, docker_bin: impl Into<String>) -> crate::error::Result<Self> {
        Self::with_probe_timeout(image_repo, docker_bin, DEFAULT_PROBE_TIMEOUT)
    }

    /// Creates a runner with a custom repository lookup timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpClient`] if the HTTP client cannot be built.
    pub fn with_probe_timeout(
        image_repo: impl Into<String>,
        docker_bin: impl Into<String>,
        probe_timeout: Duration,
    ) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(|e| Error::HttpClient {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            docker_bin: docker_bin.into(),
            image_repo: image_repo.into(),
        })
    }

    /// Returns the image reference for `tag`.
    #[must_use]
    pub fn image(&self, tag: &str) -> String {
        format!("{}:{tag}", self.image_repo).to_lowercase()
    }

    async fn probe(&self, repository: &str) -> Result<(), RunnerError> {
        let response = self
            .client
            .get(format!("https://{repository}"))
            .send()
            .await
            .map_err(|e| RunnerError::Probe {
                message: e.to_string(),
            })?;
        classify_probe(response.status())
    }

    async fn run_container(&self, tag: &str, repository: &str) -> RunReport {
        let image = self.image(tag);
        let mut child = match Command::new(&self.docker_bin)
            .args(["run", "--rm", "-i", image.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return RunReport::failed(RunnerError::Spawn {
                    message: format!("{}: {e}", self.docker_bin),
                })
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let script = format!("sh /run.sh {repository}\n");
            if let Err(e) = stdin.write_all(script.as_bytes()).await {
                tracing::warn!(error = %e, "Failed to write container stdin");
            }
        }

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                return RunReport::failed(RunnerError::Spawn {
                    message: e.to_string(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let error = (!output.status.success()).then(|| RunnerError::Failed {
            code: output.status.code(),
            message: stderr.trim().lines().last().unwrap_or("no output").to_string(),
        });
        if let Some(error) = &error {
            tracing::error!(%image, %error, "Coverage container failed");
        }
        RunReport {
            stdout,
            stderr,
            error,
        }
    }
}

fn classify_probe(status: StatusCode) -> Result<(), RunnerError> {
    if status == StatusCode::NOT_FOUND {
        return Err(RunnerError::RepoNotFound);
    }
    if status.as_u16() > 399 {
        return Err(RunnerError::Upstream {
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
impl Runner for ContainerRunner {
    async fn execute(&self, tag: &str, repository: &str) -> RunReport {
        if let Err(error) = self.probe(repository).await {
            tracing::warn!(%repository, %error, "Repository probe rejected run");
            return RunReport::failed(error);
        }
        self.run_container(tag, repository).await
    }
}
