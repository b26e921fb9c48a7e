//! Coverage results and resolution outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::job_key::CoverageJobKey;

/// Coverage text cached while a run is pending or active.
pub const PLACEHOLDER_TEXT: &str = "";

/// Text recorded when a run produced neither output nor an error.
pub const NO_TESTS_TEXT: &str = "no tests found";

/// Text returned for an empty repository.
pub const MISSING_REPOSITORY_TEXT: &str = "missing remote repository e.g. 'github.com/user/repo'";

/// Why a run did not produce a coverage figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFailure {
    /// The repository probe answered 404.
    RepoNotFound,
    /// The repository host answered another error status.
    Upstream,
    /// The run finished without any coverage line.
    NoTests,
    /// The run exceeded its wall-clock limit.
    Timeout,
    /// The container could not be started or exited with an error.
    Runner,
}

impl RunFailure {
    /// Returns the outcome a cached result with this failure resolves to.
    #[must_use]
    pub const fn outcome(self) -> Outcome {
        match self {
            Self::RepoNotFound => Outcome::RepoNotFound,
            Self::NoTests => Outcome::NoTestsFound,
            Self::Upstream | Self::Timeout | Self::Runner => Outcome::UnknownError,
        }
    }

    /// Returns the lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RepoNotFound => "repo_not_found",
            Self::Upstream => "upstream",
            Self::NoTests => "no_tests",
            Self::Timeout => "timeout",
            Self::Runner => "runner",
        }
    }
}

/// The result of one coverage run for one job key.
///
/// Written wholesale after a run and never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageResult {
    /// Repository path.
    pub repository: String,
    /// Toolchain tag.
    pub tag: String,
    /// Formatted percentage (`"82.35%"`) or a human-readable status.
    pub coverage_text: String,
    /// True only when `coverage_text` is a genuine measured percentage.
    pub has_output: bool,
    /// Classified reason when no coverage was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl CoverageResult {
    /// Creates a result holding a measured percentage.
    #[must_use]
    pub fn measured(key: &CoverageJobKey, coverage_text: impl Into<String>) -> Self {
        Self {
            repository: key.repository.clone(),
            tag: key.tag.clone(),
            coverage_text: coverage_text.into(),
            has_output: true,
            failure: None,
        }
    }

    /// Creates a result for a run that did not produce coverage.
    #[must_use]
    pub fn failed(key: &CoverageJobKey, text: impl Into<String>, failure: Option<RunFailure>) -> Self {
        Self {
            repository: key.repository.clone(),
            tag: key.tag.clone(),
            coverage_text: text.into(),
            has_output: false,
            failure,
        }
    }

    /// Creates the placeholder returned while a job is pending.
    #[must_use]
    pub fn placeholder(key: &CoverageJobKey) -> Self {
        Self::failed(key, PLACEHOLDER_TEXT, None)
    }

    /// Returns the job key this result belongs to.
    #[must_use]
    pub fn key(&self) -> CoverageJobKey {
        CoverageJobKey::new(self.repository.clone(), self.tag.clone())
    }

    /// Returns the outcome a cache hit on this result resolves to.
    #[must_use]
    pub fn cached_outcome(&self) -> Outcome {
        self.failure.map_or(Outcome::Ready, RunFailure::outcome)
    }
}

/// Typed outcome of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A cached result was returned.
    Ready,
    /// No admission token was free; the job was published to the overflow queue.
    Queued,
    /// A run for this key is active.
    InProgress,
    /// The toolchain tag is not supported.
    UnsupportedToolchain,
    /// The repository does not exist.
    RepoNotFound,
    /// The repository host or the runner failed.
    UnknownError,
    /// The run finished without any coverage line.
    NoTestsFound,
}

impl Outcome {
    /// Returns the lowercase label used in JSON and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::UnsupportedToolchain => "unsupported_toolchain",
            Self::RepoNotFound => "repo_not_found",
            Self::UnknownError => "unknown_error",
            Self::NoTestsFound => "no_tests_found",
        }
    }

    /// Returns true for outcomes that will change on a later poll.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coverage result paired with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The result (cached, or a placeholder).
    pub result: CoverageResult,
    /// How the request was resolved.
    pub outcome: Outcome,
}

impl Resolution {
    /// Creates a resolution.
    #[must_use]
    pub fn new(result: CoverageResult, outcome: Outcome) -> Self {
        Self { result, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CoverageJobKey {
        CoverageJobKey::new("github.com/acme/widget", "golang-1.10")
    }

    #[test]
    fn cached_outcome_follows_failure() {
        assert_eq!(CoverageResult::measured(&key(), "82.35%").cached_outcome(), Outcome::Ready);

        let cases = [
            (RunFailure::RepoNotFound, Outcome::RepoNotFound),
            (RunFailure::NoTests, Outcome::NoTestsFound),
            (RunFailure::Upstream, Outcome::UnknownError),
            (RunFailure::Timeout, Outcome::UnknownError),
            (RunFailure::Runner, Outcome::UnknownError),
        ];
        for (failure, expected) in cases {
            let result = CoverageResult::failed(&key(), "x", Some(failure));
            assert_eq!(result.cached_outcome(), expected, "{failure:?}");
        }
    }

    #[test]
    fn failure_is_omitted_from_json_when_absent() -> serde_json::Result<()> {
        let json = serde_json::to_value(CoverageResult::measured(&key(), "50.00%"))?;
        assert!(json.get("failure").is_none());
        assert_eq!(json["has_output"], true);

        let json = serde_json::to_value(CoverageResult::failed(
            &key(),
            "boom",
            Some(RunFailure::RepoNotFound),
        ))?;
        assert_eq!(json["failure"], "repo_not_found");
        Ok(())
    }

    #[test]
    fn decodes_results_written_without_failure_field() -> serde_json::Result<()> {
        let raw = r#"{"repository":"r","tag":"t","coverage_text":"1.00%","has_output":true}"#;
        let result: CoverageResult = serde_json::from_str(raw)?;
        assert!(result.failure.is_none());
        Ok(())
    }

    #[test]
    fn outcome_labels_match_serde() -> serde_json::Result<()> {
        for outcome in [
            Outcome::Ready,
            Outcome::Queued,
            Outcome::InProgress,
            Outcome::UnsupportedToolchain,
            Outcome::RepoNotFound,
            Outcome::UnknownError,
            Outcome::NoTestsFound,
        ] {
            assert_eq!(serde_json::to_value(outcome)?, outcome.as_str());
        }
        assert!(Outcome::Queued.is_transient());
        assert!(!Outcome::NoTestsFound.is_transient());
        Ok(())
    }
}
