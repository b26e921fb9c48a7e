//! Coverage job identity and the supported toolchain set.
//!
//! `CoverageJobKey` is the single identity shared by the result cache, the
//! in-progress registry and the overflow queue.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tag used when a request does not name a toolchain.
pub const DEFAULT_TAG: &str = "golang-1.10";

/// Tags accepted out of the box.
pub const DEFAULT_SUPPORTED_TAGS: [&str; 3] = ["golang-1.10", "golang-1.9", "golang-1.8"];

/// Identity of one coverage job: a repository tested with one toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoverageJobKey {
    /// Repository path without scheme (e.g. `github.com/acme/widget`).
    pub repository: String,
    /// Toolchain tag (e.g. `golang-1.10`).
    pub tag: String,
}

impl CoverageJobKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Returns the canonical string form.
    ///
    /// Format: `{repository}@{tag}`. Tags never contain `@`, so the last `@`
    /// is always the separator.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!("{}@{}", self.repository, self.tag)
    }

    /// Encodes the key as an overflow queue message.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn to_message(&self) -> Result<bytes::Bytes> {
        Ok(serde_json::to_vec(self)?.into())
    }

    /// Decodes a key from an overflow queue message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON-encoded key.
    pub fn from_message(payload: &[u8]) -> Result<Self> {
        let key: Self = serde_json::from_slice(payload)
            .map_err(|e| Error::invalid_job_key(format!("undecodable message: {e}")))?;
        if key.repository.is_empty() || key.tag.is_empty() {
            return Err(Error::invalid_job_key("empty repository or tag"));
        }
        Ok(key)
    }
}

impl fmt::Display for CoverageJobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.tag)
    }
}

impl FromStr for CoverageJobKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (repository, tag) = s
            .rsplit_once('@')
            .ok_or_else(|| Error::invalid_job_key(format!("missing '@' in {s:?}")))?;
        if repository.is_empty() || tag.is_empty() {
            return Err(Error::invalid_job_key(format!(
                "empty repository or tag in {s:?}"
            )));
        }
        Ok(Self::new(repository, tag))
    }
}

/// The closed set of toolchain tags the runner image is published for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedToolchains {
    tags: BTreeSet<String>,
}

impl Default for SupportedToolchains {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPORTED_TAGS)
    }
}

impl SupportedToolchains {
    /// Creates a set from the given tags. Blank entries are ignored.
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tags: tags
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Returns true if `tag` is supported.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Iterates the supported tags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Returns true if no tag is supported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Message stored as the coverage text of an unsupported-tag resolution.
    #[must_use]
    pub fn unsupported_message(image_repo: &str, tag: &str) -> String {
        format!(
            "Sorry, docker image not found, {image_repo}:{tag}, see Supported languages: https://github.com/avelino/cover.run#supported"
        )
    }
}
