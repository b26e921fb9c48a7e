//! Server configuration.
//!
//! Every setting has a default and can be overridden through a `COVER_*`
//! environment variable. Values are trimmed; empty values count as unset.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use cover_core::{Error, Result};
use cover_flow::admission::DEFAULT_Q_MAX;
use cover_flow::job_key::{SupportedToolchains, DEFAULT_SUPPORTED_TAGS, DEFAULT_TAG};
use cover_flow::orchestrator::{OrchestratorConfig, STALE_MARKER_GRACE};
use cover_flow::queue::DEFAULT_QUEUE_CHANNEL;
use cover_flow::runner::DEFAULT_IMAGE_REPO;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// HTTP listen port.
    pub http_port: u16,
    /// Debug mode: pretty logs instead of JSON.
    pub debug: bool,
    /// Simultaneous coverage runs per instance.
    pub q_max: usize,
    /// Wall-clock limit of one run, in seconds.
    pub run_timeout_secs: u64,
    /// Lifetime of cached results, in seconds.
    pub result_ttl_secs: u64,
    /// Image repository holding one image per toolchain tag.
    pub image_repo: String,
    /// Tag used when a request names none.
    pub default_tag: String,
    /// Accepted toolchain tags.
    pub supported_tags: Vec<String>,
    /// Bus channel of the overflow queue.
    pub queue_channel: String,
    /// Docker CLI binary.
    pub docker_bin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            debug: false,
            q_max: DEFAULT_Q_MAX,
            run_timeout_secs: 300,
            result_ttl_secs: 3600,
            image_repo: DEFAULT_IMAGE_REPO.to_string(),
            default_tag: DEFAULT_TAG.to_string(),
            supported_tags: DEFAULT_SUPPORTED_TAGS.iter().map(ToString::to_string).collect(),
            queue_channel: DEFAULT_QUEUE_CHANNEL.to_string(),
            docker_bin: "docker".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the variable that failed to
    /// parse or validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup` instead of the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the variable that failed to
    /// parse or validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::default();

        if let Some(port) = env.u16("COVER_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env.bool("COVER_DEBUG")? {
            config.debug = debug;
        }
        if let Some(q_max) = env.usize("COVER_Q_MAX")? {
            config.q_max = q_max;
        }
        if let Some(secs) = env.u64("COVER_RUN_TIMEOUT_SECS")? {
            config.run_timeout_secs = secs;
        }
        if let Some(secs) = env.u64("COVER_RESULT_TTL_SECS")? {
            config.result_ttl_secs = secs;
        }
        if let Some(repo) = env.string("COVER_IMAGE_REPO") {
            config.image_repo = repo;
        }
        if let Some(tag) = env.string("COVER_DEFAULT_TAG") {
            config.default_tag = tag;
        }
        if let Some(tags) = env.string("COVER_SUPPORTED_TAGS") {
            config.supported_tags = parse_list(&tags);
        }
        if let Some(channel) = env.string("COVER_QUEUE_CHANNEL") {
            config.queue_channel = channel;
        }
        if let Some(bin) = env.string("COVER_DOCKER_BIN") {
            config.docker_bin = bin;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.q_max == 0 {
            return Err(Error::InvalidInput("COVER_Q_MAX must be at least 1".into()));
        }
        if self.run_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "COVER_RUN_TIMEOUT_SECS must be at least 1".into(),
            ));
        }
        if self.supported_tags.is_empty() {
            return Err(Error::InvalidInput(
                "COVER_SUPPORTED_TAGS must name at least one tag".into(),
            ));
        }
        if !self.supported_tags.contains(&self.default_tag) {
            return Err(Error::InvalidInput(format!(
                "COVER_DEFAULT_TAG must be one of COVER_SUPPORTED_TAGS (got {})",
                self.default_tag
            )));
        }
        Ok(())
    }

    /// Returns the orchestrator settings derived from this configuration.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let run_timeout = Duration::from_secs(self.run_timeout_secs);
        OrchestratorConfig {
            q_max: self.q_max,
            run_timeout,
            result_ttl: Duration::from_secs(self.result_ttl_secs),
            stale_after: run_timeout.saturating_add(STALE_MARKER_GRACE),
            toolchains: SupportedToolchains::new(&self.supported_tags),
            image_repo: self.image_repo.clone(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u16(&self, name: &str) -> Result<Option<u16>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u16>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
    }

    fn usize(&self, name: &str) -> Result<Option<usize>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<usize>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        parse_bool(name, &v).map(Some)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
