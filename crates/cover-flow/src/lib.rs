//! # cover-flow
//!
//! Coverage job orchestration for cover.run.
//!
//! This crate implements the coverage domain, providing:
//!
//! - **Orchestration**: One entry point deciding between cache, active run,
//!   new run and overflow for each request
//! - **Admission**: A per-instance bound on concurrent test runs
//! - **Overflow Dispatch**: A background consumer that feeds deferred jobs
//!   back through admission
//! - **Badges**: Deterministic SVG rendering of a coverage figure
//!
//! ## Core Concepts
//!
//! - **Job key**: A repository tested with one toolchain tag
//! - **Run**: One runner invocation for a job key, bounded by a timeout
//! - **Result**: The cached outcome of the latest run, expiring after an hour
//!
//! ## Guarantees
//!
//! - A request never waits for a run
//! - At most one active run per job key per registry (modulo a narrow race)
//! - Every admission token is returned, whatever the run's outcome
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cover_core::{MemoryBus, MemoryKv};
//! use cover_flow::prelude::*;
//!
//! # async fn demo() -> cover_flow::error::Result<()> {
//! let queue = Arc::new(BusOverflowQueue::new(Arc::new(MemoryBus::new()), DEFAULT_QUEUE_CHANNEL));
//! let runner = Arc::new(ContainerRunner::new(DEFAULT_IMAGE_REPO, "docker")?);
//! let orchestrator = Orchestrator::new(
//!     OrchestratorConfig::default(),
//!     Arc::new(MemoryKv::new()),
//!     queue,
//!     runner,
//! );
//!
//! let resolution = orchestrator.resolve("github.com/acme/widget", "golang-1.10").await;
//! let (color, status) = badge_for(&resolution);
//! let _svg = Badge::layout(color, &status).to_svg(BadgeStyle::Flat);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod badge;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod job_key;
pub mod metrics;
pub mod orchestrator;
pub mod parser;
pub mod queue;
pub mod registry;
pub mod result;
pub mod runner;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::admission::{AdmissionGate, AdmissionPermit};
    pub use crate::badge::{badge_for, render, Badge, BadgeColor, BadgeStyle};
    pub use crate::cache::ResultCache;
    pub use crate::dispatcher::{DispatchOutcome, Dispatcher};
    pub use crate::error::{Error, Result};
    pub use crate::job_key::{CoverageJobKey, SupportedToolchains, DEFAULT_TAG};
    pub use crate::metrics::CoverMetrics;
    pub use crate::orchestrator::{Orchestrator, OrchestratorConfig};
    pub use crate::queue::{BusOverflowQueue, OverflowQueue, DEFAULT_QUEUE_CHANNEL};
    pub use crate::registry::InProgressRegistry;
    pub use crate::result::{CoverageResult, Outcome, Resolution, RunFailure};
    pub use crate::runner::{ContainerRunner, RunReport, Runner, RunnerError, DEFAULT_IMAGE_REPO};
}
