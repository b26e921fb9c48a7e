//! Shared test utilities for cover.run integration tests.
//!
//! This crate provides:
//! - [`RecordingKv`]: In-memory store with operation recording
//! - [`ScriptedRunner`]: Runner replaying canned output
//! - [`Harness`]: An orchestrator wired to both
//!
//! # Example
//!
//! ```rust,ignore
//! use cover_test_utils::{Harness, ScriptedRunner, TEST_REPOSITORY, TEST_TAG};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = Harness::new(ScriptedRunner::with_coverage(80.0));
//!     let resolution = harness.orchestrator.resolve(TEST_REPOSITORY, TEST_TAG).await;
//!     // ... assert ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod runner;
pub mod storage;

pub use fixtures::*;
pub use runner::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cover=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
