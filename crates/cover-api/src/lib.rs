//! # cover-api
//!
//! HTTP composition layer for the cover.run coverage badge service.
//!
//! This crate wires the orchestration domain to the web:
//!
//! - **Routing**: Badge and coverage endpoints per repository
//! - **Service Wiring**: Store, bus, runner and the overflow dispatcher
//! - **Observability**: Metrics, tracing, and health checks
//!
//! All coverage policy lives in `cover-flow`.
//!
//! ## Endpoints
//!
//! ```text
//!   GET /health                 - Health check
//!   GET /ready                  - Readiness check
//!   GET /metrics                - Prometheus metrics
//!   GET /go/{repo}.json?tag=    - Coverage as JSON
//!   GET /go/{repo}.svg?tag=     - Coverage badge
//!   GET /go/{repo}?tag=         - Coverage as JSON
//!   GET /api/v1/recent?limit=   - Recently measured repositories
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use cover_api::server::Server;
//!
//! let server = Server::builder()
//!     .http_port(3000)
//!     .q_max(5)
//!     .build()?;
//!
//! server.serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::server::{Server, ServerBuilder};
}
