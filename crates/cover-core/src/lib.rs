//! # cover-core
//!
//! Shared primitives for the cover.run coverage badge service.
//!
//! This crate provides the foundational types and traits used across all
//! cover.run components:
//!
//! - **Error Types**: Shared error definitions and result types
//! - **Key-Value Store**: The cache/coordination store contract and an in-memory backend
//! - **Message Bus**: The publish/subscribe contract and an in-memory backend
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Example
//!
//! ```rust
//! use cover_core::prelude::*;
//!
//! # async fn demo() -> Result<()> {
//! let kv = MemoryKv::new();
//! kv.set_with_ttl("greeting", bytes::Bytes::from_static(b"hi"), None).await?;
//! assert!(kv.get("greeting").await?.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod error;
pub mod kv;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bus::{MemoryBus, MessageBus, Subscription};
    pub use crate::error::{Error, Result};
    pub use crate::kv::{KvStore, MemoryKv};
}

pub use bus::{MemoryBus, MessageBus, Subscription};
pub use error::{Error, Result};
pub use kv::{KvStore, MemoryKv};
pub use observability::{init_logging, job_span, LogFormat};
