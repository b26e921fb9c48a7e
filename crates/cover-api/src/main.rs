//! `cover-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server
//! with in-memory coordination and the Docker runner.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use cover_api::config::Config;
use cover_api::server::Server;
use cover_core::observability::{init_logging, LogFormat};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    init_logging(choose_log_format(&config));
    tracing::info!(
        image_repo = %config.image_repo,
        supported_tags = ?config.supported_tags,
        "using in-memory store and bus; results are per-process"
    );

    let server = Server::new(config)?;
    server.serve().await?;
    Ok(())
}
