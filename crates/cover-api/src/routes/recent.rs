//! Recently measured repositories.
//!
//! ```text
//! GET /api/v1/recent?limit=
//! ```

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use cover_flow::result::CoverageResult;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Entries returned when no limit is given.
pub const DEFAULT_RECENT_LIMIT: usize = 5;

/// Upper bound on requested entries.
pub const MAX_RECENT_LIMIT: usize = 50;

/// Creates recent-results routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/recent", get(list_recent))
}

/// Query parameters for the recent listing.
#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    /// Maximum entries; clamped to [`MAX_RECENT_LIMIT`].
    pub limit: Option<usize>,
}

/// One recently measured repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentEntry {
    /// Repository path.
    pub repository: String,
    /// Toolchain tag.
    pub tag: String,
    /// Coverage percentage.
    pub cover: String,
}

impl From<CoverageResult> for RecentEntry {
    fn from(result: CoverageResult) -> Self {
        Self {
            repository: result.repository,
            tag: result.tag,
            cover: result.coverage_text,
        }
    }
}

/// Response for the recent listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentResponse {
    /// Measured repositories, at most `limit`.
    pub repositories: Vec<RecentEntry>,
}

async fn list_recent(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> ApiResult<Json<RecentResponse>> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT);

    let results = state.orchestrator.recent_results(limit).await?;
    Ok(Json(RecentResponse {
        repositories: results.into_iter().map(RecentEntry::from).collect(),
    }))
}
