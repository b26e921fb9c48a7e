//! Coverage and badge routes.
//!
//! ```text
//! GET /go/{repository}.json?tag=
//! GET /go/{repository}.svg?tag=&style=
//! GET /go/{repository}?tag=
//! ```
//!
//! Repositories contain slashes, so a single wildcard captures the whole
//! remainder and the format is taken from the suffix.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use cover_flow::badge::{badge_for, Badge, BadgeStyle};
use cover_flow::result::{Outcome, Resolution, RunFailure};

use crate::server::AppState;

const SVG_CONTENT_TYPE: &str = "image/svg+xml";
const NO_CACHE: &str = "private, max-age=0, no-cache";

/// Creates badge routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/go/*repository", get(get_coverage))
}

/// Query parameters of the badge routes.
#[derive(Debug, Default, Deserialize)]
pub struct CoverageQuery {
    /// Toolchain tag; the configured default when absent or blank.
    pub tag: Option<String>,
    /// Badge style (`flat`, `curved`); SVG only.
    pub style: Option<String>,
}

/// JSON view of a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageResponse {
    /// Repository path.
    pub repository: String,
    /// Toolchain tag.
    pub tag: String,
    /// Coverage percentage or an explanatory message.
    pub cover: String,
    /// Whether `cover` came from a successful run.
    pub output: bool,
    /// Why the last run failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Classification of the request.
    pub outcome: Outcome,
}

impl From<Resolution> for CoverageResponse {
    fn from(resolution: Resolution) -> Self {
        let Resolution { result, outcome } = resolution;
        Self {
            repository: result.repository,
            tag: result.tag,
            cover: result.coverage_text,
            output: result.has_output,
            failure: result.failure,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Svg,
}

fn split_format(path: &str) -> (&str, Format) {
    let (repository, format) = if let Some(repository) = path.strip_suffix(".svg") {
        (repository, Format::Svg)
    } else if let Some(repository) = path.strip_suffix(".json") {
        (repository, Format::Json)
    } else {
        (path, Format::Json)
    };
    (repository.trim_matches('/'), format)
}

fn status_for(outcome: Outcome) -> StatusCode {
    match outcome {
        Outcome::UnsupportedToolchain => StatusCode::BAD_REQUEST,
        Outcome::RepoNotFound => StatusCode::NOT_FOUND,
        Outcome::UnknownError => StatusCode::BAD_GATEWAY,
        Outcome::Ready | Outcome::Queued | Outcome::InProgress | Outcome::NoTestsFound => {
            StatusCode::OK
        }
    }
}

/// Resolves coverage for a repository and answers as JSON or SVG.
///
/// Never waits for a run: fresh keys answer `in_progress` or `queued`.
async fn get_coverage(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<CoverageQuery>,
) -> Response {
    let (repository, format) = split_format(&path);
    let tag = query
        .tag
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(state.config.default_tag.as_str());

    let resolution = state.orchestrator.resolve(repository, tag).await;

    match format {
        Format::Json => json_response(resolution),
        Format::Svg => svg_response(&resolution, query.style.as_deref()),
    }
}

fn json_response(resolution: Resolution) -> Response {
    let status = status_for(resolution.outcome);
    (status, Json(CoverageResponse::from(resolution))).into_response()
}

fn svg_response(resolution: &Resolution, style: Option<&str>) -> Response {
    let (color, status) = badge_for(resolution);
    let style = style.map(BadgeStyle::from_name).unwrap_or_default();
    let svg = Badge::layout(color, &status).to_svg(style);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, SVG_CONTENT_TYPE),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "-1"),
        ],
        svg,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_suffix() {
        assert_eq!(
            split_format("github.com/acme/widget.svg"),
            ("github.com/acme/widget", Format::Svg)
        );
        assert_eq!(
            split_format("github.com/acme/widget.json"),
            ("github.com/acme/widget", Format::Json)
        );
        assert_eq!(
            split_format("github.com/acme/widget/"),
            ("github.com/acme/widget", Format::Json)
        );
        assert_eq!(split_format(".svg"), ("", Format::Svg));
    }

    #[test]
    fn terminal_errors_map_to_error_statuses() {
        assert_eq!(status_for(Outcome::UnsupportedToolchain), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(Outcome::RepoNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(Outcome::UnknownError), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(Outcome::NoTestsFound), StatusCode::OK);
        assert_eq!(status_for(Outcome::Queued), StatusCode::OK);
    }
}
