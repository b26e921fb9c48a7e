//! Router-level tests for the badge, coverage and listing endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;

use cover_api::error::ApiErrorBody;
use cover_api::routes::badges::CoverageResponse;
use cover_api::routes::recent::RecentResponse;
use cover_api::server::Server;
use cover_flow::job_key::CoverageJobKey;
use cover_flow::result::{CoverageResult, Outcome, RunFailure};
use cover_flow::runner::RunnerError;
use cover_test_utils::{eventually, Script, ScriptedRunner, TEST_REPOSITORY, TEST_TAG};

const WAIT: Duration = Duration::from_secs(5);
const BODY_LIMIT: usize = 64 * 1024;

fn server_with(runner: &Arc<ScriptedRunner>, q_max: usize) -> Result<Server> {
    Ok(Server::builder().q_max(q_max).runner(runner.clone()).build()?)
}

async fn get(router: &Router, uri: &str) -> Result<Response> {
    let request = Request::builder().uri(uri).body(Body::empty())?;
    Ok(router.clone().oneshot(request).await?)
}

async fn body_text(response: Response) -> Result<String> {
    let bytes = axum::body::to_bytes(response.into_body(), BODY_LIMIT).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = axum::body::to_bytes(response.into_body(), BODY_LIMIT).await?;
    serde_json::from_slice(&bytes).context("parse response body")
}

async fn wait_for_result(server: &Server, key: &CoverageJobKey) -> CoverageResult {
    let cache = server.orchestrator().cache().clone();
    let key = key.clone();
    eventually(WAIT, || {
        let cache = cache.clone();
        let key = key.clone();
        async move { cache.get(&key).await.ok().flatten() }
    })
    .await
}

async fn wait_until_idle(server: &Server) {
    let gate = server.orchestrator().gate().clone();
    eventually(WAIT, || {
        let gate = gate.clone();
        async move { (gate.outstanding() == 0).then_some(()) }
    })
    .await;
}

#[tokio::test]
async fn svg_badge_reports_testing_then_coverage() -> Result<()> {
    let runner = Arc::new(ScriptedRunner::with_coverage(80.0).held());
    let server = server_with(&runner, 5)?;
    let router = server.test_router();

    let response = get(&router, "/go/github.com/acme/widget.svg").await?;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "image/svg+xml");
    assert_eq!(headers[header::CACHE_CONTROL], "private, max-age=0, no-cache");
    assert_eq!(headers[header::PRAGMA], "no-cache");
    assert_eq!(headers[header::EXPIRES], "-1");
    let svg = body_text(response).await?;
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains(">testing<"));

    runner.release();
    wait_for_result(&server, &CoverageJobKey::new(TEST_REPOSITORY, TEST_TAG)).await;
    wait_until_idle(&server).await;

    let svg = body_text(get(&router, "/go/github.com/acme/widget.svg?style=curved").await?).await?;
    assert!(svg.contains(">80%<"));
    assert!(svg.contains("linearGradient"));
    assert_eq!(runner.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn json_uses_default_tag_and_reports_progress() -> Result<()> {
    let runner = Arc::new(ScriptedRunner::with_coverage(65.5).held());
    let server = server_with(&runner, 5)?;
    let router = server.test_router();

    let response = get(&router, "/go/github.com/acme/widget.json").await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: CoverageResponse = json_body(response).await?;
    assert_eq!(body.repository, TEST_REPOSITORY);
    assert_eq!(body.tag, "golang-1.10");
    assert_eq!(body.outcome, Outcome::InProgress);
    assert!(!body.output);

    runner.release();
    wait_for_result(&server, &CoverageJobKey::new(TEST_REPOSITORY, TEST_TAG)).await;

    let body: CoverageResponse = json_body(get(&router, "/go/github.com/acme/widget").await?).await?;
    assert_eq!(body.outcome, Outcome::Ready);
    assert_eq!(body.cover, "65.50%");
    assert!(body.output);
    assert_eq!(body.failure, None);
    Ok(())
}

#[tokio::test]
async fn unsupported_tag_is_bad_request_but_badge_still_renders() -> Result<()> {
    let runner = Arc::new(ScriptedRunner::with_coverage(80.0));
    let server = server_with(&runner, 5)?;
    let router = server.test_router();

    let response = get(&router, "/go/github.com/acme/widget.json?tag=golang-1.4").await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: CoverageResponse = json_body(response).await?;
    assert_eq!(body.outcome, Outcome::UnsupportedToolchain);
    assert!(body.cover.contains("avelino/cover.run:golang-1.4"));

    let response = get(&router, "/go/github.com/acme/widget.svg?tag=golang-1.4").await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await?.contains(">error<"));
    assert_eq!(runner.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn missing_repository_is_not_found() -> Result<()> {
    let runner = Arc::new(ScriptedRunner::new(Script::Fail(RunnerError::RepoNotFound)));
    let server = server_with(&runner, 5)?;
    let router = server.test_router();

    let response = get(&router, "/go/github.com/acme/ghost.json").await?;
    assert_eq!(response.status(), StatusCode::OK);

    wait_for_result(&server, &CoverageJobKey::new("github.com/acme/ghost", TEST_TAG)).await;
    let response = get(&router, "/go/github.com/acme/ghost.json").await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: CoverageResponse = json_body(response).await?;
    assert_eq!(body.outcome, Outcome::RepoNotFound);
    assert_eq!(body.failure, Some(RunFailure::RepoNotFound));
    assert_eq!(body.cover, "Repository not found");
    Ok(())
}

#[tokio::test]
async fn runner_errors_surface_as_bad_gateway() -> Result<()> {
    let runner = Arc::new(ScriptedRunner::new(Script::Fail(RunnerError::Upstream {
        status: 503,
    })));
    let server = server_with(&runner, 5)?;
    let router = server.test_router();

    get(&router, "/go/github.com/acme/widget.json").await?;
    wait_for_result(&server, &CoverageJobKey::new(TEST_REPOSITORY, TEST_TAG)).await;

    let response = get(&router, "/go/github.com/acme/widget.json").await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: CoverageResponse = json_body(response).await?;
    assert_eq!(body.outcome, Outcome::UnknownError);
    assert_eq!(body.failure, Some(RunFailure::Upstream));
    Ok(())
}

#[tokio::test]
async fn saturated_instance_answers_queued() -> Result<()> {
    let runner = Arc::new(ScriptedRunner::with_coverage(50.0).held());
    let server = server_with(&runner, 1)?;
    let router = server.test_router();

    let first: CoverageResponse = json_body(get(&router, "/go/github.com/acme/first.json").await?).await?;
    assert_eq!(first.outcome, Outcome::InProgress);

    let second: CoverageResponse = json_body(get(&router, "/go/github.com/acme/second.json").await?).await?;
    assert_eq!(second.outcome, Outcome::Queued);

    let svg = body_text(get(&router, "/go/github.com/acme/third.svg").await?).await?;
    assert!(svg.contains(">queued<"));
    assert_eq!(server.orchestrator().gate().outstanding(), 1);

    runner.release();
    wait_until_idle(&server).await;
    Ok(())
}

#[tokio::test]
async fn recent_lists_measured_repositories() -> Result<()> {
    let runner = Arc::new(ScriptedRunner::with_coverage(80.0));
    let server = server_with(&runner, 5)?;
    let cache = server.orchestrator().cache();
    for name in ["alpha", "beta", "gamma"] {
        let key = CoverageJobKey::new(format!("github.com/acme/{name}"), TEST_TAG);
        cache.put(&CoverageResult::measured(&key, "42.00%")).await?;
    }
    let failed = CoverageJobKey::new("github.com/acme/broken", TEST_TAG);
    cache
        .put(&CoverageResult::failed(&failed, "boom", Some(RunFailure::Runner)))
        .await?;
    let router = server.test_router();

    let body: RecentResponse = json_body(get(&router, "/api/v1/recent").await?).await?;
    assert_eq!(body.repositories.len(), 3);
    assert!(body.repositories.iter().all(|entry| entry.cover == "42.00%"));

    let body: RecentResponse = json_body(get(&router, "/api/v1/recent?limit=2").await?).await?;
    assert_eq!(body.repositories.len(), 2);

    let body: RecentResponse = json_body(get(&router, "/api/v1/recent?limit=5000").await?).await?;
    assert_eq!(body.repositories.len(), 3);
    Ok(())
}

#[tokio::test]
async fn recent_rejects_non_numeric_limit() -> Result<()> {
    let runner = Arc::new(ScriptedRunner::with_coverage(80.0));
    let router = server_with(&runner, 5)?.test_router();

    let response = get(&router, "/api/v1/recent?limit=lots").await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ApiErrorBody = json_body(response).await?;
    assert_eq!(body.code, "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() -> Result<()> {
    cover_api::metrics::init_metrics();
    let runner = Arc::new(ScriptedRunner::with_coverage(80.0));
    let router = server_with(&runner, 5)?.test_router();

    get(&router, "/go/github.com/acme/widget.json?tag=golang-1.4").await?;
    let response = get(&router, "/metrics").await?;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await?;
    assert!(text.contains("api_request_total"));
    assert!(text.contains("cover_resolve_total"));
    Ok(())
}
