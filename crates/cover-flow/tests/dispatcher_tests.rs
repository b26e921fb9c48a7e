//! Overflow dispatcher behavior.

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use cover_core::MessageBus;
use cover_flow::prelude::*;
use cover_test_utils::{test_key, Harness, Script, ScriptedRunner, TEST_REPOSITORY, TEST_TAG};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn dispatcher_runs_queued_job_once_capacity_frees() -> Result<()> {
    let harness = Harness::builder(ScriptedRunner::with_coverage(75.0).held())
        .q_max(1)
        .build();
    let _dispatcher = Dispatcher::new(harness.orchestrator.clone()).start().await?;

    let first = harness.orchestrator.resolve("github.com/acme/first", TEST_TAG).await;
    assert_eq!(first.outcome, Outcome::InProgress);
    let queued = harness.orchestrator.resolve(TEST_REPOSITORY, TEST_TAG).await;
    assert_eq!(queued.outcome, Outcome::Queued);

    harness.runner.release();
    let result = harness.wait_for_result(&test_key(), WAIT).await;
    harness.wait_until_idle(WAIT).await;

    assert_eq!(result.coverage_text, "75.00%");
    assert_eq!(harness.runner.call_count(), 2);
    assert_eq!(harness.runner.max_active(), 1);
    Ok(())
}

#[tokio::test]
async fn handle_skips_cached_keys() -> Result<()> {
    let harness = Harness::new(ScriptedRunner::with_coverage(75.0));
    harness
        .orchestrator
        .cache()
        .put(&CoverageResult::measured(&test_key(), "12.00%"))
        .await?;
    let dispatcher = Dispatcher::new(harness.orchestrator.clone());

    let outcome = dispatcher.handle(&test_key().to_message()?).await;
    assert_eq!(outcome, DispatchOutcome::AlreadyCached);
    assert_eq!(harness.runner.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn handle_skips_keys_in_progress() -> Result<()> {
    let harness = Harness::new(ScriptedRunner::with_coverage(75.0));
    harness.orchestrator.registry().try_set(&test_key()).await?;
    let dispatcher = Dispatcher::new(harness.orchestrator.clone());

    let outcome = dispatcher.handle(&test_key().to_message()?).await;
    assert_eq!(outcome, DispatchOutcome::InProgress);
    assert_eq!(harness.runner.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn handle_drops_bad_messages() -> Result<()> {
    let harness = Harness::new(ScriptedRunner::with_coverage(75.0));
    let dispatcher = Dispatcher::new(harness.orchestrator.clone());

    assert_eq!(dispatcher.handle(b"garbage").await, DispatchOutcome::Malformed);
    let unsupported = CoverageJobKey::new(TEST_REPOSITORY, "golang-1.4").to_message()?;
    assert_eq!(dispatcher.handle(&unsupported).await, DispatchOutcome::Unsupported);
    assert_eq!(harness.runner.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn handle_runs_and_reports_failures() -> Result<()> {
    let harness = Harness::new(ScriptedRunner::new(Script::stderr("go: module not found")));
    harness.runner.script(
        "github.com/acme/missing",
        Script::Fail(RunnerError::RepoNotFound),
    );
    let dispatcher = Dispatcher::new(harness.orchestrator.clone());

    let missing = CoverageJobKey::new("github.com/acme/missing", TEST_TAG);
    assert_eq!(
        dispatcher.handle(&missing.to_message()?).await,
        DispatchOutcome::Failed
    );

    assert_eq!(
        dispatcher.handle(&test_key().to_message()?).await,
        DispatchOutcome::Completed
    );
    let cached = harness.orchestrator.cache().get(&test_key()).await?.expect("cached");
    assert_eq!(cached.coverage_text, "go: module not found");
    assert!(!cached.has_output);
    assert_eq!(harness.orchestrator.gate().outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn dispatcher_survives_malformed_traffic() -> Result<()> {
    let harness = Harness::new(ScriptedRunner::with_coverage(40.0));
    let _dispatcher = Dispatcher::new(harness.orchestrator.clone()).start().await?;

    harness
        .bus
        .publish("cover:queue", Bytes::from_static(b"{not json"))
        .await?;
    harness.orchestrator.queue().enqueue(&test_key()).await?;

    let result = harness.wait_for_result(&test_key(), WAIT).await;
    assert_eq!(result.coverage_text, "40.00%");
    Ok(())
}

#[tokio::test]
async fn gate_closure_stops_dispatcher() -> Result<()> {
    let harness = Harness::new(ScriptedRunner::with_coverage(40.0));
    let handle = Dispatcher::new(harness.orchestrator.clone()).start().await?;

    harness.orchestrator.gate().close();
    harness.orchestrator.queue().enqueue(&test_key()).await?;

    tokio::time::timeout(WAIT, handle).await??;
    assert_eq!(harness.runner.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn idle_dispatcher_stops_when_gate_closes() -> Result<()> {
    let harness = Harness::new(ScriptedRunner::with_coverage(40.0));
    let handle = Dispatcher::new(harness.orchestrator.clone()).start().await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());

    // Nothing is ever published; the close alone has to end the loop.
    harness.orchestrator.gate().close();

    tokio::time::timeout(WAIT, handle).await??;
    assert_eq!(harness.runner.call_count(), 0);
    Ok(())
}
