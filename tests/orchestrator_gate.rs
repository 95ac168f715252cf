//! End-to-end invariants of the invocation gate: ledger coupling,
//! idempotent replay, budget monotonicity, breaker behaviour, and the
//! spine guard.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{echo_envelope, EchoTool, FlakyTool, TestCore};
use straylight::economy::EconomyDefaults;
use straylight::orchestrator::{spine, PolicyConfig};
use straylight::tools::{Tool, ToolError};
use straylight::ledger::ExecutionStatus;
use straylight::types::ErrorCode;

#[tokio::test]
async fn test_every_result_has_a_matching_ledger_row() {
    let core = TestCore::build(PolicyConfig::default(), EconomyDefaults::default());
    let echo = EchoTool::new();
    let flaky = FlakyTool::new();
    core.orchestrator.register(echo.clone());
    core.orchestrator.register(flaky.clone());

    let ok = core.orchestrator.invoke(&echo_envelope()).await;
    assert!(ok.success);

    let mut flaky_envelope = echo_envelope();
    flaky_envelope.tool_name = "flaky".to_owned();
    let failed = core.orchestrator.invoke(&flaky_envelope).await;
    assert!(!failed.success);

    let rows = core
        .orchestrator
        .ledger()
        .list_recent(10)
        .await
        .expect("list");
    assert_eq!(rows.len(), 2);
    // Newest first: the flaky failure, then the echo success.
    assert_eq!(rows[0].status, ExecutionStatus::Failed);
    assert_eq!(rows[0].tool_name, "flaky");
    assert_eq!(rows[1].status, ExecutionStatus::Completed);
    assert_eq!(rows[1].tool_name, "echo");
}

#[tokio::test]
async fn test_concurrent_idempotent_calls_run_tool_once() {
    let core = TestCore::build(PolicyConfig::default(), EconomyDefaults::default());
    let echo = EchoTool::new();
    core.orchestrator.register(echo.clone());

    let mut envelope = echo_envelope();
    envelope.idempotency_key = Some("k1".to_owned());

    let first = {
        let orchestrator = Arc::clone(&core.orchestrator);
        let envelope = envelope.clone();
        tokio::spawn(async move { orchestrator.invoke(&envelope).await })
    };
    let second = {
        let orchestrator = Arc::clone(&core.orchestrator);
        let envelope = envelope.clone();
        tokio::spawn(async move { orchestrator.invoke(&envelope).await })
    };

    let first = first.await.expect("join");
    let second = second.await.expect("join");

    assert!(first.success);
    assert!(second.success);
    assert_eq!(first.output, second.output);
    // The tool body ran exactly once; one ledger row exists.
    assert_eq!(echo.executions(), 1);
    let rows = core
        .orchestrator
        .ledger()
        .list_recent(10)
        .await
        .expect("list");
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_refusals_leave_budget_and_stats_untouched() {
    let core = TestCore::build(
        PolicyConfig::default(),
        EconomyDefaults {
            budget: -6.0,
            ..EconomyDefaults::default()
        },
    );
    let echo = EchoTool::new();
    core.orchestrator.register(echo.clone());

    let mut envelope = echo_envelope();
    envelope.priority = 0.2;

    let result = core.orchestrator.invoke(&envelope).await;
    assert_eq!(result.error_code, Some(ErrorCode::BudgetExceeded));

    // Security refusal: unregistered domain via denylist.
    let core_denied = TestCore::build(
        {
            let mut policy = PolicyConfig::default();
            policy.domain_denylist.insert("cognition".to_owned());
            policy
        },
        EconomyDefaults::default(),
    );
    core_denied.orchestrator.register(EchoTool::new());
    let denied = core_denied.orchestrator.invoke(&echo_envelope()).await;
    assert_eq!(denied.error_code, Some(ErrorCode::SecurityViolation));

    // Neither refusal moved money or counters.
    assert!((core.economy.budget() + 6.0).abs() < 1e-9);
    assert_eq!(core.economy.tool_stats("echo").calls, 0);
    assert!((core_denied.economy.budget() - 300.0).abs() < 1e-9);
    assert_eq!(core_denied.economy.tool_stats("echo").calls, 0);
    assert_eq!(echo.executions(), 0);
}

#[tokio::test]
async fn test_breaker_trips_then_half_opens() {
    let core = TestCore::build(
        PolicyConfig {
            breaker_threshold: 5,
            breaker_reset: Duration::from_millis(60),
            ..PolicyConfig::default()
        },
        EconomyDefaults::default(),
    );
    let flaky = FlakyTool::new();
    core.orchestrator.register(flaky.clone());

    let mut envelope = echo_envelope();
    envelope.tool_name = "flaky".to_owned();

    // First five calls execute and fail.
    for _ in 0..5 {
        let result = core.orchestrator.invoke(&envelope).await;
        assert_eq!(result.error_code, Some(ErrorCode::ToolError));
    }
    assert_eq!(flaky.executions(), 5);

    // The sixth is refused by the open breaker without executing, and
    // leaves no new economy entry.
    let calls_before = core.economy.tool_stats("flaky").calls;
    let refused = core.orchestrator.invoke(&envelope).await;
    assert_eq!(refused.error_code, Some(ErrorCode::ToolError));
    assert_eq!(flaky.executions(), 5);
    assert_eq!(core.economy.tool_stats("flaky").calls, calls_before);

    // After the reset window a new attempt reaches the tool again.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let retried = core.orchestrator.invoke(&envelope).await;
    assert_eq!(retried.error_code, Some(ErrorCode::ToolError));
    assert_eq!(flaky.executions(), 6);
}

#[tokio::test]
async fn test_tool_body_refuses_direct_invocation() {
    // Property: no side effect outside the spine. Calling a tool's
    // execute without the orchestrator fails as a security violation.
    let echo = EchoTool::new();
    let err = echo
        .execute(&echo_envelope())
        .await
        .expect_err("must refuse outside the spine");
    assert!(matches!(err, ToolError::SpineViolation(_)));
    assert_eq!(echo.executions(), 0);

    // The same body succeeds inside the spine scope.
    let ok = spine::enter(echo.execute(&echo_envelope())).await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn test_async_path_reaches_terminal_status() {
    let mut core = TestCore::build(PolicyConfig::default(), EconomyDefaults::default());
    let echo = EchoTool::new();
    core.orchestrator.register(echo.clone());
    let rx = core.queue_rx.take().expect("receiver");
    let _worker = core.orchestrator.spawn_worker(rx);

    let (execution_id, status) = core
        .orchestrator
        .enqueue(&echo_envelope())
        .await
        .expect("enqueue");
    assert_eq!(status, ExecutionStatus::Queued);

    let mut last = status;
    for _ in 0..200 {
        let row = core
            .orchestrator
            .ledger()
            .get(&execution_id)
            .await
            .expect("get")
            .expect("row");
        last = row.status;
        if last.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(last, ExecutionStatus::Completed);
    assert_eq!(echo.executions(), 1);
    assert!((core.economy.budget() - 299.9).abs() < 1e-9);
}
