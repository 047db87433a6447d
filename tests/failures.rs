//! Failure ledger and recovery path integration tests
//!
//! Tests for recurrence detection, clearing on success, expiry, and the
//! replay-or-report behavior when a recurrent signature is submitted.

mod common;

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use common::{call, start, test_config, ScriptedReasoner};
use sheetops::core::{failure_signature, FailureLedger};
use sheetops::domain::Arguments;
use sheetops::{DecisionLayer, EngineConfig, ExecutionOutcome};

#[test]
fn test_third_failure_marks_recurrent() {
    let ledger = FailureLedger::new(3);

    let first = ledger.record_failure("sig", "boom");
    let second = ledger.record_failure("sig", "boom");
    assert!(!first.recurrent && !second.recurrent);
    assert!(!ledger.is_recurrent("sig"));

    let third = ledger.record_failure("sig", "boom again");
    assert!(third.recurrent);
    assert_eq!(third.fail_count, 3);
    assert_eq!(third.last_error, "boom again");
    assert!(ledger.is_recurrent("sig"));
}

#[test]
fn test_success_deletes_record_outright() {
    let ledger = FailureLedger::new(3);
    for _ in 0..3 {
        ledger.record_failure("sig", "boom");
    }

    ledger.record_success("sig");
    assert!(ledger.get("sig").is_none());

    // counting starts over rather than resuming at two
    assert_eq!(ledger.record_failure("sig", "boom").fail_count, 1);
    assert!(!ledger.is_recurrent("sig"));
}

#[test]
fn test_stale_records_expire() {
    let ledger = FailureLedger::new(3);
    for _ in 0..3 {
        ledger.record_failure("old", "boom");
    }
    ledger.record_failure("fresh", "boom");

    let tomorrow = Utc::now() + chrono::Duration::hours(25);
    let expired = ledger.expire_older_than(Duration::from_secs(24 * 3600), tomorrow);

    assert_eq!(expired, 2);
    assert!(!ledger.is_recurrent("old"));
    assert_eq!(ledger.stats().total_memoized, 0);
}

fn flaky_read() -> (String, Arguments) {
    let args: Arguments = serde_json::from_value(json!({"sheet": "Flaky", "range": "A1"})).unwrap();
    (call("read_range", json!(args)), args)
}

#[tokio::test]
async fn test_recurrent_signature_without_history_short_circuits() {
    let h = start(test_config(), ScriptedReasoner::default());
    let (read, args) = flaky_read();
    h.executor.set_failing(true);

    for _ in 0..3 {
        let response = h.engine.submit(&read).await.unwrap();
        assert!(matches!(response.outcome, ExecutionOutcome::Failed { .. }));
    }
    assert_eq!(h.executor.calls_to("read_range"), 3);
    assert_eq!(h.engine.get_failure_stats().recurrent_count, 1);

    let response = h.engine.submit(&read).await.unwrap();
    match &response.outcome {
        ExecutionOutcome::RecurringFailure {
            signature,
            replay_error,
        } => {
            assert_eq!(signature, &failure_signature("read_range", &args));
            assert!(replay_error.contains("no successful snapshot"));
        }
        other => panic!("expected RecurringFailure, got {:?}", other),
    }
    // short-circuited before execution
    assert_eq!(h.executor.calls_to("read_range"), 3);
    assert!(!h.engine.ledger().get(response.snapshot_id).unwrap().success);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_recurrent_signature_replays_last_success() {
    let h = start(test_config(), ScriptedReasoner::default());
    let (read, args) = flaky_read();

    let original = h.engine.submit(&read).await.unwrap();
    assert!(original.outcome.is_success());

    // keep the rolling rate healthy enough for replay
    for i in 0..10 {
        let other = call("read_range", json!({"sheet": "Stable", "range": format!("A{}", i)}));
        h.engine.submit(&other).await.unwrap();
    }

    // the cached result would hide the failures
    h.engine.clear_cache();
    h.executor.set_failing(true);
    for _ in 0..3 {
        h.engine.submit(&read).await.unwrap();
    }
    assert_eq!(h.engine.get_failure_stats().recurrent_count, 1);

    h.executor.set_failing(false);
    let before = h.executor.calls_to("read_range");
    let response = h.engine.submit(&read).await.unwrap();

    assert_eq!(response.layer, DecisionLayer::Replay);
    match &response.outcome {
        ExecutionOutcome::Replayed {
            source_id, success, ..
        } => {
            assert_eq!(*source_id, original.snapshot_id);
            assert!(*success);
        }
        other => panic!("expected Replayed, got {:?}", other),
    }
    assert_eq!(h.executor.calls_to("read_range"), before + 1);

    let entry = h.engine.ledger().get(response.snapshot_id).unwrap();
    assert_eq!(entry.replay_count, 1);
    assert_eq!(entry.decision_text, read);
    assert_eq!(entry.task_signature, failure_signature("read_range", &args));

    // the successful replay cleared the record
    assert_eq!(h.engine.get_failure_stats().recurrent_count, 0);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_replay_refused_when_unhealthy() {
    let config = EngineConfig {
        stats_window: 10,
        ..test_config()
    };
    let h = start(config, ScriptedReasoner::default());
    let (read, _) = flaky_read();

    h.engine.submit(&read).await.unwrap();
    h.engine.clear_cache();
    h.executor.set_failing(true);
    for _ in 0..3 {
        h.engine.submit(&read).await.unwrap();
    }

    // 1 of 4 succeeded: 25% is below the replay floor
    let response = h.engine.submit(&read).await.unwrap();
    match &response.outcome {
        ExecutionOutcome::RecurringFailure { replay_error, .. } => {
            assert!(replay_error.contains("below"));
        }
        other => panic!("expected RecurringFailure, got {:?}", other),
    }

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_maintenance_expires_nothing_fresh() {
    let h = start(test_config(), ScriptedReasoner::default());
    let bad = call("read_range", json!({"sheet": "Data", "fail": true}));
    h.engine.submit(&bad).await.unwrap();

    let report = h.engine.run_maintenance();
    assert_eq!(report.failure_records, 0);
    assert_eq!(h.engine.get_failure_stats().total_memoized, 1);
    assert_eq!(h.engine.get_failure_stats().total_failures, 1);

    h.engine.shutdown().await;
}
