//! End-to-end orchestration scenarios
//!
//! Each test drives a started engine through `submit` with in-memory
//! executor and reasoner collaborators.

mod common;

use serde_json::json;

use common::{call, start, test_config, ScriptedReasoner};
use sheetops::{DecisionLayer, EngineConfig, ExecutionOutcome, OperationMode};

#[tokio::test]
async fn test_list_sheets_resolves_at_pattern_layer() {
    let h = start(test_config(), ScriptedReasoner::default());

    let response = h.engine.submit("list the sheets").await.unwrap();

    assert_eq!(response.layer, DecisionLayer::Pattern);
    assert_eq!(response.layer.number(), 1);
    assert!(matches!(response.outcome, ExecutionOutcome::Succeeded { .. }));
    assert_eq!(h.executor.calls_to("list_sheets"), 1);
    assert_eq!(h.reasoner.calls(), 0);
    assert!(h.engine.decision_cache().is_empty());

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_destructive_request_is_blocked() {
    let h = start(test_config(), ScriptedReasoner::default());

    let response = h.engine.submit("Delete everything").await.unwrap();

    assert_eq!(response.layer, DecisionLayer::SafetyGate);
    assert!(response.decision_text.is_none());
    match &response.outcome {
        ExecutionOutcome::Blocked { reason } => {
            assert!(reason.starts_with("Blocked pending confirmation"));
            assert!(reason.contains("delete everything"));
        }
        other => panic!("expected Blocked, got {:?}", other),
    }
    assert_eq!(h.executor.total_calls(), 0);
    assert_eq!(h.reasoner.calls(), 0);
    assert_eq!(h.engine.get_stats().total_tasks, 0);

    // blocked cycles are still recorded, as failures
    let entry = h.engine.ledger().get(response.snapshot_id).unwrap();
    assert!(!entry.success);
    assert!(entry.decision_text.is_empty());

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_safety_gate_wins_over_pattern() {
    let h = start(test_config(), ScriptedReasoner::default());

    // matches both "list sheets" and "delete all sheets"
    let response = h
        .engine
        .submit("list sheets then delete all sheets")
        .await
        .unwrap();

    assert_eq!(response.layer, DecisionLayer::SafetyGate);
    assert_eq!(h.executor.total_calls(), 0);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_reasoned_decision_is_reused_from_decision_cache() {
    let decision = call("create_chart", json!({"range": "A1:C10", "type": "bar"}));
    let h = start(test_config(), ScriptedReasoner::replying(&decision));

    let first = h
        .engine
        .submit("create a bar chart from A1:C10")
        .await
        .unwrap();
    assert_eq!(first.layer, DecisionLayer::Reasoning);
    assert!(first.outcome.is_success());

    let second = h
        .engine
        .submit("create a bar chart from A1:C10")
        .await
        .unwrap();
    assert_eq!(second.layer, DecisionLayer::DecisionCache);
    assert_eq!(second.decision_text, first.decision_text);
    assert_eq!(second.decision_text.as_deref(), Some(decision.as_str()));

    assert_eq!(h.reasoner.calls(), 1);
    assert_eq!(h.executor.calls_to("create_chart"), 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_write_invalidates_cached_read() {
    let h = start(test_config(), ScriptedReasoner::default());
    let read = call("read_range", json!({"sheet": "Data", "range": "A1:B2"}));
    let write = call(
        "write_range",
        json!({"sheet": "Data", "range": "A1", "values": [[42]]}),
    );

    let before = h.engine.submit(&read).await.unwrap();
    assert_eq!(before.outcome.results()[0].payload, "data@v0");

    let cached = h.engine.submit(&read).await.unwrap();
    assert!(cached.outcome.results()[0].cached);
    assert_eq!(h.executor.calls_to("read_range"), 1);

    let written = h.engine.submit(&write).await.unwrap();
    assert!(written.outcome.is_success());

    let after = h.engine.submit(&read).await.unwrap();
    let result = &after.outcome.results()[0];
    assert!(!result.cached);
    assert_eq!(result.payload, "data@v1");
    assert_eq!(h.executor.calls_to("read_range"), 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_mode_changes_only_at_tick() {
    let config = EngineConfig {
        stats_window: 10,
        ..test_config()
    };
    let h = start(config, ScriptedReasoner::default());

    for i in 0..8 {
        let ok = call("read_range", json!({"sheet": "Data", "range": format!("A{}", i)}));
        assert!(h.engine.submit(&ok).await.unwrap().outcome.is_success());
    }
    for i in 0..2 {
        let bad = call("read_range", json!({"sheet": "Data", "range": format!("B{}", i), "fail": true}));
        assert!(!h.engine.submit(&bad).await.unwrap().outcome.is_success());
    }

    assert!(h.engine.evaluate_mode().is_none());
    assert_eq!(h.engine.get_operation_mode(), OperationMode::Normal);
    assert_eq!(h.engine.mode_profile().workers, 5);

    for i in 0..4 {
        let bad = call("read_range", json!({"sheet": "Data", "range": format!("C{}", i), "fail": true}));
        h.engine.submit(&bad).await.unwrap();
    }

    // 40% now, but nothing moves until the controller ticks
    assert!((h.engine.get_stats().success_rate - 0.4).abs() < 1e-9);
    assert_eq!(h.engine.get_operation_mode(), OperationMode::Normal);
    assert_eq!(h.engine.mode_profile().workers, 5);

    let transition = h.engine.evaluate_mode().unwrap();
    assert_eq!(transition.from, OperationMode::Normal);
    assert_eq!(transition.to, OperationMode::Critical);
    assert_eq!(h.engine.get_operation_mode_name(), "critical");
    assert_eq!(h.engine.mode_profile().workers, 1);
    assert_eq!(h.engine.get_cache_status().ttl_seconds, 1800);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_plain_answer_enqueues_nothing() {
    let h = start(
        test_config(),
        ScriptedReasoner::replying("A pivot table summarizes rows by category."),
    );

    let response = h.engine.submit("what does a pivot table do").await.unwrap();

    assert_eq!(response.layer, DecisionLayer::Reasoning);
    assert!(matches!(response.outcome, ExecutionOutcome::Answered { .. }));
    assert_eq!(h.executor.total_calls(), 0);
    assert!(h.engine.ledger().get(response.snapshot_id).unwrap().success);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_tool_never_reaches_executor() {
    let h = start(test_config(), ScriptedReasoner::default());
    let decision = json!([
        {"tool": "read_range", "args": {"sheet": "Data"}},
        {"tool": "launch_rockets", "args": {}}
    ])
    .to_string();

    let response = h.engine.submit(&decision).await.unwrap();

    let results = response.outcome.results();
    assert!(matches!(response.outcome, ExecutionOutcome::Failed { .. }));
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|r| r.tool_name == "launch_rockets"
        && r.error.as_deref() == Some("unknown tool 'launch_rockets'")));
    assert_eq!(h.executor.total_calls(), 1);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_rule_layer_resolves_without_reasoning() {
    let h = start(test_config(), ScriptedReasoner::default());

    let response = h.engine.submit("Add a new sheet named Summary").await.unwrap();

    assert_eq!(response.layer, DecisionLayer::Rule);
    assert_eq!(h.executor.calls_to("add_sheet"), 1);
    let (_, args) = h.executor.last_call().unwrap();
    assert_eq!(args.get("name"), Some(&json!("Summary")));
    assert_eq!(h.reasoner.calls(), 0);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_mutating_request_never_reports_a_read_as_success() {
    let h = start(test_config(), ScriptedReasoner::default());

    for request in ["clear the active sheet", "Delete the current sheet"] {
        let response = h.engine.submit(request).await.unwrap();

        assert_ne!(response.layer, DecisionLayer::Pattern, "{}", request);
        assert!(
            !matches!(response.outcome, ExecutionOutcome::Succeeded { .. }),
            "{}",
            request
        );
    }
    assert_eq!(h.executor.calls_to("get_active_sheet"), 0);
    assert_eq!(h.reasoner.calls(), 2);

    h.engine.shutdown().await;
}
