//! Turn-loop behaviour under replayed engine replies.

use chrono::{Duration, Utc};
use incident_commander::agent::{self, Agent, AgentRole, Termination};
use incident_commander::config::MockConfig;
use incident_commander::context::{IncidentContext, LogSummary, Timeframe};
use incident_commander::detect::{MetricAnomaly, Trend};
use incident_commander::engine::{EngineReply, Message, ScriptedEngine, Transcript};
use incident_commander::mock::{MockWorld, DEFAULT_METRICS};
use incident_commander::report::RcaStore;
use incident_commander::tools::{ReportSink, ToolCall, ToolName, ToolRegistry};
use incident_commander::IncidentError;
use serde_json::{json, Value};
use std::sync::Arc;

fn world() -> Arc<MockWorld> {
    let metrics: Vec<String> = DEFAULT_METRICS.iter().map(|m| m.to_string()).collect();
    Arc::new(MockWorld::generate(Utc::now(), &metrics, &MockConfig::default()))
}

fn context() -> IncidentContext {
    let at = Utc::now() - Duration::minutes(10);
    let tf = Timeframe::before(at);
    IncidentContext::assemble(
        vec![MetricAnomaly {
            metric_name: "checkout_latency_p99".to_string(),
            value: 2010.0,
            threshold: 240.0,
            timestamp: at,
            window_seconds: 300,
            trend: Some(Trend::SuddenSpike),
        }],
        "checkout latency jumped".to_string(),
        LogSummary {
            timeframe_start: tf.start,
            timeframe_end: tf.end,
            entries: vec!["pool exhausted".to_string()],
            summary: "checkout-service cannot get DB connections".to_string(),
        },
    )
    .unwrap()
}

fn commander(store: &Arc<RcaStore>, id: &str) -> ToolRegistry {
    ToolRegistry::new(AgentRole::Commander, world())
        .with_context(Arc::new(context()))
        .with_sink(ReportSink {
            store: store.clone(),
            incident_id: id.to_string(),
        })
}

fn report(root_cause: &str, confidence: f64) -> Value {
    json!({
        "root_cause": root_cause,
        "timeline": ["10:00 deploy", "10:15 latency spike"],
        "affected_services": ["checkout-service"],
        "remediation_steps": ["Roll back checkout-service-config"],
        "confidence": confidence,
    })
}

fn write(id: &str, report: Value) -> ToolCall {
    ToolCall::new(id, ToolName::WriteRca, json!({ "report": report }))
}

fn deploys(id: &str) -> ToolCall {
    let now = Utc::now();
    ToolCall::new(
        id,
        ToolName::ListRecentDeploys,
        json!({ "start": now - Duration::hours(6), "end": now }),
    )
}

#[tokio::test]
async fn test_budget_exhaustion_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RcaStore::new(dir.path()));
    let registry = commander(&store, "budget01");
    let engine = ScriptedEngine::new(vec![
        EngineReply::ToolCalls(vec![deploys("1")]),
        EngineReply::ToolCalls(vec![deploys("2")]),
        EngineReply::ToolCalls(vec![deploys("3")]),
    ]);

    let err = agent::commander::investigate(&engine, &registry, &context(), 2, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IncidentError::BudgetExceeded {
            role: AgentRole::Commander,
            turns: 2
        }
    ));
    assert!(store.is_empty());
    assert_eq!(engine.remaining(), 1);
}

#[tokio::test]
async fn test_invalid_report_gets_one_correction() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RcaStore::new(dir.path()));
    let registry = commander(&store, "retry001");
    let engine = ScriptedEngine::new(vec![
        EngineReply::ToolCalls(vec![write("1", report("pool cut to 2", 1.5))]),
        EngineReply::ToolCalls(vec![write("2", report("pool cut to 2", 0.9))]),
    ]);

    let run = agent::commander::investigate(&engine, &registry, &context(), 5, |_| {})
        .await
        .unwrap();
    assert_eq!(run.turns, 2);
    assert!(run.records[0].is_error);
    assert_eq!(run.report.incident_id, "retry001");
    assert_eq!(run.written_to, Some(store.path_for("retry001")));

    // The engine saw the rejection before its second attempt.
    let (_, second) = &engine.requests()[1];
    assert_eq!(second.corrections(), 1);
}

#[tokio::test]
async fn test_second_bad_answer_is_fatal() {
    let registry = ToolRegistry::new(AgentRole::Metrics, world());
    let engine = ScriptedEngine::new(vec![
        EngineReply::Final(json!("")),
        EngineReply::Final(json!({ "not": "text" })),
        EngineReply::Final(json!("too late")),
    ]);

    let err = agent::metrics::investigate(&engine, &registry, &[], 5).await.unwrap_err();
    assert!(matches!(
        err,
        IncidentError::SchemaValidation {
            role: AgentRole::Metrics,
            ..
        }
    ));
}

#[tokio::test]
async fn test_duplicate_write_keeps_the_last() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RcaStore::new(dir.path()));
    let registry = commander(&store, "dup00001");
    let engine = ScriptedEngine::new(vec![EngineReply::ToolCalls(vec![
        write("1", report("first draft", 0.4)),
        write("2", report("final answer", 0.9)),
    ])]);

    let run = agent::commander::investigate(&engine, &registry, &context(), 3, |_| {})
        .await
        .unwrap();
    assert_eq!(run.report.root_cause, "final answer");
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("dup00001").unwrap().root_cause, "final answer");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    let markdown = std::fs::read_to_string(store.path_for("dup00001")).unwrap();
    assert!(markdown.contains("final answer"));
    assert!(!markdown.contains("first draft"));
}

#[tokio::test]
async fn test_stored_report_survives_later_bad_drafts() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RcaStore::new(dir.path()));
    let registry = commander(&store, "batch001");
    let engine = ScriptedEngine::new(vec![EngineReply::ToolCalls(vec![
        write("1", report("", 0.5)),
        write("2", report("pool cut to 2", 0.9)),
        write("3", report("late draft", 7.0)),
    ])]);

    let run = agent::commander::investigate(&engine, &registry, &context(), 3, |_| {})
        .await
        .unwrap();
    assert_eq!(run.report.root_cause, "pool cut to 2");
    assert_eq!(run.written_to, Some(store.path_for("batch001")));
    assert!(run.records[0].is_error);
    assert!(!run.records[1].is_error);
    assert!(run.records[2].is_error);
    assert_eq!(store.len(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_tool_errors_are_fed_back() {
    let registry = ToolRegistry::new(AgentRole::Logs, world());
    let tf = Timeframe::before(Utc::now());
    let unknown = ToolCall {
        id: "1".to_string(),
        name: "drop_tables".to_string(),
        arguments: json!({}),
    };
    let foreign = ToolCall::new("2", ToolName::WriteRca, json!({}));
    let bad_pattern = ToolCall::new(
        "3",
        ToolName::SearchLogs,
        json!({ "pattern": "(", "start": tf.start, "end": tf.end }),
    );
    let answer = json!({
        "timeframe_start": tf.start,
        "timeframe_end": tf.end,
        "entries": [],
        "summary": "nothing conclusive",
    });
    let engine = ScriptedEngine::new(vec![
        EngineReply::ToolCalls(vec![unknown, foreign, bad_pattern]),
        EngineReply::Final(answer),
    ]);

    let run = Agent::new(&engine, &registry, 4)
        .run(
            Transcript::new(AgentRole::Logs.system_prompt()).with_task("analyze", None),
            |_| {},
        )
        .await
        .unwrap();
    assert_eq!(run.terminated_by, Termination::FinalAnswer);
    assert_eq!(run.records.len(), 3);
    assert!(run.records.iter().all(|r| r.is_error));
    assert!(run.records[0].result["error"]
        .as_str()
        .unwrap()
        .contains("unknown tool"));
    assert!(run.records[1].result["error"]
        .as_str()
        .unwrap()
        .contains("not available to the logs agent"));

    let errors = run
        .transcript
        .messages()
        .iter()
        .filter(|m| matches!(m, Message::ToolResult { is_error: true, .. }))
        .count();
    assert_eq!(errors, 3);
}
