//! Log tools: per-service fetch, cross-service search and error digests.

use super::{parse_args, ToolError, ToolName};
use crate::mock::{logs::filter_level, MockWorld, SERVICES};
use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Lines generated per service for a fetch.
const FETCH_COUNT: usize = 30;
/// Lines generated per service for a search.
const SEARCH_COUNT: usize = 15;
pub const MAX_SEARCH_MATCHES: usize = 20;

fn default_level() -> String {
    "ERROR".to_string()
}

#[derive(Debug, Deserialize)]
struct FetchArgs {
    service: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default = "default_level")]
    level: String,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    pattern: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DetailArgs {
    service: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

fn check_window(tool: ToolName, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ToolError> {
    if end < start {
        return Err(ToolError::InvalidArguments {
            tool,
            reason: format!("end {} precedes start {}", end, start),
        });
    }
    Ok(())
}

fn check_service(tool: ToolName, service: &str) -> Result<(), ToolError> {
    if !SERVICES.contains(&service) {
        return Err(ToolError::execution(tool, format!("unknown service {}", service)));
    }
    Ok(())
}

pub fn fetch_logs(world: &MockWorld, args: &Value) -> Result<Value, ToolError> {
    let tool = ToolName::FetchLogs;
    let a: FetchArgs = parse_args(tool, args)?;
    check_window(tool, a.start, a.end)?;
    check_service(tool, &a.service)?;
    let lines = filter_level(world.logs(&a.service, a.start, a.end, FETCH_COUNT), &a.level);
    Ok(json!(lines))
}

/// Case-insensitive regex search over every service, capped at
/// [`MAX_SEARCH_MATCHES`] lines.
pub fn search_logs(world: &MockWorld, args: &Value) -> Result<Value, ToolError> {
    let tool = ToolName::SearchLogs;
    let a: SearchArgs = parse_args(tool, args)?;
    check_window(tool, a.start, a.end)?;
    let re = RegexBuilder::new(&a.pattern)
        .case_insensitive(true)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| ToolError::InvalidArguments {
            tool,
            reason: format!("bad pattern: {}", e),
        })?;

    let matches: Vec<String> = SERVICES
        .iter()
        .flat_map(|svc| world.logs(svc, a.start, a.end, SEARCH_COUNT))
        .filter(|line| re.is_match(line))
        .take(MAX_SEARCH_MATCHES)
        .collect();
    Ok(json!(matches))
}

/// Message body of a line: everything after `"<service>: "`.
fn message(line: &str) -> &str {
    line.split_once(": ").map(|(_, m)| m).unwrap_or(line)
}

pub fn get_log_details(world: &MockWorld, args: &Value) -> Result<Value, ToolError> {
    let tool = ToolName::GetLogDetails;
    let a: DetailArgs = parse_args(tool, args)?;
    check_window(tool, a.start, a.end)?;
    check_service(tool, &a.service)?;

    let lines = world.logs(&a.service, a.start, a.end, FETCH_COUNT);
    let errors: Vec<&String> = lines.iter().filter(|l| l.contains("[ERROR]")).collect();
    let warn_count = lines.iter().filter(|l| l.contains("[WARN]")).count();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in &errors {
        *counts.entry(message(line)).or_default() += 1;
    }
    let mut top: Vec<(&str, usize)> = counts.into_iter().collect();
    top.sort_by(|x, y| y.1.cmp(&x.1).then(x.0.cmp(y.0)));
    let top_errors: Vec<String> = top
        .iter()
        .take(3)
        .map(|(msg, n)| format!("{} ({} occurrences)", msg, n))
        .collect();

    let minutes = ((a.end - a.start).num_seconds() as f64 / 60.0).max(1.0);
    let mut details = json!({
        "service": a.service,
        "window": { "start": a.start, "end": a.end },
        "error_count": errors.len(),
        "warn_count": warn_count,
        "top_errors": top_errors,
        "error_rate_per_minute": (errors.len() as f64 / minutes * 100.0).round() / 100.0,
    });
    let note = match a.service.as_str() {
        "worker-service" => Some(
            "Heap grows monotonically with no release between GC cycles. Classic leak signature.",
        ),
        "checkout-service" => Some("Errors begin sharply at the config reload event."),
        _ => None,
    };
    if let (Some(note), Some(obj)) = (note, details.as_object_mut()) {
        obj.insert("note".to_string(), json!(note));
    }
    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use chrono::Duration;

    fn setup() -> (MockWorld, DateTime<Utc>, DateTime<Utc>) {
        let end = Utc::now();
        let world = MockWorld::generate(end, &[], &MockConfig::default());
        (world, end - Duration::minutes(30), end)
    }

    #[test]
    fn test_fetch_defaults_to_errors() {
        let (w, start, end) = setup();
        let out = fetch_logs(&w, &json!({ "service": "checkout-service", "start": start, "end": end }))
            .unwrap();
        let lines = out.as_array().unwrap();
        assert!(!lines.is_empty());
        assert!(lines.iter().all(|l| l.as_str().unwrap().contains("[ERROR]")));
    }

    #[test]
    fn test_search_is_case_insensitive_and_capped() {
        let (w, start, end) = setup();
        let out = search_logs(&w, &json!({ "pattern": "POOL", "start": start, "end": end })).unwrap();
        let lines = out.as_array().unwrap();
        assert!(!lines.is_empty());
        assert!(lines.len() <= MAX_SEARCH_MATCHES);

        let all = search_logs(&w, &json!({ "pattern": ".", "start": start, "end": end })).unwrap();
        assert_eq!(all.as_array().unwrap().len(), MAX_SEARCH_MATCHES);
    }

    #[test]
    fn test_bad_pattern_is_an_argument_error() {
        let (w, start, end) = setup();
        let err = search_logs(&w, &json!({ "pattern": "(", "start": start, "end": end })).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn test_worker_details_carry_leak_note() {
        let (w, start, end) = setup();
        let out = get_log_details(&w, &json!({ "service": "worker-service", "start": start, "end": end }))
            .unwrap();
        assert!(out["error_count"].as_u64().unwrap() >= 6);
        assert!(out["note"].as_str().unwrap().contains("leak"));
        assert!(out["top_errors"].as_array().unwrap().len() <= 3);
    }

    #[test]
    fn test_unknown_service() {
        let (w, start, end) = setup();
        let err = fetch_logs(&w, &json!({ "service": "mainframe", "start": start, "end": end })).unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }
}
