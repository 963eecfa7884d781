//! Change-history tools: deploy events and their diffs.

use super::{parse_args, ToolError, ToolName};
use crate::context::IncidentContext;
use crate::mock::{MockWorld, SERVICES};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct DeployArgs {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DiffArgs {
    service: String,
    commit_sha: String,
}

/// Deploys between `start` and `end`, oldest first. Deploy history is
/// positioned relative to the incident trigger, or to the world's anchor
/// when no incident is known yet.
pub fn list_recent_deploys(
    world: &MockWorld,
    context: Option<&IncidentContext>,
    args: &Value,
) -> Result<Value, ToolError> {
    let tool = ToolName::ListRecentDeploys;
    let a: DeployArgs = parse_args(tool, args)?;
    if a.end < a.start {
        return Err(ToolError::InvalidArguments {
            tool,
            reason: format!("end {} precedes start {}", a.end, a.start),
        });
    }
    let reference = context.map(|c| c.triggered_at).unwrap_or_else(|| world.anchor());
    let deploys: Vec<_> = world
        .deploys(reference)
        .into_iter()
        .filter(|d| d.deployed_at >= a.start && d.deployed_at <= a.end)
        .collect();
    Ok(json!(deploys))
}

pub fn get_code_diff(world: &MockWorld, args: &Value) -> Result<Value, ToolError> {
    let tool = ToolName::GetCodeDiff;
    let a: DiffArgs = parse_args(tool, args)?;
    if !SERVICES.contains(&a.service.as_str()) {
        return Err(ToolError::execution(tool, format!("unknown service {}", a.service)));
    }
    if a.commit_sha.trim().is_empty() {
        return Err(ToolError::InvalidArguments {
            tool,
            reason: "commit_sha must not be empty".to_string(),
        });
    }
    serde_json::to_value(world.code_diff(&a.service, &a.commit_sha))
        .map_err(|e| ToolError::execution(tool, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use chrono::Duration;

    #[test]
    fn test_window_filters_deploys() {
        let now = Utc::now();
        let world = MockWorld::generate(now, &[], &MockConfig::default());
        let last_hour = json!({ "start": now - Duration::hours(1), "end": now });
        let out = list_recent_deploys(&world, None, &last_hour).unwrap();
        let deploys = out.as_array().unwrap();
        assert_eq!(deploys.len(), 1);
        assert_eq!(deploys[0]["service"], "checkout-service");
        assert_eq!(deploys[0]["commit_sha"], "cf9a12d");

        let six_hours = json!({ "start": now - Duration::hours(6), "end": now });
        let out = list_recent_deploys(&world, None, &six_hours).unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_code_diff_for_checkout() {
        let world = MockWorld::generate(Utc::now(), &[], &MockConfig::default());
        let out = get_code_diff(
            &world,
            &json!({ "service": "checkout-service", "commit_sha": "cf9a12d" }),
        )
        .unwrap();
        assert!(out["diff"].as_str().unwrap().contains("max_connections: 20"));
        assert_eq!(out["lines_removed"], 2);
    }
}
