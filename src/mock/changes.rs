//! Deploy history and code diffs.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How long before the trigger the checkout config change shipped.
pub const CONFIG_DEPLOY_LEAD_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployEvent {
    pub service: String,
    pub deploy_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub commit_sha: String,
    pub version: String,
    pub deployed_at: DateTime<Utc>,
    pub deployed_by: String,
    pub status: String,
    pub change_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeDiff {
    pub service: String,
    pub commit_sha: String,
    pub diff: String,
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Deploys around an incident triggered at `triggered_at`, oldest first.
pub fn recent_deploys(triggered_at: DateTime<Utc>, rng: &mut StdRng) -> Vec<DeployEvent> {
    vec![
        DeployEvent {
            service: "api-gateway".to_string(),
            deploy_type: "service".to_string(),
            artifact: None,
            commit_sha: format!("a{}b", rng.gen_range(100_000..1_000_000)),
            version: format!("v3.{}.{}", rng.gen_range(1..5), rng.gen_range(0..11)),
            deployed_at: triggered_at - Duration::hours(4),
            deployed_by: "ci-pipeline".to_string(),
            status: "success".to_string(),
            change_summary: "Bumped rate limiter defaults".to_string(),
        },
        DeployEvent {
            service: "checkout-service".to_string(),
            deploy_type: "config".to_string(),
            artifact: Some("checkout-service-config".to_string()),
            commit_sha: "cf9a12d".to_string(),
            version: "v2.4.1".to_string(),
            deployed_at: triggered_at - Duration::minutes(CONFIG_DEPLOY_LEAD_MINUTES),
            deployed_by: "ci-pipeline".to_string(),
            status: "success".to_string(),
            change_summary: "Tuned DB pool settings for 'cost optimisation' initiative".to_string(),
        },
    ]
}

const CHECKOUT_DIFF: &str = "diff --git a/config/db.yaml b/config/db.yaml
--- a/config/db.yaml
+++ b/config/db.yaml
@@ -3,8 +3,8 @@ database:
   host: postgres-primary.internal
   port: 5432
   pool:
-    max_connections: 20
+    max_connections: 2        # COST-OPT: reduced pool size
-    connection_timeout_ms: 30000
+    connection_timeout_ms: 5000  # COST-OPT: tighter timeout
   query_timeout_ms: 10000
";

const GATEWAY_DIFF: &str = "diff --git a/src/pool.js b/src/pool.js
-  maxConnections: 50
+  maxConnections: 10  // reduced for cost savings
";

const DEFAULT_DIFF: &str = "diff --git a/src/main b/src/main
- // no significant changes
+ // minor refactor
";

pub fn code_diff(service: &str, commit_sha: &str) -> CodeDiff {
    let diff = match service {
        "checkout-service" => CHECKOUT_DIFF,
        "api-gateway" => GATEWAY_DIFF,
        _ => DEFAULT_DIFF,
    };
    let lines: Vec<&str> = diff.lines().collect();
    CodeDiff {
        service: service.to_string(),
        commit_sha: commit_sha.to_string(),
        diff: diff.to_string(),
        files_changed: lines.iter().filter(|l| l.starts_with("diff --git")).count(),
        lines_added: lines
            .iter()
            .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
            .count(),
        lines_removed: lines
            .iter()
            .filter(|l| l.starts_with('-') && !l.starts_with("---"))
            .count(),
    }
}
