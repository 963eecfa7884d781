//! Correlates anomalies, deploys, diffs and log evidence into root causes.

use crate::context::IncidentContext;
use crate::detect::Trend;
use crate::mock::{service_for, CodeDiff, DeployEvent};
use crate::report::RcaReport;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::info;

/// A deploy this close before an anomaly onset counts as a suspect.
pub const DEPLOY_CORRELATION_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootCause {
    /// A recent deploy to the affected service introduced the fault.
    DeployRegression,
    /// Steady heap growth with no release: a leak.
    MemoryLeak,
    /// A spike with nothing in the change history to explain it.
    UnexplainedSpike,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub cause: RootCause,
    pub services: Vec<String>,
    pub summary: String,
    pub remediation: Vec<String>,
    pub confidence: f64,
}

/// Evidence the commander gathered.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    pub deploys: Vec<DeployEvent>,
    pub diffs: Vec<CodeDiff>,
    /// Raw text of log details and summaries, searched for signatures.
    pub log_text: String,
}

/// Removed and added `max_connections` lines, compiled once.
fn pool_patterns() -> Option<&'static (Regex, Regex)> {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let removed = Regex::new(r"(?mi)^-\s*max_?connections:\s*(\d+)").ok()?;
            let added = Regex::new(r"(?mi)^\+\s*max_?connections:\s*(\d+)").ok()?;
            Some((removed, added))
        })
        .as_ref()
}

/// Connection-pool size before and after a diff, when it changed.
pub fn pool_change(diff: &str) -> Option<(u32, u32)> {
    let (removed, added) = pool_patterns()?;
    let before = removed.captures(diff)?.get(1)?.as_str().parse().ok()?;
    let after = added.captures(diff)?.get(1)?.as_str().parse().ok()?;
    (before != after).then_some((before, after))
}

fn stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub struct CorrelationEngine {
    window: Duration,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self {
            window: Duration::minutes(DEPLOY_CORRELATION_MINUTES),
        }
    }
}

impl CorrelationEngine {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Deploys to an affected service that landed within the correlation
    /// window before that service's first anomaly.
    pub fn suspect_deploys<'a>(
        &self,
        context: &IncidentContext,
        deploys: &'a [DeployEvent],
    ) -> Vec<&'a DeployEvent> {
        deploys
            .iter()
            .filter(|d| match context.onset_for(&d.service) {
                Some(onset) => d.deployed_at <= onset && onset - d.deployed_at <= self.window,
                None => false,
            })
            .collect()
    }

    /// Findings, strongest first.
    pub fn findings(&self, context: &IncidentContext, evidence: &Evidence) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut explained: BTreeSet<String> = BTreeSet::new();

        for deploy in self.suspect_deploys(context, &evidence.deploys) {
            findings.push(self.deploy_finding(context, evidence, deploy));
            explained.insert(deploy.service.clone());
        }

        for metric in context.metrics() {
            if context.trend_of(metric) != Some(Trend::GradualRamp) {
                continue;
            }
            let service = service_for(metric).to_string();
            if explained.contains(&service) {
                continue;
            }
            findings.push(self.leak_finding(context, evidence, metric, &service));
            explained.insert(service);
        }

        let spiking: Vec<&str> = context
            .metrics()
            .into_iter()
            .filter(|m| !explained.contains(service_for(m)))
            .collect();
        if !spiking.is_empty() {
            findings.push(spike_finding(&spiking));
        }

        for f in &findings {
            info!(cause = ?f.cause, services = ?f.services, confidence = f.confidence, "Root cause candidate");
        }
        findings
    }

    fn deploy_finding(&self, context: &IncidentContext, evidence: &Evidence, deploy: &DeployEvent) -> Finding {
        let artifact = deploy.artifact.clone().unwrap_or_else(|| deploy.service.clone());
        let onset = context.onset_for(&deploy.service).unwrap_or(context.triggered_at);
        let lead = (onset - deploy.deployed_at).num_minutes();
        let metrics: Vec<&str> = context
            .metrics()
            .into_iter()
            .filter(|m| service_for(m) == deploy.service)
            .collect();
        let pool = evidence
            .diffs
            .iter()
            .filter(|d| d.service == deploy.service && d.commit_sha == deploy.commit_sha)
            .find_map(|d| pool_change(&d.diff));

        let mut summary = format!(
            "A {} deploy of {} {} (commit {}) at {} preceded the {} anomaly onset by {} minutes.",
            deploy.deploy_type,
            artifact,
            deploy.version,
            deploy.commit_sha,
            stamp(deploy.deployed_at),
            metrics.join(", "),
            lead
        );
        let mut remediation = vec![format!(
            "Roll back {} to the version before {} (revert commit {}) immediately",
            artifact, deploy.version, deploy.commit_sha
        )];
        let confidence = match pool {
            Some((before, after)) if after < before => {
                summary.push_str(&format!(
                    " The change cut the DB connection pool from {} to {} connections, so requests queue for a \
connection and time out (connection pool exhaustion).",
                    before, after
                ));
                remediation.push(format!(
                    "Restore max_connections to {} and revisit the connection timeout for {}",
                    before, deploy.service
                ));
                remediation.push(format!(
                    "Alert on DB connection pool utilisation for {}",
                    deploy.service
                ));
                0.9
            }
            _ => {
                remediation.push(format!("Review the {} diff before redeploying", deploy.commit_sha));
                0.75
            }
        };
        remediation.push("Require load testing for configuration changes that touch resource limits".to_string());

        Finding {
            cause: RootCause::DeployRegression,
            services: vec![deploy.service.clone()],
            summary,
            remediation,
            confidence,
        }
    }

    fn leak_finding(&self, context: &IncidentContext, evidence: &Evidence, metric: &str, service: &str) -> Finding {
        let values: Vec<f64> = context
            .anomalies
            .iter()
            .filter(|a| a.metric_name == metric)
            .map(|a| a.value)
            .collect();
        let first = values.first().copied().unwrap_or_default();
        let last = values.last().copied().unwrap_or_default();
        let oom = ["OutOfMemoryError", "OOMKilled"]
            .iter()
            .any(|sig| evidence.log_text.contains(sig));

        let mut summary = format!(
            "Memory leak in {}: {} climbed steadily from {:.0} to {:.0} across {} anomalies with no drop between \
GC cycles (gradual_ramp).",
            service,
            metric,
            first,
            last,
            values.len()
        );
        if oom {
            summary.push_str(" Logs show OutOfMemoryError and OOMKilled restarts.");
        }

        Finding {
            cause: RootCause::MemoryLeak,
            services: vec![service.to_string()],
            summary,
            remediation: vec![
                format!("Restart {} pods to reclaim heap (immediate mitigation)", service),
                format!("Capture a heap dump from {} before the next restart", service),
                format!(
                    "Review {} for listener registrations never removed, caches without TTLs and unbounded queues",
                    service
                ),
                format!("Alert on sustained heap growth for {}", service),
            ],
            confidence: if oom { 0.85 } else { 0.8 },
        }
    }

    /// Timeline of deploys, anomaly onsets and the trigger, oldest first.
    pub fn timeline(&self, context: &IncidentContext, evidence: &Evidence) -> Vec<String> {
        let mut events: Vec<(DateTime<Utc>, String)> = Vec::new();
        for d in &evidence.deploys {
            events.push((
                d.deployed_at,
                format!(
                    "Deploy {} {} ({}) by {}: {}",
                    d.artifact.as_deref().unwrap_or(&d.service),
                    d.version,
                    d.commit_sha,
                    d.deployed_by,
                    d.change_summary
                ),
            ));
        }
        for metric in context.metrics() {
            if let Some(a) = context.anomalies.iter().find(|a| a.metric_name == metric) {
                events.push((
                    a.timestamp,
                    format!(
                        "{} anomaly onset on {}: {:.2} above threshold {:.2}{}",
                        metric,
                        service_for(metric),
                        a.value,
                        a.threshold,
                        a.trend.map(|t| format!(" ({})", t)).unwrap_or_default()
                    ),
                ));
            }
        }
        events.push((context.triggered_at, "Incident triggered".to_string()));
        events.sort_by_key(|(ts, _)| *ts);
        events
            .into_iter()
            .map(|(ts, text)| format!("{} - {}", stamp(ts), text))
            .collect()
    }

    /// Assemble the report from ranked findings.
    pub fn report(&self, context: &IncidentContext, evidence: &Evidence) -> RcaReport {
        let findings = self.findings(context, evidence);
        let (root_cause, confidence, remediation_steps) = match findings.split_first() {
            Some((primary, rest)) => {
                let mut root_cause = primary.summary.clone();
                if !rest.is_empty() {
                    let also: Vec<&str> = rest.iter().map(|f| f.summary.as_str()).collect();
                    root_cause.push_str(" Also observed: ");
                    root_cause.push_str(&also.join(" "));
                }
                let mut steps: Vec<String> = Vec::new();
                for step in findings.iter().flat_map(|f| f.remediation.iter()) {
                    if !steps.contains(step) {
                        steps.push(step.clone());
                    }
                }
                (root_cause, primary.confidence, steps)
            }
            None => (
                "No anomalies to explain.".to_string(),
                0.0,
                vec!["Keep monitoring".to_string()],
            ),
        };

        RcaReport {
            incident_id: String::new(),
            root_cause,
            timeline: self.timeline(context, evidence),
            affected_services: context.affected_services(),
            remediation_steps,
            confidence,
        }
    }
}

fn spike_finding(metrics: &[&str]) -> Finding {
    let services: Vec<String> = metrics
        .iter()
        .map(|m| service_for(m).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    Finding {
        cause: RootCause::UnexplainedSpike,
        summary: format!(
            "Sudden spike in {} on {} with no correlated deploy; likely a traffic surge or upstream dependency degradation.",
            metrics.join(", "),
            services.join(", ")
        ),
        remediation: vec![
            format!("Scale out {} to absorb load", services.join(", ")),
            format!("Review traffic patterns and upstream dependencies of {}", services.join(", ")),
        ],
        services,
        confidence: 0.5,
    }
}
