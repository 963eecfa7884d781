//! Runs one investigation end to end.
//!
//! Detection, then metrics and logs triage in parallel, then the commander's
//! INVESTIGATE, DECIDE, ACT and REPORT loop, then the optional upload.

use crate::agent::{self, AgentRole, TurnReport};
use crate::config::CommanderConfig;
use crate::context::{trigger_time, IncidentContext, Timeframe};
use crate::detect::{AnomalyEngine, MetricAnomaly, WindowTrigger};
use crate::engine::ReasoningEngine;
use crate::error::{IncidentError, Result};
use crate::mock::MockWorld;
use crate::report::{upload, RcaReport, RcaStore};
use crate::tools::{ReportSink, ToolName, ToolRegistry};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Investigate,
    Decide,
    Act,
    Report,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Investigate => write!(f, "INVESTIGATE"),
            Phase::Decide => write!(f, "DECIDE"),
            Phase::Act => write!(f, "ACT"),
            Phase::Report => write!(f, "REPORT"),
        }
    }
}

/// Follows the commander through its phases, one turn at a time.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: Phase,
    visited: Vec<Phase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: Phase::Investigate,
            visited: vec![Phase::Investigate],
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> Phase {
        self.current
    }

    /// Phases entered so far, in order, without consecutive repeats.
    pub fn visited(&self) -> &[Phase] {
        &self.visited
    }

    pub fn enter(&mut self, phase: Phase) {
        if self.current != phase {
            info!(from = %self.current, to = %phase, "Commander phase change");
            self.current = phase;
            self.visited.push(phase);
        }
    }

    pub fn observe(&mut self, turn: &TurnReport<'_>) {
        if turn.role != AgentRole::Commander {
            return;
        }
        let writes = turn.calls.iter().any(|c| c.is(ToolName::WriteRca));
        if turn.answered {
            self.enter(Phase::Decide);
        } else if writes {
            self.enter(Phase::Decide);
            self.enter(Phase::Act);
            if turn.terminal {
                self.enter(Phase::Report);
            }
        } else {
            self.enter(Phase::Investigate);
        }
    }
}

#[derive(Debug, Clone)]
pub enum IncidentOutcome {
    /// Nothing crossed a threshold.
    Healthy,
    Resolved {
        incident_id: String,
        report: RcaReport,
        path: PathBuf,
        /// Remote location, when the upload succeeded.
        uploaded: Option<String>,
        phases: Vec<Phase>,
    },
}

pub struct Orchestrator {
    config: CommanderConfig,
    engine: Arc<dyn ReasoningEngine>,
}

impl Orchestrator {
    pub fn new(config: CommanderConfig, engine: Arc<dyn ReasoningEngine>) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &CommanderConfig {
        &self.config
    }

    /// Mock world anchored at the current time.
    pub fn world(&self) -> MockWorld {
        MockWorld::generate(Utc::now(), &self.config.detector.metrics, &self.config.mock)
    }

    /// Run the detector over every configured metric.
    pub fn detect(&self, world: &MockWorld) -> Result<Vec<MetricAnomaly>> {
        let d = &self.config.detector;
        let trigger = WindowTrigger::new(Duration::from_secs(d.window_seconds), d.threshold_multiplier)?;
        Ok(AnomalyEngine::new(trigger, d.trend_window).scan(world.metrics())?)
    }

    pub async fn run(&self) -> Result<IncidentOutcome> {
        self.run_with_world(Arc::new(self.world())).await
    }

    pub async fn run_with_world(&self, world: Arc<MockWorld>) -> Result<IncidentOutcome> {
        match self.config.agents.run_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.investigate(world))
                .await
                .map_err(|_| IncidentError::Timeout {
                    secs: limit.as_secs(),
                })?,
            None => self.investigate(world).await,
        }
    }

    async fn investigate(&self, world: Arc<MockWorld>) -> Result<IncidentOutcome> {
        let anomalies = self.detect(&world)?;
        let Some(triggered_at) = trigger_time(&anomalies) else {
            info!("No anomalies detected");
            return Ok(IncidentOutcome::Healthy);
        };
        info!(count = anomalies.len(), %triggered_at, engine = self.engine.name(), "Incident triggered");

        let budgets = &self.config.agents.budgets;
        let engine = self.engine.as_ref();
        let timeframe = Timeframe::before(triggered_at);
        let mut services: Vec<String> = anomalies
            .iter()
            .map(|a| crate::mock::service_for(&a.metric_name).to_string())
            .collect();
        services.sort();
        services.dedup();

        // Triage in parallel; assembly waits for both.
        let metrics_registry = ToolRegistry::new(AgentRole::Metrics, world.clone());
        let logs_registry = ToolRegistry::new(AgentRole::Logs, world.clone());
        let (metrics_summary, log_summary) = tokio::join!(
            agent::metrics::investigate(
                engine,
                &metrics_registry,
                &anomalies,
                budgets.for_role(AgentRole::Metrics)
            ),
            agent::logs::investigate(
                engine,
                &logs_registry,
                timeframe,
                &services,
                budgets.for_role(AgentRole::Logs)
            ),
        );
        let context = Arc::new(IncidentContext::assemble(
            anomalies,
            metrics_summary?,
            log_summary?,
        )?);

        let incident_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let store = Arc::new(RcaStore::new(&self.config.report.output_dir));
        let registry = ToolRegistry::new(AgentRole::Commander, world)
            .with_context(context.clone())
            .with_sink(ReportSink {
                store: store.clone(),
                incident_id: incident_id.clone(),
            });

        let mut tracker = PhaseTracker::default();
        let run = agent::commander::investigate(
            engine,
            &registry,
            &context,
            budgets.for_role(AgentRole::Commander),
            |turn| tracker.observe(turn),
        )
        .await?;

        let (report, path) = match run.written_to {
            Some(path) => (run.report, path),
            None => {
                // A conforming final answer without write_rca: store it here.
                warn!(%incident_id, "Commander answered without write_rca, storing the report");
                tracker.enter(Phase::Act);
                let report = run.report.with_incident_id(&incident_id);
                let path = store.write(&report)?;
                tracker.enter(Phase::Report);
                (report, path)
            }
        };
        info!(
            %incident_id,
            path = %path.display(),
            turns = run.turns,
            tool_calls = run.records.len(),
            confidence = report.confidence,
            "Investigation complete"
        );

        let uploaded = upload::upload_best_effort(
            &self.config.report.upload_command,
            &path,
            self.config.report.remote_dir.as_deref(),
        )
        .await;

        Ok(IncidentOutcome::Resolved {
            incident_id,
            report,
            path,
            uploaded,
            phases: tracker.visited().to_vec(),
        })
    }
}
