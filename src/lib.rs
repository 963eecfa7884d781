//! Incident Commander -- automated first-pass incident triage.
//!
//! A sliding-window detector turns metric series into anomaly events; three
//! reasoning agents (metrics, logs, commander) then investigate them through
//! role-scoped tools and produce a markdown root-cause-analysis report.

pub mod agent;
pub mod analysis;
pub mod config;
pub mod context;
pub mod detect;
pub mod engine;
pub mod error;
pub mod mock;
pub mod orchestrator;
pub mod report;
pub mod tools;

pub use error::{IncidentError, Result};
pub use orchestrator::{IncidentOutcome, Orchestrator, Phase};

/// Run one investigation with the engine selected in `config`.
pub async fn run(config: config::CommanderConfig) -> Result<IncidentOutcome> {
    let engine = engine::from_config(&config.agents)?;
    Orchestrator::new(config, engine).run().await
}
