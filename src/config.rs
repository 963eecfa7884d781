//! TOML configuration for Incident Commander.
//!
//! Layered like the rest of our tooling: an explicit path, then the
//! `INCIDENT_COMMANDER_CONFIG` environment variable, then
//! `./incident-commander.toml`, then compiled-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::AgentRole;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "INCIDENT_COMMANDER_CONFIG";
/// Environment variable overriding the remote artifact directory.
pub const REMOTE_DIR_ENV: &str = "ARTIFACTS_GCS_DIR";
const LOCAL_CONFIG: &str = "incident-commander.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommanderConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub mock: MockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CommanderConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration.
    ///
    /// An explicitly requested file must load; the fallbacks only warn.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, trying fallback", CONFIG_ENV
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(REMOTE_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.report.remote_dir = Some(dir);
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Width of the trailing baseline window.
    pub window_seconds: u64,
    /// Sensitivity: lower flags more points.
    pub threshold_multiplier: f64,
    /// Number of trailing anomalies used for trend classification.
    pub trend_window: usize,
    /// Metrics to scan.
    pub metrics: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300,
            threshold_multiplier: 2.5,
            trend_window: crate::detect::trend::DEFAULT_TREND_WINDOW,
            metrics: crate::mock::DEFAULT_METRICS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Deterministic offline rule engine.
    Rules,
    /// OpenAI-compatible chat completions via OpenRouter.
    Openrouter,
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rules" | "offline" => Ok(EngineKind::Rules),
            "openrouter" | "llm" => Ok(EngineKind::Openrouter),
            other => Err(format!("unknown engine: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub engine: EngineKind,
    /// Reasoning-engine model identifier.
    pub model: String,
    /// Base URL of the chat completions API.
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Optional wall-clock ceiling on the whole investigation.
    pub run_timeout_secs: Option<u64>,
    pub budgets: TurnBudgets,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Rules,
            model: "anthropic/claude-sonnet-4-5".to_string(),
            endpoint: "https://openrouter.ai/api/v1".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            request_timeout_secs: 120,
            run_timeout_secs: None,
            budgets: TurnBudgets::default(),
        }
    }
}

impl AgentsConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Maximum turns per agent role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnBudgets {
    pub metrics: usize,
    pub logs: usize,
    pub commander: usize,
}

impl Default for TurnBudgets {
    fn default() -> Self {
        Self {
            metrics: 8,
            logs: 8,
            commander: 16,
        }
    }
}

impl TurnBudgets {
    pub fn uniform(turns: usize) -> Self {
        Self {
            metrics: turns,
            logs: turns,
            commander: turns,
        }
    }

    pub fn for_role(&self, role: AgentRole) -> usize {
        match role {
            AgentRole::Metrics => self.metrics,
            AgentRole::Logs => self.logs,
            AgentRole::Commander => self.commander,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Local directory for `incident_<id>.md` files.
    pub output_dir: PathBuf,
    /// Remote destination (e.g. `gs://bucket/rca`). Absent disables upload.
    pub remote_dir: Option<String>,
    /// Copy command used for the upload.
    pub upload_command: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("rca_reports"),
            remote_dir: None,
            upload_command: "gsutil".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Mock data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Seed for filler log lines and deploy metadata.
    pub seed: u64,
    /// Samples per generated metric series.
    pub samples: usize,
    pub sample_interval_secs: u64,
}

/// Upper bound on generated samples per series.
pub const MAX_MOCK_SAMPLES: usize = 10_000;
/// Upper bound on the spacing between generated samples.
pub const MAX_SAMPLE_INTERVAL_SECS: u64 = 3_600;

impl MockConfig {
    /// Samples per series, capped at [`MAX_MOCK_SAMPLES`].
    pub fn sample_count(&self) -> usize {
        self.samples.min(MAX_MOCK_SAMPLES)
    }

    /// Sample spacing, clamped to 1s..=[`MAX_SAMPLE_INTERVAL_SECS`] so the
    /// whole series stays representable.
    pub fn sample_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sample_interval_secs.clamp(1, MAX_SAMPLE_INTERVAL_SECS) as i64)
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            samples: 100,
            sample_interval_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_detector_contract() {
        let cfg = CommanderConfig::default();
        assert_eq!(cfg.detector.window_seconds, 300);
        assert_eq!(cfg.detector.threshold_multiplier, 2.5);
        assert_eq!(cfg.detector.metrics.len(), 5);
        assert_eq!(cfg.agents.engine, EngineKind::Rules);
        assert!(cfg.report.remote_dir.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ic.toml");
        std::fs::write(
            &path,
            r#"
[detector]
threshold_multiplier = 3.0

[agents]
engine = "openrouter"
budgets = { commander = 4 }
"#,
        )
        .unwrap();

        let cfg = CommanderConfig::load(&path).unwrap();
        assert_eq!(cfg.detector.threshold_multiplier, 3.0);
        assert_eq!(cfg.detector.window_seconds, 300);
        assert_eq!(cfg.agents.engine, EngineKind::Openrouter);
        assert_eq!(cfg.agents.budgets.for_role(AgentRole::Commander), 4);
        assert_eq!(cfg.agents.budgets.for_role(AgentRole::Logs), 8);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(CommanderConfig::resolve(Some(Path::new("/nonexistent/ic.toml"))).is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let text = CommanderConfig::default().to_toml().unwrap();
        let parsed: CommanderConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.agents.model, "anthropic/claude-sonnet-4-5");
    }

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("rules".parse::<EngineKind>().unwrap(), EngineKind::Rules);
        assert_eq!("OpenRouter".parse::<EngineKind>().unwrap(), EngineKind::Openrouter);
        assert!("gpt".parse::<EngineKind>().is_err());
    }
}
