use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use incident_commander::config::{CommanderConfig, EngineKind, LoggingConfig, TurnBudgets};
use incident_commander::{engine, IncidentOutcome, Orchestrator};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "incident-commander",
    about = "Automated first-pass incident triage: anomaly detection and multi-agent root-cause analysis",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect anomalies and investigate them into an RCA report
    Run {
        /// Reasoning engine: rules or openrouter
        #[arg(long)]
        engine: Option<EngineKind>,

        /// Turn budget applied to every agent
        #[arg(long)]
        max_turns: Option<usize>,

        /// Directory for incident_<id>.md reports
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Comma-separated metrics to scan
        #[arg(long, value_delimiter = ',')]
        metrics: Option<Vec<String>>,
    },

    /// Run anomaly detection only
    Detect {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Comma-separated metrics to scan
        #[arg(long, value_delimiter = ',')]
        metrics: Option<Vec<String>>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

fn env_filter(cfg: &LoggingConfig) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level))
}

fn init_tracing(cfg: &LoggingConfig) {
    // Logs go to stderr so stdout stays parseable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(cfg))
        .with_writer(std::io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // The configured subscriber needs the config, so fallback warnings go
    // through a default one scoped to resolution.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&LoggingConfig::default()))
        .with_writer(std::io::stderr)
        .finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || {
        CommanderConfig::resolve(cli.config.as_deref())
    })?;

    match cli.command {
        Commands::Run {
            engine: engine_kind,
            max_turns,
            output_dir,
            metrics,
        } => {
            if let Some(kind) = engine_kind {
                config.agents.engine = kind;
            }
            if let Some(turns) = max_turns {
                config.agents.budgets = TurnBudgets::uniform(turns);
            }
            if let Some(dir) = output_dir {
                config.report.output_dir = dir;
            }
            if let Some(metrics) = metrics {
                config.detector.metrics = metrics;
            }
            init_tracing(&config.logging);

            let engine = engine::from_config(&config.agents).context("failed to set up reasoning engine")?;
            tracing::info!(engine = engine.name(), "Starting investigation");
            let outcome = Orchestrator::new(config, engine)
                .run()
                .await
                .context("investigation failed")?;

            match outcome {
                IncidentOutcome::Healthy => {
                    println!("No anomalies detected. System healthy.");
                }
                IncidentOutcome::Resolved {
                    incident_id,
                    report,
                    path,
                    uploaded,
                    phases,
                } => {
                    println!("\n=== Incident {} ===", incident_id);
                    println!("RCA written: {}", path.display());
                    if let Some(remote) = uploaded {
                        println!("Uploaded:    {}", remote);
                    }
                    let phases: Vec<String> = phases.iter().map(|p| p.to_string()).collect();
                    println!("Phases:      {}", phases.join(" -> "));
                    println!("Confidence:  {:.0}%", report.confidence * 100.0);
                    println!("Affected:    {}", report.affected_services.join(", "));
                    println!("\nRoot cause:\n  {}", report.root_cause);
                    println!("\nRemediation:");
                    for (i, step) in report.remediation_steps.iter().enumerate() {
                        println!("  {}. {}", i + 1, step);
                    }
                    println!();
                }
            }
        }
        Commands::Detect { json, metrics } => {
            if let Some(metrics) = metrics {
                config.detector.metrics = metrics;
            }
            init_tracing(&config.logging);

            let orchestrator = Orchestrator::new(config, engine::from_config(&Default::default())?);
            let world = orchestrator.world();
            let anomalies = orchestrator.detect(&world).context("anomaly detection failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&anomalies)?);
            } else if anomalies.is_empty() {
                println!("No anomalies detected. System healthy.");
            } else {
                println!("{:<22} | {:<25} | {:>10} | {:>10} | Trend", "Metric", "At", "Value", "Threshold");
                println!("{:-<22}-|-{:-<25}-|-{:->10}-|-{:->10}-|-{:-<12}", "", "", "", "", "");
                for a in &anomalies {
                    println!(
                        "{:<22} | {:<25} | {:>10.2} | {:>10.2} | {}",
                        a.metric_name,
                        a.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                        a.value,
                        a.threshold,
                        a.trend.map(|t| t.to_string()).unwrap_or_default()
                    );
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
            }
        },
    }

    Ok(())
}
