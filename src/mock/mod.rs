//! Mock backing data for detection and the agents' tools.
//!
//! The world is generated once per run from an anchor time and a seed, so
//! every tool call within a run sees the same data.

pub mod changes;
pub mod logs;
pub mod timeseries;

pub use changes::{CodeDiff, DeployEvent};

use crate::config::MockConfig;
use crate::detect::TimeseriesPoint;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

pub const DEFAULT_METRICS: &[&str] = &[
    "cpu_usage",
    "error_rate",
    "latency_p99",
    "checkout_latency_p99",
    "heap_usage_mb",
];

pub const SERVICES: &[&str] = &[
    "api-gateway",
    "auth-service",
    "payment-service",
    "checkout-service",
    "worker-service",
];

/// Service that owns a metric.
pub fn service_for(metric: &str) -> &'static str {
    match metric {
        "cpu_usage" => "api-gateway",
        "error_rate" => "payment-service",
        "latency_p99" => "auth-service",
        "checkout_latency_p99" => "checkout-service",
        "heap_usage_mb" => "worker-service",
        _ => "unknown-service",
    }
}

pub struct MockWorld {
    anchor: DateTime<Utc>,
    seed: u64,
    series: BTreeMap<String, Vec<TimeseriesPoint>>,
    order: Vec<String>,
}

impl MockWorld {
    pub fn generate(anchor: DateTime<Utc>, metrics: &[String], cfg: &MockConfig) -> Self {
        let interval = cfg.sample_interval();
        let mut series = BTreeMap::new();
        let mut order = Vec::new();
        for metric in metrics {
            if series.contains_key(metric) {
                continue;
            }
            series.insert(
                metric.clone(),
                timeseries::generate(metric, anchor, cfg.sample_count(), interval),
            );
            order.push(metric.clone());
        }
        Self {
            anchor,
            seed: cfg.seed,
            series,
            order,
        }
    }

    /// Build a world from explicit series, for callers that bring their own data.
    pub fn from_series(
        anchor: DateTime<Utc>,
        seed: u64,
        series: Vec<(String, Vec<TimeseriesPoint>)>,
    ) -> Self {
        let order = series.iter().map(|(m, _)| m.clone()).collect();
        Self {
            anchor,
            seed,
            series: series.into_iter().collect(),
            order,
        }
    }

    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    /// Metrics in configuration order.
    pub fn metrics(&self) -> impl Iterator<Item = (&str, &[TimeseriesPoint])> + '_ {
        self.order
            .iter()
            .filter_map(|m| self.series.get(m).map(|s| (m.as_str(), s.as_slice())))
    }

    pub fn series(&self, metric: &str) -> Option<&[TimeseriesPoint]> {
        self.series.get(metric).map(|s| s.as_slice())
    }

    /// Points of `metric` with `start <= ts <= end`.
    pub fn window(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Vec<TimeseriesPoint>> {
        self.series(metric).map(|s| {
            s.iter()
                .filter(|p| p.timestamp >= start && p.timestamp <= end)
                .copied()
                .collect()
        })
    }

    pub fn services(&self) -> &'static [&'static str] {
        SERVICES
    }

    pub fn logs(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        count: usize,
    ) -> Vec<String> {
        let mut rng = self.rng_for(service, start.timestamp());
        logs::generate(service, start, end, count, &mut rng)
    }

    pub fn deploys(&self, triggered_at: DateTime<Utc>) -> Vec<DeployEvent> {
        let mut rng = self.rng_for("deploys", triggered_at.timestamp());
        changes::recent_deploys(triggered_at, &mut rng)
    }

    pub fn code_diff(&self, service: &str, commit_sha: &str) -> CodeDiff {
        changes::code_diff(service, commit_sha)
    }

    fn rng_for(&self, key: &str, salt: i64) -> StdRng {
        let key_hash = key
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3));
        StdRng::seed_from_u64(self.seed ^ key_hash ^ salt as u64)
    }
}
