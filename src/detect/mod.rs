//! Anomaly detection: sliding-window threshold trigger and trend tagging.

pub mod anomaly;
pub mod engine;
pub mod trend;

pub use anomaly::{TimeSeries, WindowTrigger};
pub use engine::AnomalyEngine;
pub use trend::Trend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("timestamps must be strictly increasing: point {index} at {current} does not follow {previous}")]
    NonIncreasingTimestamp {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
    #[error("value at point {index} is not finite")]
    NonFiniteValue { index: usize },
    #[error("invalid detector parameter: {0}")]
    InvalidParameter(String),
}

/// One sample of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TimeseriesPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A point whose value exceeded the rolling threshold of its window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAnomaly {
    pub metric_name: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub window_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

impl MetricAnomaly {
    /// Copy of this anomaly carrying a trend tag.
    pub fn with_trend(&self, trend: Trend) -> Self {
        Self {
            trend: Some(trend),
            ..self.clone()
        }
    }

    /// How far above its threshold the value landed, as a ratio.
    pub fn excess_ratio(&self) -> f64 {
        if self.threshold.abs() < f64::EPSILON {
            return f64::INFINITY;
        }
        self.value / self.threshold
    }
}
