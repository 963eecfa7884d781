//! Temporal shape of a metric's anomaly sequence.

use crate::detect::MetricAnomaly;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default number of trailing anomalies considered when classifying a metric.
pub const DEFAULT_TREND_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// One large deviation from an otherwise stable baseline.
    SuddenSpike,
    /// Steady climb with no drop between consecutive anomalies.
    GradualRamp,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::SuddenSpike => write!(f, "sudden_spike"),
            Trend::GradualRamp => write!(f, "gradual_ramp"),
        }
    }
}

/// Classify the last `window` anomaly values of one metric.
pub fn classify(values: &[f64], window: usize) -> Trend {
    let window = window.max(1);
    let tail = &values[values.len().saturating_sub(window)..];
    if tail.len() < 3 {
        return Trend::SuddenSpike;
    }

    let steps: Vec<f64> = tail.windows(2).map(|w| w[1] - w[0]).collect();
    if steps.iter().any(|&s| s < 0.0) {
        // A peak followed by a drop: sawtooth, not a ramp.
        return Trend::SuddenSpike;
    }

    let total_rise = tail[tail.len() - 1] - tail[0];
    let largest_step = steps.iter().cloned().fold(0.0_f64, f64::max);
    if total_rise > 0.0 && largest_step <= total_rise / 2.0 {
        Trend::GradualRamp
    } else {
        Trend::SuddenSpike
    }
}

/// Tag every anomaly with the trend of its metric's sequence.
///
/// Anomalies keep their input order; the tag is a pure function of the
/// per-metric values, so repeated calls give the same result.
pub fn annotate(anomalies: &[MetricAnomaly], window: usize) -> Vec<MetricAnomaly> {
    let mut per_metric: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for a in anomalies {
        per_metric.entry(a.metric_name.as_str()).or_default().push(a.value);
    }
    let trends: BTreeMap<&str, Trend> = per_metric
        .iter()
        .map(|(name, values)| (*name, classify(values, window)))
        .collect();

    anomalies
        .iter()
        .map(|a| match trends.get(a.metric_name.as_str()) {
            Some(trend) => a.with_trend(*trend),
            None => a.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_linear_ramp_is_gradual() {
        let values = [578.0, 647.0, 716.0, 785.0, 855.0, 924.0];
        assert_eq!(classify(&values, 5), Trend::GradualRamp);
    }

    #[test]
    fn test_single_or_pair_is_spike() {
        assert_eq!(classify(&[161.0], 5), Trend::SuddenSpike);
        assert_eq!(classify(&[41.0, 161.0], 5), Trend::SuddenSpike);
        assert_eq!(classify(&[], 5), Trend::SuddenSpike);
    }

    #[test]
    fn test_sawtooth_is_not_ramp() {
        let values = [600.0, 800.0, 1000.0, 650.0, 850.0];
        assert_eq!(classify(&values, 5), Trend::SuddenSpike);
    }

    #[test]
    fn test_dominant_step_is_spike() {
        // Monotone, but almost all of the rise happens in one jump.
        let values = [41.0, 41.5, 42.0, 161.0];
        assert_eq!(classify(&values, 5), Trend::SuddenSpike);
    }

    #[test]
    fn test_only_tail_is_considered() {
        // An early drop falls outside the last three values.
        let values = [900.0, 500.0, 600.0, 700.0, 800.0];
        assert_eq!(classify(&values, 3), Trend::GradualRamp);
        assert_eq!(classify(&values, 5), Trend::SuddenSpike);
    }

    #[test]
    fn test_annotate_is_deterministic() {
        let mk = |name: &str, value: f64| MetricAnomaly {
            metric_name: name.to_string(),
            value,
            threshold: value - 10.0,
            timestamp: Utc::now(),
            window_seconds: 300,
            trend: None,
        };
        let input = vec![
            mk("heap_usage_mb", 600.0),
            mk("cpu_usage", 161.0),
            mk("heap_usage_mb", 700.0),
            mk("heap_usage_mb", 800.0),
        ];
        let first = annotate(&input, 5);
        let second = annotate(&input, 5);
        assert_eq!(first, second);
        assert_eq!(first[0].trend, Some(Trend::GradualRamp));
        assert_eq!(first[1].trend, Some(Trend::SuddenSpike));
        assert_eq!(first.len(), input.len());
        assert!(input.iter().all(|a| a.trend.is_none()));
    }
}
