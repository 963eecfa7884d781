use crate::detect::{DetectError, MetricAnomaly, TimeseriesPoint};
use std::collections::VecDeque;
use std::time::Duration;

/// A simple time series window for statistical analysis.
pub struct TimeSeries {
    values: VecDeque<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// mean + multiplier * std_dev. A flat window yields the mean itself.
    pub fn threshold(&self, multiplier: f64) -> f64 {
        self.mean() + multiplier * self.std_dev()
    }
}

/// Sliding-window threshold trigger.
///
/// Each point is compared against the points that precede it within
/// `window` (by timestamp, not by count). The point itself never joins its
/// own baseline, and past points are never re-evaluated.
#[derive(Debug, Clone)]
pub struct WindowTrigger {
    window: Duration,
    threshold_multiplier: f64,
}

/// Minimum number of preceding points needed to establish a baseline.
pub const MIN_BASELINE: usize = 2;

impl WindowTrigger {
    pub fn new(window: Duration, threshold_multiplier: f64) -> Result<Self, DetectError> {
        if window.is_zero() {
            return Err(DetectError::InvalidParameter(
                "window must be longer than zero seconds".to_string(),
            ));
        }
        if !threshold_multiplier.is_finite() || threshold_multiplier < 0.0 {
            return Err(DetectError::InvalidParameter(format!(
                "threshold multiplier must be a non-negative number, got {}",
                threshold_multiplier
            )));
        }
        Ok(Self {
            window,
            threshold_multiplier,
        })
    }

    pub fn window_seconds(&self) -> u64 {
        self.window.as_secs()
    }

    /// Scan `series` and return every point that breached its window threshold.
    pub fn check(
        &self,
        metric_name: &str,
        series: &[TimeseriesPoint],
    ) -> Result<Vec<MetricAnomaly>, DetectError> {
        validate_series(series)?;

        let window = chrono::Duration::from_std(self.window)
            .map_err(|e| DetectError::InvalidParameter(e.to_string()))?;
        let mut trailing: VecDeque<TimeseriesPoint> = VecDeque::new();
        let mut anomalies = Vec::new();

        for (i, point) in series.iter().enumerate() {
            if i > 0 {
                trailing.push_back(series[i - 1]);
            }
            while let Some(front) = trailing.front() {
                if point.timestamp - front.timestamp > window {
                    trailing.pop_front();
                } else {
                    break;
                }
            }

            if trailing.len() < MIN_BASELINE {
                continue;
            }

            let baseline = TimeSeries::new(trailing.iter().map(|p| p.value).collect());
            let threshold = baseline.threshold(self.threshold_multiplier);
            if point.value > threshold {
                anomalies.push(MetricAnomaly {
                    metric_name: metric_name.to_string(),
                    value: point.value,
                    threshold,
                    timestamp: point.timestamp,
                    window_seconds: self.window_seconds(),
                    trend: None,
                });
            }
        }

        Ok(anomalies)
    }
}

/// Free-function form of [`WindowTrigger::check`].
pub fn detect(
    metric_name: &str,
    series: &[TimeseriesPoint],
    window_seconds: u64,
    threshold_multiplier: f64,
) -> Result<Vec<MetricAnomaly>, DetectError> {
    WindowTrigger::new(Duration::from_secs(window_seconds), threshold_multiplier)?
        .check(metric_name, series)
}

fn validate_series(series: &[TimeseriesPoint]) -> Result<(), DetectError> {
    for (i, point) in series.iter().enumerate() {
        if !point.value.is_finite() {
            return Err(DetectError::NonFiniteValue { index: i });
        }
        if i > 0 && point.timestamp <= series[i - 1].timestamp {
            return Err(DetectError::NonIncreasingTimestamp {
                index: i,
                previous: series[i - 1].timestamp,
                current: point.timestamp,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn series(values: &[f64]) -> Vec<TimeseriesPoint> {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| TimeseriesPoint::new(start + chrono::Duration::seconds(60 * i as i64), v))
            .collect()
    }

    #[test]
    fn test_stats() {
        let ts = TimeSeries::new(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(ts.mean(), 3.0);
        // Population variance of 1..5 is 2.0
        assert!((ts.variance() - 2.0).abs() < 1e-12);
        assert!((ts.threshold(2.0) - (3.0 + 2.0 * 2f64.sqrt())).abs() < 1e-12);
    }

    #[test]
    fn test_no_baseline_no_anomaly() {
        // The second point only has one predecessor, however large it is.
        let points = series(&[1.0, 1000.0]);
        let found = detect("m", &points, 300, 2.5).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_flat_window_flags_only_strictly_greater() {
        let points = series(&[10.0, 10.0, 10.0, 10.0, 10.0, 10.1]);
        let found = detect("m", &points, 300, 2.5).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 10.1);
        assert_eq!(found[0].threshold, 10.0);
    }

    #[test]
    fn test_window_is_time_based() {
        // 60s spacing with a 120s window keeps two predecessors.
        let points = series(&[10.0, 10.0, 50.0, 50.0, 51.0]);
        let found = detect("m", &points, 120, 2.5).unwrap();
        // Point 2 sees [10, 10] -> flagged. Point 3 sees [10, 50]. Point 4 sees [50, 50] -> flagged.
        let timestamps: Vec<_> = found.iter().map(|a| a.timestamp).collect();
        assert_eq!(timestamps, vec![points[2].timestamp, points[4].timestamp]);
    }

    #[test]
    fn test_spike_against_noisy_baseline() {
        let mut values = vec![40.0, 41.0, 39.5, 40.5, 40.0, 39.0, 41.0, 40.2];
        values.push(161.0);
        let points = series(&values);
        let found = detect("cpu_usage", &points, 300, 2.5).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric_name, "cpu_usage");
        assert_eq!(found[0].window_seconds, 300);
        assert!(found[0].threshold < 45.0);
    }

    #[test]
    fn test_steady_linear_ramp_never_breaches() {
        // Only the first point with a two-point baseline breaches. From three
        // predecessors on, the threshold stays above the next point of a
        // straight line whatever the slope.
        let values: Vec<f64> = (0..100).map(|i| 512.0 + i as f64 * 1288.0 / 99.0).collect();
        let points = series(&values);
        let found = detect("heap_usage_mb", &points, 300, 2.5).unwrap();
        let timestamps: Vec<_> = found.iter().map(|a| a.timestamp).collect();
        assert_eq!(timestamps, vec![points[2].timestamp]);

        // The same growth reported in steps breaches at every step edge.
        let stepped: Vec<f64> = (0..100).map(|i| 512.0 + (i / 5) as f64 * 1288.0 / 19.0).collect();
        let found = detect("heap_usage_mb", &series(&stepped), 300, 2.5).unwrap();
        assert_eq!(found.len(), 19);
    }

    #[test]
    fn test_output_is_increasing_subsequence() {
        let values: Vec<f64> = (0..60).map(|i| ((i * 37) % 11) as f64 + (i / 20) as f64 * 30.0).collect();
        let points = series(&values);
        let found = detect("m", &points, 300, 1.0).unwrap();
        assert!(!found.is_empty());
        for pair in found.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        for a in &found {
            assert!(points.iter().any(|p| p.timestamp == a.timestamp && p.value == a.value));
        }
    }

    #[test]
    fn test_rejects_non_increasing_timestamps() {
        let mut points = series(&[1.0, 2.0, 3.0]);
        points[2].timestamp = points[1].timestamp;
        let err = detect("m", &points, 300, 2.5).unwrap_err();
        assert!(matches!(err, DetectError::NonIncreasingTimestamp { index: 2, .. }));
    }

    #[test]
    fn test_rejects_nan_and_bad_parameters() {
        let points = series(&[1.0, f64::NAN]);
        assert_eq!(
            detect("m", &points, 300, 2.5).unwrap_err(),
            DetectError::NonFiniteValue { index: 1 }
        );
        assert!(WindowTrigger::new(Duration::ZERO, 2.5).is_err());
        assert!(WindowTrigger::new(Duration::from_secs(60), f64::NAN).is_err());
    }
}
