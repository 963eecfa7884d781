use crate::detect::anomaly::WindowTrigger;
use crate::detect::{trend, DetectError, MetricAnomaly, TimeseriesPoint};
use tracing::{debug, info, warn};

/// Runs the window trigger over every metric and tags the results with trends.
pub struct AnomalyEngine {
    trigger: WindowTrigger,
    trend_window: usize,
}

impl AnomalyEngine {
    pub fn new(trigger: WindowTrigger, trend_window: usize) -> Self {
        Self {
            trigger,
            trend_window,
        }
    }

    /// Scan each `(metric, series)` pair in order.
    ///
    /// A malformed series aborts the whole scan before any anomaly is returned.
    pub fn scan<'a, I>(&self, metrics: I) -> Result<Vec<MetricAnomaly>, DetectError>
    where
        I: IntoIterator<Item = (&'a str, &'a [TimeseriesPoint])>,
    {
        info!(window_seconds = self.trigger.window_seconds(), "Running anomaly detection scan");

        let mut raw = Vec::new();
        for (metric, series) in metrics {
            let found = self.trigger.check(metric, series)?;
            debug!(%metric, points = series.len(), anomalies = found.len(), "Metric scanned");
            raw.extend(found);
        }

        let anomalies = trend::annotate(&raw, self.trend_window);
        for a in &anomalies {
            warn!(
                metric = %a.metric_name,
                value = a.value,
                threshold = a.threshold,
                trend = ?a.trend,
                at = %a.timestamp,
                "Anomaly detected"
            );
        }
        Ok(anomalies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Trend;
    use chrono::{Duration, Utc};

    fn points(values: &[f64]) -> Vec<TimeseriesPoint> {
        let start = Utc::now() - Duration::hours(2);
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| TimeseriesPoint::new(start + Duration::seconds(60 * i as i64), v))
            .collect()
    }

    #[test]
    fn test_scan_tags_trends_per_metric() {
        let engine = AnomalyEngine::new(
            WindowTrigger::new(std::time::Duration::from_secs(300), 2.5).unwrap(),
            5,
        );
        let spike = points(&[40.0, 40.5, 39.5, 40.0, 40.2, 39.8, 161.0]);
        let flat = points(&[5.0; 10]);
        let found = engine
            .scan([("cpu_usage", spike.as_slice()), ("error_rate", flat.as_slice())])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric_name, "cpu_usage");
        assert_eq!(found[0].trend, Some(Trend::SuddenSpike));
    }

    #[test]
    fn test_scan_aborts_on_malformed_series() {
        let engine = AnomalyEngine::new(
            WindowTrigger::new(std::time::Duration::from_secs(300), 2.5).unwrap(),
            5,
        );
        let good = points(&[1.0, 2.0, 3.0]);
        let mut bad = points(&[1.0, 2.0, 3.0]);
        bad.swap(0, 2);
        let err = engine
            .scan([("a", good.as_slice()), ("b", bad.as_slice())])
            .unwrap_err();
        assert!(matches!(err, DetectError::NonIncreasingTimestamp { .. }));
    }
}
