//! Metric tools: raw points, baseline comparison and per-window details.

use super::{parse_args, ToolError, ToolName};
use crate::context::IncidentContext;
use crate::detect::{TimeSeries, TimeseriesPoint};
use crate::mock::{service_for, MockWorld};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct MetricWindow {
    metric_name: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl MetricWindow {
    fn parse(tool: ToolName, args: &Value) -> Result<Self, ToolError> {
        let w: Self = parse_args(tool, args)?;
        if w.end < w.start {
            return Err(ToolError::InvalidArguments {
                tool,
                reason: format!("end {} precedes start {}", w.end, w.start),
            });
        }
        Ok(w)
    }

    fn split<'a>(
        &self,
        tool: ToolName,
        world: &'a MockWorld,
    ) -> Result<(Vec<&'a TimeseriesPoint>, Vec<&'a TimeseriesPoint>), ToolError> {
        let series = world
            .series(&self.metric_name)
            .ok_or_else(|| ToolError::execution(tool, format!("unknown metric {}", self.metric_name)))?;
        let before = series.iter().filter(|p| p.timestamp < self.start).collect();
        let within: Vec<_> = series
            .iter()
            .filter(|p| p.timestamp >= self.start && p.timestamp <= self.end)
            .collect();
        if within.is_empty() {
            return Err(ToolError::execution(tool, "no data points in the requested window"));
        }
        Ok((before, within))
    }
}

fn stats<'a>(points: impl IntoIterator<Item = &'a TimeseriesPoint>) -> TimeSeries {
    TimeSeries::new(points.into_iter().map(|p| p.value).collect())
}

fn round(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

fn deviation_pct(current: f64, baseline: f64) -> f64 {
    if baseline.abs() < f64::EPSILON {
        return 0.0;
    }
    round((current - baseline) / baseline * 100.0, 2)
}

pub fn query_metric(world: &MockWorld, args: &Value) -> Result<Value, ToolError> {
    let w = MetricWindow::parse(ToolName::QueryMetric, args)?;
    let (_, within) = w.split(ToolName::QueryMetric, world)?;
    Ok(json!({
        "metric": w.metric_name,
        "points": within,
    }))
}

/// Mean inside the window against the mean of everything before it.
pub fn compare_baseline(world: &MockWorld, args: &Value) -> Result<Value, ToolError> {
    let tool = ToolName::CompareBaseline;
    let w = MetricWindow::parse(tool, args)?;
    let (before, within) = w.split(tool, world)?;
    if before.is_empty() {
        return Err(ToolError::execution(tool, "no baseline data before the window start"));
    }
    let baseline = stats(before).mean();
    let current = stats(within).mean();
    Ok(json!({
        "metric": w.metric_name,
        "baseline_mean": round(baseline, 4),
        "current_mean": round(current, 4),
        "deviation_percent": deviation_pct(current, baseline),
    }))
}

pub fn get_metric_details(
    world: &MockWorld,
    context: Option<&IncidentContext>,
    args: &Value,
) -> Result<Value, ToolError> {
    let tool = ToolName::GetMetricDetails;
    let w = MetricWindow::parse(tool, args)?;
    let (before, within) = w.split(tool, world)?;

    let current = stats(within.iter().copied());
    let baseline = if before.is_empty() {
        current.mean()
    } else {
        stats(before).mean()
    };
    let peak = within
        .iter()
        .map(|p| p.value)
        .fold(f64::NEG_INFINITY, f64::max);

    let flagged: Vec<_> = context
        .map(|ctx| {
            ctx.anomalies
                .iter()
                .filter(|a| a.metric_name == w.metric_name)
                .filter(|a| a.timestamp >= w.start && a.timestamp <= w.end)
                .collect()
        })
        .unwrap_or_default();
    let trend = context.and_then(|ctx| ctx.trend_of(&w.metric_name));

    Ok(json!({
        "metric": w.metric_name,
        "service": service_for(&w.metric_name),
        "window": { "start": w.start, "end": w.end },
        "current_mean": round(current.mean(), 4),
        "current_std_dev": round(current.std_dev(), 4),
        "baseline_mean": round(baseline, 4),
        "deviation_percent": deviation_pct(current.mean(), baseline),
        "peak_value": round(peak, 4),
        "anomalous_points": flagged.len(),
        "first_anomaly_at": flagged.first().map(|a| a.timestamp),
        "trend": trend,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use chrono::Duration;

    fn world() -> MockWorld {
        MockWorld::generate(
            Utc::now(),
            &["cpu_usage".to_string()],
            &MockConfig::default(),
        )
    }

    #[test]
    fn test_query_metric_returns_window_points() {
        let w = world();
        let series = w.series("cpu_usage").unwrap();
        let args = json!({
            "metric_name": "cpu_usage",
            "start": series[0].timestamp,
            "end": series[9].timestamp,
        });
        let out = query_metric(&w, &args).unwrap();
        assert_eq!(out["points"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_compare_baseline_sees_the_spike() {
        let w = world();
        let series = w.series("cpu_usage").unwrap();
        let args = json!({
            "metric_name": "cpu_usage",
            "start": series[90].timestamp,
            "end": series[99].timestamp,
        });
        let out = compare_baseline(&w, &args).unwrap();
        let pct = out["deviation_percent"].as_f64().unwrap();
        assert!(pct > 250.0 && pct < 350.0, "deviation {pct}");
    }

    #[test]
    fn test_unknown_metric_and_reversed_window() {
        let w = world();
        let now = Utc::now();
        let unknown = json!({ "metric_name": "disk", "start": now - Duration::hours(1), "end": now });
        assert!(matches!(
            query_metric(&w, &unknown),
            Err(ToolError::Execution { .. })
        ));
        let reversed = json!({ "metric_name": "cpu_usage", "start": now, "end": now - Duration::hours(1) });
        assert!(matches!(
            query_metric(&w, &reversed),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_details_without_context_has_no_anomalies() {
        let w = world();
        let series = w.series("cpu_usage").unwrap();
        let args = json!({
            "metric_name": "cpu_usage",
            "start": series[80].timestamp,
            "end": series[99].timestamp,
        });
        let out = get_metric_details(&w, None, &args).unwrap();
        assert_eq!(out["service"], "api-gateway");
        assert_eq!(out["anomalous_points"], 0);
        assert!(out["peak_value"].as_f64().unwrap() > 150.0);
    }
}
