//! Synthetic metric series with the incident shapes baked in.

use crate::detect::TimeseriesPoint;
use chrono::{DateTime, Duration, Utc};

/// Golden angle in radians; successive samples land far apart on the circle,
/// which keeps the jitter irregular while staying reproducible.
const GOLDEN_ANGLE: f64 = 2.39996;

/// Fraction of the series after which spikes begin.
const SPIKE_ONSET: f64 = 0.9;

/// Total heap growth over the series, in MB.
const HEAP_GROWTH_MB: f64 = 1300.0;

/// Samples per heap step (heap is reported once per GC cycle).
const HEAP_STEP_SAMPLES: usize = 5;

pub fn baseline(metric: &str) -> f64 {
    match metric {
        "cpu_usage" => 40.0,
        "error_rate" => 0.5,
        "latency_p99" => 120.0,
        "checkout_latency_p99" => 210.0,
        "heap_usage_mb" => 512.0,
        _ => 50.0,
    }
}

fn phase(metric: &str) -> f64 {
    match metric {
        "error_rate" => 1.1,
        "latency_p99" => 2.3,
        "checkout_latency_p99" => 1.9,
        "heap_usage_mb" => 5.3,
        _ => 0.0,
    }
}

fn jitter(i: usize, phase: f64) -> f64 {
    (i as f64 * GOLDEN_ANGLE + phase).sin()
}

/// Generate `samples` points ending at `anchor`, `interval` apart.
///
/// - `checkout_latency_p99` jumps by ~1800ms for the last tenth.
/// - `heap_usage_mb` climbs from 512MB to ~1800MB in GC-cycle steps, never dropping.
/// - everything else quadruples for the last tenth.
pub fn generate(
    metric: &str,
    anchor: DateTime<Utc>,
    samples: usize,
    interval: Duration,
) -> Vec<TimeseriesPoint> {
    let base = baseline(metric);
    let phase = phase(metric);
    let onset = (samples as f64 * SPIKE_ONSET) as usize;
    let heap_steps = (samples.saturating_sub(1) / HEAP_STEP_SAMPLES).max(1);

    (0..samples)
        .map(|i| {
            let ts = anchor - interval * (samples - i) as i32;
            let value = match metric {
                "heap_usage_mb" => {
                    let step = (i / HEAP_STEP_SAMPLES) as f64;
                    base + step * (HEAP_GROWTH_MB / heap_steps as f64) + 2.0 * jitter(i, phase)
                }
                "checkout_latency_p99" => {
                    let spike = if i >= onset { 1800.0 } else { 0.0 };
                    base + base * 0.05 * jitter(i, phase) + spike
                }
                _ => {
                    let spike = if i >= onset { base * 3.0 } else { 0.0 };
                    base + base * 0.05 * jitter(i, phase) + spike
                }
            };
            TimeseriesPoint::new(ts, value)
        })
        .collect()
}
