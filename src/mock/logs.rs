//! Synthetic service logs: random filler plus the scenario-specific lines.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

const TEMPLATES: &[&str] = &[
    "[ERROR] {service}: Connection timeout after 30s",
    "[WARN]  {service}: High memory usage detected (>85%)",
    "[ERROR] {service}: Database query failed: deadlock detected",
    "[INFO]  {service}: Request rate spike detected",
    "[ERROR] {service}: Upstream dependency {dep} returned 503",
    "[ERROR] {service}: Circuit breaker OPEN for {dep}",
    "[WARN]  {service}: Response time exceeded SLA threshold",
    "[ERROR] {service}: OOM killed, restarting container",
    "[INFO]  {service}: Deployment completed for version {version}",
    "[ERROR] {service}: Health check failed, removing from load balancer",
];

const DEPENDENCIES: &[&str] = &["postgres", "redis", "kafka", "elasticsearch"];

/// Pool exhaustion after the checkout config change.
pub const CHECKOUT_POOL_LOGS: &[&str] = &[
    "[ERROR] checkout-service: DB connection timeout after 5000ms (pool exhausted)",
    "[ERROR] checkout-service: Failed to acquire DB connection from pool: timeout=5s exceeded",
    "[ERROR] checkout-service: JDBC pool wait time 4987ms, pool_size=2, active=2, idle=0",
    "[ERROR] checkout-service: Transaction rolled back, upstream postgres unreachable after 5s",
    "[WARN]  checkout-service: DB connection pool nearly exhausted (2/2 connections in use)",
    "[ERROR] checkout-service: p99 latency 2143ms breached SLA threshold of 500ms",
    "[ERROR] checkout-service: Checkout request failed, DB pool timeout, returning 503 to client",
    "[INFO]  checkout-service: Config reload triggered, db.pool.max_connections changed 20 -> 2",
    "[INFO]  checkout-service: Config reload triggered, db.connection.timeout changed 30000ms -> 5000ms",
    "[WARN]  checkout-service: Applied new config from checkout-service-config v2.4.1",
];

/// Heap growth in the worker.
pub const WORKER_LEAK_LOGS: &[&str] = &[
    "[WARN]  worker-service: Heap usage 650 MB, GC pressure increasing",
    "[WARN]  worker-service: Heap usage 820 MB, GC pause 340ms",
    "[WARN]  worker-service: Heap usage 1050 MB, GC pause 890ms, throughput degraded",
    "[ERROR] worker-service: Heap usage 1380 MB, Full GC triggered, STW pause 2.1s",
    "[ERROR] worker-service: Heap usage 1620 MB, GC overhead limit exceeded",
    "[ERROR] worker-service: java.lang.OutOfMemoryError: Java heap space",
    "[ERROR] worker-service: EventListenerRegistry: 48203 listeners registered, 0 removed (likely leak)",
    "[WARN]  worker-service: Cache eviction disabled, CacheManager holding 312k entries (no TTL set)",
    "[ERROR] worker-service: Thread pool queue depth 9842, tasks accumulating faster than processing",
    "[ERROR] worker-service: Pod OOMKilled by kubelet, restarting (restart #4 in 2h)",
];

fn stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn offset(start: DateTime<Utc>, span_secs: f64, fraction: f64) -> DateTime<Utc> {
    let secs = (span_secs * fraction).min((span_secs - 1.0).max(0.0));
    start + Duration::milliseconds((secs * 1000.0) as i64)
}

/// Generate `count` filler lines for `service` between `start` and `end`,
/// plus the scenario lines for services that have them. Sorted by time.
pub fn generate(
    service: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    count: usize,
    rng: &mut StdRng,
) -> Vec<String> {
    let span = (end - start).num_milliseconds().max(0) as f64 / 1000.0;
    let mut lines = Vec::with_capacity(count + 10);

    match service {
        "worker-service" => {
            // The leak is gradual: spread across the whole window.
            for (i, entry) in WORKER_LEAK_LOGS.iter().enumerate() {
                let fraction = i as f64 / WORKER_LEAK_LOGS.len() as f64;
                lines.push(format!("{} {}", stamp(offset(start, span, fraction)), entry));
            }
        }
        "checkout-service" => {
            // Errors begin after the config reload, in the second half.
            for (i, entry) in CHECKOUT_POOL_LOGS.iter().enumerate() {
                let fraction = 0.5 + i as f64 * 0.04;
                lines.push(format!("{} {}", stamp(offset(start, span, fraction)), entry));
            }
        }
        _ => {}
    }

    for _ in 0..count {
        let ts = offset(start, span, rng.gen::<f64>());
        let template = TEMPLATES.choose(rng).copied().unwrap_or(TEMPLATES[0]);
        let dep = DEPENDENCIES.choose(rng).copied().unwrap_or(DEPENDENCIES[0]);
        let version = format!("v1.{}.{}", rng.gen_range(0..10), rng.gen_range(0..100));
        let line = template
            .replace("{service}", service)
            .replace("{dep}", dep)
            .replace("{version}", &version);
        lines.push(format!("{} {}", stamp(ts), line));
    }

    lines.sort();
    lines
}

/// Keep lines tagged with `[level]`; an empty level keeps everything.
pub fn filter_level(lines: Vec<String>, level: &str) -> Vec<String> {
    if level.trim().is_empty() {
        return lines;
    }
    let tag = format!("[{}]", level.trim().to_uppercase());
    lines.into_iter().filter(|l| l.contains(&tag)).collect()
}
