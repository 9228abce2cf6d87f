//! Slow-request policy and adaptive route statistics.
//!
//! A request goes to the slow pool when its path starts with a slow prefix,
//! its method is in the slow set, or its body is over the size threshold.
//! Routes that keep measuring slow get promoted: once a route key has ten
//! samples averaging above half a second, it joins the prefix list for good.
//! There is no demotion and no counter aging.

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::info;
use wg_protocol::WorkerRequest;

/// Samples required before a route is eligible for promotion.
const PROMOTION_MIN_SAMPLES: u64 = 10;

/// Average latency above which an eligible route is promoted.
const PROMOTION_AVG_LATENCY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Static classification rules, extended at runtime by promotion.
#[derive(Debug, Clone)]
pub struct SlowPolicy {
    pub prefixes: Vec<String>,
    /// Uppercase verbs.
    pub methods: HashSet<String>,
    /// Bodies strictly larger than this many bytes classify slow.
    pub body_threshold: usize,
}

impl Default for SlowPolicy {
    fn default() -> Self {
        SlowPolicy {
            prefixes: Vec::new(),
            methods: HashSet::from(["PUT".to_owned(), "DELETE".to_owned()]),
            body_threshold: 2_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Route statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RouteEntry {
    count: u64,
    total: Duration,
}

/// Policy plus the per-route latency table; lives behind one supervisor lock
/// so promotion writes and classification reads cannot race.
#[derive(Debug)]
pub struct Classify {
    policy: SlowPolicy,
    routes: HashMap<String, RouteEntry>,
}

impl Classify {
    pub fn new(policy: SlowPolicy) -> Self {
        Classify {
            policy,
            routes: HashMap::new(),
        }
    }

    /// Any single rule match is sufficient.
    pub fn is_slow(&self, request: &WorkerRequest) -> bool {
        self.policy
            .prefixes
            .iter()
            .any(|prefix| request.path.starts_with(prefix.as_str()))
            || self.policy.methods.contains(&request.method.to_ascii_uppercase())
            || request.body.len() > self.policy.body_threshold
    }

    /// Record one observation and promote the route when it crosses the bar.
    pub fn record(&mut self, path: &str, latency: Duration) {
        let key = route_key(path);
        let entry = self.routes.entry(key.clone()).or_default();
        entry.count += 1;
        entry.total += latency;

        if entry.count < PROMOTION_MIN_SAMPLES {
            return;
        }
        let average = entry.total / u32::try_from(entry.count).unwrap_or(u32::MAX);
        if average > PROMOTION_AVG_LATENCY && !self.policy.prefixes.contains(&key) {
            info!(
                route = %key,
                samples = entry.count,
                avg_ms = average.as_millis() as u64,
                "route keeps measuring slow, promoting to the slow pool"
            );
            self.policy.prefixes.push(key);
        }
    }

    pub fn policy(&self) -> &SlowPolicy {
        &self.policy
    }
}

/// Aggregation bucket for route statistics: the first path segment.
/// `/reports/daily?week=31` → `/reports`.
pub fn route_key(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return "/".to_owned();
    }
    let first = trimmed.split('/').next().unwrap_or(trimmed);
    format!("/{first}")
}
