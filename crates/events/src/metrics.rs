//! The operator counter surface named in §6: a small set of
//! `std::sync::atomic` counters plus a manually bucketed latency histogram
//! (no `hdrhistogram` dependency — the bucket edges are fixed and small).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

const LATENCY_EDGES_MS: [u64; 5] = [100, 500, 1_000, 5_000, 30_000];

/// Process-wide operator metrics (§6 "Operator surface").
pub struct Metrics {
    pub sessions_active: AtomicI64,
    pub turns_started: AtomicU64,
    pub turns_completed: AtomicU64,
    turns_aborted: RwLock<HashMap<String, u64>>,
    tool_calls: RwLock<HashMap<(String, &'static str), u64>>,
    pub llm_stream_errors: AtomicU64,
    semantic_evals: RwLock<HashMap<bool, u64>>,
    /// `latency_buckets[i]` counts durations <= `LATENCY_EDGES_MS[i]`; the
    /// last slot counts everything above the highest edge (30s).
    latency_buckets: [AtomicU64; LATENCY_EDGES_MS.len() + 1],
    pub dropped_events: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            sessions_active: AtomicI64::new(0),
            turns_started: AtomicU64::new(0),
            turns_completed: AtomicU64::new(0),
            turns_aborted: RwLock::new(HashMap::new()),
            tool_calls: RwLock::new(HashMap::new()),
            llm_stream_errors: AtomicU64::new(0),
            semantic_evals: RwLock::new(HashMap::new()),
            latency_buckets: Default::default(),
            dropped_events: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    pub fn session_opened(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn turn_started(&self) {
        self.turns_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_completed(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_aborted(&self, reason: &str) {
        *self
            .turns_aborted
            .write()
            .unwrap()
            .entry(reason.to_string())
            .or_insert(0) += 1;
    }

    pub fn tool_call(&self, name: &str, outcome: &'static str) {
        *self
            .tool_calls
            .write()
            .unwrap()
            .entry((name.to_string(), outcome))
            .or_insert(0) += 1;
    }

    pub fn semantic_eval(&self, result: bool) {
        *self.semantic_evals.write().unwrap().entry(result).or_insert(0) += 1;
    }

    pub fn observe_latency(&self, d: Duration) {
        let ms = d.as_millis() as u64;
        let slot = LATENCY_EDGES_MS
            .iter()
            .position(|edge| ms <= *edge)
            .unwrap_or(LATENCY_EDGES_MS.len());
        self.latency_buckets[slot].fetch_add(1, Ordering::Relaxed);
    }

    /// Render a flat snapshot suitable for a `:stats` REPL command or a
    /// metrics-scrape endpoint.
    pub fn snapshot(&self) -> serde_json::Value {
        let turns_aborted: serde_json::Map<_, _> = self
            .turns_aborted
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::json!(v)))
            .collect();
        let tool_calls: Vec<serde_json::Value> = self
            .tool_calls
            .read()
            .unwrap()
            .iter()
            .map(|((name, outcome), n)| serde_json::json!({"name": name, "outcome": outcome, "count": n}))
            .collect();
        let semantic_evals: serde_json::Map<_, _> = self
            .semantic_evals
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
            .collect();
        let latency_buckets: Vec<u64> = self
            .latency_buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();

        serde_json::json!({
            "sessions_active": self.sessions_active.load(Ordering::Relaxed),
            "turns_started": self.turns_started.load(Ordering::Relaxed),
            "turns_completed": self.turns_completed.load(Ordering::Relaxed),
            "turns_aborted": turns_aborted,
            "tool_calls": tool_calls,
            "llm_stream_errors": self.llm_stream_errors.load(Ordering::Relaxed),
            "semantic_evals": semantic_evals,
            "latency_buckets_ms": LATENCY_EDGES_MS,
            "latency_counts": latency_buckets,
            "dropped_events": self.dropped_events.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_bucket_boundaries() {
        let m = Metrics::default();
        m.observe_latency(Duration::from_millis(50));
        m.observe_latency(Duration::from_millis(100));
        m.observe_latency(Duration::from_millis(101));
        m.observe_latency(Duration::from_secs(60));
        assert_eq!(m.latency_buckets[0].load(Ordering::Relaxed), 2);
        assert_eq!(m.latency_buckets[1].load(Ordering::Relaxed), 1);
        assert_eq!(m.latency_buckets[5].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn tool_call_counts_distinguish_outcome() {
        let m = Metrics::default();
        m.tool_call("customer.lookup", "ok");
        m.tool_call("customer.lookup", "ok");
        m.tool_call("customer.lookup", "error");
        let snap = m.snapshot();
        let calls = snap["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
    }
}
