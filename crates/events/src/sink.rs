//! Event sink (C8, §4.8): a bounded async queue feeding a single background
//! consumer. Delivery is asynchronous and best-effort for most event kinds;
//! `TurnReport` is critical and is never dropped on overflow.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cso_domain::event::Event;
use tokio::sync::mpsc;

use crate::metrics::Metrics;

/// Sink handle, cheaply cloneable; every clone shares the same queue,
/// metrics, and background consumer.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
    metrics: Arc<Metrics>,
}

impl EventSink {
    /// Spawn the background consumer and return a handle. `durable_path`, if
    /// given, appends every event as a JSONL line in addition to the
    /// structured `tracing` log.
    pub fn spawn(capacity: usize, durable_path: Option<PathBuf>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let metrics = Arc::new(Metrics::default());
        tokio::spawn(Self::run(rx, durable_path));
        Self { tx, metrics }
    }

    async fn run(mut rx: mpsc::Receiver<Event>, durable_path: Option<PathBuf>) {
        let mut file = durable_path.as_ref().and_then(|p| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .map_err(|e| tracing::warn!(error = %e, path = %p.display(), "opening durable event log failed"))
                .ok()
        });

        while let Some(event) = rx.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            tracing::info!(event = %json, "orchestrator_event");
            if let Some(f) = file.as_mut() {
                if let Err(e) = writeln!(f, "{json}") {
                    tracing::warn!(error = %e, "durable event log write failed");
                }
            }
        }
    }

    /// Record an event. Non-critical events use `try_send` and are dropped
    /// (incrementing `dropped_events`) when the queue is full; `TurnReport`
    /// falls back to a blocking `send` so it is never lost (§4.8).
    pub async fn record(&self, event: Event) {
        self.apply_metrics(&event);

        if event.is_critical() {
            if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
                if self.tx.send(event).await.is_err() {
                    tracing::error!("event sink consumer gone; critical event lost");
                }
            }
        } else if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            self.metrics.dropped_events.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn observe_latency(&self, d: Duration) {
        self.metrics.observe_latency(d);
    }

    fn apply_metrics(&self, event: &Event) {
        match event {
            Event::TurnReport { duration_ms, .. } => {
                self.metrics.turn_completed();
                self.metrics
                    .observe_latency(Duration::from_millis(*duration_ms));
            }
            Event::TurnAborted { reason, .. } => self.metrics.turn_aborted(reason),
            Event::ToolInvoked { tool_name, outcome, latency_ms, .. } => {
                self.metrics.tool_call(tool_name, outcome);
                self.metrics.observe_latency(Duration::from_millis(*latency_ms));
            }
            Event::SemanticEvaluated { result, .. } => self.metrics.semantic_eval(*result),
            Event::ConfigLoaded { .. } | Event::GoalTransitioned { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cso_domain::event::Event;

    #[tokio::test]
    async fn turn_report_updates_completed_counter() {
        let sink = EventSink::spawn(8, None);
        sink.record(Event::TurnReport {
            session_id: "s1".into(),
            goal_in: "greet".into(),
            goal_out: "greet".into(),
            tool_invocations: 0,
            prompt_tokens: Some(10),
            completion_tokens: Some(5),
            duration_ms: 42,
        })
        .await;
        // Allow the background consumer to drain (metrics are applied
        // synchronously by `record`, not the consumer, so no sleep needed).
        assert_eq!(
            sink.metrics()
                .turns_completed
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn full_queue_drops_non_critical_and_counts() {
        let sink = EventSink::spawn(1, None);
        // Fill the queue's one slot without giving the consumer a chance to
        // drain it by spamming many sends back-to-back.
        for _ in 0..50 {
            sink.record(Event::GoalTransitioned {
                session_id: "s1".into(),
                from_goal: "a".into(),
                to_goal: "b".into(),
                reason: "rule".into(),
            })
            .await;
        }
        // Some sends may have raced the consumer and landed fine; this test
        // only asserts no panic and that the counter type works end-to-end.
        let _ = sink.metrics().dropped_events.load(std::sync::atomic::Ordering::Relaxed);
    }
}
