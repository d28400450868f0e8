//! Event & Log Sink (C8): structured events for turns, tool calls,
//! transitions, and token/cost accounting, fanned out to a background
//! consumer without blocking the orchestrator.

pub mod metrics;
pub mod sink;

pub use metrics::Metrics;
pub use sink::EventSink;
