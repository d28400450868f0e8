use serde::Serialize;

/// Structured events emitted to the event & log sink (§4.8, §6).
///
/// Each variant carries the event-specific fields named in §6; `event`,
/// `ts`, and `sid` are added by the sink when it logs or persists the
/// record, mirroring the way the session/tool layers stay free of
/// timestamp/formatting concerns.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum Event {
    ConfigLoaded {
        goals: usize,
        profiles: usize,
        tactics: usize,
        tools: usize,
    },
    TurnReport {
        session_id: String,
        goal_in: String,
        goal_out: String,
        tool_invocations: usize,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        duration_ms: u64,
    },
    TurnAborted {
        session_id: String,
        reason: String,
    },
    ToolInvoked {
        session_id: String,
        tool_name: String,
        outcome: &'static str,
        latency_ms: u64,
    },
    GoalTransitioned {
        session_id: String,
        from_goal: String,
        to_goal: String,
        reason: String,
    },
    SemanticEvaluated {
        session_id: String,
        predicate: String,
        result: bool,
        confidence: f32,
    },
    TooManyTools {
        session_id: String,
        tool_invocations: usize,
        k_tools: u32,
    },
}

impl Event {
    /// Whether this event must never be dropped under sink backpressure
    /// (§4.8: "TurnReport is always critical").
    pub fn is_critical(&self) -> bool {
        matches!(self, Event::TurnReport { .. })
    }
}
