use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single conversation exchange (§3 "Session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub role: ExchangeRole,
    pub text: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeRole {
    User,
    Assistant,
}

/// Turn/token/cost counters tracked per session (§6 "Persisted session format").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub turns: u64,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub cost_units: f64,
}

/// The fixed top-level shape of a session's memory tree (§3). Each field is
/// itself a free-form JSON object; deep-merge and path resolution treat the
/// whole tree uniformly via `cso_domain::value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    #[serde(default = "empty_object")]
    pub customer: Value,
    #[serde(default = "empty_object")]
    pub service: Value,
    #[serde(default = "empty_object")]
    pub operations: Value,
    #[serde(default = "empty_object")]
    pub conversation_meta: Value,
    #[serde(default = "empty_object")]
    pub state_flags: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self {
            customer: empty_object(),
            service: empty_object(),
            operations: empty_object(),
            conversation_meta: empty_object(),
            state_flags: empty_object(),
        }
    }
}

impl SessionMemory {
    /// View the whole tree as a single `Value` for deep-merge/path
    /// resolution, keyed by its five top-level sections.
    pub fn as_value(&self) -> Value {
        let mut m = Map::new();
        m.insert("customer".into(), self.customer.clone());
        m.insert("service".into(), self.service.clone());
        m.insert("operations".into(), self.operations.clone());
        m.insert("conversation_meta".into(), self.conversation_meta.clone());
        m.insert("state_flags".into(), self.state_flags.clone());
        Value::Object(m)
    }

    /// Replace the tree's contents from a merged `Value` produced via
    /// `as_value` + `cso_domain::value::deep_merge`.
    pub fn set_from_value(&mut self, v: Value) {
        let Value::Object(mut m) = v else { return };
        self.customer = m.remove("customer").unwrap_or_else(empty_object);
        self.service = m.remove("service").unwrap_or_else(empty_object);
        self.operations = m.remove("operations").unwrap_or_else(empty_object);
        self.conversation_meta = m.remove("conversation_meta").unwrap_or_else(empty_object);
        self.state_flags = m.remove("state_flags").unwrap_or_else(empty_object);
    }

    /// Apply a partial update via deep-merge (P1/P2).
    pub fn apply_update(&mut self, update: &Value) {
        let mut current = self.as_value();
        crate::value::deep_merge(&mut current, update);
        self.set_from_value(current);
    }
}

/// A session's full persisted state (§3, §6 "Persisted session format").
///
/// Unknown top-level keys encountered on load are preserved in `extra` and
/// re-serialized verbatim, so the document format stays forward-compatible
/// across reads/writes that don't know about newer fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub current_goal: Option<String>,
    #[serde(default)]
    pub entered_goals: Vec<String>,
    #[serde(default)]
    pub memory: SessionMemory,
    #[serde(default)]
    pub history: Vec<Exchange>,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub terminal: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_goal: None,
            entered_goals: Vec::new(),
            memory: SessionMemory::default(),
            history: Vec::new(),
            counters: Counters::default(),
            terminal: false,
            extra: Map::new(),
        }
    }

    pub fn append_history(&mut self, role: ExchangeRole, text: impl Into<String>, ts: DateTime<Utc>) {
        self.history.push(Exchange {
            role,
            text: text.into(),
            ts,
        });
    }

    pub fn set_goal(&mut self, goal_id: impl Into<String>) {
        let goal_id = goal_id.into();
        self.entered_goals.push(goal_id.clone());
        self.current_goal = Some(goal_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_update_deep_merges_into_named_section() {
        let mut mem = SessionMemory::default();
        mem.apply_update(&json!({"customer": {"name": "Ada"}}));
        mem.apply_update(&json!({"customer": {"phone": "555"}}));
        assert_eq!(mem.customer["name"], json!("Ada"));
        assert_eq!(mem.customer["phone"], json!("555"));
    }

    #[test]
    fn unknown_top_level_keys_round_trip() {
        let json = r#"{"session_id":"s1","from_future_version":{"x":1}}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.extra.get("from_future_version"), Some(&json!({"x":1})));
        let out = serde_json::to_value(&session).unwrap();
        assert_eq!(out["from_future_version"], json!({"x":1}));
    }

    #[test]
    fn new_session_has_no_current_goal() {
        let s = Session::new("abc");
        assert!(s.current_goal.is_none());
        assert!(!s.terminal);
    }
}
