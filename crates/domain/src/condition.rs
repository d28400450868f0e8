use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::{get_path, is_unset};

/// Comparison operator for a deterministic condition (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    IsSet,
    IsEmpty,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// A branching condition: deterministic, compound, or semantic (§4.4).
///
/// Deterministic and compound conditions are evaluated purely in-process via
/// [`Condition::eval_sync`]. A `Semantic` condition cannot be evaluated
/// without delegating to the semantic evaluator (C9); callers must check
/// [`Condition::needs_semantic`] and route accordingly — the transition
/// engine does this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Deterministic {
        path: String,
        op: Op,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    AllOf {
        conditions: Vec<Condition>,
    },
    AnyOf {
        conditions: Vec<Condition>,
    },
    Semantic {
        text: String,
    },
}

impl Condition {
    /// True if this condition (or any sub-condition) requires an LLM call.
    pub fn needs_semantic(&self) -> bool {
        match self {
            Condition::Deterministic { .. } => false,
            Condition::Semantic { .. } => true,
            Condition::AllOf { conditions } | Condition::AnyOf { conditions } => {
                conditions.iter().any(Condition::needs_semantic)
            }
        }
    }

    /// Evaluate this condition against a memory snapshot. `semantic_results`
    /// supplies the pre-computed boolean outcome for each `Semantic`
    /// condition encountered, keyed by predicate text — the transition
    /// engine resolves those via C9 before calling this function with the
    /// results it obtained (or omits them, treating the predicate as false
    /// per §4.4's semantic-failure rule).
    pub fn eval(&self, memory: &Value, semantic_results: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Condition::Deterministic { path, op, value } => {
                eval_deterministic(memory, path, *op, value.as_ref())
            }
            Condition::AllOf { conditions } => conditions.iter().all(|c| c.eval(memory, semantic_results)),
            Condition::AnyOf { conditions } => conditions.iter().any(|c| c.eval(memory, semantic_results)),
            Condition::Semantic { text } => semantic_results(text),
        }
    }

    /// Evaluate assuming no `Semantic` sub-conditions are present. Panics in
    /// debug builds if one is found; callers that might encounter semantic
    /// conditions must use [`Condition::eval`] instead.
    #[cfg(test)]
    pub fn eval_sync(&self, memory: &Value) -> bool {
        self.eval(memory, &|_| {
            debug_assert!(false, "eval_sync called on a condition containing Semantic");
            false
        })
    }
}

fn eval_deterministic(memory: &Value, path: &str, op: Op, expected: Option<&Value>) -> bool {
    let actual = get_path(memory, path);
    match op {
        Op::IsSet => actual.map(|v| !is_unset(v)).unwrap_or(false),
        Op::IsEmpty => actual.map(is_unset).unwrap_or(true),
        Op::Eq => compare(actual, expected) == Some(std::cmp::Ordering::Equal),
        Op::Ne => compare(actual, expected) != Some(std::cmp::Ordering::Equal),
        Op::Gt => compare(actual, expected) == Some(std::cmp::Ordering::Greater),
        Op::Lt => compare(actual, expected) == Some(std::cmp::Ordering::Less),
        Op::Ge => matches!(
            compare(actual, expected),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        Op::Le => matches!(
            compare(actual, expected),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
    }
}

/// Compare two optional JSON values, coercing to numbers when both sides
/// parse as numbers, else comparing lexicographically (§4.4).
fn compare(actual: Option<&Value>, expected: Option<&Value>) -> Option<std::cmp::Ordering> {
    let (a, b) = (actual?, expected?);
    if let (Some(an), Some(bn)) = (as_f64(a), as_f64(b)) {
        return an.partial_cmp(&bn);
    }
    let (a_s, b_s) = (as_str_repr(a), as_str_repr(b));
    Some(a_s.cmp(&b_s))
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn as_str_repr(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A single ordered branching rule within a goal (§3 "Branching Rule").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRule {
    pub priority: i64,
    pub condition: Condition,
    pub next_goal_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn is_set_true_for_present_nonempty_leaf() {
        let mem = json!({"customer": {"phone": "555"}});
        let cond = Condition::Deterministic {
            path: "customer.phone".into(),
            op: Op::IsSet,
            value: None,
        };
        assert!(cond.eval_sync(&mem));
    }

    #[test]
    fn eq_coerces_numeric_strings() {
        let mem = json!({"service": {"priority": "3"}});
        let cond = Condition::Deterministic {
            path: "service.priority".into(),
            op: Op::Eq,
            value: Some(json!(3)),
        };
        assert!(cond.eval_sync(&mem));
    }

    #[test]
    fn lexicographic_fallback_for_non_numeric() {
        let mem = json!({"service": {"tier": "gold"}});
        let cond = Condition::Deterministic {
            path: "service.tier".into(),
            op: Op::Eq,
            value: Some(json!("gold")),
        };
        assert!(cond.eval_sync(&mem));
    }

    #[test]
    fn all_of_short_circuits_on_false() {
        let mem = json!({"customer": {"phone": "555"}});
        let cond = Condition::AllOf {
            conditions: vec![
                Condition::Deterministic {
                    path: "customer.phone".into(),
                    op: Op::IsSet,
                    value: None,
                },
                Condition::Deterministic {
                    path: "customer.email".into(),
                    op: Op::IsSet,
                    value: None,
                },
            ],
        };
        assert!(!cond.eval_sync(&mem));
    }

    #[test]
    fn any_of_true_when_one_matches() {
        let mem = json!({"customer": {"phone": "555"}});
        let cond = Condition::AnyOf {
            conditions: vec![
                Condition::Deterministic {
                    path: "customer.email".into(),
                    op: Op::IsSet,
                    value: None,
                },
                Condition::Deterministic {
                    path: "customer.phone".into(),
                    op: Op::IsSet,
                    value: None,
                },
            ],
        };
        assert!(cond.eval_sync(&mem));
    }

    #[test]
    fn semantic_delegates_to_callback() {
        let mem = json!({});
        let cond = Condition::Semantic {
            text: "customer sounds frustrated".into(),
        };
        assert!(cond.eval(&mem, &|text| text.contains("frustrated")));
    }

    #[test]
    fn needs_semantic_detects_nested() {
        let cond = Condition::AllOf {
            conditions: vec![Condition::Semantic { text: "x".into() }],
        };
        assert!(cond.needs_semantic());
    }

    /// Regression test: `kind = "all_of"` with a `conditions` array must
    /// actually deserialize. With the old newtype-variant shape
    /// (`AllOf(Vec<Condition>)`), serde's internally-tagged representation
    /// had no field to hold the array and this round trip failed.
    #[test]
    fn all_of_round_trips_through_json() {
        let raw = json!({
            "kind": "all_of",
            "conditions": [
                {"kind": "deterministic", "path": "customer.phone", "op": "is_set"},
                {"kind": "deterministic", "path": "customer.email", "op": "is_set"},
            ]
        });
        let cond: Condition = serde_json::from_value(raw).expect("all_of must deserialize");
        assert!(matches!(cond, Condition::AllOf { ref conditions } if conditions.len() == 2));

        let mem = json!({"customer": {"phone": "555", "email": "a@b.com"}});
        assert!(cond.eval_sync(&mem));

        let back = serde_json::to_value(&cond).unwrap();
        let reparsed: Condition = serde_json::from_value(back).unwrap();
        assert!(reparsed.eval_sync(&mem));
    }
}
