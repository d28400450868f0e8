//! Goal Transition Engine (C4, §4.4): given the current goal's branching
//! rules, a session memory snapshot, and the last few exchanges, decides
//! whether to stay in the current goal or advance to another.

use cso_domain::condition::BranchRule;
use cso_domain::config::Goal;
use cso_domain::event::Event;
use cso_domain::session::Exchange;
use cso_events::EventSink;
use cso_semantic::SemanticEvaluator;
use serde_json::Value;

/// Outcome of one transition evaluation (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Advance { next_goal_id: String, reason: String },
}

pub struct TransitionEngine {
    semantic: SemanticEvaluator,
    confidence_threshold: f32,
}

impl TransitionEngine {
    pub fn new(semantic: SemanticEvaluator, confidence_threshold: f32) -> Self {
        Self {
            semantic,
            confidence_threshold,
        }
    }

    /// Evaluate `goal`'s rules against `memory` in descending priority order
    /// and return the first matching rule's outcome, or `Stay` if none
    /// match. `known_goal_ids` is the full goal graph, used to detect a
    /// drifted `next_goal_id` (§4.4 ambient runtime drift guard).
    pub async fn evaluate(
        &self,
        goal: &Goal,
        memory: &Value,
        recent_exchanges: &[Exchange],
        known_goal_ids: &std::collections::HashSet<String>,
        session_id: &str,
        events: &EventSink,
    ) -> Transition {
        let mut rules: Vec<&BranchRule> = goal.rules.iter().collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        for rule in rules {
            let matched = if rule.condition.needs_semantic() {
                self.eval_with_semantic(&rule.condition, memory, recent_exchanges, session_id, events)
                    .await
            } else {
                rule.condition.eval(memory, &|_| false)
            };

            if !matched {
                continue;
            }

            if !known_goal_ids.contains(&rule.next_goal_id) {
                tracing::warn!(
                    session_id,
                    next_goal_id = %rule.next_goal_id,
                    "transition config drift: rule targets an unknown goal, treating as non-matching"
                );
                events
                    .record(Event::TurnAborted {
                        session_id: session_id.to_string(),
                        reason: "transition_config_drift".to_string(),
                    })
                    .await;
                continue;
            }

            let reason = format!("rule priority {} matched", rule.priority);
            events
                .record(Event::GoalTransitioned {
                    session_id: session_id.to_string(),
                    from_goal: goal.id.clone(),
                    to_goal: rule.next_goal_id.clone(),
                    reason: reason.clone(),
                })
                .await;
            return Transition::Advance {
                next_goal_id: rule.next_goal_id.clone(),
                reason,
            };
        }

        Transition::Stay
    }

    /// Evaluates a (possibly compound) condition that contains at least one
    /// `Semantic` leaf, resolving each leaf via C9 and folding the results
    /// back into `Condition::eval`'s plain boolean evaluation.
    async fn eval_with_semantic(
        &self,
        condition: &cso_domain::condition::Condition,
        memory: &Value,
        recent_exchanges: &[Exchange],
        session_id: &str,
        events: &EventSink,
    ) -> bool {
        let predicates = collect_semantic_predicates(condition);
        let mut results = std::collections::HashMap::new();
        for predicate in predicates {
            let verdict = self
                .semantic
                .evaluate(&predicate, memory, recent_exchanges)
                .await;
            let passed = verdict.answer && verdict.confidence >= self.confidence_threshold;
            events
                .record(Event::SemanticEvaluated {
                    session_id: session_id.to_string(),
                    predicate: predicate.clone(),
                    result: passed,
                    confidence: verdict.confidence,
                })
                .await;
            results.insert(predicate, passed);
        }
        condition.eval(memory, &|text| results.get(text).copied().unwrap_or(false))
    }
}

fn collect_semantic_predicates(condition: &cso_domain::condition::Condition) -> Vec<String> {
    use cso_domain::condition::Condition;
    match condition {
        Condition::Semantic { text } => vec![text.clone()],
        Condition::AllOf { conditions } | Condition::AnyOf { conditions } => {
            conditions.iter().flat_map(collect_semantic_predicates).collect()
        }
        Condition::Deterministic { .. } => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cso_domain::condition::{Condition, Op};
    use serde_json::json;

    fn goal_with_rules(rules: Vec<BranchRule>) -> Goal {
        Goal {
            id: "current".into(),
            description: "d".into(),
            profile: "p".into(),
            tools: vec![],
            tactics: vec![],
            success_criteria: vec![],
            max_turns: 20,
            rules,
            termination_sequence: vec![],
            terminal: false,
        }
    }

    #[tokio::test]
    async fn first_matching_rule_wins_by_descending_priority() {
        let rules = vec![
            BranchRule {
                priority: 1,
                condition: Condition::Deterministic {
                    path: "customer.phone".into(),
                    op: Op::IsSet,
                    value: None,
                },
                next_goal_id: "low_priority_target".into(),
            },
            BranchRule {
                priority: 10,
                condition: Condition::Deterministic {
                    path: "customer.phone".into(),
                    op: Op::IsSet,
                    value: None,
                },
                next_goal_id: "high_priority_target".into(),
            },
        ];
        let goal = goal_with_rules(rules);
        let memory = json!({"customer": {"phone": "555"}});
        let known: std::collections::HashSet<String> =
            ["high_priority_target".into(), "low_priority_target".into()].into();

        let provider = cso_testing::mock_provider(vec![]);
        let evaluator = SemanticEvaluator::new(provider, None);
        let engine = TransitionEngine::new(evaluator, 0.7);
        let events = EventSink::spawn(8, None);

        let outcome = engine
            .evaluate(&goal, &memory, &[], &known, "s1", &events)
            .await;
        assert_eq!(
            outcome,
            Transition::Advance {
                next_goal_id: "high_priority_target".into(),
                reason: "rule priority 10 matched".into(),
            }
        );
    }

    #[tokio::test]
    async fn no_matching_rule_stays() {
        let rules = vec![BranchRule {
            priority: 1,
            condition: Condition::Deterministic {
                path: "customer.phone".into(),
                op: Op::IsSet,
                value: None,
            },
            next_goal_id: "target".into(),
        }];
        let goal = goal_with_rules(rules);
        let memory = json!({});
        let known: std::collections::HashSet<String> = ["target".into()].into();

        let provider = cso_testing::mock_provider(vec![]);
        let evaluator = SemanticEvaluator::new(provider, None);
        let engine = TransitionEngine::new(evaluator, 0.7);
        let events = EventSink::spawn(8, None);

        let outcome = engine
            .evaluate(&goal, &memory, &[], &known, "s1", &events)
            .await;
        assert_eq!(outcome, Transition::Stay);
    }

    #[tokio::test]
    async fn drifted_rule_target_is_treated_as_non_matching() {
        let rules = vec![BranchRule {
            priority: 1,
            condition: Condition::Deterministic {
                path: "customer.phone".into(),
                op: Op::IsSet,
                value: None,
            },
            next_goal_id: "nonexistent_goal".into(),
        }];
        let goal = goal_with_rules(rules);
        let memory = json!({"customer": {"phone": "555"}});
        let known: std::collections::HashSet<String> = std::collections::HashSet::new();

        let provider = cso_testing::mock_provider(vec![]);
        let evaluator = SemanticEvaluator::new(provider, None);
        let engine = TransitionEngine::new(evaluator, 0.7);
        let events = EventSink::spawn(8, None);

        let outcome = engine
            .evaluate(&goal, &memory, &[], &known, "s1", &events)
            .await;
        assert_eq!(outcome, Transition::Stay);
    }
}
