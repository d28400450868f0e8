//! Semantic Evaluator (C9, §4.9): a thin LLM wrapper that turns a
//! natural-language predicate into a yes/no verdict with a confidence,
//! used by the transition engine (C4) to resolve `Condition::Semantic`.

use std::sync::Arc;

use cso_domain::session::Exchange;
use cso_providers::{ChatRequest, LlmProvider};
use serde::Deserialize;

/// The outcome of one semantic evaluation (§4.9).
#[derive(Debug, Clone)]
pub struct Verdict {
    pub answer: bool,
    pub confidence: f32,
    pub reason: String,
}

impl Verdict {
    fn parse_failed() -> Self {
        Self {
            answer: false,
            confidence: 0.0,
            reason: "parse_failed".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    answer: bool,
    confidence: f32,
    reason: String,
}

const MAX_OUTPUT_TOKENS: u32 = 150;
const RECENT_EXCHANGES: usize = 3;

/// Evaluates natural-language predicates against a compact memory
/// projection and the last few conversation exchanges.
pub struct SemanticEvaluator {
    provider: Arc<dyn LlmProvider>,
    model: Option<String>,
}

impl SemanticEvaluator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Option<String>) -> Self {
        Self { provider, model }
    }

    /// `Evaluate(predicate_text, memory_projection, recent_exchanges)` (§4.9).
    pub async fn evaluate(
        &self,
        predicate_text: &str,
        memory_projection: &serde_json::Value,
        recent_exchanges: &[Exchange],
    ) -> Verdict {
        let prompt = build_prompt(predicate_text, memory_projection, recent_exchanges);

        let req = ChatRequest {
            messages: vec![cso_domain::tool::Message::user(prompt)],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(MAX_OUTPUT_TOKENS),
            json_mode: true,
            model: self.model.clone(),
        };

        let response = match self.provider.chat(req).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "semantic evaluator provider call failed");
                return Verdict::parse_failed();
            }
        };

        parse_verdict(&response.content)
    }
}

fn build_prompt(
    predicate_text: &str,
    memory_projection: &serde_json::Value,
    recent_exchanges: &[Exchange],
) -> String {
    let tail: Vec<&Exchange> = recent_exchanges
        .iter()
        .rev()
        .take(RECENT_EXCHANGES)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let transcript = tail
        .iter()
        .map(|e| format!("{:?}: {}", e.role, e.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Evaluate whether the following statement is true given the \
         conversation context and customer memory. Respond with a JSON \
         object only: {{\"answer\": bool, \"confidence\": number between \
         0 and 1, \"reason\": string}}.\n\n\
         Statement: {predicate_text}\n\n\
         Memory:\n{memory_projection}\n\n\
         Recent conversation:\n{transcript}"
    )
}

fn parse_verdict(content: &str) -> Verdict {
    match serde_json::from_str::<RawVerdict>(content.trim()) {
        Ok(raw) if (0.0..=1.0).contains(&raw.confidence) => Verdict {
            answer: raw.answer,
            confidence: raw.confidence,
            reason: raw.reason,
        },
        _ => Verdict::parse_failed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_verdict() {
        let v = parse_verdict(r#"{"answer": true, "confidence": 0.9, "reason": "customer said yes"}"#);
        assert!(v.answer);
        assert_eq!(v.confidence, 0.9);
    }

    #[test]
    fn out_of_range_confidence_is_parse_failure() {
        let v = parse_verdict(r#"{"answer": true, "confidence": 1.5, "reason": "x"}"#);
        assert_eq!(v.reason, "parse_failed");
        assert!(!v.answer);
    }

    #[test]
    fn malformed_json_is_parse_failure() {
        let v = parse_verdict("not json");
        assert_eq!(v.reason, "parse_failed");
    }

    #[test]
    fn non_boolean_answer_is_parse_failure() {
        let v = parse_verdict(r#"{"answer": "yes", "confidence": 0.5, "reason": "x"}"#);
        assert_eq!(v.reason, "parse_failed");
    }
}
