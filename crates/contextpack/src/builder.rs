use crate::injection;
use crate::report::{PromptReport, SectionReport};
use crate::truncation::{self, Section};
use cso_domain::session::Exchange;

/// Deterministic system-prompt builder for the unified goal agent (§4.5
/// "System-prompt assembly").
///
/// Pure function over already-resolved inputs: identity text, goal
/// description/success-criteria, tactic texts, a memory projection, and the
/// last-N conversation exchanges. Produces the assembled prompt plus a
/// machine-readable report for logging.
#[derive(Clone, Copy)]
pub struct PromptBuilder {
    pub max_per_section: usize,
    pub total_max: usize,
}

impl PromptBuilder {
    pub fn new(max_per_section: usize, total_max: usize) -> Self {
        Self {
            max_per_section,
            total_max,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        identity: &str,
        goal_description: &str,
        success_criteria: &[String],
        tactics: &[String],
        memory_projection: &serde_json::Value,
        history: &[Exchange],
        tool_names: &[String],
    ) -> (String, PromptReport) {
        let goal_text = if success_criteria.is_empty() {
            goal_description.to_string()
        } else {
            format!(
                "{goal_description}\n\nSuccess criteria:\n{}",
                success_criteria
                    .iter()
                    .map(|c| format!("- {c}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };
        let tactics_text = if tactics.is_empty() {
            "(none)".to_string()
        } else {
            tactics.join("\n")
        };
        let memory_text =
            serde_json::to_string_pretty(memory_projection).unwrap_or_else(|_| "{}".to_string());
        let history_text = if history.is_empty() {
            "(no prior exchanges)".to_string()
        } else {
            history
                .iter()
                .map(|e| format!("{:?}: {}", e.role, e.text))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let raw = [
            ("identity", identity),
            ("goal", goal_text.as_str()),
            ("tactics", tactics_text.as_str()),
            ("memory", memory_text.as_str()),
            ("history", history_text.as_str()),
        ];

        let mut sections: Vec<Section> = raw
            .iter()
            .map(|(name, content)| {
                let raw_chars = content.len();
                let (truncated_content, was_truncated) =
                    truncation::truncate_per_section(content, self.max_per_section);
                Section {
                    name: name.to_string(),
                    content: truncated_content,
                    raw_chars,
                    truncated_per_section: was_truncated,
                    truncated_total_cap: false,
                    included: true,
                }
            })
            .collect();

        truncation::apply_total_cap(&mut sections, self.total_max);

        let mut assembled = String::new();
        let mut section_reports = Vec::new();
        for section in &sections {
            section_reports.push(SectionReport {
                name: section.name.clone(),
                raw_chars: section.raw_chars,
                injected_chars: if section.included { section.content.len() } else { 0 },
                truncated_per_section: section.truncated_per_section,
                truncated_total_cap: section.truncated_total_cap,
                included: section.included,
            });
            if section.included {
                assembled.push_str(&injection::format_section(
                    &section.name,
                    &section.content,
                    section.raw_chars,
                    section.truncated_per_section,
                ));
                assembled.push('\n');
            }
        }

        assembled.push_str(&injection::format_tool_list(tool_names));

        let report = PromptReport {
            sections: section_reports,
            total_injected_chars: assembled.len(),
        };

        (assembled, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_includes_all_sections_and_tool_list() {
        let builder = PromptBuilder::new(4_000, 16_000);
        let (prompt, report) = builder.build(
            "You are a helpful support agent.",
            "Greet the customer and confirm their identity.",
            &["customer.phone is set".to_string()],
            &["Be warm but concise.".to_string()],
            &json!({"customer": {"name": "Alex"}}),
            &[],
            &["customer.lookup".to_string()],
        );
        assert!(prompt.contains("=== SECTION: identity ==="));
        assert!(prompt.contains("=== SECTION: goal ==="));
        assert!(prompt.contains("Success criteria"));
        assert!(prompt.contains("=== SECTION: tools ==="));
        assert!(prompt.contains("customer.lookup"));
        assert_eq!(report.sections.len(), 5);
    }

    #[test]
    fn total_cap_drops_trailing_sections() {
        let builder = PromptBuilder::new(1_000, 20);
        let (_prompt, report) = builder.build(
            "identity text long enough to matter",
            "goal",
            &[],
            &[],
            &json!({}),
            &[],
            &[],
        );
        assert!(report.sections.iter().any(|s| !s.included));
    }
}
