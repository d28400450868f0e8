//! A sample configuration document exercising every part of the config
//! graph: goals with deterministic, compound (`all_of`), and semantic
//! rules, a termination sequence, tool mappings, and enrichment.

use cso_domain::config::Config;
use std::collections::HashSet;

pub const SAMPLE_CONFIG_TOML: &str = r#"
version = 1
initial_goal = "greet"

[defaults]
k_tools = 5
t_turn_secs = 30
t_tool_hard_secs = 15
history_window = 10
s_max = 100
semantic_confidence_threshold = 0.7
event_queue_capacity = 1024

[profiles.default]
id = "default"
identity = "You are a warm, efficient customer-service agent for a home-repair company."
default_tactics = ["be_concise"]
model = "mock/default"
temperature = 0.3
max_output_tokens = 400

[tactics.be_concise]
id = "be_concise"
text = "Keep responses to two sentences or fewer unless the customer asks for detail."

[tactics.confirm_before_booking]
id = "confirm_before_booking"
text = "Always read back the date and time before calling the booking tool."

[goals.greet]
id = "greet"
description = "Greet the customer and learn their phone number."
profile = "default"
tools = ["customer.lookup", "customer.create"]
tactics = []
success_criteria = ["customer.phone"]
max_turns = 5

[[goals.greet.rules]]
priority = 10
next_goal_id = "plan"
[goals.greet.rules.condition]
kind = "deterministic"
path = "customer.phone"
op = "is_set"

[goals.plan]
id = "plan"
description = "Understand the requested service and schedule it."
profile = "default"
tools = ["task.create", "calendar.book"]
tactics = ["confirm_before_booking"]
success_criteria = ["operations.booking_id"]
max_turns = 10

[[goals.plan.rules]]
priority = 20
next_goal_id = "confirm"
[goals.plan.rules.condition]
kind = "all_of"
conditions = [
  { kind = "deterministic", path = "operations.booking_id", op = "is_set" },
  { kind = "deterministic", path = "customer.phone", op = "is_set" },
]

[[goals.plan.rules]]
priority = 10
next_goal_id = "confirm"
[goals.plan.rules.condition]
kind = "deterministic"
path = "operations.booking_id"
op = "is_set"

[[goals.plan.rules]]
priority = 5
next_goal_id = "confirm"
[goals.plan.rules.condition]
kind = "semantic"
text = "the customer wants to end the call without booking anything"

[goals.confirm]
id = "confirm"
description = "Confirm the booking and say goodbye."
profile = "default"
tools = ["call_hangup"]
terminal = true

[[goals.confirm.termination_sequence]]
kind = "say"
text = "Thanks for calling — we'll see you then!"

[[goals.confirm.termination_sequence]]
kind = "call_tool"
tool = "call_hangup"

[tool_mappings.calendar_book]
tool_name = "calendar.book"
[[tool_mappings.calendar_book.entries]]
result_path = "booking_id"
memory_path = "operations.booking_id"

[[enrichments]]
tool_name = "task.create"
arg_field = "notes"
memory_paths = ["customer.name", "customer.phone"]
"#;

/// Tool names the sample config assumes are registered (matching the demo
/// handlers shipped in `cso-tools`).
pub fn sample_known_tools() -> HashSet<String> {
    [
        "customer.lookup",
        "customer.create",
        "task.create",
        "calendar.book",
        "call_hangup",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn sample_config() -> Config {
    Config::load(SAMPLE_CONFIG_TOML, &sample_known_tools()).expect("sample config must be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_has_no_validation_errors() {
        let config = sample_config();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn sample_config_references_only_known_tools() {
        let config = sample_config();
        assert!(config.deferred_tools.is_empty());
    }

    #[test]
    fn sample_config_loads_a_compound_all_of_rule() {
        use cso_domain::condition::Condition;

        let config = sample_config();
        let plan = config.goals.get("plan").expect("plan goal must load");
        let compound = plan
            .rules
            .iter()
            .find(|r| matches!(r.condition, Condition::AllOf { .. }))
            .expect("plan goal must have an all_of rule loaded from config");
        match &compound.condition {
            Condition::AllOf { conditions } => assert_eq!(conditions.len(), 2),
            _ => unreachable!(),
        }
    }
}
