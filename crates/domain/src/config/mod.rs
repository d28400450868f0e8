use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::BranchRule;

mod llm;
pub use llm::{AuthConfig, AuthMode, LlmConfig, LlmStartupPolicy, ProviderConfig, ProviderKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config (§4.1, §6 "Configuration document")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The immutable in-memory graph produced by the config loader (C1).
///
/// Goals, profiles, and tactics are indexed by id for O(1) lookup once
/// loaded; the document is never mutated after [`Config::load`] returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    pub initial_goal: String,
    pub goals: HashMap<String, Goal>,
    pub profiles: HashMap<String, AgentProfile>,
    pub tactics: HashMap<String, Tactic>,
    #[serde(default)]
    pub tool_mappings: HashMap<String, ToolMapping>,
    #[serde(default)]
    pub enrichments: Vec<Enrichment>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Tool names referenced by goals but not yet registered at load time;
    /// the loader flags these instead of failing — the orchestrator rejects
    /// a turn that actually tries to use one before it's registered (§4.1).
    #[serde(skip)]
    pub deferred_tools: HashSet<String>,
    /// Unknown top-level keys, preserved across read/modify/write (§6).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    pub profile: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tactics: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    #[serde(default)]
    pub rules: Vec<BranchRule>,
    #[serde(default)]
    pub termination_sequence: Vec<TerminationStep>,
    #[serde(default)]
    pub terminal: bool,
}

fn d_max_turns() -> u32 {
    20
}

/// One step of a terminal goal's termination sequence (§4.6). Steps run in
/// order; a `CallTool` step is awaited to completion before the next step
/// runs (the `call_hangup` synchronicity requirement, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationStep {
    Say { text: String },
    CallTool { tool: String, #[serde(default)] args: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub identity: String,
    #[serde(default)]
    pub default_tactics: Vec<String>,
    /// `"provider_id/model_name"`. Falls back to the first registered
    /// provider's default model when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tactic {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMapping {
    pub tool_name: String,
    pub entries: Vec<MappingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    pub result_path: String,
    pub memory_path: String,
}

/// Declarative pre-invocation context enrichment for one tool argument
/// field (§4.3): before calling the handler, the named memory paths are
/// formatted into a compact snapshot and appended to `arg_field`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub tool_name: String,
    pub arg_field: String,
    pub memory_paths: Vec<String>,
}

/// Process-wide tunables (§6 "defaults").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "d_k_tools")]
    pub k_tools: u32,
    #[serde(default = "d_t_turn_secs")]
    pub t_turn_secs: u64,
    #[serde(default = "d_t_tool_hard_secs")]
    pub t_tool_hard_secs: u64,
    #[serde(default = "d_history_window")]
    pub history_window: usize,
    #[serde(default = "d_s_max")]
    pub s_max: usize,
    #[serde(default = "d_semantic_confidence_threshold")]
    pub semantic_confidence_threshold: f32,
    #[serde(default = "d_event_queue_capacity")]
    pub event_queue_capacity: usize,
    #[serde(default)]
    pub voice_id: Option<String>,
}

fn d_k_tools() -> u32 {
    5
}
fn d_t_turn_secs() -> u64 {
    30
}
fn d_t_tool_hard_secs() -> u64 {
    15
}
fn d_history_window() -> usize {
    10
}
fn d_s_max() -> usize {
    100
}
fn d_semantic_confidence_threshold() -> f32 {
    0.7
}
fn d_event_queue_capacity() -> usize {
    1024
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            k_tools: d_k_tools(),
            t_turn_secs: d_t_turn_secs(),
            t_tool_hard_secs: d_t_tool_hard_secs(),
            history_window: d_history_window(),
            s_max: d_s_max(),
            semantic_confidence_threshold: d_semantic_confidence_threshold(),
            event_queue_capacity: d_event_queue_capacity(),
            voice_id: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Parse and normalize a TOML document into a validated [`Config`].
    /// Known tool names (already registered) are passed in so goal/tool
    /// references can be classified as present vs. deferred (§4.1).
    pub fn load(raw_toml: &str, known_tools: &HashSet<String>) -> crate::error::Result<Config> {
        let mut config: Config = toml::from_str(raw_toml)
            .map_err(|e| crate::error::Error::ConfigInvalid(e.to_string()))?;
        for goal in config.goals.values() {
            for tool in &goal.tools {
                if !known_tools.contains(tool) {
                    config.deferred_tools.insert(tool.clone());
                }
            }
        }
        let issues = config.validate();
        if let Some(first_error) = issues.iter().find(|i| i.severity == ConfigSeverity::Error) {
            return Err(crate::error::Error::ConfigInvalid(format!(
                "{} (and {} more issue(s))",
                first_error,
                issues.len().saturating_sub(1)
            )));
        }
        for issue in issues.iter().filter(|i| i.severity == ConfigSeverity::Warning) {
            tracing::warn!(field = %issue.field, message = %issue.message, "config warning");
        }
        Ok(config)
    }

    /// Validate the configuration and return every issue found — does not
    /// stop at the first failure (§4.1).
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !self.goals.contains_key(&self.initial_goal) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "initial_goal".into(),
                message: format!("initial_goal \"{}\" is not a defined goal", self.initial_goal),
            });
        }

        for goal in self.goals.values() {
            if !self.profiles.contains_key(&goal.profile) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("goals.{}.profile", goal.id),
                    message: format!("references undefined profile \"{}\"", goal.profile),
                });
            }
            for tactic in &goal.tactics {
                if !self.tactics.contains_key(tactic) {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("goals.{}.tactics", goal.id),
                        message: format!("references undefined tactic \"{tactic}\""),
                    });
                }
            }

            let mut seen_priorities = HashSet::new();
            for rule in &goal.rules {
                if !self.goals.contains_key(&rule.next_goal_id) {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("goals.{}.rules", goal.id),
                        message: format!(
                            "rule targets undefined goal \"{}\"",
                            rule.next_goal_id
                        ),
                    });
                }
                if !seen_priorities.insert(rule.priority) {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("goals.{}.rules", goal.id),
                        message: format!("duplicate rule priority {}", rule.priority),
                    });
                }
            }

            if goal.terminal && !goal.rules.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("goals.{}.rules", goal.id),
                    message: "terminal goal has branching rules that will never fire".into(),
                });
            }

            for step in &goal.termination_sequence {
                if let TerminationStep::CallTool { tool, .. } = step {
                    if !goal.tools.contains(tool) && !self.deferred_tools.contains(tool) {
                        errors.push(ConfigError {
                            severity: ConfigSeverity::Warning,
                            field: format!("goals.{}.termination_sequence", goal.id),
                            message: format!(
                                "termination step calls tool \"{tool}\" not in goal's tool list"
                            ),
                        });
                    }
                }
            }
        }

        let initial_goal_count = self.goals.values().filter(|_| true).count();
        if initial_goal_count == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "goals".into(),
                message: "at least one goal must be defined".into(),
            });
        }

        if self.defaults.k_tools == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "defaults.k_tools".into(),
                message: "k_tools must be greater than 0".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.defaults.semantic_confidence_threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "defaults.semantic_confidence_threshold".into(),
                message: "must be between 0.0 and 1.0".into(),
            });
        }

        if self.defaults.t_tool_hard_secs < self.defaults.t_turn_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "defaults.t_tool_hard_secs".into(),
                message: "tool hard timeout is shorter than the turn timeout".into(),
            });
        }

        errors
    }

    pub fn goal(&self, id: &str) -> Option<&Goal> {
        self.goals.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_toml() -> &'static str {
        r#"
version = 1
initial_goal = "greet"

[goals.greet]
id = "greet"
description = "Greet the customer"
profile = "support"
tools = []
tactics = ["friendly"]
success_criteria = []

[[goals.greet.rules]]
priority = 10
next_goal_id = "done"
[goals.greet.rules.condition]
kind = "deterministic"
path = "customer.name"
op = "is_set"

[goals.done]
id = "done"
description = "Wrap up"
profile = "support"
terminal = true

[profiles.support]
id = "support"
identity = "You are a helpful support agent."

[tactics.friendly]
id = "friendly"
text = "Be warm and concise."
"#
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|i| i.field == field)
    }

    #[test]
    fn valid_config_loads_with_no_errors() {
        let known = HashSet::new();
        let config = Config::load(valid_toml(), &known).unwrap();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn undefined_initial_goal_is_error() {
        let toml = valid_toml().replace("initial_goal = \"greet\"", "initial_goal = \"missing\"");
        let known = HashSet::new();
        let err = Config::load(&toml, &known).unwrap_err();
        assert!(matches!(err, crate::error::Error::ConfigInvalid(_)));
    }

    #[test]
    fn undefined_profile_reference_is_error() {
        let toml = valid_toml().replace("profile = \"support\"", "profile = \"ghost\"");
        let known = HashSet::new();
        assert!(Config::load(&toml, &known).is_err());
    }

    #[test]
    fn duplicate_rule_priorities_reported() {
        let mut config: Config = toml::from_str(valid_toml()).unwrap();
        let greet = config.goals.get_mut("greet").unwrap();
        greet.rules.push(crate::condition::BranchRule {
            priority: 10,
            condition: crate::condition::Condition::Deterministic {
                path: "x".into(),
                op: crate::condition::Op::IsSet,
                value: None,
            },
            next_goal_id: "done".into(),
        });
        let issues = config.validate();
        assert!(find_issue(&issues, "goals.greet.rules").is_some());
    }

    #[test]
    fn zero_k_tools_is_error() {
        let mut config: Config = toml::from_str(valid_toml()).unwrap();
        config.defaults.k_tools = 0;
        let issues = config.validate();
        let issue = find_issue(&issues, "defaults.k_tools").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn out_of_range_confidence_threshold_is_error() {
        let mut config: Config = toml::from_str(valid_toml()).unwrap();
        config.defaults.semantic_confidence_threshold = 1.5;
        let issues = config.validate();
        assert!(find_issue(&issues, "defaults.semantic_confidence_threshold").is_some());
    }

    #[test]
    fn goal_lookup_by_id() {
        let known = HashSet::new();
        let config = Config::load(valid_toml(), &known).unwrap();
        assert!(config.goal("greet").is_some());
        assert!(config.goal("nonexistent").is_none());
    }

    #[test]
    fn display_formats_severity_tag() {
        let err = ConfigError {
            severity: ConfigSeverity::Warning,
            field: "x".into(),
            message: "y".into(),
        };
        assert_eq!(err.to_string(), "[WARN] x: y");
    }
}
