use serde::{Deserialize, Serialize};

/// Per-section report within one system-prompt build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionReport {
    pub name: String,
    pub raw_chars: usize,
    pub injected_chars: usize,
    pub truncated_per_section: bool,
    pub truncated_total_cap: bool,
    pub included: bool,
}

/// Full report of a system-prompt build, useful for debugging/logging a
/// turn without re-rendering the prompt text itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptReport {
    pub sections: Vec<SectionReport>,
    pub total_injected_chars: usize,
}
