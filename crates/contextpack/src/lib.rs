//! System-prompt assembly for the unified goal agent (C5, §4.5 ambient).
//!
//! Adapted from the teacher's workspace-context-pack builder: same
//! delimiter style (`=== SECTION ===` / `--- BEGIN ---` / `--- END ---`),
//! same per-section/total truncation strategy, now assembling identity,
//! goal, tactics, memory projection, and history sections instead of
//! workspace markdown files.

pub mod builder;
pub mod injection;
pub mod report;
pub mod truncation;

pub use builder::PromptBuilder;
pub use report::{PromptReport, SectionReport};
