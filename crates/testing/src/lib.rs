//! Shared test fixtures for the workspace: a scriptable mock `LlmProvider`,
//! no-op voice collaborators, a tempdir-backed session store, and a sample
//! configuration document. Every crate's test module reaches for these
//! instead of hand-rolling its own stand-ins.

mod config;
mod provider;
mod sessions;
mod voice;

pub use config::{sample_config, sample_known_tools, SAMPLE_CONFIG_TOML};
pub use provider::{mock_provider, MockProvider, ScriptedEvent, ScriptedTurn};
pub use sessions::temp_session_store;
pub use voice::{NoopSpeechToText, NoopTextToSpeech};
