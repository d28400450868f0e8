//! LLM provider configuration (§6 "Provider config").
//!
//! Trimmed down from the teacher's role/tier/classifier routing machinery:
//! this spec assigns a model directly to each [`crate::config::AgentProfile`]
//! rather than routing requests through named roles, so only the
//! provider/auth shape survives here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Google,
    OpenaiCompat,
    AzureOpenai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Plain,
    Env,
    Keychain,
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::Env
    }
}

/// Resolution config for a provider's API key (§6).
///
/// [`crate::config::llm`] only describes *where* the key lives; resolving it
/// (reading the env var, hitting the OS keychain) is the providers crate's
/// job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Plaintext key (discouraged, logged with a warning when used).
    #[serde(default)]
    pub key: Option<String>,
    /// Environment variable name holding the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Multiple env var names for round-robin key rotation.
    #[serde(default)]
    pub keys: Vec<String>,
    /// OS keychain service name.
    #[serde(default)]
    pub service: Option<String>,
    /// OS keychain account name.
    #[serde(default)]
    pub account: Option<String>,
    /// Override the HTTP header used to carry the key (default depends on provider kind).
    #[serde(default)]
    pub header: Option<String>,
    /// Override the header value prefix (e.g. `"Bearer "`).
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    /// Startup fails if every configured provider fails to initialize.
    RequireOne,
    /// Startup proceeds even with zero working providers; LLM calls fail
    /// until configuration is fixed.
    AllowNone,
}

impl Default for LlmStartupPolicy {
    fn default() -> Self {
        LlmStartupPolicy::AllowNone
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub startup_policy: LlmStartupPolicy,
    #[serde(default)]
    pub require_provider: bool,
}
