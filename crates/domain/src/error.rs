/// Shared error type used across all orchestrator crates.
///
/// Variants surfaced in event payloads (§7, §4.8) implement [`Error::kind_str`],
/// a stable machine-readable name independent of the human-facing `Display`
/// message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("session IO failure: {0}")]
    SessionIOFailure(String),

    #[error("session {0} is terminal")]
    SessionTerminal(String),

    #[error("tool argument invalid: {0}")]
    ToolArgInvalid(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool unauthorized: {0}")]
    ToolUnauthorized(String),

    #[error("tool upstream failed: {0}")]
    ToolUpstreamFailed(String),

    #[error("tool timed out: {0}")]
    ToolTimeout(String),

    #[error("llm stream error: {0}")]
    LLMStreamError(String),

    #[error("semantic evaluation failed: {0}")]
    SemanticEvalFailed(String),

    #[error("turn timed out")]
    TurnTimeout,

    #[error("turn cancelled")]
    TurnCancelled,

    #[error("transition config drift: rule referenced unknown goal {0}")]
    TransitionConfigDrift(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable, wire-safe identifier for this error's kind, used by event
    /// payloads (§7). Independent of `Display`'s human-readable message.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::ConfigInvalid(_) => "config_invalid",
            Error::SessionIOFailure(_) => "session_io_failure",
            Error::SessionTerminal(_) => "session_terminal",
            Error::ToolArgInvalid(_) => "tool_arg_invalid",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ToolUnauthorized(_) => "tool_unauthorized",
            Error::ToolUpstreamFailed(_) => "tool_upstream_failed",
            Error::ToolTimeout(_) => "tool_timeout",
            Error::LLMStreamError(_) => "llm_stream_error",
            Error::SemanticEvalFailed(_) => "semantic_eval_failed",
            Error::TurnTimeout => "turn_timeout",
            Error::TurnCancelled => "turn_cancelled",
            Error::TransitionConfigDrift(_) => "transition_config_drift",
            Error::Provider { .. } => "provider",
            Error::Other(_) => "other",
        }
    }
}

/// The outcome of a single tool invocation (§4.3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Ok { payload: serde_json::Value },
    Err { kind: ToolErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    ArgInvalid,
    NotFound,
    Unauthorized,
    UpstreamFailed,
    Timeout,
    Unknown,
}

impl ToolResult {
    pub fn ok(payload: serde_json::Value) -> Self {
        ToolResult::Ok { payload }
    }

    pub fn err(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        ToolResult::Err {
            kind,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok { .. })
    }
}

impl From<Error> for ToolResult {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::ToolArgInvalid(_) => ToolErrorKind::ArgInvalid,
            Error::ToolNotFound(_) => ToolErrorKind::NotFound,
            Error::ToolUnauthorized(_) => ToolErrorKind::Unauthorized,
            Error::ToolUpstreamFailed(_) | Error::Provider { .. } => ToolErrorKind::UpstreamFailed,
            Error::ToolTimeout(_) => ToolErrorKind::Timeout,
            _ => ToolErrorKind::Unknown,
        };
        ToolResult::Err {
            kind,
            message: e.to_string(),
        }
    }
}
