use serde::{Deserialize, Serialize};

use crate::stream::Usage;

/// A single unit of a turn's streamed output (§4.5).
///
/// Emitted in production order by the unified goal agent: zero or more
/// `Token`s and `ToolCallBegin`/`ToolCallEnd` pairs, followed by exactly one
/// `Done` (P5: `Done.assistant_text` equals the concatenation of all
/// `Token.text` in order).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    Token {
        text: String,
    },
    ToolCallBegin {
        call_id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolCallEnd {
        call_id: String,
        result_summary: String,
    },
    Done {
        assistant_text: String,
        usage: Option<Usage>,
    },
}

impl Chunk {
    pub fn is_done(&self) -> bool {
        matches!(self, Chunk::Done { .. })
    }
}
