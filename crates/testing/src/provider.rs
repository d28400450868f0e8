//! A scriptable, deterministic `LlmProvider` mock for turn-loop and
//! semantic-evaluator tests without any network access.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use cso_domain::capability::{LlmCapabilities, ToolSupport};
use cso_domain::error::Result;
use cso_domain::stream::{BoxStream, StreamEvent, Usage};
use cso_providers::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One pre-scripted event in a mock turn.
#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    Token(String),
    ToolCall {
        call_id: String,
        name: String,
        args: Value,
    },
}

/// A single scripted response: the sequence of events the mock will
/// replay for one `chat`/`chat_stream` call.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    events: Vec<ScriptedEvent>,
}

impl ScriptedTurn {
    pub fn text_only(tokens: Vec<String>) -> Self {
        Self {
            events: tokens.into_iter().map(ScriptedEvent::Token).collect(),
        }
    }

    pub fn with_tool_call(
        tokens_before: Vec<String>,
        call_id: impl Into<String>,
        name: impl Into<String>,
        args: Value,
    ) -> Self {
        let mut events: Vec<ScriptedEvent> = tokens_before.into_iter().map(ScriptedEvent::Token).collect();
        events.push(ScriptedEvent::ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            args,
        });
        Self { events }
    }

    fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                ScriptedEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

pub struct MockProvider {
    scripts: Mutex<VecDeque<ScriptedTurn>>,
    capabilities: LlmCapabilities,
}

/// Build a mock `LlmProvider` that replays `scripts` in order, one per
/// `chat`/`chat_stream` call. Once exhausted, further calls return an
/// empty completion rather than erroring, so turn loops that poll one
/// extra time past the scripted plan don't panic.
pub fn mock_provider(scripts: Vec<ScriptedTurn>) -> Arc<dyn LlmProvider> {
    Arc::new(MockProvider {
        scripts: Mutex::new(scripts.into()),
        capabilities: LlmCapabilities {
            supports_tools: ToolSupport::Basic,
            supports_streaming: true,
            supports_json_mode: true,
            supports_vision: false,
            context_window_tokens: Some(8_192),
            max_output_tokens: Some(1_024),
        },
    })
}

impl MockProvider {
    fn next_turn(&self) -> ScriptedTurn {
        self.scripts.lock().pop_front().unwrap_or(ScriptedTurn { events: vec![] })
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        let turn = self.next_turn();
        Ok(ChatResponse {
            content: turn.text(),
            tool_calls: vec![],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock".to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let turn = self.next_turn();
        let stream = async_stream::stream! {
            for event in turn.events {
                match event {
                    ScriptedEvent::Token(text) => yield Ok(StreamEvent::Token { text }),
                    ScriptedEvent::ToolCall { call_id, name, args } => {
                        yield Ok(StreamEvent::ToolCallStarted {
                            call_id: call_id.clone(),
                            tool_name: name.clone(),
                        });
                        yield Ok(StreamEvent::ToolCallFinished {
                            call_id,
                            tool_name: name,
                            arguments: args,
                        });
                    }
                }
            }
            yield Ok(StreamEvent::Done {
                usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
                finish_reason: Some("stop".to_string()),
            });
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Ok(EmbeddingsResponse {
            embeddings: req.input.iter().map(|_| vec![0.0; 8]).collect(),
        })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}
