//! Unified Goal Agent (C5, §4.5): turns one user input into a stream of
//! `Chunk`s, interleaving LLM tokens with tool-call round trips.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cso_contextpack::PromptBuilder;
use cso_domain::chunk::Chunk;
use cso_domain::config::{AgentProfile, Goal};
use cso_domain::error::ToolResult;
use cso_domain::session::Exchange;
use cso_domain::stream::StreamEvent;
use cso_domain::tool::{ContentPart, Message, MessageContent, Role};
use cso_domain::value;
use cso_providers::{ChatRequest, LlmProvider};
use cso_sessions::SessionStore;
use cso_tools::ToolRegistry;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// How a turn's chunk stream ended — distinguishes a clean `Done` from an
/// abort so the orchestrator knows whether to run the transition engine
/// (§4.6 "A failure in C5's stream... skip the transition engine").
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed {
        assistant_text: String,
        tool_invocations: usize,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        /// Set when the turn hit the per-turn tool-call cap (`K_tools`) and
        /// refused further calls rather than ran them (§4.5, scenario 4).
        tool_cap_hit: bool,
        /// Memory updates produced by tools' result mappings over the
        /// course of this turn, deep-merged in invocation order. The
        /// orchestrator applies this through the session guard it already
        /// holds — `invoke` itself never touches the session lock.
        memory_updates: Value,
    },
    Aborted {
        assistant_text_so_far: String,
        reason: String,
        memory_updates: Value,
    },
}

/// Handle returned by [`GoalAgent::run_turn`]: a live chunk stream plus a
/// one-shot outcome signaled once the stream is fully drained.
pub struct TurnHandle {
    pub chunks: mpsc::Receiver<Chunk>,
    pub outcome: oneshot::Receiver<TurnOutcome>,
}

#[derive(Clone)]
pub struct GoalAgent {
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    prompt_builder: PromptBuilder,
}

impl GoalAgent {
    pub fn new(tools: Arc<ToolRegistry>, sessions: Arc<SessionStore>, prompt_builder: PromptBuilder) -> Self {
        Self {
            tools,
            sessions,
            prompt_builder,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run_turn(
        &self,
        provider: Arc<dyn LlmProvider>,
        profile: AgentProfile,
        goal: Goal,
        tactics: Vec<String>,
        memory_projection: Value,
        history: Vec<Exchange>,
        user_text: String,
        session_id: String,
        k_tools: u32,
        t_turn: Duration,
        cancel: CancellationToken,
    ) -> TurnHandle {
        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let tools = self.tools.clone();
        let sessions = self.sessions.clone();
        let (system_prompt, _report) = self.prompt_builder.build(
            &profile.identity,
            &goal.description,
            &goal.success_criteria,
            &tactics,
            &memory_projection,
            &history,
            &goal.tools,
        );

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                t_turn,
                drive_turn(
                    provider,
                    tools,
                    sessions,
                    system_prompt,
                    goal.tools.clone(),
                    user_text,
                    session_id,
                    profile.model.clone(),
                    profile.temperature,
                    profile.max_output_tokens,
                    k_tools,
                    cancel.clone(),
                    chunk_tx.clone(),
                ),
            )
            .await;

            let outcome = match outcome {
                Ok(o) => o,
                Err(_elapsed) => TurnOutcome::Aborted {
                    assistant_text_so_far: String::new(),
                    reason: "turn_timeout".to_string(),
                    memory_updates: Value::Object(serde_json::Map::new()),
                },
            };
            let _ = outcome_tx.send(outcome);
        });

        TurnHandle {
            chunks: chunk_rx,
            outcome: outcome_rx,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_turn(
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    system_prompt: String,
    allowed_tools: Vec<String>,
    user_text: String,
    session_id: String,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    k_tools: u32,
    cancel: CancellationToken,
    chunk_tx: mpsc::Sender<Chunk>,
) -> TurnOutcome {
    let tool_defs = tools.describe(&allowed_tools);
    let mut messages = vec![Message::system(system_prompt), Message::user(user_text)];
    let mut assistant_text = String::new();
    let mut tool_invocations = 0usize;
    let mut prompt_tokens = None;
    let mut completion_tokens = None;
    let mut tool_cap_hit = false;
    let mut memory_updates = Value::Object(serde_json::Map::new());

    loop {
        if cancel.is_cancelled() {
            return TurnOutcome::Aborted {
                assistant_text_so_far: assistant_text,
                reason: "cancelled".to_string(),
                memory_updates,
            };
        }

        if tool_invocations as u32 >= k_tools {
            tool_cap_hit = true;
            break;
        }

        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature,
            max_tokens,
            json_mode: false,
            model: model.clone(),
        };

        let mut stream = match provider.chat_stream(req, cancel.clone()).await {
            Ok(s) => s,
            Err(e) => {
                return TurnOutcome::Aborted {
                    assistant_text_so_far: assistant_text,
                    reason: format!("provider_error: {e}"),
                    memory_updates,
                };
            }
        };

        let mut turn_text = String::new();
        let mut finished_calls: Vec<(String, String, Value)> = Vec::new();
        let mut stream_failed = false;

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                return TurnOutcome::Aborted {
                    assistant_text_so_far: assistant_text,
                    reason: "cancelled".to_string(),
                    memory_updates,
                };
            }
            match event {
                Ok(StreamEvent::Token { text }) => {
                    turn_text.push_str(&text);
                    assistant_text.push_str(&text);
                    if chunk_tx.send(Chunk::Token { text }).await.is_err() {
                        return TurnOutcome::Aborted {
                            assistant_text_so_far: assistant_text,
                            reason: "downstream_closed".to_string(),
                            memory_updates,
                        };
                    }
                }
                Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }) => {
                    let args = if arguments.is_null() { serde_json::json!({}) } else { arguments };
                    finished_calls.push((call_id, tool_name, args));
                }
                Ok(StreamEvent::ToolCallStarted { .. }) | Ok(StreamEvent::ToolCallDelta { .. }) => {}
                Ok(StreamEvent::Done { usage, .. }) => {
                    if let Some(u) = usage {
                        prompt_tokens = Some(u.prompt_tokens);
                        completion_tokens = Some(u.completion_tokens);
                    }
                }
                Ok(StreamEvent::Error { message }) => {
                    stream_failed = true;
                    tracing::warn!(session_id, error = %message, "llm stream error");
                    break;
                }
                Err(e) => {
                    stream_failed = true;
                    tracing::warn!(session_id, error = %e, "llm stream error");
                    break;
                }
            }
        }

        if stream_failed {
            return TurnOutcome::Aborted {
                assistant_text_so_far: assistant_text,
                reason: "llm_stream_error".to_string(),
                memory_updates,
            };
        }

        if finished_calls.is_empty() {
            break;
        }

        if !turn_text.is_empty() {
            messages.push(Message::assistant(turn_text));
        }
        let tool_use_parts = finished_calls
            .iter()
            .map(|(call_id, name, args)| ContentPart::ToolUse {
                id: call_id.clone(),
                name: name.clone(),
                input: args.clone(),
            })
            .collect();
        messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Parts(tool_use_parts),
        });

        for (call_id, tool_name, args) in finished_calls {
            if tool_invocations as u32 >= k_tools {
                // A single assistant turn asked for more tool calls than
                // K_tools allows; stop executing here rather than run the
                // rest of this batch (§4.5 "exactly K_tools pairs then Done").
                tool_cap_hit = true;
                break;
            }
            tool_invocations += 1;
            let started = Instant::now();
            if chunk_tx
                .send(Chunk::ToolCallBegin {
                    call_id: call_id.clone(),
                    name: tool_name.clone(),
                    args: args.clone(),
                })
                .await
                .is_err()
            {
                return TurnOutcome::Aborted {
                    assistant_text_so_far: assistant_text,
                    reason: "downstream_closed".to_string(),
                    memory_updates,
                };
            }

            let invocation = tools
                .invoke(&tool_name, args, &sessions, &session_id, &cancel)
                .await;
            let result = invocation.result;
            if let Some(update) = &invocation.memory_update {
                value::deep_merge(&mut memory_updates, update);
            }
            let latency_ms = started.elapsed().as_millis() as u64;
            let _ = latency_ms;

            let (summary, tool_message) = match &result {
                ToolResult::Ok { payload } => {
                    let summary = summarize(payload);
                    (summary.clone(), Message::tool_result(call_id.clone(), serde_json::to_string(payload).unwrap_or_default()))
                }
                ToolResult::Err { kind, message } => {
                    let summary = format!("error: {message}");
                    let err_message = Message {
                        role: Role::Tool,
                        content: MessageContent::Parts(vec![ContentPart::ToolResult {
                            tool_use_id: call_id.clone(),
                            content: format!("{{\"error\":\"{kind:?}\",\"message\":{message:?}}}"),
                            is_error: true,
                        }]),
                    };
                    (summary, err_message)
                }
            };

            if chunk_tx
                .send(Chunk::ToolCallEnd {
                    call_id: call_id.clone(),
                    result_summary: summary,
                })
                .await
                .is_err()
            {
                return TurnOutcome::Aborted {
                    assistant_text_so_far: assistant_text,
                    reason: "downstream_closed".to_string(),
                    memory_updates,
                };
            }
            messages.push(tool_message);
        }

        if tool_cap_hit {
            break;
        }
    }

    if tool_cap_hit {
        let note = "\n\nI'm having trouble completing this with the tools available.";
        assistant_text.push_str(note);
        let _ = chunk_tx.send(Chunk::Token { text: note.to_string() }).await;
    }

    if chunk_tx
        .send(Chunk::Done {
            assistant_text: assistant_text.clone(),
            usage: match (prompt_tokens, completion_tokens) {
                (Some(p), Some(c)) => Some(cso_domain::stream::Usage {
                    prompt_tokens: p,
                    completion_tokens: c,
                    total_tokens: p + c,
                }),
                _ => None,
            },
        })
        .await
        .is_err()
    {
        return TurnOutcome::Aborted {
            assistant_text_so_far: assistant_text,
            reason: "downstream_closed".to_string(),
            memory_updates,
        };
    }

    TurnOutcome::Completed {
        assistant_text,
        tool_invocations,
        prompt_tokens,
        completion_tokens,
        tool_cap_hit,
        memory_updates,
    }
}

fn summarize(payload: &Value) -> String {
    let s = payload.to_string();
    if s.len() > 200 {
        format!("{}...", &s[..200])
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cso_domain::config::{Defaults, Goal};
    use cso_testing::mock_provider;
    use std::collections::HashMap;

    fn test_goal() -> Goal {
        Goal {
            id: "greet".into(),
            description: "Greet the customer.".into(),
            profile: "default".into(),
            tools: vec![],
            tactics: vec![],
            success_criteria: vec![],
            max_turns: 20,
            rules: vec![],
            termination_sequence: vec![],
            terminal: false,
        }
    }

    fn test_profile() -> AgentProfile {
        AgentProfile {
            id: "default".into(),
            identity: "You are a support agent.".into(),
            default_tactics: vec![],
            model: None,
            temperature: None,
            max_output_tokens: None,
        }
    }

    #[tokio::test]
    async fn plain_text_turn_emits_tokens_then_done_matching_p5() {
        let provider = mock_provider(vec![cso_testing::ScriptedTurn::text_only(vec![
            "Hello".into(),
            " there".into(),
        ])]);
        let tools = Arc::new(ToolRegistry::new(vec![], HashMap::new()));
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path()).unwrap());
        let prompt_builder = PromptBuilder::new(4_000, 16_000);
        let agent = GoalAgent::new(tools, sessions, prompt_builder);

        let defaults = Defaults::default();
        let mut handle = agent.run_turn(
            provider,
            test_profile(),
            test_goal(),
            vec![],
            serde_json::json!({}),
            vec![],
            "hi".into(),
            "s1".into(),
            defaults.k_tools,
            Duration::from_secs(defaults.t_turn_secs),
            CancellationToken::new(),
        );

        let mut tokens = String::new();
        let mut saw_done = false;
        while let Some(chunk) = handle.chunks.recv().await {
            match chunk {
                Chunk::Token { text } => tokens.push_str(&text),
                Chunk::Done { assistant_text, .. } => {
                    assert_eq!(assistant_text, tokens);
                    saw_done = true;
                }
                _ => {}
            }
        }
        assert!(saw_done);
        assert_eq!(tokens, "Hello there");

        let outcome = handle.outcome.await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    }

    struct CountingEchoHandler;

    #[async_trait::async_trait]
    impl cso_tools::ToolHandler for CountingEchoHandler {
        async fn handle(
            &self,
            args: Value,
            _session_id: &str,
            _cancel: &CancellationToken,
        ) -> ToolResult {
            ToolResult::ok(args)
        }
    }

    /// Regression test for the tool-call cap off-by-one (§4.5 scenario 4):
    /// with `k_tools = 2` and three rounds each offering one tool call, the
    /// turn must stop after exactly two invocations and report
    /// `tool_cap_hit`, not run a third.
    #[tokio::test]
    async fn tool_cap_stops_after_exactly_k_tools_invocations() {
        let provider = mock_provider(vec![
            cso_testing::ScriptedTurn::with_tool_call(vec![], "c1", "echo", serde_json::json!({})),
            cso_testing::ScriptedTurn::with_tool_call(vec![], "c2", "echo", serde_json::json!({})),
            cso_testing::ScriptedTurn::with_tool_call(vec![], "c3", "echo", serde_json::json!({})),
        ]);
        let tools = Arc::new(ToolRegistry::new(vec![], HashMap::new()));
        tools.register(
            cso_domain::tool::ToolDefinition {
                name: "echo".into(),
                description: "echo".into(),
                parameters: serde_json::json!({"required": []}),
            },
            Arc::new(CountingEchoHandler),
        );
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path()).unwrap());
        let prompt_builder = PromptBuilder::new(4_000, 16_000);
        let agent = GoalAgent::new(tools, sessions, prompt_builder);

        let mut goal = test_goal();
        goal.tools = vec!["echo".to_string()];

        let mut handle = agent.run_turn(
            provider,
            test_profile(),
            goal,
            vec![],
            serde_json::json!({}),
            vec![],
            "hi".into(),
            "s1".into(),
            2,
            Duration::from_secs(30),
            CancellationToken::new(),
        );

        while handle.chunks.recv().await.is_some() {}
        let outcome = handle.outcome.await.unwrap();
        match outcome {
            TurnOutcome::Completed {
                tool_invocations,
                tool_cap_hit,
                ..
            } => {
                assert_eq!(tool_invocations, 2);
                assert!(tool_cap_hit);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
