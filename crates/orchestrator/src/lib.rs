//! Orchestrator (C6, §4.6): the per-turn coordinator. Owns the session
//! lock for the duration of one turn, delegates to the goal agent (C5),
//! then to the transition engine (C4), and persists the result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cso_agent::{GoalAgent, TurnOutcome};
use cso_domain::chunk::Chunk;
use cso_domain::config::{AgentProfile, Config, Goal, TerminationStep};
use cso_domain::error::{Error, Result};
use cso_domain::event::Event;
use cso_domain::session::ExchangeRole;
use cso_events::EventSink;
use cso_providers::LlmProvider;
use cso_sessions::SessionStore;
use cso_tools::ToolRegistry;
use cso_transitions::{Transition, TransitionEngine};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Orchestrator {
    config: Arc<Config>,
    sessions: Arc<SessionStore>,
    tools: Arc<ToolRegistry>,
    provider: Arc<dyn LlmProvider>,
    agent: Arc<GoalAgent>,
    transitions: Arc<TransitionEngine>,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionStore>,
        tools: Arc<ToolRegistry>,
        provider: Arc<dyn LlmProvider>,
        agent: Arc<GoalAgent>,
        transitions: Arc<TransitionEngine>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            sessions,
            tools,
            provider,
            agent,
            transitions,
            events,
        }
    }

    /// `Turn(sid, user_text) -> Stream<Chunk> + TurnReport` (§4.6).
    pub async fn turn(
        &self,
        session_id: String,
        user_text: String,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Chunk>> {
        if self.sessions.is_terminal(&session_id)? {
            return Err(Error::SessionTerminal(session_id));
        }

        let (out_tx, out_rx) = mpsc::channel(64);

        let config = self.config.clone();
        let sessions = self.sessions.clone();
        let tools = self.tools.clone();
        let provider = self.provider.clone();
        let agent = self.agent.clone();
        let transitions = self.transitions.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            run_turn(
                config, sessions, tools, provider, agent, transitions, events, session_id, user_text, cancel, out_tx,
            )
            .await;
        });

        Ok(out_rx)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_turn(
    config: Arc<Config>,
    sessions: Arc<SessionStore>,
    tools: Arc<ToolRegistry>,
    provider: Arc<dyn LlmProvider>,
    agent: Arc<GoalAgent>,
    transitions: Arc<TransitionEngine>,
    events: EventSink,
    session_id: String,
    user_text: String,
    cancel: CancellationToken,
    out_tx: mpsc::Sender<Chunk>,
) {
    let started = Instant::now();
    events.metrics().turn_started();

    let mut guard = match sessions.lock(&session_id).await {
        Ok(g) => g,
        Err(e) => {
            tracing::error!(session_id, error = %e, "failed to acquire session lock");
            return;
        }
    };

    if guard.session().current_goal.is_none() {
        guard.set_goal(config.initial_goal.clone());
    }
    guard.append_history(ExchangeRole::User, user_text.clone());

    let goal_in = guard
        .session()
        .current_goal
        .clone()
        .unwrap_or_else(|| config.initial_goal.clone());
    let Some(goal) = config.goals.get(&goal_in).cloned() else {
        tracing::error!(session_id, goal = %goal_in, "current goal missing from config");
        return;
    };
    let Some(profile) = config.profiles.get(&goal.profile).cloned() else {
        tracing::error!(session_id, profile = %goal.profile, "goal profile missing from config");
        return;
    };
    let tactics = resolve_tactics(&config, &profile, &goal);
    let memory_projection = guard.session().memory.as_value();
    let history = guard.session().history.clone();

    let handle = agent.run_turn(
        provider,
        profile,
        goal.clone(),
        tactics,
        memory_projection.clone(),
        history.clone(),
        user_text,
        session_id.clone(),
        config.defaults.k_tools,
        Duration::from_secs(config.defaults.t_turn_secs),
        cancel,
    );
    let mut chunks = handle.chunks;

    while let Some(chunk) = chunks.recv().await {
        if out_tx.send(chunk).await.is_err() {
            // Caller stopped consuming; nothing more to do for this turn.
            return;
        }
    }

    let outcome = match handle.outcome.await {
        Ok(o) => o,
        Err(_) => TurnOutcome::Aborted {
            assistant_text_so_far: String::new(),
            reason: "agent_task_dropped".to_string(),
            memory_updates: serde_json::Value::Object(serde_json::Map::new()),
        },
    };

    match outcome {
        TurnOutcome::Aborted {
            assistant_text_so_far,
            reason,
            memory_updates,
        } => {
            guard.update_memory(&memory_updates);
            if !assistant_text_so_far.is_empty() {
                guard.append_history(ExchangeRole::Assistant, assistant_text_so_far);
            }
            let _ = guard.commit();
            events.metrics().llm_stream_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            events
                .record(Event::TurnAborted {
                    session_id: session_id.clone(),
                    reason,
                })
                .await;
        }
        TurnOutcome::Completed {
            assistant_text,
            tool_invocations,
            prompt_tokens,
            completion_tokens,
            tool_cap_hit,
            memory_updates,
        } => {
            guard.update_memory(&memory_updates);
            guard.append_history(ExchangeRole::Assistant, assistant_text);

            let memory_after = guard.session().memory.as_value();
            let recent = guard.session().history.clone();
            let known_goal_ids: HashSet<String> = config.goals.keys().cloned().collect();

            let transition = transitions
                .evaluate(&goal, &memory_after, &recent, &known_goal_ids, &session_id, &events)
                .await;

            let goal_out = match transition {
                Transition::Advance { next_goal_id, .. } => {
                    guard.set_goal(next_goal_id.clone());
                    if let Some(next_goal) = config.goals.get(&next_goal_id) {
                        if next_goal.terminal {
                            run_termination_sequence(next_goal, &tools, &mut guard, &session_id, &cancel_noop(), &out_tx)
                                .await;
                            guard.mark_terminal();
                        }
                    }
                    next_goal_id
                }
                Transition::Stay => goal_in.clone(),
            };

            let commit_result = guard.commit();
            if let Err(e) = commit_result {
                tracing::error!(session_id, error = %e, "failed to persist session after turn");
            }

            if tool_cap_hit {
                events
                    .record(Event::TooManyTools {
                        session_id: session_id.clone(),
                        tool_invocations,
                        k_tools: config.defaults.k_tools,
                    })
                    .await;
            }

            events
                .record(Event::TurnReport {
                    session_id: session_id.clone(),
                    goal_in,
                    goal_out,
                    tool_invocations,
                    prompt_tokens,
                    completion_tokens,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
                .await;
        }
    }
}

/// The termination sequence runs after the agent's own cancellation token
/// has already served its purpose; it always runs to completion
/// synchronously regardless of the turn's cancellation state (§4.6 ambient).
fn cancel_noop() -> CancellationToken {
    CancellationToken::new()
}

async fn run_termination_sequence(
    goal: &Goal,
    tools: &ToolRegistry,
    guard: &mut cso_sessions::SessionGuard<'_>,
    session_id: &str,
    cancel: &CancellationToken,
    out_tx: &mpsc::Sender<Chunk>,
) {
    for step in &goal.termination_sequence {
        match step {
            TerminationStep::Say { text } => {
                let _ = out_tx.send(Chunk::Token { text: text.clone() }).await;
            }
            TerminationStep::CallTool { tool, args } => {
                let call_id = format!("termination-{tool}");
                let _ = out_tx
                    .send(Chunk::ToolCallBegin {
                        call_id: call_id.clone(),
                        name: tool.clone(),
                        args: args.clone(),
                    })
                    .await;
                // `guard` is already held for this turn; invoke never touches
                // the session lock itself, so this cannot self-deadlock.
                let invocation = tools
                    .invoke(tool, args.clone(), guard.store(), session_id, cancel)
                    .await;
                if let Some(update) = &invocation.memory_update {
                    guard.update_memory(update);
                }
                let summary = match &invocation.result {
                    cso_domain::error::ToolResult::Ok { payload } => payload.to_string(),
                    cso_domain::error::ToolResult::Err { message, .. } => format!("error: {message}"),
                };
                let _ = out_tx
                    .send(Chunk::ToolCallEnd {
                        call_id,
                        result_summary: summary,
                    })
                    .await;
            }
        }
    }
}

/// Resolve a goal's effective tactic texts: the agent profile's defaults
/// followed by the goal's own tactic references, each mapped from id to
/// text via the config's tactic catalog (unknown ids are skipped).
fn resolve_tactics(config: &Config, profile: &AgentProfile, goal: &Goal) -> Vec<String> {
    profile
        .default_tactics
        .iter()
        .chain(goal.tactics.iter())
        .filter_map(|id| config.tactics.get(id).map(|t| t.text.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cso_contextpack::PromptBuilder;
    use cso_domain::config::{AgentProfile as Profile, Defaults, Goal as GoalT};
    use cso_domain::condition::{BranchRule, Condition, Op};
    use cso_semantic::SemanticEvaluator;
    use std::collections::HashMap;

    fn make_config() -> Config {
        let mut goals = HashMap::new();
        goals.insert(
            "greet".to_string(),
            GoalT {
                id: "greet".into(),
                description: "Greet the customer.".into(),
                profile: "default".into(),
                tools: vec![],
                tactics: vec![],
                success_criteria: vec![],
                max_turns: 20,
                rules: vec![BranchRule {
                    priority: 1,
                    condition: Condition::Deterministic {
                        path: "customer.phone".into(),
                        op: Op::IsSet,
                        value: None,
                    },
                    next_goal_id: "confirm".into(),
                }],
                termination_sequence: vec![],
                terminal: false,
            },
        );
        goals.insert(
            "confirm".to_string(),
            GoalT {
                id: "confirm".into(),
                description: "Confirm and say goodbye.".into(),
                profile: "default".into(),
                tools: vec![],
                tactics: vec![],
                success_criteria: vec![],
                max_turns: 20,
                rules: vec![],
                termination_sequence: vec![TerminationStep::Say {
                    text: "Goodbye!".into(),
                }],
                terminal: true,
            },
        );
        let mut profiles = HashMap::new();
        profiles.insert(
            "default".to_string(),
            Profile {
                id: "default".into(),
                identity: "You are a support agent.".into(),
                default_tactics: vec![],
                model: None,
                temperature: None,
                max_output_tokens: None,
            },
        );
        Config {
            version: 1,
            initial_goal: "greet".into(),
            goals,
            profiles,
            tactics: HashMap::new(),
            tool_mappings: HashMap::new(),
            enrichments: vec![],
            defaults: Defaults::default(),
            llm: Default::default(),
            deferred_tools: Default::default(),
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn turn_advances_goal_and_runs_termination_sequence() {
        let config = Arc::new(make_config());
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path()).unwrap());
        let tools = Arc::new(ToolRegistry::new(vec![], HashMap::new()));
        let provider = cso_testing::mock_provider(vec![cso_testing::ScriptedTurn::text_only(vec![
            "Hi there".into(),
        ])]);
        let prompt_builder = PromptBuilder::new(4_000, 16_000);
        let agent = Arc::new(GoalAgent::new(tools.clone(), sessions.clone(), prompt_builder));
        let semantic_provider = cso_testing::mock_provider(vec![]);
        let semantic = SemanticEvaluator::new(semantic_provider, None);
        let transitions = Arc::new(TransitionEngine::new(semantic, 0.7));
        let events = EventSink::spawn(16, None);

        // Seed the session's memory so the branching rule fires.
        {
            let mut guard = sessions.lock("s1").await.unwrap();
            guard.update_memory(&serde_json::json!({"customer": {"phone": "555"}}));
            guard.commit().unwrap();
        }

        let orchestrator = Orchestrator::new(config, sessions.clone(), tools, provider, agent, transitions, events);
        let mut rx = orchestrator
            .turn("s1".to_string(), "hello".to_string(), CancellationToken::new())
            .await
            .unwrap();

        let mut saw_goodbye = false;
        while let Some(chunk) = rx.recv().await {
            if let Chunk::Token { text } = chunk {
                if text.contains("Goodbye") {
                    saw_goodbye = true;
                }
            }
        }
        assert!(saw_goodbye);

        let session = sessions.get("s1").unwrap();
        assert_eq!(session.current_goal.as_deref(), Some("confirm"));
        assert!(session.terminal);
    }

    #[tokio::test]
    async fn terminal_session_rejects_further_turns() {
        let config = Arc::new(make_config());
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path()).unwrap());
        let tools = Arc::new(ToolRegistry::new(vec![], HashMap::new()));
        let provider = cso_testing::mock_provider(vec![]);
        let prompt_builder = PromptBuilder::new(4_000, 16_000);
        let agent = Arc::new(GoalAgent::new(tools.clone(), sessions.clone(), prompt_builder));
        let semantic_provider = cso_testing::mock_provider(vec![]);
        let semantic = SemanticEvaluator::new(semantic_provider, None);
        let transitions = Arc::new(TransitionEngine::new(semantic, 0.7));
        let events = EventSink::spawn(16, None);

        {
            let mut guard = sessions.lock("s1").await.unwrap();
            guard.mark_terminal();
            guard.commit().unwrap();
        }

        let orchestrator = Orchestrator::new(config, sessions, tools, provider, agent, transitions, events);
        let result = orchestrator
            .turn("s1".to_string(), "hello".to_string(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::SessionTerminal(_))));
    }
}
