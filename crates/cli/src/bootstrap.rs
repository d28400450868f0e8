//! Boots the full dependency graph from a loaded [`Config`]: session store,
//! tool registry (with the demonstration handlers registered), provider
//! registry, the goal agent, the transition engine, and the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cso_agent::GoalAgent;
use cso_contextpack::PromptBuilder;
use cso_domain::config::Config;
use cso_events::EventSink;
use cso_orchestrator::Orchestrator;
use cso_providers::registry::ProviderRegistry;
use cso_providers::LlmProvider;
use cso_semantic::SemanticEvaluator;
use cso_sessions::SessionStore;
use cso_tools::handlers::{
    calendar_book_schema, customer_create_schema, customer_lookup_schema, hangup_schema,
    task_create_schema, CalendarBook, CustomerCreate, CustomerLookup, Hangup, RecordBook, TaskCreate,
};
use cso_tools::ToolRegistry;
use cso_transitions::TransitionEngine;

/// A prompt section budget comfortably above any single goal's tactic/
/// history/memory projection, and a total cap leaving headroom for the
/// model's own context window.
const PROMPT_MAX_PER_SECTION: usize = 4_000;
const PROMPT_TOTAL_MAX: usize = 16_000;

pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub events: EventSink,
}

/// Tool names the demonstration handlers register under; also the
/// `known_tools` set passed to [`Config::load`].
pub fn demo_tool_names() -> std::collections::HashSet<String> {
    [
        "customer.lookup",
        "customer.create",
        "task.create",
        "calendar.book",
        "call_hangup",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn register_demo_tools(registry: &ToolRegistry) {
    let book = RecordBook::new();
    registry.register(customer_lookup_schema(), Arc::new(CustomerLookup(book.clone())));
    registry.register(customer_create_schema(), Arc::new(CustomerCreate(book.clone())));
    registry.register(task_create_schema(), Arc::new(TaskCreate(book.clone())));
    registry.register(calendar_book_schema(), Arc::new(CalendarBook(book)));
    registry.register(hangup_schema(), Arc::new(Hangup));
}

/// Resolve the provider to drive this process's turns from the configured
/// providers, preferring the model spec named by the initial goal's agent
/// profile and falling back to the first provider registered.
///
/// Per-turn provider routing by profile is not implemented (Open Question,
/// see DESIGN.md): one process runs against a single resolved provider.
fn resolve_provider(config: &Config, registry: &ProviderRegistry) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let initial_goal = config
        .goals
        .get(&config.initial_goal)
        .context("initial_goal missing from config (should have failed validation)")?;
    let profile = config
        .profiles
        .get(&initial_goal.profile)
        .context("initial goal's profile missing from config")?;

    if let Some(spec) = &profile.model {
        if let Some((provider, _model)) = registry.resolve_spec(spec) {
            return Ok(provider);
        }
        tracing::warn!(spec, "initial profile's model spec did not resolve to a registered provider, falling back");
    }

    registry
        .iter()
        .next()
        .map(|(_, p)| p.clone())
        .context("no LLM provider registered; configure at least one under [llm.providers] or set startup_policy")
}

pub async fn build_app_state(config: Arc<Config>, state_dir: PathBuf) -> anyhow::Result<AppState> {
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating state directory {}", state_dir.display()))?;

    let sessions = Arc::new(SessionStore::new(&state_dir).context("opening session store")?);

    let tools = Arc::new(ToolRegistry::new(
        config.enrichments.clone(),
        config.tool_mappings.clone(),
    ));
    register_demo_tools(&tools);

    let provider_registry = ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?;
    let provider = resolve_provider(&config, &provider_registry)?;

    let prompt_builder = PromptBuilder::new(PROMPT_MAX_PER_SECTION, PROMPT_TOTAL_MAX);
    let agent = Arc::new(GoalAgent::new(tools.clone(), sessions.clone(), prompt_builder));

    let semantic = SemanticEvaluator::new(provider.clone(), None);
    let transitions = Arc::new(TransitionEngine::new(semantic, config.defaults.semantic_confidence_threshold));

    let events = EventSink::spawn(config.defaults.event_queue_capacity, Some(state_dir.join("events.jsonl")));

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        sessions.clone(),
        tools,
        provider,
        agent,
        transitions,
        events.clone(),
    ));

    Ok(AppState {
        config,
        sessions,
        orchestrator,
        events,
    })
}
