//! Tool registry & invoker (§4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use cso_domain::config::Enrichment;
use cso_domain::error::{ToolErrorKind, ToolResult};
use cso_domain::tool::ToolDefinition;
use cso_domain::value;
use cso_sessions::SessionStore;

/// A registered tool's implementation (§6 "Tool handler interface").
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(
        &self,
        args: Value,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> ToolResult;
}

struct Registration {
    schema: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// The outcome of [`ToolRegistry::invoke`]: the tool's own result plus any
/// memory write its result mapping produced. `invoke` never touches the
/// session lock itself — callers already hold (or are about to hold) the
/// session's guard for the duration of the turn, so applying `memory_update`
/// is left to them (§4.3 "apply result mapping"; see `cso-orchestrator`'s
/// `run_turn` and `run_termination_sequence`).
pub struct ToolInvocation {
    pub result: ToolResult,
    pub memory_update: Option<Value>,
}

/// The process-wide tool catalog (§4.3).
///
/// `Register` is idempotent on name: registering the same name again simply
/// replaces the previous schema/handler. Enrichments and result mappings are
/// supplied by configuration at construction time and applied automatically
/// by `Invoke`.
pub struct ToolRegistry {
    registrations: RwLock<HashMap<String, Registration>>,
    enrichments: HashMap<String, Vec<Enrichment>>,
    mappings: HashMap<String, cso_domain::config::ToolMapping>,
}

impl ToolRegistry {
    pub fn new(
        enrichments: Vec<Enrichment>,
        mappings: HashMap<String, cso_domain::config::ToolMapping>,
    ) -> Self {
        let mut by_tool: HashMap<String, Vec<Enrichment>> = HashMap::new();
        for e in enrichments {
            by_tool.entry(e.tool_name.clone()).or_default().push(e);
        }
        Self {
            registrations: RwLock::new(HashMap::new()),
            enrichments: by_tool,
            mappings,
        }
    }

    pub fn register(&self, schema: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        let name = schema.name.clone();
        self.registrations
            .write()
            .insert(name, Registration { schema, handler });
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registrations.read().contains_key(name)
    }

    /// Return schemas for the requested names, skipping any not registered
    /// (the agent only ever asks for names allowed by the current goal).
    pub fn describe(&self, names: &[String]) -> Vec<ToolDefinition> {
        let reg = self.registrations.read();
        names
            .iter()
            .filter_map(|n| reg.get(n).map(|r| r.schema.clone()))
            .collect()
    }

    /// Validate `args` against a tool's declared required parameters.
    fn validate_args(schema: &ToolDefinition, args: &Value) -> std::result::Result<(), String> {
        let Some(required) = schema.parameters.get("required").and_then(|v| v.as_array()) else {
            return Ok(());
        };
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            let present = args.get(field_name).map(|v| !v.is_null()).unwrap_or(false);
            if !present {
                return Err(format!("missing required argument \"{field_name}\""));
            }
        }
        Ok(())
    }

    /// Invoke a tool by name (§4.3): validates arguments, applies
    /// declarative enrichment, calls the handler outside the session lock,
    /// then computes the tool's result mapping as a memory update for the
    /// caller to apply. Never acquires the session lock — the caller is
    /// typically already holding it for the duration of the turn.
    pub async fn invoke(
        &self,
        name: &str,
        mut args: Value,
        sessions: &SessionStore,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> ToolInvocation {
        let started = Instant::now();

        let registration = {
            let reg = self.registrations.read();
            match reg.get(name) {
                Some(r) => (r.schema.clone(), r.handler.clone()),
                None => {
                    return ToolInvocation {
                        result: ToolResult::err(ToolErrorKind::NotFound, format!("tool \"{name}\" not found")),
                        memory_update: None,
                    };
                }
            }
        };
        let (schema, handler) = registration;

        if let Err(msg) = Self::validate_args(&schema, &args) {
            return ToolInvocation {
                result: ToolResult::err(ToolErrorKind::ArgInvalid, msg),
                memory_update: None,
            };
        }

        if let Some(enrichments) = self.enrichments.get(name) {
            let paths: Vec<String> = enrichments
                .iter()
                .flat_map(|e| e.memory_paths.clone())
                .collect();
            if let Ok(projection) = sessions.read_paths(session_id, &paths) {
                for enrichment in enrichments {
                    let snapshot = format_snapshot(&enrichment.memory_paths, &projection);
                    if snapshot.is_empty() {
                        continue;
                    }
                    let existing = args
                        .get(&enrichment.arg_field)
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let combined = if existing.is_empty() {
                        snapshot
                    } else {
                        format!("{existing}\n\n{snapshot}")
                    };
                    if let Some(obj) = args.as_object_mut() {
                        obj.insert(enrichment.arg_field.clone(), Value::String(combined));
                    }
                }
            }
        }

        // The handler runs outside the session lock (§4.3 concurrency note).
        let result = handler.handle(args, session_id, cancel).await;

        let memory_update = if let ToolResult::Ok { payload } = &result {
            self.mappings.get(name).and_then(|mapping| {
                let mut memory_update = Value::Object(serde_json::Map::new());
                for entry in &mapping.entries {
                    if let Some(v) = value::get_path(payload, &entry.result_path) {
                        value::set_path(&mut memory_update, &entry.memory_path, v.clone());
                    }
                }
                match &memory_update {
                    Value::Object(m) if m.is_empty() => None,
                    _ => Some(memory_update),
                }
            })
        } else {
            None
        };

        let _elapsed = started.elapsed();
        ToolInvocation { result, memory_update }
    }
}

fn format_snapshot(paths: &[String], projection: &serde_json::Map<String, Value>) -> String {
    paths
        .iter()
        .filter_map(|p| projection.get(p).map(|v| format!("{p}: {v}")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cso_domain::config::{MappingEntry, ToolMapping};
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn handle(&self, args: Value, _sid: &str, _cancel: &CancellationToken) -> ToolResult {
            ToolResult::ok(args)
        }
    }

    fn schema(name: &str, required: &[&str]) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "test tool".into(),
            parameters: json!({"required": required}),
        }
    }

    #[tokio::test]
    async fn invoke_unknown_tool_returns_not_found() {
        let registry = ToolRegistry::new(vec![], HashMap::new());
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let invocation = registry
            .invoke("ghost", json!({}), &sessions, "s1", &CancellationToken::new())
            .await;
        assert!(matches!(invocation.result, ToolResult::Err { kind: ToolErrorKind::NotFound, .. }));
        assert!(invocation.memory_update.is_none());
    }

    #[tokio::test]
    async fn invoke_missing_required_arg_is_arg_invalid() {
        let registry = ToolRegistry::new(vec![], HashMap::new());
        registry.register(schema("echo", &["name"]), Arc::new(EchoHandler));
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let invocation = registry
            .invoke("echo", json!({}), &sessions, "s1", &CancellationToken::new())
            .await;
        assert!(matches!(invocation.result, ToolResult::Err { kind: ToolErrorKind::ArgInvalid, .. }));
    }

    #[tokio::test]
    async fn invoke_applies_result_mapping_into_memory() {
        let mut mappings = HashMap::new();
        mappings.insert(
            "echo".to_string(),
            ToolMapping {
                tool_name: "echo".into(),
                entries: vec![MappingEntry {
                    result_path: "phone".into(),
                    memory_path: "customer.phone".into(),
                }],
            },
        );
        let registry = ToolRegistry::new(vec![], mappings);
        registry.register(schema("echo", &[]), Arc::new(EchoHandler));

        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let invocation = registry
            .invoke(
                "echo",
                json!({"phone": "555"}),
                &sessions,
                "s1",
                &CancellationToken::new(),
            )
            .await;
        assert!(invocation.result.is_ok());
        assert_eq!(
            invocation.memory_update,
            Some(json!({"customer": {"phone": "555"}}))
        );
    }

    /// Regression test for the deadlock this registry used to cause: `invoke`
    /// must never try to acquire the session lock itself, since callers
    /// (the orchestrator, the goal agent mid-turn) routinely call it while
    /// already holding that session's guard for the whole turn.
    #[tokio::test]
    async fn invoke_does_not_acquire_session_lock() {
        let mut mappings = HashMap::new();
        mappings.insert(
            "echo".to_string(),
            ToolMapping {
                tool_name: "echo".into(),
                entries: vec![MappingEntry {
                    result_path: "phone".into(),
                    memory_path: "customer.phone".into(),
                }],
            },
        );
        let registry = ToolRegistry::new(vec![], mappings);
        registry.register(schema("echo", &[]), Arc::new(EchoHandler));

        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let guard = sessions.lock("s1").await.unwrap();

        let invocation = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            registry.invoke("echo", json!({"phone": "555"}), &sessions, "s1", &CancellationToken::new()),
        )
        .await
        .expect("invoke must not block on the already-held session lock");
        assert!(invocation.result.is_ok());
        drop(guard);
    }

    #[tokio::test]
    async fn invoke_missing_mapping_path_is_not_an_error() {
        let mut mappings = HashMap::new();
        mappings.insert(
            "echo".to_string(),
            ToolMapping {
                tool_name: "echo".into(),
                entries: vec![MappingEntry {
                    result_path: "nonexistent".into(),
                    memory_path: "customer.phone".into(),
                }],
            },
        );
        let registry = ToolRegistry::new(vec![], mappings);
        registry.register(schema("echo", &[]), Arc::new(EchoHandler));
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let invocation = registry
            .invoke("echo", json!({}), &sessions, "s1", &CancellationToken::new())
            .await;
        assert!(invocation.result.is_ok());
        assert!(invocation.memory_update.is_none());
    }
}
