//! Session memory store (C2).
//!
//! One JSON document per session under `<state_dir>/sessions/<id>.json`.
//! Writes are atomic with respect to crashes: a temp file is written in the
//! same directory and renamed into place (P10), so a reader never observes
//! a partially-written document. `SessionGuard` provides the `WithLock`
//! contract (§4.2): acquire exclusive access, mutate in memory, `commit()`
//! to persist — if persistence fails twice, the in-memory cache is left
//! untouched and the error surfaces to the caller.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::OwnedSemaphorePermit;

use cso_domain::error::{Error, Result};
use cso_domain::session::{ExchangeRole, Session};
use cso_domain::value;

use crate::lock::SessionLockMap;

pub struct SessionStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
    locks: SessionLockMap,
}

impl SessionStore {
    /// Open (creating if absent) the session store rooted at
    /// `<state_dir>/sessions/`.
    pub fn new(state_dir: &Path) -> Result<Self> {
        let dir = state_dir.join("sessions");
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            cache: RwLock::new(HashMap::new()),
            locks: SessionLockMap::new(),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn load_from_disk(&self, session_id: &str) -> Result<Session> {
        let path = self.path_for(session_id);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::SessionIOFailure(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| Error::SessionIOFailure(e.to_string()))
        } else {
            Ok(Session::new(session_id))
        }
    }

    /// Return a defensive-copy snapshot of a session, creating an empty one
    /// on first access (§4.2 `Get`).
    pub fn get(&self, session_id: &str) -> Result<Session> {
        if let Some(s) = self.cache.read().get(session_id) {
            return Ok(s.clone());
        }
        let session = self.load_from_disk(session_id)?;
        self.cache
            .write()
            .insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    /// Project a set of dotted/bracketed paths out of a session's memory
    /// without taking the session lock (§4.2 `ReadPaths`).
    pub fn read_paths(&self, session_id: &str, paths: &[String]) -> Result<Map<String, Value>> {
        let session = self.get(session_id)?;
        let root = session.memory.as_value();
        let mut out = Map::new();
        for p in paths {
            if let Some(v) = value::get_path(&root, p) {
                out.insert(p.clone(), v.clone());
            }
        }
        Ok(out)
    }

    /// Cheap terminality check that does not take the session's run lock
    /// (§4.6: a terminated session's subsequent `Turn` calls fail fast).
    pub fn is_terminal(&self, session_id: &str) -> Result<bool> {
        Ok(self.get(session_id)?.terminal)
    }

    /// Acquire exclusive access to a session for the duration of one turn
    /// (§4.2 `WithLock`). Waits for any in-flight turn on the same session
    /// to finish; turns on distinct sessions never block each other.
    pub async fn lock(&self, session_id: &str) -> Result<SessionGuard<'_>> {
        let permit = self.locks.acquire(session_id).await;
        let session = self.get(session_id)?;
        Ok(SessionGuard {
            store: self,
            session_id: session_id.to_string(),
            session,
            _permit: permit,
        })
    }

    /// Write `session` atomically, retrying once on failure (§4.2).
    fn persist(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| Error::SessionIOFailure(e.to_string()))?;
        match self.write_once(&session.session_id, &json) {
            Ok(()) => Ok(()),
            Err(_) => self.write_once(&session.session_id, &json),
        }
    }

    fn write_once(&self, session_id: &str, json: &str) -> Result<()> {
        let path = self.path_for(session_id);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| Error::SessionIOFailure(e.to_string()))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| Error::SessionIOFailure(e.to_string()))?;
        tmp.flush().map_err(|e| Error::SessionIOFailure(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| Error::SessionIOFailure(e.to_string()))?;
        Ok(())
    }
}

/// Exclusive, in-memory handle to one session acquired via
/// [`SessionStore::lock`]. Mutations are visible only to the holder until
/// [`SessionGuard::commit`] persists them.
pub struct SessionGuard<'a> {
    store: &'a SessionStore,
    session_id: String,
    session: Session,
    _permit: OwnedSemaphorePermit,
}

impl SessionGuard<'_> {
    /// The store this guard was acquired from — for passing to collaborators
    /// (e.g. the tool registry's enrichment reads) that need read access to
    /// the session store without re-acquiring the lock this guard holds.
    pub fn store(&self) -> &SessionStore {
        self.store
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Apply a partial memory update via deep-merge (§4.2 `Update`, P1/P2).
    pub fn update_memory(&mut self, update: &Value) {
        self.session.memory.apply_update(update);
    }

    pub fn append_history(&mut self, role: ExchangeRole, text: impl Into<String>) {
        self.session.append_history(role, text, Utc::now());
    }

    pub fn set_goal(&mut self, goal_id: impl Into<String>) {
        self.session.set_goal(goal_id);
    }

    pub fn mark_terminal(&mut self) {
        self.session.terminal = true;
    }

    /// Persist the session. On success the store's read cache is updated;
    /// on failure (after one retry) the cache is left exactly as it was
    /// before this guard was acquired, and the error surfaces (§4.2).
    pub fn commit(self) -> Result<Session> {
        self.store.persist(&self.session)?;
        self.store
            .cache
            .write()
            .insert(self.session_id.clone(), self.session.clone());
        Ok(self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cso_domain::session::ExchangeRole;
    use serde_json::json;

    #[tokio::test]
    async fn get_creates_empty_session_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let session = store.get("s1").unwrap();
        assert_eq!(session.session_id, "s1");
        assert!(session.current_goal.is_none());
    }

    #[tokio::test]
    async fn lock_update_commit_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        let mut guard = store.lock("s1").await.unwrap();
        guard.update_memory(&json!({"customer": {"name": "Ada"}}));
        guard.append_history(ExchangeRole::User, "hello");
        guard.set_goal("greet");
        guard.commit().unwrap();

        drop(store); // force a fresh read from disk
        let store = SessionStore::new(dir.path()).unwrap();
        let session = store.get("s1").unwrap();
        assert_eq!(session.memory.customer["name"], json!("Ada"));
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.current_goal.as_deref(), Some("greet"));
    }

    #[tokio::test]
    async fn read_paths_projects_named_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let mut guard = store.lock("s1").await.unwrap();
        guard.update_memory(&json!({"customer": {"name": "Ada", "phone": "555"}}));
        guard.commit().unwrap();

        let projected = store
            .read_paths("s1", &["customer.name".to_string()])
            .unwrap();
        assert_eq!(projected.get("customer.name"), Some(&json!("Ada")));
        assert!(projected.get("customer.phone").is_none());
    }

    #[tokio::test]
    async fn sessions_on_distinct_ids_do_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(SessionStore::new(dir.path()).unwrap());

        let g1 = store.lock("s1").await.unwrap();
        // Locking a different session must not wait on s1's guard.
        let g2 = tokio::time::timeout(std::time::Duration::from_millis(200), store.lock("s2"))
            .await
            .expect("locking s2 should not block on s1's held lock")
            .unwrap();
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn history_append_only_length_non_decreasing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        for i in 0..3 {
            let mut guard = store.lock("s1").await.unwrap();
            let before = guard.session().history.len();
            guard.append_history(ExchangeRole::User, format!("turn {i}"));
            assert!(guard.session().history.len() >= before);
            guard.commit().unwrap();
        }
        assert_eq!(store.get("s1").unwrap().history.len(), 3);
    }
}
