//! A tempdir-backed session store for tests that don't care about the
//! directory's lifetime beyond the test itself.

use cso_sessions::SessionStore;
use tempfile::TempDir;

/// Returns a fresh `SessionStore` rooted in a tempdir. The `TempDir` must
/// be kept alive for as long as the store is in use; it is removed from
/// disk when dropped.
pub fn temp_session_store() -> (TempDir, SessionStore) {
    let dir = tempfile::tempdir().expect("create tempdir for session store");
    let store = SessionStore::new(dir.path()).expect("open session store");
    (dir, store)
}
