//! State snapshot store.
//!
//! Captures cookies, both storage areas and a best-effort IndexedDB summary from a page,
//! persists them as `state-<session>.json`, restores them onto a fresh page, and packs
//! them into portable profile bundles.

pub mod diff;

pub use diff::{SetDiff, StateDiff, diff};

use crate::backend::PageHandle;
use chrono::Utc;
use reprise_common::error::EngineError;
use reprise_common::protocol::{BrowserState, CaptureDiagnostic, Session, StatePart, StorageMap};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOCAL_STORAGE_JS: &str = "(() => { const out = {}; for (let i = 0; i < localStorage.length; i++) { const k = localStorage.key(i); out[k] = localStorage.getItem(k); } return out; })()";

const SESSION_STORAGE_JS: &str = "(() => { const out = {}; for (let i = 0; i < sessionStorage.length; i++) { const k = sessionStorage.key(i); out[k] = sessionStorage.getItem(k); } return out; })()";

const INDEXED_DB_JS: &str = "(async () => { if (!window.indexedDB || !indexedDB.databases) { return null; } const dbs = await indexedDB.databases(); return dbs.map(d => ({ name: d.name, version: d.version })); })()";

/// Chromium reads this file from `<user-data-dir>/Default/` on startup.
pub const PREFERENCES_STUB: &str = "Default/Preferences";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    sessions_dir: PathBuf,
    profiles_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(sessions_dir: impl Into<PathBuf>, profiles_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            profiles_dir: profiles_dir.into(),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Directory holding screenshots and replay artifacts of one session.
    pub fn session_artifacts_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }

    pub fn state_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("state-{}.json", session_id))
    }

    /// Capture the page's state. Never fails: each sub-part that cannot be read is
    /// stored empty and annotated in `diagnostics`.
    pub async fn capture(&self, page: &mut dyn PageHandle, session_id: &str) -> BrowserState {
        let mut state = BrowserState::empty(session_id);
        state.captured_at = Utc::now();

        match page.get_cookies().await {
            Ok(cookies) => state.cookies = cookies,
            Err(e) => degrade(&mut state, StatePart::Cookies, e),
        }

        match read_storage(page, LOCAL_STORAGE_JS).await {
            Ok(map) => state.local_storage = map,
            Err(e) => degrade(&mut state, StatePart::LocalStorage, e),
        }

        match read_storage(page, SESSION_STORAGE_JS).await {
            Ok(map) => state.session_storage = map,
            Err(e) => degrade(&mut state, StatePart::SessionStorage, e),
        }

        match page.evaluate(INDEXED_DB_JS).await {
            Ok(serde_json::Value::Null) => {}
            Ok(summary) => state.indexed_db = Some(summary),
            Err(e) => degrade(&mut state, StatePart::IndexedDb, e),
        }

        match page.current_url().await {
            Ok(url) => state.page_url = url,
            Err(e) => degrade(&mut state, StatePart::Page, e),
        }
        match page.title().await {
            Ok(title) => state.page_title = title,
            Err(e) => degrade(&mut state, StatePart::Page, e),
        }

        let shot_path = self
            .session_artifacts_dir(session_id)
            .join("shots")
            .join("state.png");
        match page.screenshot().await {
            Ok(bytes) => match write_bytes(&shot_path, &bytes).await {
                Ok(()) => state.screenshot = Some(shot_path),
                Err(e) => degrade(&mut state, StatePart::Screenshot, e),
            },
            Err(e) => degrade(&mut state, StatePart::Screenshot, e),
        }

        debug!(
            "Captured state for {}: {} cookies, {} local, {} session keys",
            session_id,
            state.cookies.len(),
            state.local_storage.len(),
            state.session_storage.len()
        );
        state
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("session-{}.json", session_id))
    }

    pub async fn save_session(&self, session: &Session) -> Result<PathBuf, EngineError> {
        let path = self.session_path(&session.id);
        write_json(&path, session).await?;
        Ok(path)
    }

    pub async fn load_session(&self, path: &Path) -> Result<Session, EngineError> {
        read_json(path).await
    }

    pub async fn save(&self, state: &BrowserState, session_id: &str) -> Result<PathBuf, EngineError> {
        let path = self.state_path(session_id);
        write_json(&path, state).await?;
        info!("Saved state for session {} to {}", session_id, path.display());
        Ok(path)
    }

    pub async fn load(&self, path: &Path) -> Result<BrowserState, EngineError> {
        read_json(path).await
    }

    /// Restore a captured state onto a page: cookies, then storage, then the captured URL.
    ///
    /// Storage is scoped to an origin, so when there is any to restore the page is
    /// navigated to the captured URL first and reloaded after writing it.
    pub async fn apply(&self, page: &mut dyn PageHandle, state: &BrowserState) -> Result<(), EngineError> {
        if !state.cookies.is_empty() {
            page.set_cookies(&state.cookies).await?;
            debug!("Restored {} cookies", state.cookies.len());
        }

        let has_storage = !state.local_storage.is_empty() || !state.session_storage.is_empty();
        if has_storage {
            if state.page_url.is_empty() {
                return Err(EngineError::InvalidState(
                    "cannot restore storage without a captured page URL".into(),
                ));
            }
            page.navigate(&state.page_url).await?;
            write_storage(page, "localStorage", &state.local_storage).await?;
            write_storage(page, "sessionStorage", &state.session_storage).await?;
        }

        if !state.page_url.is_empty() {
            page.navigate(&state.page_url).await?;
        }
        Ok(())
    }

    /// Write a portable profile directory for a fresh browser profile.
    pub async fn build_profile_bundle(
        &self,
        state: &BrowserState,
        profile_id: &str,
    ) -> Result<PathBuf, EngineError> {
        if profile_id.is_empty()
            || profile_id.contains(['/', '\\'])
            || profile_id == "."
            || profile_id == ".."
        {
            return Err(EngineError::InvalidState(format!(
                "invalid profile id '{}'",
                profile_id
            )));
        }

        let dir = self.profiles_dir.join(profile_id);
        write_json(&dir.join("state.json"), state).await?;
        write_json(&dir.join("cookies.json"), &state.cookies).await?;

        let preferences = serde_json::json!({
            "profile": {
                "name": profile_id,
                "exit_type": "Normal",
                "exited_cleanly": true,
            },
            "reprise": {
                "session_id": state.session_id,
                "start_url": state.page_url,
            },
        });
        write_json(&dir.join(PREFERENCES_STUB), &preferences).await?;

        info!("Built profile bundle {} at {}", profile_id, dir.display());
        Ok(dir)
    }

    pub async fn load_profile_bundle(&self, dir: &Path) -> Result<BrowserState, EngineError> {
        read_json(&dir.join("state.json")).await
    }
}

fn degrade(state: &mut BrowserState, part: StatePart, err: impl std::fmt::Display) {
    let err = EngineError::CaptureDegraded {
        part,
        reason: err.to_string(),
    };
    warn!("{}", err);
    state.diagnostics.push(CaptureDiagnostic {
        part,
        message: err.to_string(),
    });
}

async fn read_storage(page: &mut dyn PageHandle, script: &str) -> Result<StorageMap, EngineError> {
    let value = page.evaluate(script).await?;
    if value.is_null() {
        return Ok(StorageMap::new());
    }
    serde_json::from_value(value)
        .map_err(|e| EngineError::Execution(format!("unexpected storage shape: {}", e)))
}

async fn write_storage(
    page: &mut dyn PageHandle,
    area: &str,
    entries: &StorageMap,
) -> Result<(), EngineError> {
    if entries.is_empty() {
        return Ok(());
    }
    let json = serde_json::to_string(entries)
        .map_err(|e| EngineError::Execution(e.to_string()))?;
    let script = format!(
        "(() => {{ const entries = {}; for (const [k, v] of Object.entries(entries)) {{ {}.setItem(k, v); }} return Object.keys(entries).length; }})()",
        json, area
    );
    page.evaluate(&script).await?;
    debug!("Restored {} {} entries", entries.len(), area);
    Ok(())
}

pub(crate) async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::persistence(parent, e))?;
    }
    // Readers never observe a partially written document.
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| EngineError::persistence(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| EngineError::persistence(path, e))
}

pub(crate) async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| EngineError::persistence(path, e))?;
    write_bytes(path, &bytes).await
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| EngineError::persistence(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::persistence(path, e))
}
