//! Session lifecycle
//!
//! Exactly one session is active at a time. Switching persists the active
//! session's mutable state before loading the target; deleting the active
//! session promotes the most recently modified survivor or creates a fresh
//! one. Content blobs and the listing record are saved separately: content
//! only when it changes, the listing on every structural action.

use crate::error::{QuillError, QuillResult};
use crate::session::storage::{session_key, KeyValueStore, METADATA_KEY};
use crate::session::types::{Session, SessionMeta};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Persisted listing record
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataRecord {
    active: Option<Uuid>,
    sessions: Vec<SessionMeta>,
}

struct ManagerState {
    active: Session,
    metas: Vec<SessionMeta>,
}

impl ManagerState {
    fn record(&self) -> MetadataRecord {
        MetadataRecord {
            active: Some(self.active.id),
            sessions: self.metas.clone(),
        }
    }
}

async fn load_blob(storage: &dyn KeyValueStore, id: &Uuid) -> QuillResult<Option<Session>> {
    let Some(json) = storage.get(&session_key(id)).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<Session>(&json) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            warn!(session = %id, error = %e, "content blob unreadable");
            Ok(None)
        }
    }
}

pub struct SessionManager {
    storage: Arc<dyn KeyValueStore>,
    state: RwLock<ManagerState>,
}

impl SessionManager {
    /// Restore the workspace from storage, or start a fresh session on
    /// first run. Listing records whose content blob is missing or
    /// unreadable are dropped.
    pub async fn load(storage: Arc<dyn KeyValueStore>) -> QuillResult<Self> {
        let record = match storage.get(METADATA_KEY).await? {
            Some(json) => serde_json::from_str::<MetadataRecord>(&json).unwrap_or_else(|e| {
                warn!(error = %e, "listing record unreadable; starting fresh");
                MetadataRecord::default()
            }),
            None => MetadataRecord::default(),
        };

        let mut metas = record.sessions;
        // Recorded active first, then the rest newest-first
        let mut ordered: Vec<Uuid> = {
            let mut sorted = metas.clone();
            sorted.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
            sorted.iter().map(|m| m.id).collect()
        };
        if let Some(id) = record.active {
            ordered.retain(|candidate| *candidate != id);
            ordered.insert(0, id);
        }

        let mut active: Option<Session> = None;
        for id in ordered {
            if !metas.iter().any(|m| m.id == id) {
                continue;
            }
            match load_blob(storage.as_ref(), &id).await? {
                Some(mut session) => {
                    // The listing name wins; see rename_session
                    if let Some(meta) = metas.iter().find(|m| m.id == id) {
                        session.name = meta.name.clone();
                    }
                    active = Some(session);
                    break;
                }
                None => {
                    warn!(session = %id, "content blob missing; dropping session record");
                    metas.retain(|m| m.id != id);
                }
            }
        }

        let created = active.is_none();
        let active = active.unwrap_or_else(|| {
            let session = Session::new();
            metas.push(SessionMeta::from(&session));
            session
        });
        info!(session = %active.id, created, "session workspace loaded");

        let manager = Self {
            storage,
            state: RwLock::new(ManagerState { active, metas }),
        };
        if created {
            manager.persist_active().await?;
        } else {
            manager.save_listing().await?;
        }
        Ok(manager)
    }

    pub fn active_id(&self) -> Uuid {
        self.state.read().active.id
    }

    pub fn active_snapshot(&self) -> Session {
        self.state.read().active.clone()
    }

    /// Run a closure against the active session under the state lock.
    /// The closure must not block.
    pub fn with_active<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.state.read().active)
    }

    /// Mutate the active session; its listing row is kept in step
    pub fn with_active_mut<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut state = self.state.write();
        let result = f(&mut state.active);
        let (id, name, stamp) = (
            state.active.id,
            state.active.name.clone(),
            state.active.last_modified,
        );
        if let Some(meta) = state.metas.iter_mut().find(|m| m.id == id) {
            meta.name = name;
            meta.last_modified = stamp;
        }
        result
    }

    /// Listing rows, most recently modified first
    pub fn list(&self) -> Vec<SessionMeta> {
        let mut metas = self.state.read().metas.clone();
        metas.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        metas
    }

    /// Save the active session's content blob and the listing record
    pub async fn persist_active(&self) -> QuillResult<()> {
        let (session, record) = {
            let state = self.state.read();
            (state.active.clone(), state.record())
        };
        self.storage
            .set(&session_key(&session.id), serde_json::to_string(&session)?)
            .await?;
        self.storage
            .set(METADATA_KEY, serde_json::to_string(&record)?)
            .await?;
        debug!(session = %session.id, "persisted active session");
        Ok(())
    }

    async fn save_listing(&self) -> QuillResult<()> {
        let record = self.state.read().record();
        self.storage
            .set(METADATA_KEY, serde_json::to_string(&record)?)
            .await
    }

    /// Persist the current session and start a fresh one as active
    pub async fn create_session(&self) -> QuillResult<Uuid> {
        self.persist_active().await?;
        let session = Session::new();
        let id = session.id;
        {
            let mut state = self.state.write();
            state.metas.push(SessionMeta::from(&session));
            state.active = session;
        }
        self.persist_active().await?;
        info!(session = %id, "created session");
        Ok(id)
    }

    /// Make another session active. The current session's mutable state is
    /// persisted first. Returns `false` without switching when the target's
    /// content is missing or unreadable; the stale record is dropped.
    pub async fn switch_session(&self, id: Uuid) -> QuillResult<bool> {
        if self.active_id() == id {
            return Ok(true);
        }
        if !self.state.read().metas.iter().any(|m| m.id == id) {
            return Err(QuillError::not_found(format!("session {id} does not exist")));
        }
        self.persist_active().await?;
        match load_blob(self.storage.as_ref(), &id).await? {
            Some(mut session) => {
                {
                    let mut state = self.state.write();
                    if let Some(meta) = state.metas.iter().find(|m| m.id == id) {
                        session.name = meta.name.clone();
                    }
                    state.active = session;
                }
                self.save_listing().await?;
                debug!(session = %id, "switched session");
                Ok(true)
            }
            None => {
                warn!(session = %id, "content blob missing; dropping session record");
                self.state.write().metas.retain(|m| m.id != id);
                self.save_listing().await?;
                Ok(false)
            }
        }
    }

    /// Remove a session. Deleting the active session promotes the most
    /// recently modified survivor, or creates a fresh session when none
    /// remain.
    pub async fn delete_session(&self, id: Uuid) -> QuillResult<()> {
        let was_active = self.active_id() == id;
        self.state.write().metas.retain(|m| m.id != id);
        self.storage.del(&session_key(&id)).await?;

        if was_active {
            loop {
                let next = {
                    let state = self.state.read();
                    state
                        .metas
                        .iter()
                        .max_by_key(|m| m.last_modified)
                        .map(|m| (m.id, m.name.clone()))
                };
                match next {
                    Some((next_id, name)) => {
                        match load_blob(self.storage.as_ref(), &next_id).await? {
                            Some(mut session) => {
                                session.name = name;
                                self.state.write().active = session;
                                break;
                            }
                            None => {
                                warn!(session = %next_id, "content blob missing; dropping session record");
                                self.state.write().metas.retain(|m| m.id != next_id);
                            }
                        }
                    }
                    None => {
                        let session = Session::new();
                        {
                            let mut state = self.state.write();
                            state.metas.push(SessionMeta::from(&session));
                            state.active = session;
                        }
                        self.persist_active().await?;
                        break;
                    }
                }
            }
        }
        self.save_listing().await?;
        info!(session = %id, "deleted session");
        Ok(())
    }

    /// Rename a session. Touches only the listing record; the content blob
    /// keeps its old name until the next content save, and the listing name
    /// wins on load.
    pub async fn rename_session(&self, id: Uuid, name: impl Into<String>) -> QuillResult<()> {
        let name = name.into();
        {
            let mut state = self.state.write();
            let stamp = Utc::now();
            let Some(meta) = state.metas.iter_mut().find(|m| m.id == id) else {
                return Err(QuillError::not_found(format!("session {id} does not exist")));
            };
            meta.name = name.clone();
            meta.last_modified = stamp;
            if state.active.id == id {
                state.active.name = name;
                state.active.last_modified = stamp;
            }
        }
        self.save_listing().await
    }
}
