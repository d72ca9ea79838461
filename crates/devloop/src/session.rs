//! Durable session store
//!
//! One JSON document per session under the store directory. Every mutation
//! holds a per-session lock, rewrites the document to a temporary file and
//! renames it into place, so readers always see a complete session.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use llm_core::{ChatMessage, Role, ToolCall};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Unique session identifier
pub type SessionId = String;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("entry {seq} not found in session {session}")]
    EntryNotFound { session: SessionId, seq: u64 },

    #[error("invalid session id '{0}'")]
    InvalidId(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt session file {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One persisted conversation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Position in the session; unique and increasing in append order
    pub seq: u64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    fn from_message(seq: u64, message: ChatMessage) -> Self {
        Self {
            seq,
            role: message.role,
            content: message.content,
            tool_call_id: message.tool_call_id,
            name: message.name,
            tool_calls: message.tool_calls,
            created_at: Utc::now(),
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            name: self.name.clone(),
            tool_calls: self.tool_calls.clone(),
            tool_call_id: self.tool_call_id.clone(),
        }
    }
}

/// Last directory contents read for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Directory the snapshot was taken from, relative to the workspace root
    pub path: String,
    pub files: BTreeMap<String, String>,
}

/// A saved session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The objective the session was created for
    pub objective: String,
    pub workspace_root: PathBuf,
    /// Sequence number the next appended entry receives
    next_seq: u64,
    pub entries: Vec<Entry>,
    /// Named working-memory modules
    #[serde(default)]
    pub memory: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_snapshot: Option<WorkspaceSnapshot>,
}

impl Session {
    fn new(objective: String, workspace_root: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            objective,
            workspace_root,
            next_seq: 1,
            entries: Vec::new(),
            memory: BTreeMap::new(),
            workspace_snapshot: None,
        }
    }

    /// Conversation in model form
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(Entry::to_message).collect()
    }

    fn entry_index(&self, seq: u64) -> Result<usize, SessionError> {
        self.entries
            .binary_search_by_key(&seq, |e| e.seq)
            .map_err(|_| SessionError::EntryNotFound {
                session: self.id.clone(),
                seq,
            })
    }
}

/// Lightweight summary of a session for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub objective: String,
    pub entry_count: usize,
}

impl SessionSummary {
    /// Format as a short one-line description
    pub fn short_description(&self) -> String {
        let objective: String = self.objective.chars().take(50).collect();
        let ellipsis = if self.objective.chars().count() > 50 { "..." } else { "" };
        format!(
            "{}  {:>4} entries  {}  {}{}",
            self.id,
            self.entry_count,
            format_age(&self.updated_at),
            objective,
            ellipsis
        )
    }
}

/// Session store for saving and loading sessions
pub struct SessionStore {
    base_dir: PathBuf,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionStore {
    /// Open (and create if needed) a store rooted at `base_dir`
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|source| SessionError::Io {
            path: base_dir.clone(),
            source,
        })?;

        Ok(Self {
            base_dir,
            locks: DashMap::new(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create a new, empty session
    pub fn create(
        &self,
        objective: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
    ) -> Result<Session, SessionError> {
        let session = Session::new(objective.into(), workspace_root.into());
        let lock = self.lock_for(&session.id);
        let _guard = lock.lock();
        self.save(&session)?;
        info!(session_id = %session.id, "Created session");
        Ok(session)
    }

    /// Load a whole session
    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        let path = self.session_path(id)?;
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()))
            }
            Err(source) => return Err(SessionError::Io { path, source }),
        };
        serde_json::from_str(&json).map_err(|source| SessionError::Corrupt { path, source })
    }

    /// Append one entry; returns it with its assigned sequence number
    pub fn append(&self, id: &str, message: ChatMessage) -> Result<Entry, SessionError> {
        self.mutate(id, |session| {
            let entry = Entry::from_message(session.next_seq, message);
            session.next_seq += 1;
            session.entries.push(entry.clone());
            debug!(session_id = %session.id, seq = entry.seq, role = %entry.role, "Appended entry");
            Ok(entry)
        })
    }

    /// Entries in append order
    pub fn list(&self, id: &str) -> Result<Vec<Entry>, SessionError> {
        Ok(self.get(id)?.entries)
    }

    /// Replace an entry's payload in place; its sequence number is kept
    pub fn replace_entry(
        &self,
        id: &str,
        seq: u64,
        message: ChatMessage,
    ) -> Result<Entry, SessionError> {
        self.mutate(id, |session| {
            let index = session.entry_index(seq)?;
            let replacement = Entry::from_message(seq, message);
            session.entries[index] = replacement.clone();
            Ok(replacement)
        })
    }

    /// Remove one entry; surviving entries keep their order and numbers
    pub fn delete_entry(&self, id: &str, seq: u64) -> Result<Entry, SessionError> {
        self.mutate(id, |session| {
            let index = session.entry_index(seq)?;
            Ok(session.entries.remove(index))
        })
    }

    /// Delete a session and its file
    pub fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        let path = self.session_path(id)?;
        let lock = self.lock_for(id);
        let _guard = lock.lock();

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()))
            }
            Err(source) => return Err(SessionError::Io { path, source }),
        }
        drop(_guard);
        self.locks.remove(id);
        info!(session_id = %id, "Deleted session");
        Ok(())
    }

    /// All sessions, most recently updated first
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let entries = fs::read_dir(&self.base_dir).map_err(|source| SessionError::Io {
            path: self.base_dir.clone(),
            source,
        })?;

        let mut sessions = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get(id) {
                Ok(session) => sessions.push(SessionSummary {
                    entry_count: session.entries.len(),
                    id: session.id,
                    created_at: session.created_at,
                    updated_at: session.updated_at,
                    objective: session.objective,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to load session summary"),
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Working-memory modules of a session
    pub fn memory(&self, id: &str) -> Result<BTreeMap<String, Value>, SessionError> {
        Ok(self.get(id)?.memory)
    }

    /// Read-modify-write the working memory under the session lock
    pub fn update_memory<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> R,
    ) -> Result<R, SessionError> {
        self.mutate(id, |session| Ok(f(&mut session.memory)))
    }

    /// Store a directory snapshot as the latest known workspace contents
    pub fn cache_workspace_snapshot(
        &self,
        id: &str,
        path: impl Into<String>,
        files: BTreeMap<String, String>,
    ) -> Result<(), SessionError> {
        let path = path.into();
        self.mutate(id, move |session| {
            session.workspace_snapshot = Some(WorkspaceSnapshot {
                taken_at: Utc::now(),
                path,
                files,
            });
            Ok(())
        })
    }

    pub fn latest_workspace_snapshot(
        &self,
        id: &str,
    ) -> Result<Option<WorkspaceSnapshot>, SessionError> {
        Ok(self.get(id)?.workspace_snapshot)
    }

    fn mutate<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();

        let mut session = self.get(id)?;
        let result = f(&mut session)?;
        session.updated_at = Utc::now();
        self.save(&session)?;
        Ok(result)
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        let path = self.session_path(&session.id)?;
        let tmp = self
            .base_dir
            .join(format!(".{}.{}.tmp", session.id, uuid::Uuid::new_v4().simple()));

        let json = serde_json::to_string_pretty(session).map_err(|source| SessionError::Corrupt {
            path: path.clone(),
            source,
        })?;

        fs::write(&tmp, json).map_err(|source| SessionError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            SessionError::Io {
                path: path.clone(),
                source,
            }
        })
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn session_path(&self, id: &str) -> Result<PathBuf, SessionError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SessionError::InvalidId(id.to_string()));
        }
        Ok(self.base_dir.join(format!("{}.json", id)))
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

/// Default sessions directory under the platform data dir
pub fn default_sessions_dir() -> anyhow::Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;

    Ok(data_dir.join("devloop").join("sessions"))
}

/// Format a timestamp as relative age
fn format_age(dt: &DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(*dt);

    if duration.num_minutes() < 1 {
        "just now".to_string()
    } else if duration.num_hours() < 1 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_days() < 1 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}
