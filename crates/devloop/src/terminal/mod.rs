//! Persistent terminal sessions
//!
//! Each session owns one shell process and an append-only command history.
//! Commands within a session are serialized by the session's mutex; separate
//! sessions run independently.

mod shell;

pub use shell::{CommandStatus, DockerShell, LocalShell, RunOutput, ShellLauncher, ShellProcess};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("terminal session not found: {0}")]
    UnknownSession(String),

    #[error("terminal session {0} is dead; open a new session")]
    SessionDead(String),

    #[error("terminal backend unavailable: {0:#}")]
    Unavailable(anyhow::Error),
}

/// One executed command
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub command: String,
    pub output: String,
    pub exit_code: Option<i32>,
    pub status: CommandStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Listing entry for a terminal session
#[derive(Debug, Clone, Serialize)]
pub struct TerminalInfo {
    pub session_id: String,
    pub alive: bool,
    pub commands: usize,
}

struct TerminalSession {
    id: String,
    shell: Option<ShellProcess>,
    dead: bool,
    history: Vec<CommandRecord>,
}

impl TerminalSession {
    fn new(id: String) -> Self {
        Self {
            id,
            shell: None,
            dead: false,
            history: Vec::new(),
        }
    }
}

/// Owns all terminal sessions of a run
pub struct TerminalManager {
    launcher: Arc<dyn ShellLauncher>,
    sessions: DashMap<String, Arc<Mutex<TerminalSession>>>,
    next_id: AtomicUsize,
    timeout: Duration,
}

impl TerminalManager {
    pub fn new(launcher: Arc<dyn ShellLauncher>, timeout: Duration) -> Self {
        Self {
            launcher,
            sessions: DashMap::new(),
            next_id: AtomicUsize::new(0),
            timeout,
        }
    }

    /// Open a new session; the shell starts on its first command
    pub fn open_session(&self) -> String {
        let id = format!("session_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions
            .insert(id.clone(), Arc::new(Mutex::new(TerminalSession::new(id.clone()))));
        info!(session = %id, backend = %self.launcher.describe(), "Opened terminal session");
        id
    }

    /// Make sure at least `count` sessions exist
    pub fn ensure_sessions(&self, count: usize) -> Vec<String> {
        while self.sessions.len() < count {
            self.open_session();
        }
        self.session_ids()
    }

    /// Close a session, killing its shell; returns its history
    pub async fn close_session(&self, id: &str) -> Result<Vec<CommandRecord>, TerminalError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| TerminalError::UnknownSession(id.to_string()))?;

        let mut session = session.lock().await;
        if let Some(mut shell) = session.shell.take() {
            shell.kill().await;
        }
        info!(session = %id, commands = session.history.len(), "Closed terminal session");
        Ok(std::mem::take(&mut session.history))
    }

    /// Run a command in a session, or in a throwaway shell when no session
    /// is given
    #[instrument(skip(self, cancel), fields(session = session_id.unwrap_or("one-shot")))]
    pub async fn send(
        &self,
        session_id: Option<&str>,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandRecord, TerminalError> {
        let Some(id) = session_id else {
            return self.run_one_shot(command, cancel).await;
        };

        let session = self
            .sessions
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TerminalError::UnknownSession(id.to_string()))?;

        let mut session = session.lock().await;
        if session.dead {
            return Err(TerminalError::SessionDead(session.id.clone()));
        }
        if session.shell.is_none() {
            let shell = ShellProcess::spawn(self.launcher.as_ref())
                .await
                .map_err(TerminalError::Unavailable)?;
            session.shell = Some(shell);
        }

        let Some(shell) = session.shell.as_mut() else {
            return Err(TerminalError::SessionDead(session.id.clone()));
        };
        let started_at = Utc::now();
        let record = match run_recorded(shell, command, self.timeout, cancel).await {
            Ok(record) => record,
            Err(e) => {
                warn!(session = %session.id, error = %e, "Lost terminal session");
                session.dead = true;
                session.shell = None;
                session.history.push(CommandRecord {
                    command: command.to_string(),
                    output: e.to_string(),
                    exit_code: None,
                    status: CommandStatus::ShellExited,
                    started_at,
                    duration_ms: 0,
                });
                return Err(e);
            }
        };

        if record.status != CommandStatus::Completed {
            warn!(session = %session.id, status = ?record.status, "Terminal session is no longer usable");
            session.dead = true;
            session.shell = None;
        }
        session.history.push(record.clone());
        Ok(record)
    }

    /// Most recent `limit` records of a session, oldest first
    pub async fn history(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CommandRecord>, TerminalError> {
        let session = self
            .sessions
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TerminalError::UnknownSession(id.to_string()))?;

        let session = session.lock().await;
        let skip = limit.map_or(0, |l| session.history.len().saturating_sub(l));
        Ok(session.history[skip..].to_vec())
    }

    /// Snapshot of all sessions, ordered by id
    pub async fn list(&self) -> Vec<TerminalInfo> {
        let handles: BTreeMap<String, Arc<Mutex<TerminalSession>>> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut infos = Vec::with_capacity(handles.len());
        for (id, session) in handles {
            let session = session.lock().await;
            infos.push(TerminalInfo {
                session_id: id,
                alive: !session.dead,
                commands: session.history.len(),
            });
        }
        infos
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort_by_key(|id| session_number(id));
        ids
    }

    /// Kill every shell
    pub async fn shutdown(&self) {
        for id in self.session_ids() {
            let _ = self.close_session(&id).await;
        }
    }

    async fn run_one_shot(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandRecord, TerminalError> {
        let mut shell = ShellProcess::spawn(self.launcher.as_ref())
            .await
            .map_err(TerminalError::Unavailable)?;
        let record = run_recorded(&mut shell, command, self.timeout, cancel).await;
        shell.kill().await;
        record
    }
}

impl std::fmt::Debug for TerminalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalManager")
            .field("backend", &self.launcher.describe())
            .field("sessions", &self.session_ids())
            .finish()
    }
}

fn session_number(id: &str) -> usize {
    id.strip_prefix("session_")
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

async fn run_recorded(
    shell: &mut ShellProcess,
    command: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandRecord, TerminalError> {
    let started_at = Utc::now();
    let start = std::time::Instant::now();
    let out = shell
        .run(command, timeout, cancel)
        .await
        .map_err(TerminalError::Unavailable)?;

    debug!(exit_code = ?out.exit_code, status = ?out.status, "Command finished");
    Ok(CommandRecord {
        command: command.to_string(),
        output: out.output,
        exit_code: out.exit_code,
        status: out.status,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
