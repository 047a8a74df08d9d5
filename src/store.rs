//! Chat history persistence.
//!
//! The chat handler only depends on [`MessageStore`]; [`MemoryStore`] is the
//! in-process implementation. Writes from the streaming path go through
//! [`persist_detached`] so a failing store never aborts a response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: u64,
    pub session_id: String,
    pub created_at: u64,
    pub last_active: u64,
}

/// Storage used by the chat routes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message and touch its session's `last_active`.
    async fn create_message(&self, message: NewMessage) -> Result<Message>;

    /// Messages of `session_id`, oldest first.
    async fn messages_for_session(&self, session_id: &str) -> Result<Vec<Message>>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    async fn create_session(&self, session_id: &str) -> Result<Session>;

    /// Return the session, creating it first if it is unknown.
    async fn ensure_session(&self, session_id: &str) -> Result<Session> {
        match self.get_session(session_id).await? {
            Some(session) => Ok(session),
            None => self.create_session(session_id).await,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    messages: Vec<Message>,
    sessions: HashMap<String, Session>,
    next_message_id: u64,
    next_session_id: u64,
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| ChatError::Store("memory store lock poisoned".into()))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let mut tables = self.lock()?;
        tables.next_message_id += 1;
        let timestamp = now_ms();
        let stored = Message {
            id: tables.next_message_id,
            role: message.role,
            content: message.content,
            timestamp,
            session_id: message.session_id,
        };
        if let Some(session) = tables.sessions.get_mut(&stored.session_id) {
            session.last_active = timestamp;
        }
        tables.messages.push(stored.clone());
        Ok(stored)
    }

    async fn messages_for_session(&self, session_id: &str) -> Result<Vec<Message>> {
        let tables = self.lock()?;
        // ids are assigned in push order, so the vec is already sorted
        Ok(tables.messages.iter().filter(|m| m.session_id == session_id).cloned().collect())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.lock()?.sessions.get(session_id).cloned())
    }

    async fn create_session(&self, session_id: &str) -> Result<Session> {
        let mut tables = self.lock()?;
        tables.next_session_id += 1;
        let now = now_ms();
        let session = Session {
            id: tables.next_session_id,
            session_id: session_id.to_string(),
            created_at: now,
            last_active: now,
        };
        tables.sessions.insert(session_id.to_string(), session.clone());
        Ok(session)
    }
}

/// Store `message` on a background task. Failures are logged only.
pub fn persist_detached(store: Arc<dyn MessageStore>, message: NewMessage) -> JoinHandle<()> {
    tokio::spawn(async move {
        let role = message.role;
        let session_id = message.session_id.clone();
        if let Err(e) = store.create_message(message).await {
            tracing::error!(error = %e, %role, session_id, "failed to persist chat message");
        }
    })
}
