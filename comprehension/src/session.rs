//! Session manager — per-(document, model) conversational state.
//!
//! The engine never talks to a model directly. It goes through a
//! [`SessionRegistry`] that owns one context-loaded session per
//! (document, model) pair with an explicit `ensure`/`invalidate`
//! lifecycle, and serializes queries within each session. Adapters
//! implement [`ModelAdapter`]; the engine runs unchanged against
//! deterministic fakes in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Failure modes of a model query.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("query timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unparseable adapter response: {0}")]
    Parse(String),
}

/// Registry-level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no adapter registered for model {0}")]
    UnknownModel(String),

    #[error("no session for document {document_id} and model {model_id}; call ensure first")]
    NoSession {
        document_id: String,
        model_id: String,
    },

    #[error("session creation failed for model {model_id}: {source}")]
    CreationFailed {
        model_id: String,
        #[source]
        source: QueryError,
    },

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Opaque handle to one live session inside an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub document_id: String,
    pub model_id: String,
    /// Adapter-private identifier.
    pub session_id: String,
}

/// A model's reply to one prompt.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub text: String,
    pub latency_ms: u64,
}

/// Adapter contract every model backend implements.
///
/// `ensure_session` is idempotent: called twice with the same ids and
/// context it returns the existing session. Recreating a session after a
/// failure is always safe; there is no hidden state to corrupt.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn ensure_session(
        &self,
        document_id: &str,
        model_id: &str,
        context: &str,
    ) -> Result<SessionHandle, QueryError>;

    async fn query(&self, handle: &SessionHandle, prompt: &str) -> Result<QueryResponse, QueryError>;
}

struct SessionEntry {
    handle: SessionHandle,
    /// Document context retained for safe recreation after failure.
    context: String,
    /// Serializes queries within the session. Concurrency is across
    /// sessions, never within one.
    gate: Mutex<()>,
}

/// Owns every session for a run, keyed by `(document_id, model_id)`.
pub struct SessionRegistry {
    adapters: HashMap<String, Arc<dyn ModelAdapter>>,
    sessions: Mutex<HashMap<(String, String), Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register the adapter serving a model id.
    pub fn register(&mut self, model_id: impl Into<String>, adapter: Arc<dyn ModelAdapter>) {
        self.adapters.insert(model_id.into(), adapter);
    }

    /// Model ids with a registered adapter.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Create the session for `(document_id, model_id)` if it does not
    /// already exist. Idempotent.
    pub async fn ensure(
        &self,
        document_id: &str,
        model_id: &str,
        context: &str,
    ) -> Result<(), SessionError> {
        let key = (document_id.to_string(), model_id.to_string());
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(&key) {
                debug!(document_id, model_id, "Session already initialized");
                return Ok(());
            }
        }

        let adapter = self.adapter(model_id)?;
        let handle = adapter
            .ensure_session(document_id, model_id, context)
            .await
            .map_err(|source| SessionError::CreationFailed {
                model_id: model_id.to_string(),
                source,
            })?;

        info!(document_id, model_id, session = %handle.session_id, "Session created");
        let mut sessions = self.sessions.lock().await;
        sessions.entry(key).or_insert_with(|| {
            Arc::new(SessionEntry {
                handle,
                context: context.to_string(),
                gate: Mutex::new(()),
            })
        });
        Ok(())
    }

    /// Drop the session for `(document_id, model_id)`, if any. The next
    /// `ensure` creates a fresh one.
    pub async fn invalidate(&self, document_id: &str, model_id: &str) {
        let key = (document_id.to_string(), model_id.to_string());
        if self.sessions.lock().await.remove(&key).is_some() {
            info!(document_id, model_id, "Session invalidated");
        }
    }

    /// Query a model within its session, serializing against other
    /// callers of the same session.
    pub async fn query(
        &self,
        document_id: &str,
        model_id: &str,
        prompt: &str,
    ) -> Result<QueryResponse, SessionError> {
        let key = (document_id.to_string(), model_id.to_string());
        let entry = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&key)
                .cloned()
                .ok_or_else(|| SessionError::NoSession {
                    document_id: document_id.to_string(),
                    model_id: model_id.to_string(),
                })?
        };

        let adapter = self.adapter(model_id)?;
        let _serialized = entry.gate.lock().await;
        Ok(adapter.query(&entry.handle, prompt).await?)
    }

    /// Recreate a lost session from its retained document context.
    pub async fn recreate(&self, document_id: &str, model_id: &str) -> Result<(), SessionError> {
        let key = (document_id.to_string(), model_id.to_string());
        let context = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&key)
                .map(|e| e.context.clone())
                .ok_or_else(|| SessionError::NoSession {
                    document_id: document_id.to_string(),
                    model_id: model_id.to_string(),
                })?
        };
        warn!(document_id, model_id, "Recreating session");
        self.invalidate(document_id, model_id).await;
        self.ensure(document_id, model_id, &context).await
    }

    fn adapter(&self, model_id: &str) -> Result<Arc<dyn ModelAdapter>, SessionError> {
        self.adapters
            .get(model_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownModel(model_id.to_string()))
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the JSON payload from a model reply, stripping markdown code
/// fences when present. Models wrap JSON in ```json blocks often enough
/// that every response parser goes through here.
pub fn extract_json_payload(raw: &str) -> &str {
    let trimmed = raw.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let body = &trimmed[start + fence.len()..];
            if let Some(end) = body.find("```") {
                return body[..end].trim();
            }
        }
    }
    trimmed
}
