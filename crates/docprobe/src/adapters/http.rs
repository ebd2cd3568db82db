//! HTTP adapter — OpenAI-style chat completions endpoint.
//!
//! The session transcript is replayed as the messages array on every
//! request: a system message carrying the document, then the prior
//! user/assistant turns, then the new prompt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use comprehension::session::{ModelAdapter, QueryError, QueryResponse, SessionHandle};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct HttpModelAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    sessions: Mutex<HashMap<(String, String), Vec<ChatMessage>>>,
    counter: AtomicU64,
}

impl HttpModelAdapter {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        })
    }

    fn extract_content(body: &ChatResponse) -> Result<&str, QueryError> {
        body.choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| QueryError::Parse("response has no choices".to_string()))
    }
}

#[async_trait]
impl ModelAdapter for HttpModelAdapter {
    async fn ensure_session(
        &self,
        document_id: &str,
        model_id: &str,
        context: &str,
    ) -> Result<SessionHandle, QueryError> {
        let key = (document_id.to_string(), model_id.to_string());
        let mut sessions = self.sessions.lock().await;
        sessions.entry(key).or_insert_with(|| {
            vec![ChatMessage::new(
                "system",
                format!(
                    "You are answering questions about the following document.\n\n{context}"
                ),
            )]
        });
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SessionHandle {
            document_id: document_id.to_string(),
            model_id: model_id.to_string(),
            session_id: format!("http-{n}"),
        })
    }

    async fn query(&self, handle: &SessionHandle, prompt: &str) -> Result<QueryResponse, QueryError> {
        let key = (handle.document_id.clone(), handle.model_id.clone());
        let messages = {
            let sessions = self.sessions.lock().await;
            let mut messages = sessions
                .get(&key)
                .ok_or_else(|| QueryError::Transport("session not initialized".to_string()))?
                .clone();
            messages.push(ChatMessage::new("user", prompt));
            messages
        };

        let started = Instant::now();
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&ChatRequest {
                model: &self.model,
                messages: &messages,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                QueryError::Timeout
            } else {
                QueryError::Transport(e.to_string())
            }
        })?;
        let response = response
            .error_for_status()
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Parse(e.to_string()))?;
        let content = Self::extract_content(&body)?.trim().to_string();
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(model = %handle.model_id, latency_ms, "HTTP query complete");

        let mut sessions = self.sessions.lock().await;
        if let Some(transcript) = sessions.get_mut(&key) {
            transcript.push(ChatMessage::new("user", prompt));
            transcript.push(ChatMessage::new("assistant", content.clone()));
        }

        Ok(QueryResponse {
            text: content,
            latency_ms,
        })
    }
}
