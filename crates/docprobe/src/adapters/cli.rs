//! Subprocess adapter — one CLI invocation per query, transcript
//! replayed as part of the prompt.
//!
//! The configured command is shlex-split once at construction; the
//! prompt arrives on stdin and the reply is read from stdout. Most CLI
//! models keep no server-side state, so the session transcript lives
//! here and is resent with every query.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use comprehension::session::{ModelAdapter, QueryError, QueryResponse, SessionHandle};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

struct Transcript {
    context: String,
    /// Prior (prompt, reply) turns, replayed in order.
    turns: Vec<(String, String)>,
}

pub struct CliModelAdapter {
    argv: Vec<String>,
    timeout: Duration,
    sessions: Mutex<HashMap<(String, String), Transcript>>,
    counter: AtomicU64,
}

impl CliModelAdapter {
    pub fn new(command: &str, timeout_secs: u64) -> Result<Self> {
        let argv = shlex::split(command).unwrap_or_default();
        if argv.is_empty() {
            bail!("empty or unparseable command: {command:?}");
        }
        Ok(Self {
            argv,
            timeout: Duration::from_secs(timeout_secs),
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        })
    }

    fn render_input(transcript: &Transcript, prompt: &str) -> String {
        let mut input = format!("DOCUMENT:\n{}\n", transcript.context);
        for (question, reply) in &transcript.turns {
            input.push_str(&format!("\nUSER:\n{question}\n\nASSISTANT:\n{reply}\n"));
        }
        input.push_str(&format!("\nUSER:\n{prompt}\n"));
        input
    }

    async fn run_once(&self, input: &str) -> Result<String, QueryError> {
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| QueryError::Transport(format!("spawn {}: {e}", self.argv[0])))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| QueryError::Transport("child stdin unavailable".to_string()))?;
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| QueryError::Transport(format!("write to child: {e}")))?;
        drop(stdin);

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| QueryError::Timeout)?
            .map_err(|e| QueryError::Transport(format!("wait for child: {e}")))?;

        if !output.status.success() {
            return Err(QueryError::Transport(format!(
                "{} exited with {}",
                self.argv[0], output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ModelAdapter for CliModelAdapter {
    async fn ensure_session(
        &self,
        document_id: &str,
        model_id: &str,
        context: &str,
    ) -> Result<SessionHandle, QueryError> {
        let key = (document_id.to_string(), model_id.to_string());
        let mut sessions = self.sessions.lock().await;
        sessions.entry(key).or_insert_with(|| Transcript {
            context: context.to_string(),
            turns: Vec::new(),
        });
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SessionHandle {
            document_id: document_id.to_string(),
            model_id: model_id.to_string(),
            session_id: format!("cli-{n}"),
        })
    }

    async fn query(&self, handle: &SessionHandle, prompt: &str) -> Result<QueryResponse, QueryError> {
        let key = (handle.document_id.clone(), handle.model_id.clone());
        let input = {
            let sessions = self.sessions.lock().await;
            let transcript = sessions
                .get(&key)
                .ok_or_else(|| QueryError::Transport("session not initialized".to_string()))?;
            Self::render_input(transcript, prompt)
        };

        let started = Instant::now();
        let reply = self.run_once(&input).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(model = %handle.model_id, latency_ms, "CLI query complete");

        let mut sessions = self.sessions.lock().await;
        if let Some(transcript) = sessions.get_mut(&key) {
            transcript.turns.push((prompt.to_string(), reply.clone()));
        }

        Ok(QueryResponse {
            text: reply,
            latency_ms,
        })
    }
}
