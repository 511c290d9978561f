//! Answer generation: provider abstraction and orchestration.
//!
//! [`GenerationProvider`] is the seam to the language model; the shipped
//! implementation speaks the OpenAI-compatible chat-completions protocol
//! (the reference deployment points it at Groq). [`LlmService`] builds the
//! prompt — system instruction, recent durable history, then the question
//! plus retrieved context — and produces the answer either atomically
//! under a timeout or as an incremental event stream.
//!
//! Failure policy: a timeout is surfaced as
//! [`ServiceError::GenerationTimeout`], distinct from provider errors, so
//! callers can retry generation without re-running retrieval. On the
//! streaming path a provider failure becomes one terminal
//! [`StreamEvent::Error`] rather than a dropped connection, so fragments
//! already delivered to a live consumer are not silently discarded.
//! Durable chat writes are best-effort: a failed write is logged and the
//! answer still returns.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::GenerationConfig;
use crate::error::ServiceError;
use crate::memory::ChatMemory;
use crate::models::ChatMessage;
use crate::store::{ChatRow, ChatStore};

const SYSTEM_PROMPT: &str = "You are a knowledge base assistant.\n\
Answer questions ONLY using the provided document context.\n\
If the answer is not in the context, say \"I don't know based on the provided documents.\"\n\
Be conversational and reference previous messages when relevant.";

/// One fragment of a streamed answer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Done,
    /// Terminal: the stream failed after zero or more tokens. Nothing
    /// further follows.
    Error(String),
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce the complete answer for a message list.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Produce the answer incrementally. The returned channel yields
    /// `Token` events followed by exactly one `Done` or `Error`.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<mpsc::Receiver<StreamEvent>>;
}

// ============ OpenAI-compatible provider ============

/// Chat-completions client for any OpenAI-compatible API.
///
/// Endpoints differ only by base URL, model name, and API key; Groq,
/// OpenAI, and self-hosted gateways all fit.
pub struct OpenAiCompatibleProvider {
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            client: reqwest::Client::new(),
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatibleProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(messages, false))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion error {}: {}", status, body));
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("chat completion response missing content"))?;

        Ok(content.trim().to_string())
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<mpsc::Receiver<StreamEvent>> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(messages, true))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion error {}: {}", status, body));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buf = String::new();

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited `data:` lines.
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();

                    if payload == "[DONE]" {
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }

                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(payload) {
                        if let Some(token) = json
                            .pointer("/choices/0/delta/content")
                            .and_then(|c| c.as_str())
                        {
                            if !token.is_empty()
                                && tx.send(StreamEvent::Token(token.to_string())).await.is_err()
                            {
                                return;
                            }
                        }
                    }
                }
            }

            // Stream closed without the [DONE] sentinel.
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }
}

// ============ Orchestration ============

pub struct LlmService {
    provider: Arc<dyn GenerationProvider>,
    store: Arc<dyn ChatStore>,
    history_turns: usize,
    timeout: Duration,
}

impl LlmService {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn ChatStore>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            provider,
            store,
            history_turns: config.history_turns,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// System prompt, durable history as user/assistant pairs in
    /// chronological order, then the question with its retrieved context.
    fn build_messages(question: &str, context: &str, history: &[ChatRow]) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];

        for row in history {
            messages.push(ChatMessage::user(row.question.as_str()));
            messages.push(ChatMessage::assistant(row.answer.as_str()));
        }

        messages.push(ChatMessage::user(format!(
            "Document Context:\n{}\n\nQuestion: {}",
            context, question
        )));

        messages
    }

    /// History load failures degrade to an empty history: answering with
    /// less context beats failing the request.
    async fn load_history(&self, user_id: &str, session_id: &str) -> Vec<ChatRow> {
        match self
            .store
            .load_history(user_id, Some(session_id), self.history_turns)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                error!(user_id, session_id, "failed to load chat history: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Produce the complete answer, bounded by the configured timeout.
    pub async fn generate_answer(
        &self,
        question: &str,
        context: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<String, ServiceError> {
        let history = self.load_history(user_id, session_id).await;
        let messages = Self::build_messages(question, context, &history);

        info!(user_id, session_id, "generating answer");
        match tokio::time::timeout(self.timeout, self.provider.complete(&messages)).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(e)) => Err(ServiceError::GenerationFailed(format!("{:#}", e))),
            Err(_) => Err(ServiceError::GenerationTimeout(self.timeout)),
        }
    }

    /// Produce the answer as an event stream.
    ///
    /// The channel yields `Token` events and terminates with exactly one
    /// `Done` or `Error`. A stream that stalls past the configured
    /// timeout between fragments terminates with `Error`.
    pub async fn stream_answer(
        &self,
        question: &str,
        context: &str,
        user_id: &str,
        session_id: &str,
    ) -> mpsc::Receiver<StreamEvent> {
        let history = self.load_history(user_id, session_id).await;
        let messages = Self::build_messages(question, context, &history);

        let (tx, rx) = mpsc::channel(32);
        info!(user_id, session_id, "streaming answer");

        match tokio::time::timeout(self.timeout, self.provider.stream(&messages)).await {
            Ok(Ok(mut inner)) => {
                let timeout = self.timeout;
                tokio::spawn(async move {
                    loop {
                        match tokio::time::timeout(timeout, inner.recv()).await {
                            Ok(Some(event)) => {
                                let terminal = !matches!(event, StreamEvent::Token(_));
                                if tx.send(event).await.is_err() || terminal {
                                    return;
                                }
                            }
                            Ok(None) => {
                                // Provider hung up without a terminal event.
                                let _ = tx
                                    .send(StreamEvent::Error(
                                        "generation stream ended unexpectedly".to_string(),
                                    ))
                                    .await;
                                return;
                            }
                            Err(_) => {
                                let _ = tx
                                    .send(StreamEvent::Error(format!(
                                        "generation stalled after {:?}",
                                        timeout
                                    )))
                                    .await;
                                return;
                            }
                        }
                    }
                });
            }
            Ok(Err(e)) => {
                let _ = tx.try_send(StreamEvent::Error(format!("{:#}", e)));
            }
            Err(_) => {
                let _ = tx.try_send(StreamEvent::Error(format!(
                    "generation timed out after {:?}",
                    self.timeout
                )));
            }
        }

        rx
    }

    /// Record a completed turn in session memory and the durable log.
    ///
    /// Called only once an answer is fully produced, so a timeout or
    /// provider failure never leaves either side half-updated. The
    /// durable write is best-effort.
    pub async fn record_turn(
        &self,
        memory: &ChatMemory,
        user_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
        sources: &[String],
    ) {
        memory.add_turn(session_id, question, answer);

        if let Err(e) = self
            .store
            .save_chat(user_id, session_id, question, answer, sources)
            .await
        {
            warn!(user_id, session_id, "failed to persist chat turn: {:#}", e);
        }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn history_turns(&self) -> usize {
        self.history_turns
    }
}
