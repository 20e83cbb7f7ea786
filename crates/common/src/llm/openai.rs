//! OpenAI-compatible HTTP client
//!
//! Works against any endpoint that speaks the OpenAI REST dialect
//! (`/embeddings`, `/chat/completions`, `/models`). Streamed chat is read as
//! server-sent `data:` lines.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ChatMessage, LlmClient, TextStream};
use crate::adapters::with_cancellation;
use crate::config::LlmConfig;
use crate::errors::{AdapterKind, AppError, Result};
use crate::models::Relationship;

const SUMMARY_PROMPT: &str = "Summarize the following document in two or three sentences. \
    Reply with the summary only.";

const EXTRACTION_PROMPT: &str = "Extract the relationships between named entities in the \
    following text. Reply with a JSON array only, where each element has the fields \
    \"source\", \"target\", \"type\" (a short verb phrase in snake_case) and \
    \"confidence\" (a number between 0 and 1).";

/// Backoff stops doubling past this many retries
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// OpenAI-compatible client
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    embedding_model: String,
    chat_model: String,
    dimension: usize,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatChunk {
    choices: Vec<ChatChunkChoice>,
}

#[derive(Deserialize)]
struct ChatChunkChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Deserialize, Default)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ExtractedRelationship {
    source: String,
    target: String,
    #[serde(rename = "type")]
    relationship_type: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 { 0.5 }

/// One parsed line of a streamed chat response
#[derive(Debug, PartialEq)]
enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

fn llm_error(message: impl Into<String>) -> AppError {
    AppError::adapter(AdapterKind::Llm, message)
}

fn parse_stream_line(line: &str) -> Result<StreamLine> {
    let line = line.trim_end_matches('\r');
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(StreamLine::Skip);
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    if payload.is_empty() {
        return Ok(StreamLine::Skip);
    }

    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| llm_error(format!("Malformed stream chunk: {}", e)))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
        .map(StreamLine::Delta)
        .unwrap_or(StreamLine::Skip))
}

/// Pull the JSON array out of a reply that may wrap it in prose or fences
fn parse_relationships(reply: &str) -> Result<Vec<Relationship>> {
    let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) else {
        return Err(llm_error("Relationship reply contained no JSON array"));
    };
    if end < start {
        return Err(llm_error("Relationship reply contained no JSON array"));
    }

    let extracted: Vec<ExtractedRelationship> = serde_json::from_str(&reply[start..=end])
        .map_err(|e| llm_error(format!("Failed to parse relationships: {}", e)))?;

    Ok(extracted
        .into_iter()
        .filter(|r| !r.source.trim().is_empty() && !r.target.trim().is_empty())
        .map(|r| Relationship::new(r.source, r.relationship_type, r.target, r.confidence))
        .collect())
}

impl OpenAiClient {
    /// Create a new client from configuration
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Make request with retry
    async fn with_retry<T, F, Fut>(&self, operation: &str, cancel: &CancellationToken, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = backoff_delay(attempt);
                with_cancellation(cancel, operation, async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }

            match with_cancellation(cancel, operation, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "LLM request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| llm_error("Unknown error after retries")))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(llm_error(format!("API error {}: {}", status, body)))
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest { input: texts, model: &self.embedding_model };

        let response = self
            .authorized(self.client.post(self.url("embeddings")))
            .json(&request)
            .send()
            .await
            .map_err(|e| llm_error(format!("Request failed: {}", e)))?;

        let result: EmbeddingResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| llm_error(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(llm_error(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }

    async fn request_completion(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            temperature: 0.2,
            stream: false,
        };

        let response = self
            .authorized(self.client.post(self.url("chat/completions")))
            .json(&request)
            .send()
            .await
            .map_err(|e| llm_error(format!("Request failed: {}", e)))?;

        let chat: ChatResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| llm_error(format!("Failed to parse response: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| llm_error("Empty response from LLM"))
    }

    async fn request_models(&self) -> Result<Vec<String>> {
        let response = self
            .authorized(self.client.get(self.url("models")))
            .send()
            .await
            .map_err(|e| llm_error(format!("Request failed: {}", e)))?;

        let models: ModelList = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| llm_error(format!("Failed to parse response: {}", e)))?;

        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()], cancel).await?;
        embeddings.into_iter().next().ok_or_else(|| llm_error("Empty response"))
    }

    async fn embed_batch(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        const BATCH_SIZE: usize = 100;

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            let embeddings = self
                .with_retry("embed", cancel, || self.request_embeddings(batch))
                .await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    async fn extract_relationships(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Relationship>> {
        let messages = [ChatMessage::system(EXTRACTION_PROMPT), ChatMessage::user(text)];
        let reply = self
            .with_retry("extract relationships", cancel, || self.request_completion(&messages))
            .await?;
        parse_relationships(&reply)
    }

    async fn summarize(&self, text: &str, cancel: &CancellationToken) -> Result<String> {
        let messages = [ChatMessage::system(SUMMARY_PROMPT), ChatMessage::user(text)];
        let summary = self
            .with_retry("summarize", cancel, || self.request_completion(&messages))
            .await?;
        Ok(summary.trim().to_string())
    }

    async fn stream_chat(&self, messages: &[ChatMessage], cancel: &CancellationToken) -> Result<TextStream> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            temperature: 0.2,
            stream: true,
        };

        let send = async {
            let response = self
                .authorized(self.client.post(self.url("chat/completions")))
                .json(&request)
                .send()
                .await
                .map_err(|e| llm_error(format!("Request failed: {}", e)))?;
            Self::check_status(response).await
        };
        let response = with_cancellation(cancel, "stream chat", send).await?;

        let bytes = response.bytes_stream().boxed();
        let state = (bytes, LineBuffer::default(), VecDeque::<Result<String>>::new(), false);

        let increments = stream::unfold(state, |(mut bytes, mut buffer, mut pending, mut finished)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, buffer, pending, finished)));
                }
                if finished {
                    return None;
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        buffer.push(&chunk);
                        while let Some(line) = buffer.next_line() {
                            match parse_stream_line(&line) {
                                Ok(StreamLine::Delta(text)) => pending.push_back(Ok(text)),
                                Ok(StreamLine::Done) => {
                                    finished = true;
                                    break;
                                }
                                Ok(StreamLine::Skip) => {}
                                Err(e) => {
                                    pending.push_back(Err(e));
                                    finished = true;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        pending.push_back(Err(llm_error(format!("Stream read failed: {}", e))));
                        finished = true;
                    }
                    None => finished = true,
                }
            }
        });

        Ok(Box::pin(increments))
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        with_cancellation(cancel, "llm health", self.request_models()).await.map(|_| ())
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.with_retry("list models", cancel, || self.request_models()).await
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Delay before retry `attempt`: 100ms doubling, capped at 2^MAX_BACKOFF_EXPONENT
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(100_u64.saturating_mul(2_u64.saturating_pow(attempt.min(MAX_BACKOFF_EXPONENT))))
}

/// Raw stream bytes split into complete lines
///
/// Lines are decoded only once their newline has arrived, so a multi-byte
/// character split across network chunks survives intact.
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
