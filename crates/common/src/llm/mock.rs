//! Deterministic language model for tests and offline runs

use async_trait::async_trait;
use futures::stream;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ChatMessage, ChatRole, LlmClient, TextStream};
use crate::errors::{AdapterKind, AppError, Result};
use crate::models::Relationship;

/// Operations that can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Embed,
    ExtractRelationships,
    Summarize,
    StreamChat,
    Health,
}

/// Mock model
///
/// Embeddings hash lowercase character trigrams into `dimension` buckets, so
/// texts sharing trigrams score close under cosine similarity. Relationship
/// extraction links consecutive capitalized words; summaries are the first
/// sentence.
pub struct MockLlm {
    dimension: usize,
    failing: HashSet<MockOperation>,
    fail_embed_containing: Option<String>,
    script: Option<Vec<String>>,
    fail_stream_after: Option<usize>,
    stream_delay: Option<Duration>,
    embed_calls: Arc<AtomicUsize>,
    increments_produced: Arc<AtomicUsize>,
}

impl MockLlm {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            failing: HashSet::new(),
            fail_embed_containing: None,
            script: None,
            fail_stream_after: None,
            stream_delay: None,
            embed_calls: Arc::new(AtomicUsize::new(0)),
            increments_produced: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make an operation always fail
    pub fn failing(mut self, operation: MockOperation) -> Self {
        self.failing.insert(operation);
        self
    }

    /// Fail embedding for any text containing `needle`
    pub fn failing_embed_containing(mut self, needle: impl Into<String>) -> Self {
        self.fail_embed_containing = Some(needle.into());
        self
    }

    /// Fixed increments for `stream_chat`
    pub fn with_script<I, S>(mut self, increments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script = Some(increments.into_iter().map(Into::into).collect());
        self
    }

    /// Yield an error after `count` increments
    pub fn failing_stream_after(mut self, count: usize) -> Self {
        self.fail_stream_after = Some(count);
        self
    }

    /// Sleep before each increment
    pub fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = Some(delay);
        self
    }

    /// Number of single-text embedding calls served
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Number of stream increments produced so far, across streams
    pub fn increments_produced(&self) -> usize {
        self.increments_produced.load(Ordering::SeqCst)
    }

    fn check(&self, operation: MockOperation, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled(format!("{:?}", operation)));
        }
        if self.failing.contains(&operation) {
            return Err(AppError::adapter(
                AdapterKind::Llm,
                format!("mock {:?} failure", operation),
            ));
        }
        Ok(())
    }

    fn hash_embedding(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        if chars.is_empty() {
            return vector;
        }

        let grams: Vec<String> = if chars.len() < 3 {
            vec![chars.iter().collect()]
        } else {
            chars.windows(3).map(|w| w.iter().collect()).collect()
        };

        for gram in grams {
            let digest = Sha256::digest(gram.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        vector
    }

    fn default_increments(messages: &[ChatMessage]) -> Vec<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let preview: String = last_user.chars().take(80).collect();
        format!("Mock analysis: {}", preview)
            .split_whitespace()
            .map(|w| format!("{} ", w))
            .collect()
    }
}

/// Consecutive capitalized words, deduplicated, become a relationship chain
fn capitalized_entities(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .filter(|w| w.chars().next().map(|c| c.is_uppercase()).unwrap_or(false))
        .filter(|w| seen.insert(w.to_string()))
        .map(|w| w.to_string())
        .collect()
}

fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .find(['.', '!', '?'])
        .map(|i| i + 1)
        .unwrap_or(trimmed.len());
    trimmed[..end].chars().take(200).collect()
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        self.check(MockOperation::Embed, cancel)?;
        self.embed_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(needle) = &self.fail_embed_containing {
            if text.contains(needle.as_str()) {
                return Err(AppError::adapter(AdapterKind::Llm, "mock embedding rejected input"));
            }
        }

        Ok(self.hash_embedding(text))
    }

    async fn extract_relationships(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Relationship>> {
        self.check(MockOperation::ExtractRelationships, cancel)?;

        let entities = capitalized_entities(text);
        Ok(entities
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let confidence = (0.9 - 0.1 * i as f32).max(0.1);
                Relationship::new(pair[0].clone(), "related_to", pair[1].clone(), confidence)
            })
            .collect())
    }

    async fn summarize(&self, text: &str, cancel: &CancellationToken) -> Result<String> {
        self.check(MockOperation::Summarize, cancel)?;
        Ok(first_sentence(text))
    }

    async fn stream_chat(&self, messages: &[ChatMessage], cancel: &CancellationToken) -> Result<TextStream> {
        self.check(MockOperation::StreamChat, cancel)?;

        let increments: VecDeque<String> = self
            .script
            .clone()
            .unwrap_or_else(|| Self::default_increments(messages))
            .into();

        let state = (
            increments,
            0usize,
            self.fail_stream_after,
            self.stream_delay,
            self.increments_produced.clone(),
        );

        let stream = stream::unfold(state, |(mut queue, emitted, fail_after, delay, produced)| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if fail_after == Some(emitted) {
                let err = AppError::adapter(AdapterKind::Llm, "mock stream interrupted");
                // An exhausted queue ends the stream after the error
                queue.clear();
                return Some((Err(err), (queue, emitted + 1, None, delay, produced)));
            }

            let next = queue.pop_front()?;
            produced.fetch_add(1, Ordering::SeqCst);
            Some((Ok(next), (queue, emitted + 1, fail_after, delay, produced)))
        });

        Ok(Box::pin(stream))
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        self.check(MockOperation::Health, cancel)
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.check(MockOperation::Health, cancel)?;
        Ok(vec!["mock-embedding".to_string(), "mock-chat".to_string()])
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
