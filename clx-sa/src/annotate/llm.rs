//! Remote LLM fallback client (cascade stage 4)
//!
//! Batches still-unresolved words (with KWIC context) into a single
//! chat-completion request enumerating only the currently active tag
//! vocabulary, and parses the response defensively: the model may wrap the
//! JSON array in prose or code fences, and it may hallucinate codes, so
//! callers re-validate every returned code before persisting anything.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::Tagset;

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const RATE_LIMIT_MS: u64 = 1000; // 1 request per second
const USER_AGENT: &str = "CantoLex/0.1.0 (clx-sa)";

/// LLM client errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Quota exceeded")]
    QuotaExceeded,

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// One word occurrence submitted for classification
#[derive(Debug, Clone)]
pub struct LlmWordQuery {
    pub word: String,
    /// KWIC line, keyword bracketed
    pub context: String,
}

/// One classification tuple returned by the model
///
/// Codes are NOT validated here; the caller must check every tuple against
/// the taxonomy and drop invalid ones.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmClassification {
    pub word: String,
    #[serde(alias = "tagCode", alias = "tag_code")]
    pub tag_code: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub justification: String,
}

/// Outcome of one batch call
#[derive(Debug, Clone)]
pub struct LlmBatchResult {
    pub classifications: Vec<LlmClassification>,
    pub latency_ms: u64,
    pub total_tokens: Option<u64>,
}

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

// OpenAI-compatible chat-completions wire types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

/// Remote LLM API client
pub struct LlmClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    rate_limiter: Arc<RateLimiter>,
}

impl LlmClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            api_key,
            model,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
        })
    }

    /// Classify a batch of word occurrences against the active vocabulary
    ///
    /// Returns the raw tuples the model produced; invalid codes are the
    /// caller's problem (dropped after taxonomy validation), a malformed
    /// response is a ParseError, and a failed call is a network/API error,
    /// never a panic.
    pub async fn classify_batch(
        &self,
        queries: &[LlmWordQuery],
        vocabulary: &[&Tagset],
    ) -> Result<LlmBatchResult, LlmError> {
        self.rate_limiter.wait().await;

        let prompt = build_prompt(queries, vocabulary);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let started = Instant::now();

        tracing::debug!(url = %url, words = queries.len(), "Sending LLM classification batch");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();

        if status == 429 {
            return Err(LlmError::QuotaExceeded);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(status.as_u16(), error_text));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let latency_ms = started.elapsed().as_millis() as u64;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| LlmError::ParseError("Empty choices in response".to_string()))?;

        let classifications = parse_classifications(content)?;

        tracing::info!(
            requested = queries.len(),
            returned = classifications.len(),
            latency_ms,
            "LLM classification batch completed"
        );

        Ok(LlmBatchResult {
            classifications,
            latency_ms,
            total_tokens: body.usage.map(|u| u.total_tokens),
        })
    }
}

const SYSTEM_PROMPT: &str = "You are a semantic annotator for a regional \
song-lyrics corpus. You assign exactly one tag code from the provided \
vocabulary to each word, judged in its local context. Respond with a JSON \
array only, no prose.";

fn build_prompt(queries: &[LlmWordQuery], vocabulary: &[&Tagset]) -> String {
    let mut prompt = String::from("Tag vocabulary (code | name | description):\n");
    for tagset in vocabulary {
        prompt.push_str(&format!(
            "- {} | {} | {}\n",
            tagset.code, tagset.name, tagset.description
        ));
    }
    prompt.push_str(
        "\nClassify each word below, judged in its bracketed context. \
         Use only codes from the vocabulary above. Respond with a JSON array \
         of objects {\"word\", \"tagCode\", \"confidence\", \"justification\"}.\n\n",
    );
    for query in queries {
        prompt.push_str(&format!("- \"{}\" in: {}\n", query.word, query.context));
    }
    prompt
}

/// Extract the JSON array from model output, tolerating wrapping
///
/// Models wrap output in code fences or prose despite instructions; strip
/// anything before the first '[' and after the last ']' before parsing.
pub fn parse_classifications(content: &str) -> Result<Vec<LlmClassification>, LlmError> {
    let start = content
        .find('[')
        .ok_or_else(|| LlmError::ParseError("No JSON array in response".to_string()))?;
    let end = content
        .rfind(']')
        .ok_or_else(|| LlmError::ParseError("Unterminated JSON array in response".to_string()))?;
    if end < start {
        return Err(LlmError::ParseError(
            "Malformed JSON array bounds in response".to_string(),
        ));
    }

    serde_json::from_str(&content[start..=end])
        .map_err(|e| LlmError::ParseError(format!("Invalid classification array: {}", e)))
}
