//! Chat-completion content classifier client.
//!
//! A minimal client that asks a chat-completion endpoint to classify a piece
//! of text into a closed set of policy categories with a 1-10 harm score.
//! Multiple classifiers are addressed through the same endpoint by model
//! name.
//!
//! # Example
//!
//! ```rust,ignore
//! use classifier_client::ClassifierClient;
//!
//! let client = ClassifierClient::from_env()?;
//! let verdict = client.classify("grok-3", "some post text").await?;
//! println!("{} ({})", verdict.category.as_str(), verdict.harm);
//! ```

pub mod error;
pub mod types;

pub use error::{ClassifierError, Result};
pub use types::{ModerationCategory, Verdict};

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use types::{ChatMessage, ChatRequest, ChatResponse};

/// Back-off applied when the provider rate-limits without a Retry-After
/// header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Fixed instruction template. Every classifier in the cascade gets the same
/// prompt so their answers are directly comparable.
const CLASSIFY_PROMPT: &str = r#"You are a content policy classifier for a public forum index.
Classify the user-provided text into exactly one category:

- SAFE: no policy violation
- HATE_SPEECH: attacks or demeans a protected group
- VIOLENCE: threatens, incites or glorifies violence
- COPYRIGHT: reproduces copyrighted material without authorization
- MULTIPLE: violates more than one of the above

Respond with a JSON object and nothing else:
{"category": "<one of the categories>", "reason": "<one sentence>", "harm": <integer 1-10>}"#;

/// Classifier API client.
#[derive(Clone)]
pub struct ClassifierClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl ClassifierClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from the `CLASSIFIER_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("CLASSIFIER_API_KEY")
            .map_err(|_| ClassifierError::Config("CLASSIFIER_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (proxies, gateway providers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Classify `text` with the named model.
    ///
    /// A 429 response maps to [`ClassifierError::RateLimited`] carrying the
    /// provider-indicated retry delay (falling back to a fixed default when
    /// no `Retry-After` header is present).
    pub async fn classify(&self, model: &str, text: &str) -> Result<Verdict> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: CLASSIFY_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            temperature: 0.0,
            max_tokens: 256,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            tracing::warn!(model, ?retry_after, "Classifier rate limited");
            return Err(ClassifierError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClassifierError::Parse("no choices in response".into()))?;

        parse_verdict(&content)
    }
}

/// Parse a model reply into a [`Verdict`], tolerating markdown code fences
/// around the JSON object.
fn parse_verdict(content: &str) -> Result<Verdict> {
    #[derive(Deserialize)]
    struct RawVerdict {
        category: String,
        #[serde(default)]
        reason: String,
        harm: i32,
    }

    let parsed: RawVerdict = serde_json::from_str(content)
        .or_else(|_| {
            let json_str = content
                .trim()
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim();
            serde_json::from_str(json_str)
        })
        .map_err(|e| ClassifierError::Parse(format!("invalid verdict JSON: {}", e)))?;

    let category = ModerationCategory::parse(&parsed.category)
        .ok_or_else(|| ClassifierError::Parse(format!("unknown category: {}", parsed.category)))?;

    Ok(Verdict {
        category,
        reason: parsed.reason,
        harm: parsed.harm.clamp(1, 10),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_verdict() {
        let verdict =
            parse_verdict(r#"{"category": "VIOLENCE", "reason": "threatens harm", "harm": 8}"#)
                .unwrap();
        assert_eq!(verdict.category, ModerationCategory::Violence);
        assert_eq!(verdict.harm, 8);
    }

    #[test]
    fn parses_fenced_verdict() {
        let content = "```json\n{\"category\": \"SAFE\", \"reason\": \"benign\", \"harm\": 1}\n```";
        let verdict = parse_verdict(content).unwrap();
        assert_eq!(verdict.category, ModerationCategory::Safe);
    }

    #[test]
    fn clamps_harm_score() {
        let verdict =
            parse_verdict(r#"{"category": "HATE_SPEECH", "reason": "slur", "harm": 99}"#).unwrap();
        assert_eq!(verdict.harm, 10);
    }

    #[test]
    fn rejects_unknown_category() {
        let err = parse_verdict(r#"{"category": "SPAM", "reason": "", "harm": 3}"#).unwrap_err();
        assert!(matches!(err, ClassifierError::Parse(_)));
    }
}
