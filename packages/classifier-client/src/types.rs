use serde::{Deserialize, Serialize};

/// Closed set of policy categories a classifier may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationCategory {
    Safe,
    HateSpeech,
    Violence,
    Copyright,
    Multiple,
}

impl ModerationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationCategory::Safe => "SAFE",
            ModerationCategory::HateSpeech => "HATE_SPEECH",
            ModerationCategory::Violence => "VIOLENCE",
            ModerationCategory::Copyright => "COPYRIGHT",
            ModerationCategory::Multiple => "MULTIPLE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SAFE" => Some(ModerationCategory::Safe),
            "HATE_SPEECH" => Some(ModerationCategory::HateSpeech),
            "VIOLENCE" => Some(ModerationCategory::Violence),
            "COPYRIGHT" => Some(ModerationCategory::Copyright),
            "MULTIPLE" => Some(ModerationCategory::Multiple),
            _ => None,
        }
    }
}

/// A single classifier's judgement of one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub category: ModerationCategory,
    pub reason: String,
    pub harm: i32,
}

// Chat-completion wire types.

#[derive(Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Serialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Deserialize)]
pub(crate) struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Deserialize)]
pub(crate) struct ChatResponseMessage {
    pub content: String,
}
