//! Wire-level request and response types for the chat-completions endpoint.
//!
//! Fields follow the OpenAI-compatible format OpenRouter serves. Optional
//! response fields not currently consumed are kept for API contract
//! completeness.

use serde::{Deserialize, Serialize};

use crate::types::{CompletionProperties, Message, Usage};

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

impl ChatRequest {
    /// Build a request for the given mode. Streaming requests always ask the
    /// gateway to attach usage accounting to the terminal chunk.
    pub fn new(
        model: impl Into<String>,
        messages: Vec<Message>,
        properties: &CompletionProperties,
        stream: bool,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: properties.max_tokens,
            temperature: properties.temperature,
            top_p: properties.top_p,
            frequency_penalty: properties.frequency_penalty,
            presence_penalty: properties.presence_penalty,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[allow(dead_code)]
    pub id: Option<String>,
    #[allow(dead_code)]
    pub model: Option<String>,
    pub choices: Vec<Choice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[allow(dead_code)]
    pub role: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WireUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[allow(dead_code)]
    pub total_tokens: Option<u64>,
}

impl From<WireUsage> for Usage {
    fn from(wire: WireUsage) -> Self {
        Self {
            input_tokens: wire.prompt_tokens,
            output_tokens: wire.completion_tokens,
        }
    }
}

/// One server-sent event payload of a streaming completion.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    /// Present only on the terminal chunk when `include_usage` is set.
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamDelta {
    #[allow(dead_code)]
    pub role: Option<String>,
    pub content: Option<String>,
}
