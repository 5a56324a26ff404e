//! Collaborator contracts owned by the hosting framework.
//!
//! The completion client holds these as narrow trait objects instead of
//! inheriting framework behavior, so each capability can be swapped or
//! stubbed independently.

use async_trait::async_trait;

use crate::types::{Message, ParsedResponse};

/// Telemetry sink for token accounting. Both calls complete asynchronously
/// and are infallible from the client's perspective; the sink owns its own
/// transport and error handling.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_input_tokens(&self, count: u64);
    async fn record_output_tokens(&self, count: u64);
}

/// Session/history store. The client appends one exchange per completed
/// stream: the rendered template, the structured input, and the concatenated
/// output text.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append_exchange(&self, template: &str, input: &serde_json::Value, output: &str);
}

/// Best-effort structured extraction of a possibly-formatted raw string.
/// Never fails; unparseable input comes back as pass-through text.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, raw: &str) -> ParsedResponse;
}

/// Session-aware message derivation: merges the rendered template, the
/// structured input, and any prior session history into an ordered message
/// list.
pub trait MessageDeriver: Send + Sync {
    fn derive(&self, template: &str, input: &serde_json::Value) -> Vec<Message>;
}

/// History-free derivation: the template becomes a single user message.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatelessDeriver;

impl MessageDeriver for StatelessDeriver {
    fn derive(&self, template: &str, _input: &serde_json::Value) -> Vec<Message> {
        vec![Message::user(template)]
    }
}

/// Discards all usage reports. Default collaborator until a real sink is
/// attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record_input_tokens(&self, _count: u64) {}
    async fn record_output_tokens(&self, _count: u64) {}
}

/// Discards all exchanges. Default collaborator until a real store is
/// attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionStore;

#[async_trait]
impl SessionStore for NoopSessionStore {
    async fn append_exchange(&self, _template: &str, _input: &serde_json::Value, _output: &str) {}
}
