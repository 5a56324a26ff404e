//! The completion client: one gateway round trip (or one stream) per call.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{CompletionError, Result};
use crate::parser::DefaultParser;
use crate::retry::retry_transient;
use crate::stream::{CompletionStream, StreamFinalizer};
use crate::traits::{
    MessageDeriver, NoopSessionStore, NoopUsageSink, ResponseParser, SessionStore,
    StatelessDeriver, UsageSink,
};
use crate::types::{CompletionProperties, Message, ParsedResponse, Usage};
use crate::wire::{ChatRequest, ChatResponse};

/// Chat-completion client for an OpenAI-compatible gateway.
///
/// Holds its collaborators (usage sink, session store, response parser,
/// message deriver) as narrow trait objects; each defaults to a built-in
/// no-op or stateless implementation until the hosting framework attaches
/// the real one.
///
/// Every invocation is independent: no state is shared between concurrent
/// calls beyond the `Arc`ed collaborators.
pub struct CompletionClient {
    http: reqwest::Client,
    config: GatewayConfig,
    usage_sink: Arc<dyn UsageSink>,
    sessions: Arc<dyn SessionStore>,
    parser: Arc<dyn ResponseParser>,
    deriver: Arc<dyn MessageDeriver>,
    /// Runtime sampling parameters used by the streaming path, where the
    /// hosting framework configures them per processor rather than per call.
    properties: CompletionProperties,
}

impl CompletionClient {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        // The deadline is applied per request in `post_chat`, not on the
        // client: a client-wide timeout would also cap how long an
        // established stream may run. Streams are only bounded here at
        // connect time.
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(concat!(
                "openrouter-completions/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|err| {
                CompletionError::Configuration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            http,
            config,
            usage_sink: Arc::new(NoopUsageSink),
            sessions: Arc::new(NoopSessionStore),
            parser: Arc::new(DefaultParser),
            deriver: Arc::new(StatelessDeriver),
            properties: CompletionProperties::default(),
        })
    }

    pub fn with_properties(mut self, properties: CompletionProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = sink;
        self
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_message_deriver(mut self, deriver: Arc<dyn MessageDeriver>) -> Self {
        self.deriver = deriver;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Non-streaming completion. Builds the message list from the prompt
    /// pair, sends one request (retrying transient failures), reports usage,
    /// and returns the parsed raw response text.
    pub async fn execute(
        &self,
        user_prompt: Option<&str>,
        system_prompt: Option<&str>,
        properties: &CompletionProperties,
    ) -> Result<ParsedResponse> {
        let messages = build_messages(user_prompt, system_prompt)?;
        let request = ChatRequest::new(&self.config.model, messages, properties, false);

        let response: ChatResponse =
            retry_transient(&self.config.retry, || self.post_chat(&request)).await?;

        let usage = response.usage.map(Usage::from).unwrap_or_default();
        self.usage_sink.record_input_tokens(usage.input_tokens).await;
        self.usage_sink
            .record_output_tokens(usage.output_tokens)
            .await;

        let raw = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default();
        Ok(self.parser.parse(raw))
    }

    /// Streaming completion. Message assembly is delegated to the configured
    /// deriver; an empty template falls back to the textual rendering of
    /// `input_data`. The returned stream yields one fragment per non-empty
    /// content delta and records the exchange plus usage on every exit path.
    ///
    /// Opening the stream goes through the same retry policy as `execute`;
    /// an established stream is never retried.
    pub async fn stream(
        &self,
        input_data: &serde_json::Value,
        template: &str,
    ) -> Result<CompletionStream> {
        let template = if template.trim().is_empty() {
            input_data.to_string()
        } else {
            template.to_string()
        };
        let messages = self.deriver.derive(&template, input_data);
        let request = ChatRequest::new(&self.config.model, messages, &self.properties, true);

        let response =
            retry_transient(&self.config.retry, || self.open_stream(&request)).await?;

        let bytes = Box::pin(response.bytes_stream().map_err(|err| {
            CompletionError::Transient {
                message: format!("error reading response stream: {err}"),
                status: None,
                source: Some(Box::new(err)),
            }
        }));
        let finalizer = StreamFinalizer::new(
            Arc::clone(&self.usage_sink),
            Arc::clone(&self.sessions),
            template,
            input_data.clone(),
        );
        Ok(CompletionStream::new(bytes, finalizer))
    }

    #[tracing::instrument(
        name = "chat_completions",
        skip_all,
        fields(model = %request.model),
        err
    )]
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .send_request(request, Some(self.config.timeout))
            .await?;
        debug!(status = %response.status(), "gateway request successful");
        response
            .json::<ChatResponse>()
            .await
            .map_err(|err| CompletionError::decode("failed to decode gateway response", err))
    }

    #[tracing::instrument(
        name = "chat_completions_stream",
        skip_all,
        fields(model = %request.model),
        err
    )]
    async fn open_stream(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        // No total deadline: a long generation may legitimately stream for
        // longer than any sensible per-request timeout.
        self.send_request(request, None).await
    }

    /// One POST to the chat-completions endpoint, with status classification
    /// but no retry; callers wrap this in the retry policy. A `deadline`
    /// bounds the whole request including the response body.
    async fn send_request(
        &self,
        request: &ChatRequest,
        deadline: Option<Duration>,
    ) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .post(self.chat_url())
            .bearer_auth(&self.config.api_key)
            .json(request);
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }
        let response = builder
            .send()
            .await
            .map_err(CompletionError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

/// Build the message list from the prompt pair. The canonical order puts the
/// system entry (when present) before the user entry; both are trimmed.
fn build_messages(
    user_prompt: Option<&str>,
    system_prompt: Option<&str>,
) -> Result<Vec<Message>> {
    let system = system_prompt.map(str::trim).filter(|s| !s.is_empty());
    let user = user_prompt.map(str::trim).filter(|s| !s.is_empty());

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(Message::system(system));
    }
    if let Some(user) = user {
        messages.push(Message::user(user));
    }

    if messages.is_empty() {
        return Err(CompletionError::InvalidRequest(
            "no usable prompt: user and system prompts are both empty".to_string(),
        ));
    }
    Ok(messages)
}
