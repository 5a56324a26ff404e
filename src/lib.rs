//! # openrouter-completions
//!
//! Chat-completion client for the OpenRouter gateway, built as the provider
//! extension point of a message-driven processor framework. It issues
//! streaming or non-streaming completion requests, retries transient
//! failures with capped exponential backoff, and reports token usage to an
//! external sink. Bus routing, processor lifecycle, and persistence stay on
//! the framework side, expressed here as narrow collaborator traits.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use openrouter_completions::{CompletionClient, CompletionProperties, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::from_env("openrouter/auto")?;
//!     let client = CompletionClient::new(config)?;
//!
//!     let parsed = client
//!         .execute(
//!             Some("Summarize: the quick brown fox"),
//!             Some("Answer in one sentence."),
//!             &CompletionProperties {
//!                 max_tokens: Some(128),
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!     println!("{parsed:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! [`CompletionClient::stream`] yields one text fragment per content delta.
//! Session recording and usage reporting run on every exit path, including
//! early abandonment:
//!
//! ```rust,no_run
//! # use openrouter_completions::{CompletionClient, GatewayConfig};
//! # use futures::TryStreamExt;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let client = CompletionClient::new(GatewayConfig::from_env("openrouter/auto")?)?;
//! let mut stream = client
//!     .stream(&serde_json::json!({"topic": "foxes"}), "Tell me about {topic}")
//!     .await?;
//! while let Some(fragment) = stream.try_next().await? {
//!     print!("{fragment}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod parser;
pub mod retry;
pub mod stream;
pub mod traits;
pub mod types;
pub mod wire;

pub use client::CompletionClient;
pub use config::{API_KEY_ENV_VAR, GatewayConfig, OPENROUTER_API_BASE, RetryConfig};
pub use error::{CompletionError, Result};
pub use parser::DefaultParser;
pub use retry::{retry_transient, retry_with_backoff};
pub use stream::CompletionStream;
pub use traits::{
    MessageDeriver, NoopSessionStore, NoopUsageSink, ResponseParser, SessionStore,
    StatelessDeriver, UsageSink,
};
pub use types::{ChatRole, CompletionProperties, Message, ParsedResponse, Usage};
