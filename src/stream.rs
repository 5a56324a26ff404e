//! Lazy, single-pass stream of completion text fragments.
//!
//! The gateway speaks server-sent events: one `data:` line per chunk, a
//! `data: [DONE]` sentinel at the end, and (with `include_usage`) a terminal
//! chunk carrying token accounting. Fragments are yielded in arrival order;
//! empty deltas are skipped.
//!
//! Session recording and usage reporting are guaranteed side effects: they
//! run once on every exit path, whether the stream is drained to completion,
//! abandoned early, or fails mid-flight.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tracing::debug;

use crate::error::{CompletionError, Result};
use crate::traits::{SessionStore, UsageSink};
use crate::types::Usage;
use crate::wire::StreamChunk;

pub(crate) type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, CompletionError>> + Send>>;

/// Everything that must survive until the stream is finished: the collected
/// output, the last-seen usage figures, and the collaborators to notify.
pub(crate) struct StreamFinalizer {
    usage_sink: Arc<dyn UsageSink>,
    sessions: Arc<dyn SessionStore>,
    template: String,
    input: serde_json::Value,
    output: String,
    usage: Usage,
}

impl StreamFinalizer {
    pub(crate) fn new(
        usage_sink: Arc<dyn UsageSink>,
        sessions: Arc<dyn SessionStore>,
        template: String,
        input: serde_json::Value,
    ) -> Self {
        Self {
            usage_sink,
            sessions,
            template,
            input,
            output: String::new(),
            usage: Usage::default(),
        }
    }

    fn push_fragment(&mut self, fragment: &str) {
        self.output.push_str(fragment);
    }

    /// Usage normally appears only in the terminal chunk; the last non-null
    /// observation wins.
    fn observe_usage(&mut self, usage: Usage) {
        self.usage = usage;
    }

    /// Record the exchange and report usage. The collaborator calls are
    /// async while this can be reached from `Drop`, so they run on a spawned
    /// task.
    fn finish(self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime at stream teardown, skipping usage report");
            return;
        };
        handle.spawn(async move {
            self.sessions
                .append_exchange(&self.template, &self.input, &self.output)
                .await;
            self.usage_sink
                .record_input_tokens(self.usage.input_tokens)
                .await;
            self.usage_sink
                .record_output_tokens(self.usage.output_tokens)
                .await;
        });
    }
}

/// Single-pass, non-restartable sequence of text fragments.
pub struct CompletionStream {
    bytes: ByteStream,
    buffer: BytesMut,
    pending: VecDeque<String>,
    finalizer: Option<StreamFinalizer>,
    done: bool,
}

impl fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionStream")
            .field("buffered_bytes", &self.buffer.len())
            .field("pending_fragments", &self.pending.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl CompletionStream {
    pub(crate) fn new(bytes: ByteStream, finalizer: StreamFinalizer) -> Self {
        Self {
            bytes,
            buffer: BytesMut::new(),
            pending: VecDeque::new(),
            finalizer: Some(finalizer),
            done: false,
        }
    }

    fn finalize(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer.finish();
        }
    }

    /// Parse complete SSE lines out of the buffer into pending fragments.
    /// The buffer holds raw bytes and only complete lines are decoded: a
    /// multi-byte character may straddle two transport chunks, but never a
    /// line break.
    fn drain_buffer(&mut self) {
        while let Some(newline) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let raw = self.buffer.split_to(newline + 1);
            let line = String::from_utf8_lossy(&raw[..newline]);
            let line = line.trim();

            // Blank keep-alives and comment lines carry nothing.
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();

            if data == "[DONE]" {
                self.done = true;
                continue;
            }

            let chunk: StreamChunk = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(err) => {
                    debug!(error = %err, "skipping undecodable stream chunk");
                    continue;
                }
            };

            if let Some(wire_usage) = chunk.usage {
                if let Some(finalizer) = self.finalizer.as_mut() {
                    finalizer.observe_usage(wire_usage.into());
                }
            }

            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content);
            if let Some(content) = content {
                if !content.is_empty() {
                    self.pending.push_back(content);
                }
            }
        }
    }
}

impl Stream for CompletionStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(fragment) = this.pending.pop_front() {
                // Accumulate at yield time, so an abandoned stream records
                // exactly what the consumer saw.
                if let Some(finalizer) = this.finalizer.as_mut() {
                    finalizer.push_fragment(&fragment);
                }
                return Poll::Ready(Some(Ok(fragment)));
            }
            if this.done {
                this.finalize();
                return Poll::Ready(None);
            }

            match ready!(this.bytes.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    this.buffer.extend_from_slice(&chunk);
                    this.drain_buffer();
                }
                Some(Err(err)) => {
                    this.done = true;
                    this.finalize();
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.done = true;
                }
            }
        }
    }
}

impl Drop for CompletionStream {
    /// Abandoning the stream early still records what was produced so far
    /// and reports the last-seen usage figures.
    fn drop(&mut self) {
        self.finalize();
    }
}
