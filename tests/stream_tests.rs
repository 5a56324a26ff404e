use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use openrouter_completions::{
    CompletionClient, CompletionError, GatewayConfig, Message, MessageDeriver, RetryConfig,
    SessionStore, UsageSink,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct ChannelSink {
    tx: mpsc::UnboundedSender<(&'static str, u64)>,
}

#[async_trait]
impl UsageSink for ChannelSink {
    async fn record_input_tokens(&self, count: u64) {
        let _ = self.tx.send(("input", count));
    }
    async fn record_output_tokens(&self, count: u64) {
        let _ = self.tx.send(("output", count));
    }
}

struct ChannelStore {
    tx: mpsc::UnboundedSender<(String, Value, String)>,
}

#[async_trait]
impl SessionStore for ChannelStore {
    async fn append_exchange(&self, template: &str, input: &Value, output: &str) {
        let _ = self
            .tx
            .send((template.to_string(), input.clone(), output.to_string()));
    }
}

struct Sequenced {
    responses: Vec<ResponseTemplate>,
    served: AtomicUsize,
}

impl Respond for Sequenced {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let index = self.served.fetch_add(1, Ordering::SeqCst);
        self.responses[index.min(self.responses.len() - 1)].clone()
    }
}

fn sse_response(fragments: &[&str], usage: Option<(u64, u64)>) -> ResponseTemplate {
    let mut body = String::new();
    for fragment in fragments {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": fragment}}]})
        ));
    }
    if let Some((input, output)) = usage {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({
                "choices": [],
                "usage": {"prompt_tokens": input, "completion_tokens": output},
            })
        ));
    }
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn client_for(server: &MockServer) -> CompletionClient {
    let config = GatewayConfig::new("test-key", "openrouter/auto")
        .with_base_url(server.uri())
        .with_retry(RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        });
    CompletionClient::new(config).expect("client")
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("side effects should run promptly")
        .expect("channel open")
}

#[tokio::test]
async fn streams_fragments_and_records_the_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&["Hel", "lo"], Some((10, 2))))
        .mount(&server)
        .await;

    let (usage_tx, mut usage_rx) = mpsc::unbounded_channel();
    let (store_tx, mut store_rx) = mpsc::unbounded_channel();
    let client = client_for(&server)
        .with_usage_sink(Arc::new(ChannelSink { tx: usage_tx }))
        .with_session_store(Arc::new(ChannelStore { tx: store_tx }));

    let input = json!({"name": "world"});
    let stream = client.stream(&input, "greet {name}").await.expect("stream");
    let fragments: Vec<String> = stream.try_collect().await.expect("fragments");
    assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);

    let (template, recorded_input, output) = recv(&mut store_rx).await;
    assert_eq!(template, "greet {name}");
    assert_eq!(recorded_input, input);
    assert_eq!(output, "Hello");

    assert_eq!(recv(&mut usage_rx).await, ("input", 10));
    assert_eq!(recv(&mut usage_rx).await, ("output", 2));

    let requests = server.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).expect("body");
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["stream_options"], json!({"include_usage": true}));
    assert_eq!(
        body["messages"],
        json!([{"role": "user", "content": "greet {name}"}])
    );
}

#[tokio::test]
async fn empty_template_falls_back_to_rendered_input() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(&["ok"], None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let input = json!({"x": 1});
    let stream = client.stream(&input, "").await.expect("stream");
    let _: Vec<String> = stream.try_collect().await.expect("fragments");

    let requests = server.received_requests().await.expect("recorded requests");
    let body: Value = serde_json::from_slice(&requests[0].body).expect("body");
    assert_eq!(body["messages"][0]["content"], json!(input.to_string()));
}

#[tokio::test]
async fn custom_deriver_controls_message_assembly() {
    struct SystemPlusUser;
    impl MessageDeriver for SystemPlusUser {
        fn derive(&self, template: &str, _input: &Value) -> Vec<Message> {
            vec![Message::system("history goes here"), Message::user(template)]
        }
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(&["ok"], None))
        .mount(&server)
        .await;

    let client = client_for(&server).with_message_deriver(Arc::new(SystemPlusUser));
    let stream = client.stream(&json!(null), "the task").await.expect("stream");
    let _: Vec<String> = stream.try_collect().await.expect("fragments");

    let requests = server.received_requests().await.expect("recorded requests");
    let body: Value = serde_json::from_slice(&requests[0].body).expect("body");
    assert_eq!(
        body["messages"],
        json!([
            {"role": "system", "content": "history goes here"},
            {"role": "user", "content": "the task"},
        ])
    );
}

#[tokio::test]
async fn stream_open_is_retried_on_transient_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(Sequenced {
            responses: vec![
                ResponseTemplate::new(503),
                sse_response(&["recovered"], Some((3, 1))),
            ],
            served: AtomicUsize::new(0),
        })
        .mount(&server)
        .await;

    let client = client_for(&server);
    let stream = client.stream(&json!(null), "try me").await.expect("stream");
    let fragments: Vec<String> = stream.try_collect().await.expect("fragments");
    assert_eq!(fragments, vec!["recovered".to_string()]);

    let requests = server.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn stream_open_fails_fast_on_fatal_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .stream(&json!(null), "unauthorized")
        .await
        .expect_err("401 is fatal");
    assert!(matches!(err, CompletionError::Fatal { .. }));
    assert_eq!(err.status(), Some(401));

    let requests = server.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn established_stream_outlives_the_request_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            sse_response(&["slow", " but steady"], Some((4, 2)))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    // The same deadline fails a non-streaming call (see the execute suite);
    // it must not cap how long a stream runs.
    let config = GatewayConfig::new("test-key", "openrouter/auto")
        .with_base_url(server.uri())
        .with_timeout(Duration::from_millis(50))
        .with_retry(RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        });
    let client = CompletionClient::new(config).expect("client");

    let stream = client.stream(&json!(null), "long generation").await.expect("stream");
    let fragments: Vec<String> = stream.try_collect().await.expect("fragments");
    assert_eq!(fragments, vec!["slow".to_string(), " but steady".to_string()]);
}

#[tokio::test]
async fn abandoned_stream_still_records_consumed_output() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(&["Hel", "lo"], Some((10, 2))))
        .mount(&server)
        .await;

    let (usage_tx, mut usage_rx) = mpsc::unbounded_channel();
    let (store_tx, mut store_rx) = mpsc::unbounded_channel();
    let client = client_for(&server)
        .with_usage_sink(Arc::new(ChannelSink { tx: usage_tx }))
        .with_session_store(Arc::new(ChannelStore { tx: store_tx }));

    let mut stream = client.stream(&json!(null), "partial").await.expect("stream");
    let first = stream.next().await.expect("first fragment").expect("ok");
    assert_eq!(first, "Hel");
    drop(stream);

    let (_, _, output) = recv(&mut store_rx).await;
    assert_eq!(output, "Hel", "only the consumed prefix is recorded");
    // Usage reporting still happens on abandonment with the last-seen figures.
    let (label, _) = recv(&mut usage_rx).await;
    assert_eq!(label, "input");
}
