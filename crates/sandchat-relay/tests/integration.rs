#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures::StreamExt;
use sandchat_core::config::ShellConfig;
use sandchat_core::{Message, Persona};
use sandchat_relay::producer::{
    Fragment, FragmentStream, ProcessProducer, Producer, ProducerError, ProducerInput,
};
use sandchat_relay::relay::Relay;
use sandchat_relay::server::{AppState, build_router};
use sandchat_relay::shell::ShellService;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Replies with fixed lines and records every input it receives.
struct Spy {
    lines: Vec<&'static str>,
    delay: Option<Duration>,
    inputs: Mutex<Vec<ProducerInput>>,
}

impl Spy {
    fn new(lines: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            lines,
            delay: None,
            inputs: Mutex::new(Vec::new()),
        })
    }

    fn slow(lines: Vec<&'static str>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            lines,
            delay: Some(delay),
            inputs: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Producer for Spy {
    fn name(&self) -> &'static str {
        "spy"
    }

    async fn start(&self, input: ProducerInput) -> Result<FragmentStream, ProducerError> {
        self.inputs.lock().unwrap().push(input);
        let mut items: Vec<Result<Fragment, ProducerError>> = self
            .lines
            .iter()
            .map(|l| Ok(Fragment::Line((*l).to_string())))
            .collect();
        items.push(Ok(Fragment::Exit(Some(0))));
        let delay = self.delay;
        Ok(Box::pin(futures::stream::iter(items).then(
            move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            },
        )))
    }
}

struct Harness {
    chat: Arc<Spy>,
    shell: Option<Arc<dyn Producer>>,
    timeout: Duration,
}

impl Harness {
    fn new(chat: Arc<Spy>) -> Self {
        Self {
            chat,
            shell: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn with_shell(mut self, shell: Arc<dyn Producer>) -> Self {
        self.shell = Some(shell);
        self
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn app(&self) -> axum::Router {
        let relay = Relay::new(Persona::new("You are a test."), self.chat.clone(), self.timeout);
        let shell = ShellService::new(&ShellConfig::default(), self.shell.clone());
        build_router(AppState::new(relay, shell))
    }

    /// Send a request and return (status, content-type, body text).
    async fn send(&self, method: Method, uri: &str, body: Value) -> (StatusCode, String, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = self.app().oneshot(request).await.unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8_lossy(&body).into_owned())
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, String, String) {
        self.send(Method::POST, uri, body).await
    }
}

/// Parse an SSE body into its JSON frames.
fn frames(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let h = Harness::new(Spy::new(vec![]));
    let (status, _, body) = h.send(Method::GET, "/health", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn chat_get_is_method_not_allowed() {
    let h = Harness::new(Spy::new(vec![]));
    let (status, _, _) = h.send(Method::GET, "/chat", Value::Null).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn chat_streams_lines_then_done() {
    let spy = Spy::new(vec!["a", "b", "c"]);
    let h = Harness::new(spy.clone());
    let (status, content_type, body) = h
        .post("/chat", json!({"messages": [{"role": "user", "content": "hi"}]}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(
        frames(&body),
        vec![
            json!({"text": "a"}),
            json!({"text": "b"}),
            json!({"text": "c"}),
            json!({"done": true, "exit_code": 0}),
        ]
    );
    assert_eq!(spy.calls(), 1);
}

#[tokio::test]
async fn chat_stream_disables_intermediary_buffering() {
    let h = Harness::new(Spy::new(vec!["x"]));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/chat")
        .body(Body::from(
            json!({"messages": [{"role": "user", "content": "hi"}]}).to_string(),
        ))
        .unwrap();
    let resp = h.app().oneshot(request).await.unwrap();
    assert_eq!(resp.headers().get("x-accel-buffering").unwrap(), "no");
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-cache");
}

#[tokio::test]
async fn chat_passes_conversation_to_producer() {
    let spy = Spy::new(vec![]);
    let h = Harness::new(spy.clone());
    h.post(
        "/chat",
        json!({"messages": [
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"},
            {"role": "user", "content": "what do you do?"},
        ]}),
    )
    .await;

    let inputs = spy.inputs.lock().unwrap();
    assert_eq!(inputs[0].system, "You are a test.");
    assert_eq!(inputs[0].messages.len(), 3);
    assert_eq!(
        inputs[0].text,
        "You are a test.\n\nUser: hi\n\nAssistant: hello\n\nUser: what do you do?"
    );
}

#[tokio::test]
async fn chat_without_messages_is_rejected_before_invocation() {
    let spy = Spy::new(vec!["never"]);
    let h = Harness::new(spy.clone());
    let (status, _, body) = h.post("/chat", json!({"messages": []})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "No messages provided");
    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn chat_ending_with_assistant_is_rejected() {
    let spy = Spy::new(vec!["never"]);
    let h = Harness::new(spy.clone());
    let (status, _, body) = h
        .post(
            "/chat",
            json!({"messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ]}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "Last message must be from user");
    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn chat_malformed_body_is_rejected() {
    let h = Harness::new(Spy::new(vec![]));
    let (status, _, body) = h.post("/chat", json!({"messages": "nope"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid request body"));
}

#[tokio::test]
async fn chat_non_streaming_returns_response() {
    let h = Harness::new(Spy::new(vec!["Hello", "there"]));
    let (status, content_type, body) = h
        .post(
            "/chat",
            json!({"messages": [{"role": "user", "content": "hi"}], "stream": false}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("application/json"));
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, json!({"response": "Hello\nthere"}));
}

#[tokio::test]
async fn chat_non_streaming_timeout_has_no_response() {
    let h = Harness::new(Spy::slow(vec!["late"], Duration::from_millis(500)))
        .with_timeout(Duration::from_millis(50));
    let (status, _, body) = h
        .post(
            "/chat",
            json!({"messages": [{"role": "user", "content": "hi"}], "stream": false}),
        )
        .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("timed out"));
    assert!(body.get("response").is_none());
}

#[tokio::test]
async fn shell_empty_command_is_noop() {
    let shell_spy = Spy::new(vec!["never"]);
    let h = Harness::new(Spy::new(vec![])).with_shell(shell_spy.clone());
    let (status, content_type, body) = h.post("/shell", json!({"command": "   "})).await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("application/json"));
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, json!({"output": "", "exit_code": 0}));
    assert_eq!(shell_spy.calls(), 0);
}

#[tokio::test]
async fn shell_welcome_does_not_spawn() {
    let shell_spy = Spy::new(vec!["never"]);
    let h = Harness::new(Spy::new(vec![])).with_shell(shell_spy.clone());
    let (status, _, body) = h.post("/shell", json!({"command": "welcome"})).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["output"], ShellConfig::default().welcome_message());
    assert_eq!(body["exit_code"], 0);
    assert_eq!(shell_spy.calls(), 0);
}

#[tokio::test]
async fn shell_chat_prefix_routes_to_chat_producer() {
    let chat_spy = Spy::new(vec!["I make wine."]);
    let shell_spy = Spy::new(vec!["never"]);
    let h = Harness::new(chat_spy.clone()).with_shell(shell_spy.clone());
    let (status, _, body) = h
        .post("/shell", json!({"command": "tom what do you make?"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        frames(&body),
        vec![
            json!({"output": "I make wine."}),
            json!({"done": true, "exit_code": 0}),
        ]
    );
    assert_eq!(shell_spy.calls(), 0);
    let inputs = chat_spy.inputs.lock().unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].messages, vec![Message::user("what do you make?")]);
}

#[tokio::test]
async fn shell_execution_disabled_by_default() {
    let h = Harness::new(Spy::new(vec![]));
    let (status, _, body) = h.post("/shell", json!({"command": "ls"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "Shell execution is disabled");
}

#[tokio::test]
async fn shell_command_output_is_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let config = ShellConfig {
        enabled: true,
        program: "sh".into(),
        working_directory: dir.path().to_path_buf(),
        ..ShellConfig::default()
    };
    let h = Harness::new(Spy::new(vec![])).with_shell(Arc::new(ProcessProducer::shell(&config, None)));
    let (status, _, body) = h
        .post("/shell", json!({"command": "echo one; echo two", "history": []}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        frames(&body),
        vec![
            json!({"output": "one"}),
            json!({"output": "two"}),
            json!({"done": true, "exit_code": 0}),
        ]
    );
}

#[tokio::test]
async fn shell_failure_ends_with_error_frame() {
    let dir = tempfile::tempdir().unwrap();
    let config = ShellConfig {
        enabled: true,
        program: "sh".into(),
        working_directory: dir.path().to_path_buf(),
        ..ShellConfig::default()
    };
    let h = Harness::new(Spy::new(vec![])).with_shell(Arc::new(ProcessProducer::shell(&config, None)));
    let (status, _, body) = h
        .post("/shell", json!({"command": "echo broken >&2; exit 4"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    let frames = frames(&body);
    assert_eq!(frames.first().unwrap(), &json!({"output": "broken"}));
    assert_eq!(frames.last().unwrap(), &json!({"error": "broken"}));
    assert!(frames.iter().all(|f| f.get("done").is_none()));
}
