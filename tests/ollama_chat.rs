use axum::body::Body;
use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lexcase::config::LlmConfig;
use lexcase::llm::{GenerationProvider, Message, OllamaChat};
use lexcase::tools::ToolRegistry;

const FRAGMENTS: [&str; 3] = ["Hadley ", "v. ", "Baxendale"];

/// Stand-in for `POST /api/chat`. Asks for `citation_lookup` while tools
/// are offered and no tool result has come back yet (or on every offer when
/// `greedy`), otherwise answers with [`FRAGMENTS`].
#[derive(Clone, Default)]
struct MockOllama {
    requests: Arc<Mutex<Vec<Value>>>,
    greedy: bool,
    chunk_gap: Duration,
}

impl MockOllama {
    fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn chat(State(mock): State<MockOllama>, Json(body): Json<Value>) -> Response {
    mock.requests.lock().unwrap().push(body.clone());

    let offered_tools = body.get("tools").is_some();
    let has_tool_result = body["messages"]
        .as_array()
        .map_or(false, |messages| messages.iter().any(|m| m["role"] == "tool"));
    let call_tool = offered_tools && (mock.greedy || !has_tool_result);

    let tool_call = json!({
        "role": "assistant",
        "content": "",
        "tool_calls": [{
            "function": {
                "name": "citation_lookup",
                "arguments": { "case_name": "Hadley v. Baxendale" }
            }
        }]
    });

    if body["stream"] != true {
        let message = if call_tool {
            tool_call
        } else {
            json!({ "role": "assistant", "content": FRAGMENTS.concat() })
        };
        return Json(json!({ "message": message, "done": true })).into_response();
    }

    let mut lines: Vec<String> = Vec::new();
    if call_tool {
        lines.push(json!({ "message": tool_call, "done": true }).to_string());
    } else {
        for fragment in FRAGMENTS {
            lines.push(
                json!({ "message": { "role": "assistant", "content": fragment }, "done": false })
                    .to_string(),
            );
        }
        lines.push(json!({ "message": { "role": "assistant", "content": "" }, "done": true }).to_string());
    }

    let gap = mock.chunk_gap;
    let body = stream::iter(lines).then(move |line| async move {
        tokio::time::sleep(gap).await;
        Ok::<_, Infallible>(format!("{}\n", line))
    });
    Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn spawn_mock(mock: MockOllama) -> String {
    let app = Router::new()
        .route("/api/chat", post(chat))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: String, timeout_secs: u64, max_tool_rounds: usize) -> OllamaChat {
    OllamaChat::new(&LlmConfig {
        base_url,
        timeout_secs,
        max_tool_rounds,
        ..Default::default()
    })
    .unwrap()
}

fn messages() -> Vec<Message> {
    vec![
        Message::system("Answer with citations."),
        Message::user("What is the citation for Hadley v. Baxendale?"),
    ]
}

#[tokio::test]
async fn test_tool_result_is_sent_back_to_the_model() {
    let mock = MockOllama::default();
    let chat = client(spawn_mock(mock.clone()).await, 30, 3);

    let answer = chat
        .generate(&messages(), &ToolRegistry::with_builtins())
        .await
        .unwrap();
    assert_eq!(answer, "Hadley v. Baxendale");

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["stream"], false);
    assert_eq!(requests[0]["tools"][0]["function"]["name"], "citation_lookup");

    let followup = requests[1]["messages"].as_array().unwrap();
    let call = &followup[followup.len() - 2];
    assert_eq!(call["role"], "assistant");
    assert_eq!(call["tool_calls"][0]["function"]["name"], "citation_lookup");
    let result = &followup[followup.len() - 1];
    assert_eq!(result["role"], "tool");
    assert_eq!(result["content"], "9 Exch 341 (1854)");
}

#[tokio::test]
async fn test_final_round_offers_no_tools() {
    let mock = MockOllama {
        greedy: true,
        ..Default::default()
    };
    let chat = client(spawn_mock(mock.clone()).await, 30, 1);

    let answer = chat
        .generate(&messages(), &ToolRegistry::with_builtins())
        .await
        .unwrap();
    assert_eq!(answer, "Hadley v. Baxendale");

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].get("tools").is_some());
    assert!(requests[1].get("tools").is_none());
}

#[tokio::test]
async fn test_stream_reopens_after_tool_call() {
    let mock = MockOllama::default();
    let chat = client(spawn_mock(mock.clone()).await, 30, 3);

    let fragments: Vec<String> = chat
        .generate_stream(messages(), Arc::new(ToolRegistry::with_builtins()))
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(fragments, FRAGMENTS);

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r["stream"] == true));
    let reopened = requests[1]["messages"].as_array().unwrap();
    let result = reopened.last().unwrap();
    assert_eq!(result["role"], "tool");
    assert_eq!(result["content"], "9 Exch 341 (1854)");
}

#[tokio::test]
async fn test_slow_stream_outlives_request_timeout() {
    let mock = MockOllama {
        chunk_gap: Duration::from_millis(400),
        ..Default::default()
    };
    let chat = client(spawn_mock(mock.clone()).await, 1, 3);

    let started = Instant::now();
    let mut stream = chat
        .generate_stream(messages(), Arc::new(ToolRegistry::new()))
        .await
        .unwrap();
    let mut text = String::new();
    while let Some(item) = stream.next().await {
        text.push_str(&item.expect("no fragment should time out"));
    }
    assert_eq!(text, "Hadley v. Baxendale");
    assert!(started.elapsed() > Duration::from_secs(1));
}
