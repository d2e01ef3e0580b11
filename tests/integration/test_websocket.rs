//! Integration tests for the per-exam WebSocket event stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cefr_core::gateway::{GeneratedQuestion, HintPrompt, LlmGateway, QuestionPrompt};
use cefr_core::websocket::{EventBroadcaster, ExamEvent};
use cefr_core::{
    create_router, AppState, ExamEngine, ExamStatus, GatewayErrorKind, InMemoryStore, SkillType,
};
use cefr_store::load_question_bank;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;
use uuid::Uuid;

const USER: &str = "learner-ws";

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Gateway that never generates; the fixture bank covers what these tests ask for.
struct OfflineGateway;

#[async_trait]
impl LlmGateway for OfflineGateway {
    async fn generate_question(
        &self,
        _prompt: &QuestionPrompt,
    ) -> cefr_core::Result<GeneratedQuestion> {
        Err(cefr_core::DiagError::generation_failed(
            GatewayErrorKind::Network,
            "offline",
        ))
    }

    async fn generate_hint(&self, _prompt: &HintPrompt) -> cefr_core::Result<String> {
        Ok("offline".to_string())
    }
}

struct TestServer {
    addr: String,
    broadcaster: EventBroadcaster,
    client: reqwest::Client,
    _handle: tokio::task::JoinHandle<()>,
}

/// Spawns the API on an ephemeral port backed by the fixture bank.
async fn spawn_test_server() -> TestServer {
    let bank_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/question_bank.json");
    let bank = load_question_bank(&bank_path).expect("Failed to load fixture bank");
    let store = Arc::new(InMemoryStore::with_questions(bank));
    let engine = ExamEngine::in_memory(store, Arc::new(OfflineGateway));

    let state = AppState::new(engine);
    let broadcaster = state.broadcaster.clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener
        .local_addr()
        .expect("Failed to get local addr")
        .to_string();
    let router = create_router(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    TestServer {
        addr,
        broadcaster,
        client: reqwest::Client::new(),
        _handle: handle,
    }
}

impl TestServer {
    async fn start_exam(&self) -> Uuid {
        let body: Value = self
            .client
            .post(format!("http://{}/api/exams", self.addr))
            .header("x-user-id", USER)
            .json(&json!({}))
            .send()
            .await
            .expect("Request failed")
            .json()
            .await
            .expect("Invalid JSON");
        body["id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .expect("exam id")
    }

    async fn next_question(&self, exam_id: Uuid) -> Value {
        self.client
            .get(format!("http://{}/api/exams/{exam_id}/next", self.addr))
            .header("x-user-id", USER)
            .send()
            .await
            .expect("Request failed")
            .json()
            .await
            .expect("Invalid JSON")
    }

    async fn connect(&self, exam_id: Uuid) -> WsClient {
        let url = format!("ws://{}/ws/exams/{exam_id}", self.addr);
        let (stream, _) = connect_async(url)
            .await
            .expect("Failed to connect to WebSocket");
        stream
    }
}

/// Receives the next text message as an [`ExamEvent`], answering pings.
async fn receive_event(client: &mut WsClient) -> ExamEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Waits until the server has subscribed `count` sockets.
async fn wait_for_subscribers(broadcaster: &EventBroadcaster, count: usize) {
    for _ in 0..50 {
        if broadcaster.receiver_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Server never subscribed {count} clients");
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_connected_event_carries_progress() {
    let server = spawn_test_server().await;
    let exam_id = server.start_exam().await;

    let mut client = server.connect(exam_id).await;
    let event = receive_event(&mut client).await;

    match event {
        ExamEvent::Connected(payload) => {
            assert_eq!(payload.progress.exam_id, exam_id);
            assert_eq!(payload.progress.status, ExamStatus::InProgress);
            assert_eq!(payload.progress.questions_answered, 0);
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_exam_is_rejected() {
    let server = spawn_test_server().await;
    let url = format!("ws://{}/ws/exams/{}", server.addr, Uuid::new_v4());

    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 404);
        }
        Err(other) => panic!("Expected an HTTP 404 rejection, got: {other:?}"),
        Ok(_) => panic!("Unknown exam was upgraded"),
    }
}

// ============================================================================
// Event Tests
// ============================================================================

#[tokio::test]
async fn test_http_activity_is_streamed() {
    let server = spawn_test_server().await;
    let exam_id = server.start_exam().await;

    let mut client = server.connect(exam_id).await;
    assert!(matches!(
        receive_event(&mut client).await,
        ExamEvent::Connected(_)
    ));

    let selection = server.next_question(exam_id).await;
    match receive_event(&mut client).await {
        ExamEvent::QuestionServed(payload) => {
            assert_eq!(payload.exam_id, exam_id);
            assert_eq!(payload.skill_type, SkillType::Grammar);
            assert_eq!(payload.difficulty_level.get(), 3);
            assert_eq!(payload.question_number, 1);
            assert_eq!(payload.question_id.to_string(), selection["question"]["id"]);
        }
        other => panic!("Expected QuestionServed event, got: {other:?}"),
    }

    let response = server
        .client
        .post(format!("http://{}/api/exams/{exam_id}/answers", server.addr))
        .header("x-user-id", USER)
        .json(&json!({
            "question_id": selection["question"]["id"],
            "user_answer": "A",
            "time_taken_seconds": 12
        }))
        .send()
        .await
        .expect("Request failed");
    assert!(response.status().is_success());

    match receive_event(&mut client).await {
        ExamEvent::AnswerRecorded(payload) => {
            assert!(payload.is_correct);
            assert_eq!(payload.questions_answered, 1);
        }
        other => panic!("Expected AnswerRecorded event, got: {other:?}"),
    }

    let response = server
        .client
        .post(format!("http://{}/api/exams/{exam_id}/submit", server.addr))
        .header("x-user-id", USER)
        .send()
        .await
        .expect("Request failed");
    assert!(response.status().is_success());
    assert!(matches!(
        receive_event(&mut client).await,
        ExamEvent::ExamSubmitted(_)
    ));
}

#[tokio::test]
async fn test_events_stay_in_their_exam_room() {
    let server = spawn_test_server().await;
    let watched = server.start_exam().await;
    let other = server.start_exam().await;

    let mut client = server.connect(watched).await;
    receive_event(&mut client).await;
    wait_for_subscribers(&server.broadcaster, 1).await;

    // Activity on the other exam first, then on the watched one.
    server.next_question(other).await;
    server.broadcaster.send(ExamEvent::exam_submitted(other));
    server.broadcaster.send(ExamEvent::exam_submitted(watched));

    match receive_event(&mut client).await {
        ExamEvent::ExamSubmitted(payload) => assert_eq!(payload.exam_id, watched),
        other_event => panic!("Expected watched exam event, got: {other_event:?}"),
    }
}

#[tokio::test]
async fn test_multiple_clients_receive_same_event() {
    let server = spawn_test_server().await;
    let exam_id = server.start_exam().await;

    let mut first = server.connect(exam_id).await;
    let mut second = server.connect(exam_id).await;
    receive_event(&mut first).await;
    receive_event(&mut second).await;
    wait_for_subscribers(&server.broadcaster, 2).await;

    server.broadcaster.send(ExamEvent::exam_submitted(exam_id));

    for client in [&mut first, &mut second] {
        assert!(matches!(
            receive_event(client).await,
            ExamEvent::ExamSubmitted(ref p) if p.exam_id == exam_id
        ));
    }
}

#[tokio::test]
async fn test_client_close_is_clean() {
    let server = spawn_test_server().await;
    let exam_id = server.start_exam().await;

    let mut client = server.connect(exam_id).await;
    receive_event(&mut client).await;
    client.close(None).await.expect("Failed to close");

    // The server keeps serving other clients.
    let mut again = server.connect(exam_id).await;
    assert!(matches!(
        receive_event(&mut again).await,
        ExamEvent::Connected(_)
    ));
}
