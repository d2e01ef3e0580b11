//! End-to-end exam flow over HTTP against a seeded SQLite database.
//!
//! The server runs on an ephemeral port with a scripted gateway, so no
//! network access to an LLM provider is needed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cefr_core::gateway::{GeneratedQuestion, HintPrompt, LlmGateway, QuestionPrompt};
use cefr_core::store::{ExamStore, ResponseLog};
use cefr_core::{create_router, AppState, ExamEngine};
use cefr_report::{ExamReport, MarkdownGenerator};
use cefr_store::{load_question_bank, SqliteStore};
use serde_json::{json, Value};
use uuid::Uuid;

const USER: &str = "learner-42";

/// Gateway that always produces the same two-option question, answer "B".
#[derive(Default)]
struct ScriptedGateway {
    questions: AtomicUsize,
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn generate_question(
        &self,
        prompt: &QuestionPrompt,
    ) -> cefr_core::Result<GeneratedQuestion> {
        self.questions.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedQuestion {
            question: format!(
                "Generated {} question at level {}",
                prompt.skill_type,
                prompt.difficulty_level.get()
            ),
            options: BTreeMap::from([
                ("A".to_string(), "first".to_string()),
                ("B".to_string(), "second".to_string()),
            ]),
            correct_answer: "B".to_string(),
            explanation: None,
        })
    }

    async fn generate_hint(&self, prompt: &HintPrompt) -> cefr_core::Result<String> {
        Ok(format!("Think about {}.", prompt.skill_type))
    }
}

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/question_bank.json")
}

struct TestServer {
    base: String,
    store: Arc<SqliteStore>,
    gateway: Arc<ScriptedGateway>,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(SqliteStore::open(dir.path().join("cefr.db")).expect("open db"));
        let bank = load_question_bank(&fixture_path()).expect("Failed to load fixture bank");
        store.seed(bank).expect("Failed to seed");

        let gateway = Arc::new(ScriptedGateway::default());
        let engine = ExamEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            gateway.clone(),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let router = create_router(AppState::new(engine));
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        Self {
            base: format!("http://{addr}/api"),
            store,
            gateway,
            client: reqwest::Client::new(),
            _dir: dir,
            _handle: handle,
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .header("x-user-id", USER)
            .send()
            .await
            .expect("Request failed");
        Self::read(response).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (u16, Value) {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base))
            .header("x-user-id", USER);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.expect("Request failed");
        Self::read(response).await
    }

    async fn read(response: reqwest::Response) -> (u16, Value) {
        let status = response.status().as_u16();
        let text = response.text().await.expect("Failed to read body");
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).expect("Body is not JSON")
        };
        (status, value)
    }

    async fn answer(&self, exam_id: &str, question: &Value, answer: &str) -> Value {
        let (status, receipt) = self
            .post(
                &format!("/exams/{exam_id}/answers"),
                Some(json!({
                    "question_id": question["id"],
                    "user_answer": answer,
                    "time_taken_seconds": 15
                })),
            )
            .await;
        assert_eq!(status, 200, "answer rejected: {receipt}");
        receipt
    }
}

#[test]
fn test_fixture_bank_loads() {
    let bank = load_question_bank(&fixture_path()).expect("Failed to load fixture bank");
    assert_eq!(bank.len(), 3);
    assert!(bank.iter().all(|q| q.correct_answer == "A"));
}

#[tokio::test]
async fn test_full_exam_flow() {
    let server = TestServer::start().await;

    let (status, exam) = server
        .post(
            "/exams",
            Some(json!({"exam_type": "placement", "learning_purpose": "travel"})),
        )
        .await;
    assert_eq!(status, 201);
    let exam_id = exam["id"].as_str().expect("exam id").to_string();
    assert_eq!(exam["learning_purpose"], "travel");

    // 1. Empty history: grammar at level 3, served from the bank.
    let (status, first) = server.get(&format!("/exams/{exam_id}/next")).await;
    assert_eq!(status, 200);
    assert_eq!(first["skill_type"], "grammar");
    assert_eq!(first["difficulty_level"], 3);
    assert_eq!(first["source"], "stored");
    assert_eq!(first["question"]["question_number"], 1);
    assert!(first["question"].get("correct_answer").is_none());
    let receipt = server.answer(&exam_id, &first["question"], "a").await;
    assert_eq!(receipt["is_correct"], true);
    assert_eq!(receipt["message"], "Correct!");

    // The same question cannot be answered twice.
    let (status, body) = server
        .post(
            &format!("/exams/{exam_id}/answers"),
            Some(json!({"question_id": first["question"]["id"], "user_answer": "B"})),
        )
        .await;
    assert_eq!(status, 409);
    assert!(body["error"].as_str().expect("error").contains("already answered"));

    // 2. One correct answer: vocabulary one level up, still from the bank.
    let (_, second) = server.get(&format!("/exams/{exam_id}/next")).await;
    assert_eq!(second["skill_type"], "vocabulary");
    assert_eq!(second["difficulty_level"], 4);
    assert_eq!(second["source"], "stored");
    assert_eq!(second["question"]["question_number"], 2);
    server.answer(&exam_id, &second["question"], "A").await;

    // 3. Reading at level 5 is not in the bank: generated exactly once.
    let (_, third) = server.get(&format!("/exams/{exam_id}/next")).await;
    assert_eq!(third["skill_type"], "reading");
    assert_eq!(third["difficulty_level"], 5);
    assert_eq!(third["source"], "generated");
    assert_eq!(server.gateway.questions.load(Ordering::SeqCst), 1);
    assert_eq!(server.store.question_count().expect("count"), 4);

    let question_id = third["question"]["id"].as_str().expect("question id");
    let (status, hint) = server
        .get(&format!("/exams/{exam_id}/questions/{question_id}/hint"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(hint["hint"], "Think about reading.");

    let receipt = server.answer(&exam_id, &third["question"], "A").await;
    assert_eq!(receipt["is_correct"], false);
    assert_eq!(receipt["questions_answered"], 3);

    let (_, active) = server.get("/exams/active").await;
    assert_eq!(active["exam"]["id"], exam_id.as_str());
    assert_eq!(active["exam"]["questions_answered"], 3);

    // Results are not available before analysis.
    let (status, _) = server.get(&format!("/exams/{exam_id}/results")).await;
    assert_eq!(status, 409);

    let (status, submitted) = server.post(&format!("/exams/{exam_id}/submit"), None).await;
    assert_eq!(status, 200);
    assert_eq!(submitted["status"], "pending_analysis");

    // No more answers once submitted.
    let (status, _) = server
        .post(
            &format!("/exams/{exam_id}/answers"),
            Some(json!({"question_id": third["question"]["id"], "user_answer": "B"})),
        )
        .await;
    assert_eq!(status, 403);

    let (_, active) = server.get("/exams/active").await;
    assert!(active["exam"].is_null());

    let (status, analysis) = server.post(&format!("/exams/{exam_id}/analyze"), None).await;
    assert_eq!(status, 200);
    assert_eq!(analysis["total_score"], 67);
    assert_eq!(analysis["cefr_level"], "A2");
    assert_eq!(analysis["skill_scores"]["grammar"], 100);
    assert_eq!(analysis["skill_scores"]["reading"], 0);
    assert_eq!(analysis["strong_skills"], json!(["grammar", "vocabulary"]));

    let (status, results) = server.get(&format!("/exams/{exam_id}/results")).await;
    assert_eq!(status, 200);
    assert_eq!(results["exam"]["status"], "completed");
    assert_eq!(results["responses"].as_array().expect("responses").len(), 3);
    assert_eq!(results["responses"][2]["correct_answer"], "B");
    assert_eq!(results["skill_breakdown"]["reading"]["total"], 1);

    let (status, history) = server.get("/users/exam-history").await;
    assert_eq!(status, 200);
    assert_eq!(history["exams"][0]["id"], exam_id.as_str());
    assert_eq!(history["exams"][0]["total_score"], 67);

    let (status, body) = server.get("/users/analytics").await;
    assert_eq!(status, 200);
    let analytics = &body["analytics"];
    assert_eq!(analytics["overall"]["total_exams"], 1);
    assert_eq!(analytics["overall"]["average_score"], 67);
    assert_eq!(analytics["overall"]["highest_level"], "A2");
    assert_eq!(analytics["recent_exams"][0]["total_questions"], 3);
    assert_eq!(analytics["recent_exams"][0]["correct_answers"], 2);
    assert_eq!(
        analytics["skill_performance"]
            .as_array()
            .expect("skills")
            .len(),
        3
    );

    // The stored exam feeds the report generator.
    let exam_uuid = Uuid::parse_str(&exam_id).expect("uuid");
    let stored = ExamStore::get(server.store.as_ref(), exam_uuid)
        .await
        .expect("get exam")
        .expect("exam stored");
    let responses = server
        .store
        .all_for_exam(exam_uuid)
        .await
        .expect("responses");
    let report = ExamReport::from_exam(&stored, &responses).expect("report");
    let markdown = MarkdownGenerator::new(&report).generate();
    assert!(markdown.contains("| CEFR Level | **A2** |"));
    assert!(markdown.contains("| 3 | "));
}

#[tokio::test]
async fn test_missing_identity_is_rejected() {
    let server = TestServer::start().await;
    let response = server
        .client
        .post(format!("{}/exams", server.base))
        .json(&json!({}))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn test_other_users_cannot_touch_an_exam() {
    let server = TestServer::start().await;
    let (_, exam) = server.post("/exams", Some(json!({}))).await;
    let exam_id = exam["id"].as_str().expect("exam id");

    let response = server
        .client
        .get(format!("{}/exams/{exam_id}/next", server.base))
        .header("x-user-id", "someone-else")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 403);

    // Analysis of a foreign exam is refused the same way as a missing one.
    let response = server
        .client
        .post(format!("{}/exams/{exam_id}/analyze", server.base))
        .header("x-user-id", "someone-else")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 403);

    let (status, _) = server
        .post(&format!("/exams/{}/analyze", Uuid::new_v4()), None)
        .await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn test_analyze_in_progress_exam_is_refused() {
    let server = TestServer::start().await;
    let (_, exam) = server.post("/exams", Some(json!({}))).await;
    let exam_id = exam["id"].as_str().expect("exam id");

    let (_, question) = server.get(&format!("/exams/{exam_id}/next")).await;
    server.answer(exam_id, &question["question"], "A").await;

    let (status, body) = server.post(&format!("/exams/{exam_id}/analyze"), None).await;
    assert_eq!(status, 403);
    assert!(body["error"].as_str().expect("error").contains("Access denied"));
}

#[tokio::test]
async fn test_history_lists_only_own_exams_newest_first() {
    let server = TestServer::start().await;
    let (_, older) = server.post("/exams", Some(json!({}))).await;
    server
        .post(&format!("/exams/{}/submit", older["id"].as_str().expect("id")), None)
        .await;
    let (_, newer) = server
        .post("/exams", Some(json!({"exam_type": "full"})))
        .await;

    let response = server
        .client
        .post(format!("{}/exams", server.base))
        .header("x-user-id", "someone-else")
        .json(&json!({}))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 201);

    let (status, history) = server.get("/users/exam-history").await;
    assert_eq!(status, 200);
    let exams = history["exams"].as_array().expect("exams");
    assert_eq!(exams.len(), 2);
    assert_eq!(exams[0]["id"], newer["id"]);
    assert_eq!(exams[0]["status"], "in_progress");
    assert_eq!(exams[1]["id"], older["id"]);
    assert_eq!(exams[1]["status"], "pending_analysis");

    // Nothing is completed yet.
    let (_, body) = server.get("/users/analytics").await;
    assert_eq!(body["analytics"]["overall"]["total_exams"], 0);
    assert!(body["analytics"]["overall"]["average_score"].is_null());
}
