//! CEFR Diagnostic Core
//!
//! Adaptive English-proficiency exams: question selection, answer grading,
//! CEFR scoring, and the HTTP and WebSocket surface around them.

pub mod api;
pub mod config;
pub mod error;
pub mod exam;
pub mod gateway;
pub mod history;
pub mod model;
pub mod scoring;
pub mod selector;
pub mod service;
pub mod store;
pub mod websocket;

pub use api::{create_router, ApiError, AppState, ErrorResponse, StartExamRequest, UserId};
pub use config::{Config, GatewayConfig, GatewayProvider};
pub use error::{DiagError, GatewayErrorKind, Result};
pub use exam::{ExamOutcome, ExamSession, ExamStatus, ExamType};
pub use gateway::{GeneratedQuestion, HttpGateway, LlmGateway};
pub use history::{ExamSummary, UserAnalytics};
pub use model::{
    CefrLevel, DifficultyLevel, NewQuestion, NewResponse, Question, QuestionForClient,
    ResponseRecord, SkillType,
};
pub use scoring::{AnalysisResult, ScoringEngine};
pub use selector::{AdaptiveSelector, QuestionSource, Selection};
pub use service::{AnswerReceipt, AnswerSubmission, ExamEngine, ExamProgress, ExamResults};
pub use store::{ExamStore, InMemoryStore, QuestionStore, ResponseLog};
pub use websocket::{EventBroadcaster, ExamEvent};
