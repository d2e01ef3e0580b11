//! Exam progress events streamed over WebSocket.
//!
//! Each exam is a room: a client connected to `/ws/exams/{id}` receives a
//! `connected` event with the current progress and then only events for that
//! exam.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client joins, includes current progress
//! - `question_served` - A question was handed to the taker
//! - `answer_recorded` - An answer was graded and stored
//! - `exam_submitted` - The taker submitted the exam
//! - `analysis_complete` - Scores and CEFR level are available
//!
//! # Example
//!
//! ```no_run
//! use cefr_core::websocket::{EventBroadcaster, ExamEvent};
//! use uuid::Uuid;
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(ExamEvent::exam_submitted(Uuid::new_v4()));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::model::{CefrLevel, DifficultyLevel, SkillType};
use crate::selector::{QuestionSource, Selection};
use crate::service::{AnswerReceipt, ExamProgress};

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Seconds between heartbeat pings.
const HEARTBEAT_SECS: u64 = 30;

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Progress of the exam at connection time.
    pub progress: ExamProgress,
}

/// Payload for the `question_served` event. Never carries the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionServedPayload {
    /// The exam.
    pub exam_id: Uuid,
    /// The served question.
    pub question_id: Uuid,
    /// 1-based position of the question.
    pub question_number: u32,
    /// Skill of the question.
    pub skill_type: SkillType,
    /// Difficulty of the question.
    pub difficulty_level: DifficultyLevel,
    /// Whether the question was reused or generated.
    pub source: QuestionSource,
}

/// Payload for the `answer_recorded` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecordedPayload {
    /// The exam.
    pub exam_id: Uuid,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Answers recorded so far.
    pub questions_answered: usize,
    /// When the answer was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `exam_submitted` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamSubmittedPayload {
    /// The exam.
    pub exam_id: Uuid,
    /// When the exam was submitted.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `analysis_complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCompletePayload {
    /// The exam.
    pub exam_id: Uuid,
    /// Overall CEFR band.
    pub cefr_level: CefrLevel,
    /// Overall score.
    pub total_score: u8,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Exam events, serialized as `{"event": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ExamEvent {
    /// Sent when a client joins an exam room.
    Connected(ConnectedPayload),
    /// Sent when a question is served.
    QuestionServed(QuestionServedPayload),
    /// Sent when an answer is recorded.
    AnswerRecorded(AnswerRecordedPayload),
    /// Sent when the exam is submitted.
    ExamSubmitted(ExamSubmittedPayload),
    /// Sent when the exam has been analysed.
    AnalysisComplete(AnalysisCompletePayload),
}

impl ExamEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(progress: ExamProgress) -> Self {
        Self::Connected(ConnectedPayload { progress })
    }

    /// Creates a `QuestionServed` event from a selection.
    #[must_use]
    pub fn question_served(exam_id: Uuid, selection: &Selection) -> Self {
        Self::QuestionServed(QuestionServedPayload {
            exam_id,
            question_id: selection.question.id,
            question_number: selection.question.question_number,
            skill_type: selection.skill_type,
            difficulty_level: selection.difficulty_level,
            source: selection.source,
        })
    }

    /// Creates an `AnswerRecorded` event from a receipt.
    #[must_use]
    pub fn answer_recorded(exam_id: Uuid, receipt: &AnswerReceipt) -> Self {
        Self::AnswerRecorded(AnswerRecordedPayload {
            exam_id,
            is_correct: receipt.is_correct,
            questions_answered: receipt.questions_answered,
            timestamp: Utc::now(),
        })
    }

    /// Creates an `ExamSubmitted` event.
    #[must_use]
    pub fn exam_submitted(exam_id: Uuid) -> Self {
        Self::ExamSubmitted(ExamSubmittedPayload {
            exam_id,
            timestamp: Utc::now(),
        })
    }

    /// Creates an `AnalysisComplete` event.
    #[must_use]
    pub const fn analysis_complete(exam_id: Uuid, cefr_level: CefrLevel, total_score: u8) -> Self {
        Self::AnalysisComplete(AnalysisCompletePayload {
            exam_id,
            cefr_level,
            total_score,
        })
    }

    /// The exam this event belongs to.
    #[must_use]
    pub const fn exam_id(&self) -> Uuid {
        match self {
            Self::Connected(p) => p.progress.exam_id,
            Self::QuestionServed(p) => p.exam_id,
            Self::AnswerRecorded(p) => p.exam_id,
            Self::ExamSubmitted(p) => p.exam_id,
            Self::AnalysisComplete(p) => p.exam_id,
        }
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::QuestionServed(_) => "question_served",
            Self::AnswerRecorded(_) => "answer_recorded",
            Self::ExamSubmitted(_) => "exam_submitted",
            Self::AnalysisComplete(_) => "analysis_complete",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans exam events out to every connected socket. Sockets keep only the
/// events of their own exam.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ExamEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExamEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will see it.
    pub fn send(&self, event: ExamEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Upgrades `/ws/exams/{id}` to a WebSocket joined to that exam's room.
///
/// Unknown exams are rejected with 404 before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    // Subscribe before the snapshot: events published in between may repeat
    // what the snapshot shows, but none are missed.
    let events = state.broadcaster.subscribe();
    let progress = state.engine.progress(exam_id).await?;
    info!(exam_id = %exam_id, "New WebSocket connection request");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, events, progress)))
}

fn encode(event: &ExamEvent) -> Option<String> {
    serde_json::to_string(event)
        .map_err(|e| warn!("Failed to serialize {} event: {}", event.event_name(), e))
        .ok()
}

/// Drives one socket: `connected` first, then room events, with a heartbeat
/// ping every 30 seconds and a disconnect after 3 missed pongs.
async fn handle_socket(
    socket: WebSocket,
    mut events: broadcast::Receiver<ExamEvent>,
    progress: ExamProgress,
) {
    let exam_id = progress.exam_id;
    let (mut sender, mut receiver) = socket.split();

    let Some(connected) = encode(&ExamEvent::connected(progress)) else {
        return;
    };
    if sender.send(Message::Text(connected)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }
    info!(exam_id = %exam_id, "WebSocket client joined exam room");

    let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_SECS));
    // The first tick completes immediately.
    heartbeat.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring client message");
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) if event.exam_id() == exam_id => {
                        let Some(json) = encode(&event) else { continue };
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(exam_id = %exam_id, "Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!(exam_id = %exam_id, "Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!(exam_id = %exam_id, "WebSocket client left exam room");
}
