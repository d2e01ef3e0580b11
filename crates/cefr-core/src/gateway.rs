//! LLM gateway: prompt construction, reply validation and an HTTP client.
//!
//! The selector only sees the [`LlmGateway`] trait. Replies are parsed into
//! [`GeneratedQuestion`] and validated here, so a malformed model reply never
//! reaches the question store.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{DiagError, GatewayErrorKind, Result};
use crate::model::{DifficultyLevel, NewQuestion, QuestionOptions, SkillType};

/// Matches a reply wrapped in a Markdown code fence.
static CODE_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").ok());

const QUESTION_SYSTEM_PROMPT: &str = "You are an expert English language teacher creating \
CEFR-aligned assessment questions. Always respond with valid JSON only.";

const HINT_SYSTEM_PROMPT: &str =
    "You are a supportive English language tutor providing helpful hints without revealing answers.";

const HINT_MAX_TOKENS: u32 = 200;

/// Correctness over the responses the selector looked at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentCorrectness {
    /// Correct answers among the recent responses.
    pub correct: usize,
    /// Number of recent responses.
    pub total: usize,
}

impl RecentCorrectness {
    fn describe(self) -> String {
        if self.total == 0 {
            "First question".to_string()
        } else {
            format!(
                "User has answered {} out of {} correctly.",
                self.correct, self.total
            )
        }
    }
}

/// Everything the gateway needs to generate one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPrompt {
    /// Skill to assess.
    pub skill_type: SkillType,
    /// Target difficulty.
    pub difficulty_level: DifficultyLevel,
    /// The taker's learning purpose.
    pub purpose: String,
    /// Recent performance of the taker.
    pub recent: RecentCorrectness,
}

impl QuestionPrompt {
    /// Renders the user message sent to the model.
    #[must_use]
    pub fn render(&self) -> String {
        let cefr = self.difficulty_level.cefr();
        format!(
            "Generate a {skill} question at CEFR {cefr} level for someone learning English for {purpose} purposes.\n\
             \n\
             Previous performance: {performance}\n\
             \n\
             Requirements:\n\
             - Difficulty: CEFR {cefr}\n\
             - Type: {skill}\n\
             - Format: Return a JSON object with these fields:\n\
             {{\n\
             \x20 \"question\": \"The question text\",\n\
             \x20 \"options\": {{\"A\": \"option1\", \"B\": \"option2\", \"C\": \"option3\", \"D\": \"option4\"}},\n\
             \x20 \"correct_answer\": \"A\",\n\
             \x20 \"explanation\": \"Brief explanation of why this is correct\"\n\
             }}\n\
             \n\
             Make it relevant to {purpose} context.",
            skill = self.skill_type,
            purpose = self.purpose,
            performance = self.recent.describe(),
        )
    }
}

/// Everything the gateway needs to write a hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintPrompt {
    /// The question text.
    pub content: String,
    /// Skill the question assesses.
    pub skill_type: SkillType,
    /// Difficulty of the question.
    pub difficulty_level: DifficultyLevel,
}

impl HintPrompt {
    /// Renders the user message sent to the model.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "Provide a helpful hint for this question WITHOUT revealing the answer:\n\
             \n\
             Question: {content}\n\
             Type: {skill}\n\
             Difficulty: {cefr}\n\
             \n\
             The hint should:\n\
             - Guide thinking process\n\
             - Explain relevant grammar/vocabulary concepts\n\
             - NOT give away the answer\n\
             - Be encouraging and educational\n\
             \n\
             Return only the hint text as a string.",
            content = self.content,
            skill = self.skill_type,
            cefr = self.difficulty_level.cefr(),
        )
    }
}

/// A question as returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    /// Question text.
    pub question: String,
    /// Answer options keyed by letter.
    pub options: QuestionOptions,
    /// Key of the correct option.
    pub correct_answer: String,
    /// Why the answer is correct.
    #[serde(default)]
    pub explanation: Option<String>,
}

impl GeneratedQuestion {
    /// Normalizes keys and checks the payload is a usable multiple-choice question.
    ///
    /// Option keys and the answer are trimmed and uppercased. The question and
    /// every option must be non-empty, there must be at least two options, and
    /// the answer must name one of them.
    pub fn validate(self) -> Result<Self> {
        let question = self.question.trim().to_string();
        if question.is_empty() {
            return Err(invalid_payload("question text is empty"));
        }

        let mut options = QuestionOptions::new();
        for (key, text) in self.options {
            let key = key.trim().to_uppercase();
            let text = text.trim().to_string();
            if key.is_empty() || text.is_empty() {
                return Err(invalid_payload("option key or text is empty"));
            }
            if options.insert(key.clone(), text).is_some() {
                return Err(invalid_payload(format!("duplicate option key '{key}'")));
            }
        }
        if options.len() < 2 {
            return Err(invalid_payload(format!(
                "expected at least 2 options, got {}",
                options.len()
            )));
        }

        let correct_answer = self.correct_answer.trim().to_uppercase();
        if !options.contains_key(&correct_answer) {
            return Err(invalid_payload(format!(
                "correct_answer '{correct_answer}' is not one of the options"
            )));
        }

        let explanation = self
            .explanation
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        Ok(Self {
            question,
            options,
            correct_answer,
            explanation,
        })
    }

    /// Tags the question with the skill and level it was requested for.
    #[must_use]
    pub fn into_new_question(
        self,
        skill_type: SkillType,
        difficulty_level: DifficultyLevel,
    ) -> NewQuestion {
        NewQuestion {
            skill_type,
            difficulty_level,
            content: self.question,
            options: self.options,
            correct_answer: self.correct_answer,
            explanation: self.explanation,
        }
    }
}

fn invalid_payload(message: impl Into<String>) -> DiagError {
    DiagError::generation_failed(GatewayErrorKind::InvalidPayload, message)
}

/// Removes a surrounding Markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map_or_else(|| raw.trim(), |m| m.as_str())
}

/// Parses and validates a model reply.
///
/// # Examples
///
/// ```
/// use cefr_core::gateway::parse_generated_question;
///
/// let reply = "```json\n{\"question\": \"Pick one\", \"options\": {\"a\": \"x\", \"b\": \"y\"}, \"correct_answer\": \"b\"}\n```";
/// let question = parse_generated_question(reply).unwrap();
/// assert_eq!(question.correct_answer, "B");
/// ```
pub fn parse_generated_question(raw: &str) -> Result<GeneratedQuestion> {
    let body = strip_code_fence(raw);
    let parsed: GeneratedQuestion = serde_json::from_str(body)
        .map_err(|e| invalid_payload(format!("reply is not a question object: {e}")))?;
    parsed.validate()
}

/// Source of generated questions and hints.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Generates one validated multiple-choice question.
    async fn generate_question(&self, prompt: &QuestionPrompt) -> Result<GeneratedQuestion>;

    /// Generates a hint that does not give the answer away.
    async fn generate_hint(&self, prompt: &HintPrompt) -> Result<String>;
}

// ============================================================================
// HttpGateway
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    requires_api_key: bool,
    temperature: f32,
    max_tokens: u32,
}

impl HttpGateway {
    /// Builds a gateway from configuration, reading the API key from the
    /// configured environment variable.
    ///
    /// A missing key is not an error here; requests fail with an
    /// authentication error instead, so a server with a seeded question bank
    /// still starts.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() && config.provider.requires_api_key() {
            warn!(
                env = %config.api_key_env,
                "LLM API key not set; question generation will fail"
            );
        }
        Self::with_api_key(config, api_key)
    }

    /// Builds a gateway with an explicit API key.
    pub fn with_api_key(config: &GatewayConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                DiagError::config_validation(
                    format!("failed to build HTTP client: {e}"),
                    "Check the TLS configuration of this host",
                )
            })?;

        Ok(Self {
            client,
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
            requires_api_key: config.provider.requires_api_key(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        json_reply: bool,
    ) -> Result<String> {
        if self.requires_api_key && self.api_key.is_none() {
            return Err(DiagError::generation_failed(
                GatewayErrorKind::Authentication,
                format!("environment variable {} is not set", self.api_key_env),
            ));
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens,
            response_format: json_reply.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending chat completion request");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            let kind = if e.is_timeout() || e.is_connect() || e.is_request() {
                GatewayErrorKind::Network
            } else {
                GatewayErrorKind::Other
            };
            DiagError::generation_failed(kind, e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "LLM gateway returned an error status");
            return Err(DiagError::generation_failed(
                GatewayErrorKind::from_status(status.as_u16()),
                format!("HTTP {status}: {body}"),
            ));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| invalid_payload(format!("unreadable completion: {e}")))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| invalid_payload("completion has no content"))
    }
}

#[async_trait]
impl LlmGateway for HttpGateway {
    async fn generate_question(&self, prompt: &QuestionPrompt) -> Result<GeneratedQuestion> {
        let raw = self
            .complete(QUESTION_SYSTEM_PROMPT, &prompt.render(), self.max_tokens, true)
            .await?;
        let question = parse_generated_question(&raw)?;
        info!(
            skill = %prompt.skill_type,
            level = prompt.difficulty_level.get(),
            cefr = %prompt.difficulty_level.cefr(),
            "Generated adaptive question"
        );
        Ok(question)
    }

    async fn generate_hint(&self, prompt: &HintPrompt) -> Result<String> {
        let raw = self
            .complete(HINT_SYSTEM_PROMPT, &prompt.render(), HINT_MAX_TOKENS, false)
            .await?;
        Ok(raw.trim().trim_matches('"').to_string())
    }
}
