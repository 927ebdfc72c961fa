//! Anthropic-backed classifier and reply generator.
//!
//! Both collaborators ride the same Messages API client: classification
//! is a single non-streaming completion that must answer with a JSON
//! decision record, and reply generation streams SSE fragments that the
//! orchestrator pipes through the frame splitter.
//!
//! # Configuration
//!
//! ```ignore
//! let config = AnthropicConfig::new(api_key)
//!     .with_model("claude-3-5-haiku-20241022")
//!     .with_base_url("https://api.anthropic.com");
//!
//! let dialogue = AnthropicDialogue::new(config);
//! ```

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::domain::dialogue::{ClassifiedTurn, PromptPurpose};
use crate::domain::frame::{DecisionFrame, CLOSE_SENTINEL, OPEN_SENTINEL};
use crate::domain::session::SessionContext;
use crate::ports::{
    ClassifierError, GeneratorError, ReplyGenerator, ReplyRequest, ReplyStream, TurnClassifier,
};

/// Anthropic API version header value.
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic-backed collaborators.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication.
    api_key: Secret<String>,
    /// Model to use.
    pub model: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl AnthropicConfig {
    /// Creates a new configuration with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            model: "claude-3-5-haiku-20241022".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Anthropic Messages API client implementing both collaborator ports.
pub struct AnthropicDialogue {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicDialogue {
    /// Creates the client with the given configuration.
    pub fn new(config: AnthropicConfig) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GeneratorError::network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }

    async fn send(
        &self,
        request: &AnthropicRequest,
    ) -> Result<Response, reqwest::Error> {
        self.client
            .post(self.messages_url())
            .header("x-api-key", self.config.api_key())
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
    }

    /// System prompt for the classifier: answer with the decision
    /// record only.
    fn classifier_system_prompt(ctx: &SessionContext) -> String {
        format!(
            "You classify one caller utterance from a phone booking conversation.\n\
             Business: {business}. Conversation phase: {phase:?}. Current topic: {topic}.\n\
             Progress so far: {summary}.\n\n\
             Answer with ONLY a JSON object, no prose:\n\
             {{\"intent\": one of greeting | service_provided | time_provided | contact_provided | \
             location_provided | affirmative | negative | digression_question | correction | unclear, \
             \"confidence\": 0.0-1.0, \
             \"entities\": {{optional string map; use keys service, time_window, contact, location, \
             location_kind, slot, topic}}}}",
            business = ctx.organization().business_name,
            phase = ctx.phase,
            topic = ctx.current_topic(),
            summary = if ctx.progress_summary.is_empty() {
                "nothing confirmed yet"
            } else {
                &ctx.progress_summary
            },
        )
    }

    /// System prompt for the generator: speak first, then emit the
    /// framed decision record.
    fn generator_system_prompt(request: &ReplyRequest) -> String {
        let ctx = &request.context;
        let goal = match request.directive.purpose {
            PromptPurpose::Greeting => "Greet the caller briefly and ask what they want to book.".to_string(),
            PromptPurpose::CollectSlot(slot) => {
                format!("Ask the caller for their {}.", slot.as_str().replace('_', " "))
            }
            PromptPurpose::ConfirmSlot(slot) => format!(
                "Read back the caller's {} and ask them to confirm it.",
                slot.as_str().replace('_', " ")
            ),
            PromptPurpose::Clarify => "Politely say you did not catch that and ask again.".to_string(),
            PromptPurpose::AnswerDigression => {
                "Answer the caller's side question briefly using the business facts.".to_string()
            }
            PromptPurpose::ResumeAfterDigression => {
                "Return the conversation to the booking where it left off.".to_string()
            }
            PromptPurpose::FinalSummary => {
                "Read back everything confirmed and ask whether to book it.".to_string()
            }
            PromptPurpose::BookingConfirmed => "Tell the caller the booking is done.".to_string(),
            PromptPurpose::CallbackNotice => {
                "Tell the caller a person will call them right back.".to_string()
            }
            PromptPurpose::Apology => {
                "Apologize that the booking could not be completed.".to_string()
            }
        };

        format!(
            "You are the voice assistant for {business}. Keep replies to one or two short \
             spoken sentences.\n\
             Dialogue state: {state}. Attempt number: {attempt}.\n\
             Confirmed so far: {summary}.\n\
             Business services: {services}.\n\
             {hours}\n\
             Goal for this reply: {goal}\n\n\
             After the spoken reply, append exactly one {open}JSON{close} block containing \
             {{\"intent\", \"confidence\", \"entities\"}} describing the decision you expect \
             the caller to respond with. Never mention the block aloud.",
            business = ctx.organization().business_name,
            state = request.state,
            attempt = request.directive.attempt,
            summary = if ctx.progress_summary.is_empty() {
                "nothing yet"
            } else {
                &ctx.progress_summary
            },
            services = ctx.organization().services.join(", "),
            hours = ctx
                .organization()
                .hours_blurb
                .as_deref()
                .unwrap_or(""),
            goal = goal,
            open = OPEN_SENTINEL,
            close = CLOSE_SENTINEL,
        )
    }

    fn classify_request(&self, transcript: &str, ctx: &SessionContext) -> AnthropicRequest {
        AnthropicRequest {
            model: self.config.model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: transcript.to_string(),
            }],
            system: Some(Self::classifier_system_prompt(ctx)),
            max_tokens: 300,
            temperature: Some(0.0),
            stream: None,
        }
    }

    fn generate_request(&self, request: &ReplyRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: self.config.model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: format!(
                    "Produce the next reply. Conversation topic: {}.",
                    request.context.current_topic()
                ),
            }],
            system: Some(Self::generator_system_prompt(request)),
            max_tokens: 500,
            temperature: Some(0.7),
            stream: Some(true),
        }
    }
}

#[async_trait]
impl TurnClassifier for AnthropicDialogue {
    async fn classify(
        &self,
        transcript: &str,
        ctx: &SessionContext,
    ) -> Result<ClassifiedTurn, ClassifierError> {
        let request = self.classify_request(transcript, ctx);
        let response = self.send(&request).await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Timeout {
                    timeout_secs: self.config.timeout.as_secs() as u32,
                }
            } else {
                ClassifierError::network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::unavailable(format!(
                "status {}: {}",
                status, body
            )));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::parse(e.to_string()))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| (block.block_type == "text").then_some(block.text).flatten())
            .collect::<Vec<_>>()
            .join("");

        // The model was told to answer with bare JSON; tolerate stray
        // prose around it by scanning for the outermost object.
        let json = extract_json_object(&text).unwrap_or(&text);
        let frame = DecisionFrame::parse(json);
        Ok(frame.into_classified(transcript))
    }
}

#[async_trait]
impl ReplyGenerator for AnthropicDialogue {
    async fn generate(&self, request: ReplyRequest) -> Result<ReplyStream, GeneratorError> {
        let api_request = self.generate_request(&request);
        let response = self.send(&api_request).await.map_err(|e| {
            if e.is_timeout() {
                GeneratorError::Timeout {
                    timeout_secs: self.config.timeout.as_secs() as u32,
                }
            } else {
                GeneratorError::network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::unavailable(format!(
                "status {}: {}",
                status, body
            )));
        }

        let fragments = response
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    parse_sse_fragments(&text)
                }
                Err(e) => vec![Err(GeneratorError::stream(e.to_string()))],
            })
            .flat_map(stream::iter);

        Ok(Box::pin(fragments))
    }
}

/// Parses Anthropic SSE lines into text fragments.
///
/// Only `content_block_delta` events carry spoken text; `error` events
/// become stream errors; everything else is protocol bookkeeping.
fn parse_sse_fragments(text: &str) -> Vec<Result<String, GeneratorError>> {
    let mut results = Vec::new();
    let mut current_event = String::new();

    for line in text.lines() {
        if let Some(event_type) = line.strip_prefix("event: ") {
            current_event = event_type.to_string();
        } else if let Some(data) = line.strip_prefix("data: ") {
            match current_event.as_str() {
                "content_block_delta" => {
                    if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) {
                        if let Some(text) = delta.delta.text {
                            if !text.is_empty() {
                                results.push(Ok(text));
                            }
                        }
                    }
                }
                "error" => {
                    let message = serde_json::from_str::<StreamErrorEvent>(data)
                        .ok()
                        .and_then(|e| e.error.message)
                        .unwrap_or_else(|| "stream error".to_string());
                    warn!(error = %message, "anthropic stream reported an error");
                    results.push(Err(GeneratorError::stream(message)));
                }
                _ => {}
            }
        }
    }

    results
}

/// Finds the outermost JSON object in a text answer.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

// ----- Anthropic API Types -----

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: TextDelta,
}

#[derive(Debug, Deserialize)]
struct TextDelta {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorEvent {
    error: StreamErrorContent,
}

#[derive(Debug, Deserialize)]
struct StreamErrorContent {
    message: Option<String>,
}
