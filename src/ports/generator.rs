//! Reply Generator Port - interface to the reply generation
//! collaborator.
//!
//! Replies stream back as plain text fragments. The orchestrator feeds
//! them through the frame splitter so speech can start before the
//! stream (and the trailing structured payload) completes. A generator
//! failure substitutes the canned fallback utterance for the turn's
//! prompt purpose; the turn still completes.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::dialogue::{DialogueState, SpeakDirective};
use crate::domain::session::SessionContext;

/// A stream of generated text fragments.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, GeneratorError>> + Send>>;

/// One reply generation request: the state the engine landed in, a
/// snapshot of the session, and the attempt-numbered prompt directive.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub state: DialogueState,
    pub directive: SpeakDirective,
    pub context: SessionContext,
}

impl ReplyRequest {
    /// Creates a request from the transition result.
    pub fn new(state: DialogueState, directive: SpeakDirective, context: SessionContext) -> Self {
        Self {
            state,
            directive,
            context,
        }
    }
}

/// Port for the external reply generation collaborator.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Starts generating a reply, returning its fragment stream.
    async fn generate(&self, request: ReplyRequest) -> Result<ReplyStream, GeneratorError>;
}

/// Generation collaborator errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeneratorError {
    /// The collaborator did not answer in time.
    #[error("generation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u32 },

    /// The collaborator is unreachable or unhealthy.
    #[error("generator unavailable: {message}")]
    Unavailable { message: String },

    /// Network failure during the request.
    #[error("network error: {0}")]
    Network(String),

    /// The stream broke mid-reply.
    #[error("stream error: {0}")]
    Stream(String),
}

impl GeneratorError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a stream error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }
}
