//! Turn Classifier Port - interface to the intent classification
//! collaborator.
//!
//! The engine never parses raw text; every utterance arrives as a
//! [`ClassifiedTurn`]. A classifier failure or timeout degrades to an
//! `unclear` intent with zero confidence and counts toward the
//! session's retry budget - it is never surfaced to the transport
//! layer as an error.

use async_trait::async_trait;

use crate::domain::dialogue::ClassifiedTurn;
use crate::domain::session::SessionContext;

/// Port for the external intent classification collaborator.
#[async_trait]
pub trait TurnClassifier: Send + Sync {
    /// Classifies one transcript in the context of its session.
    async fn classify(
        &self,
        transcript: &str,
        ctx: &SessionContext,
    ) -> Result<ClassifiedTurn, ClassifierError>;
}

/// Classification collaborator errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifierError {
    /// The collaborator did not answer in time.
    #[error("classification timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u32 },

    /// The collaborator is unreachable or unhealthy.
    #[error("classifier unavailable: {message}")]
    Unavailable { message: String },

    /// Network failure during the request.
    #[error("network error: {0}")]
    Network(String),

    /// The collaborator's answer could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ClassifierError {
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

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_display_their_cause() {
        let err = ClassifierError::Timeout { timeout_secs: 5 };
        assert_eq!(err.to_string(), "classification timed out after 5s");

        let err = ClassifierError::unavailable("connection refused");
        assert_eq!(err.to_string(), "classifier unavailable: connection refused");
    }
}
