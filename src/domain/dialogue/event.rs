//! Turn events: what the engine reacts to.
//!
//! User utterances arrive pre-classified; the engine never parses raw
//! text. Collaborator results (booking writes, callback scheduling,
//! digression auto-returns) come back as internal events on the same
//! per-session sequential path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::foundation::{BookingId, CallbackId};
use crate::domain::session::SlotName;

/// Intent categories produced by classification (external collaborator
/// or the local fast path) and by the structured frame of a generated
/// reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Greeting,
    ServiceProvided,
    TimeProvided,
    ContactProvided,
    LocationProvided,
    Affirmative,
    Negative,
    DigressionQuestion,
    Correction,
    #[serde(other)]
    Unclear,
}

impl IntentCategory {
    /// The slot a `*_provided` intent carries, if any.
    pub fn provided_slot(&self) -> Option<SlotName> {
        match self {
            IntentCategory::ServiceProvided => Some(SlotName::Service),
            IntentCategory::TimeProvided => Some(SlotName::TimeWindow),
            IntentCategory::ContactProvided => Some(SlotName::Contact),
            IntentCategory::LocationProvided => Some(SlotName::Location),
            _ => None,
        }
    }
}

/// The three abstract confirmation outcomes the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Affirmative,
    Negative,
    Ambiguous,
}

/// One classified user utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedTurn {
    pub intent: IntentCategory,
    pub confidence: f32,
    #[serde(default)]
    pub entities: HashMap<String, String>,
    #[serde(default)]
    pub raw_text: String,
}

impl ClassifiedTurn {
    /// Creates a classification with no entities.
    pub fn new(intent: IntentCategory, confidence: f32, raw_text: impl Into<String>) -> Self {
        Self {
            intent,
            confidence,
            entities: HashMap::new(),
            raw_text: raw_text.into(),
        }
    }

    /// The degraded result used for classification failures and
    /// low-confidence results.
    pub fn unclear(raw_text: impl Into<String>) -> Self {
        Self::new(IntentCategory::Unclear, 0.0, raw_text)
    }

    /// Adds an extracted entity.
    pub fn with_entity(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entities.insert(key.into(), value.into());
        self
    }

    /// Looks up an extracted entity.
    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }

    /// The raw value offered for a slot: the matching entity when the
    /// classifier extracted one, otherwise the whole utterance.
    pub fn value_for(&self, slot: SlotName) -> &str {
        self.entity(slot.as_str()).unwrap_or(&self.raw_text)
    }

    /// The slot the caller named for correction, from the `slot`
    /// entity or any slot-valued entity key.
    pub fn correction_slot(&self) -> Option<SlotName> {
        if let Some(named) = self.entity("slot").and_then(SlotName::parse) {
            return Some(named);
        }
        SlotName::ALL
            .iter()
            .copied()
            .find(|slot| self.entity(slot.as_str()).is_some())
    }

    /// Collapses the intent into the three confirmation outcomes.
    pub fn confirmation_outcome(&self) -> ConfirmationOutcome {
        match self.intent {
            IntentCategory::Affirmative => ConfirmationOutcome::Affirmative,
            IntentCategory::Negative | IntentCategory::Correction => {
                ConfirmationOutcome::Negative
            }
            _ => ConfirmationOutcome::Ambiguous,
        }
    }
}

/// An event delivered to the engine for one session.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A classified user utterance.
    User(ClassifiedTurn),
    /// The caller went silent past the turn timeout.
    SilenceTimeout,
    /// The scheduled return from a digression fired.
    DigressionResume,
    /// The booking write succeeded.
    BookingSucceeded(BookingId),
    /// The booking write failed.
    BookingFailed { retryable: bool },
    /// The callback write succeeded.
    CallbackArranged(CallbackId),
    /// The callback write failed.
    CallbackFailed,
}
