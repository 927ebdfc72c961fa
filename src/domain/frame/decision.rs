//! The structured decision payload embedded at the end of a generated
//! reply stream.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::dialogue::{ClassifiedTurn, IntentCategory};

/// The fixed-schema record carried between the frame sentinels.
///
/// A malformed payload degrades to `intent = unclear, confidence = 0`
/// rather than failing the turn; spoken text already forwarded is
/// never revoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionFrame {
    #[serde(default = "default_intent")]
    pub intent: IntentCategory,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub entities: HashMap<String, String>,
}

fn default_intent() -> IntentCategory {
    IntentCategory::Unclear
}

impl DecisionFrame {
    /// The degraded frame used for parse failures.
    pub fn unclear() -> Self {
        Self {
            intent: IntentCategory::Unclear,
            confidence: 0.0,
            entities: HashMap::new(),
        }
    }

    /// Parses a buffered payload, degrading to [`DecisionFrame::unclear`]
    /// on any malformation.
    pub fn parse(payload: &str) -> Self {
        serde_json::from_str(payload).unwrap_or_else(|_| Self::unclear())
    }

    /// Converts the frame into a classified turn for engine input.
    pub fn into_classified(self, raw_text: impl Into<String>) -> ClassifiedTurn {
        ClassifiedTurn {
            intent: self.intent,
            confidence: self.confidence,
            entities: self.entities,
            raw_text: raw_text.into(),
        }
    }
}

impl Default for DecisionFrame {
    fn default() -> Self {
        Self::unclear()
    }
}
