//! Bounded save/restore of conversational topic.
//!
//! The stack is an immutable value type: push and pop return new
//! values, so capacity and round-trip properties are directly
//! checkable. Only the saved topic and a small whitelist of resume
//! hints ever flow back into the main context on pop; anything said
//! while digressing stays out of the booking slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::dialogue::DialogueState;

/// Topic name used whenever no digression is active.
pub const BOOKING_TOPIC: &str = "booking";

/// Default maximum digression depth.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// The whitelisted context fields restored when a digression pops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DigressionSnapshot {
    /// State to resume once the side question is answered.
    pub resume_state: DialogueState,
    /// Attempt number to resume the interrupted prompt at.
    pub resume_attempt: u32,
}

/// One saved conversational frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigressionFrame {
    pub topic: String,
    pub snapshot: DigressionSnapshot,
    pub previous_topic: String,
    pub saved_at: DateTime<Utc>,
}

/// Bounded stack of saved frames, with the active topic derived from
/// the top frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigressionStack {
    frames: Vec<DigressionFrame>,
    max_depth: usize,
}

impl DigressionStack {
    /// Creates an empty stack with the given depth bound.
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
        }
    }

    /// Current depth.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// True when another push would be refused.
    pub fn at_capacity(&self) -> bool {
        self.frames.len() >= self.max_depth
    }

    /// The configured depth bound.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// The active topic: top frame's topic, or "booking" when idle.
    pub fn current_topic(&self) -> &str {
        self.frames
            .last()
            .map(|f| f.topic.as_str())
            .unwrap_or(BOOKING_TOPIC)
    }

    /// Saves the current topic and pushes a new one.
    ///
    /// Returns `None` when the stack is at capacity; the original value
    /// is untouched either way.
    pub fn push(
        &self,
        topic: impl Into<String>,
        snapshot: DigressionSnapshot,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if self.at_capacity() {
            return None;
        }
        let mut next = self.clone();
        next.frames.push(DigressionFrame {
            topic: topic.into(),
            snapshot,
            previous_topic: self.current_topic().to_string(),
            saved_at: now,
        });
        Some(next)
    }

    /// Pops the top frame, restoring the previous topic.
    ///
    /// Returns `None` on an empty stack.
    pub fn pop(&self) -> Option<(Self, DigressionFrame)> {
        let mut next = self.clone();
        let frame = next.frames.pop()?;
        Some((next, frame))
    }
}

impl Default for DigressionStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}
