//! Transition outputs: the context patch and the side effects the
//! orchestrator executes on the engine's behalf.

use serde::{Deserialize, Serialize};

use crate::domain::session::{
    ConfirmationCounters, DigressionStack, SessionPhase, SlotName, SlotValue,
};

/// One slot mutation inside a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotUpdate {
    /// Record a freshly validated, unconfirmed value.
    Fill {
        slot: SlotName,
        value: SlotValue,
        confidence: f32,
    },
    /// Lock a slot in after an explicit caller confirmation.
    Confirm(SlotName),
    /// Drop a slot after a negative confirmation or correction.
    Clear(SlotName),
}

/// The engine's requested mutations to the session context.
///
/// Counters and the digression stack are immutable value types, so the
/// patch carries whole replacement values rather than in-place edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPatch {
    pub phase: Option<SessionPhase>,
    pub slot_updates: Vec<SlotUpdate>,
    pub attempts: Option<ConfirmationCounters>,
    pub digressions: Option<DigressionStack>,
    pub record_retry: bool,
    pub record_timeout: bool,
    pub record_error: Option<String>,
    pub escalation_flag: Option<(String, String)>,
}

impl ContextPatch {
    /// A patch that only sets the phase for the target state.
    pub fn phase_only(phase: SessionPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    /// Merges a later patch into this one, later fields winning.
    pub fn merge(mut self, later: ContextPatch) -> Self {
        self.slot_updates.extend(later.slot_updates);
        if later.phase.is_some() {
            self.phase = later.phase;
        }
        if later.attempts.is_some() {
            self.attempts = later.attempts;
        }
        if later.digressions.is_some() {
            self.digressions = later.digressions;
        }
        self.record_retry |= later.record_retry;
        self.record_timeout |= later.record_timeout;
        if later.record_error.is_some() {
            self.record_error = later.record_error;
        }
        if later.escalation_flag.is_some() {
            self.escalation_flag = later.escalation_flag;
        }
        self
    }
}

/// What the generated reply is for; selects the prompt template and
/// the canned fallback utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPurpose {
    Greeting,
    CollectSlot(SlotName),
    ConfirmSlot(SlotName),
    Clarify,
    AnswerDigression,
    ResumeAfterDigression,
    FinalSummary,
    BookingConfirmed,
    CallbackNotice,
    Apology,
}

impl PromptPurpose {
    /// Deterministic fallback utterance when the generation
    /// collaborator fails. Every turn must yield at least this.
    pub fn canned_fallback(&self) -> String {
        match self {
            PromptPurpose::Greeting => {
                "Hi, thanks for calling. What can I book for you today?".to_string()
            }
            PromptPurpose::CollectSlot(SlotName::Service) => {
                "What service would you like to book?".to_string()
            }
            PromptPurpose::CollectSlot(SlotName::TimeWindow) => {
                "What day and time work for you?".to_string()
            }
            PromptPurpose::CollectSlot(SlotName::Contact) => {
                "What's the best phone number or email to confirm with?".to_string()
            }
            PromptPurpose::CollectSlot(SlotName::Location) => {
                "Where should we do this - at our place, your address, or remotely?".to_string()
            }
            PromptPurpose::ConfirmSlot(slot) => {
                format!("Just to check, did I get the {} right?", slot_phrase(*slot))
            }
            PromptPurpose::Clarify => {
                "Sorry, I didn't quite catch that. Could you say it again?".to_string()
            }
            PromptPurpose::AnswerDigression => {
                "Good question - let me answer that, then we'll pick up where we left off."
                    .to_string()
            }
            PromptPurpose::ResumeAfterDigression => {
                "Now, back to your booking - where were we?".to_string()
            }
            PromptPurpose::FinalSummary => {
                "Let me read that back to you. Shall I go ahead and book it?".to_string()
            }
            PromptPurpose::BookingConfirmed => {
                "You're all booked. We'll see you then!".to_string()
            }
            PromptPurpose::CallbackNotice => {
                "I'll have a member of our team call you right back to sort this out."
                    .to_string()
            }
            PromptPurpose::Apology => {
                "I'm sorry, I wasn't able to finish that for you. Please call us back and we'll sort it out."
                    .to_string()
            }
        }
    }
}

fn slot_phrase(slot: SlotName) -> &'static str {
    match slot {
        SlotName::Service => "service",
        SlotName::TimeWindow => "day and time",
        SlotName::Contact => "contact details",
        SlotName::Location => "location",
    }
}

/// A request to speak, fulfilled by the generation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeakDirective {
    pub purpose: PromptPurpose,
    /// 1-based attempt number for attempt-numbered re-prompts.
    pub attempt: u32,
}

impl SpeakDirective {
    pub fn new(purpose: PromptPurpose, attempt: u32) -> Self {
        Self { purpose, attempt }
    }

    /// A first-attempt directive.
    pub fn first(purpose: PromptPurpose) -> Self {
        Self::new(purpose, 1)
    }
}

/// Side effects the orchestrator executes after applying the patch.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Generate (and start speaking) a reply.
    Speak(SpeakDirective),
    /// Write the booking through the persistence collaborator; the
    /// result returns as a `BookingSucceeded`/`BookingFailed` event.
    PersistBooking,
    /// Schedule a human callback; the result returns as a
    /// `CallbackArranged`/`CallbackFailed` event.
    ScheduleCallback,
    /// Arrange a delayed `DigressionResume` event.
    ScheduleDigressionReturn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_purpose_has_a_nonempty_fallback() {
        let purposes = [
            PromptPurpose::Greeting,
            PromptPurpose::CollectSlot(SlotName::Service),
            PromptPurpose::CollectSlot(SlotName::TimeWindow),
            PromptPurpose::CollectSlot(SlotName::Contact),
            PromptPurpose::CollectSlot(SlotName::Location),
            PromptPurpose::ConfirmSlot(SlotName::TimeWindow),
            PromptPurpose::Clarify,
            PromptPurpose::AnswerDigression,
            PromptPurpose::ResumeAfterDigression,
            PromptPurpose::FinalSummary,
            PromptPurpose::BookingConfirmed,
            PromptPurpose::CallbackNotice,
            PromptPurpose::Apology,
        ];
        for purpose in purposes {
            assert!(!purpose.canned_fallback().is_empty());
        }
    }

    #[test]
    fn merge_keeps_both_slot_updates() {
        let first = ContextPatch {
            slot_updates: vec![SlotUpdate::Confirm(SlotName::Service)],
            ..ContextPatch::default()
        };
        let second = ContextPatch {
            slot_updates: vec![SlotUpdate::Clear(SlotName::Contact)],
            record_retry: true,
            ..ContextPatch::default()
        };

        let merged = first.merge(second);
        assert_eq!(merged.slot_updates.len(), 2);
        assert!(merged.record_retry);
    }

    #[test]
    fn merge_later_phase_wins() {
        let first = ContextPatch::phase_only(SessionPhase::Collecting);
        let second = ContextPatch::phase_only(SessionPhase::Confirming);

        assert_eq!(first.merge(second).phase, Some(SessionPhase::Confirming));
    }
}
