//! Dialogue states: the tagged-union state of one conversation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::StateMachine;
use crate::domain::session::{SessionPhase, SlotName};

/// The engine's conversation state.
///
/// `Routing` and `Assessing` are transient decision points: the engine
/// passes through them inside one transition and never rests there
/// between turns. The states a session can actually rest in are the
/// collect/confirm pair per slot, digression answering, final
/// confirmation, the booking/escalation pipeline, and the terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    Idle,
    Routing,
    Assessing,
    Collect(SlotName),
    Confirm(SlotName),
    DigressionAnswering,
    FinalConfirmation,
    Booking,
    BookingError,
    Escalating,
    CallbackScheduled,
    Completed,
}

impl DialogueState {
    /// The coarse phase this state maps to.
    pub fn phase(&self) -> SessionPhase {
        match self {
            DialogueState::Idle | DialogueState::Routing | DialogueState::Assessing => {
                SessionPhase::Greeting
            }
            DialogueState::Collect(_) => SessionPhase::Collecting,
            DialogueState::Confirm(_) => SessionPhase::Confirming,
            DialogueState::DigressionAnswering => SessionPhase::Digressing,
            DialogueState::FinalConfirmation => SessionPhase::Finalizing,
            DialogueState::Booking | DialogueState::BookingError => SessionPhase::Booking,
            DialogueState::Escalating | DialogueState::CallbackScheduled => {
                SessionPhase::Escalated
            }
            DialogueState::Completed => SessionPhase::Completed,
        }
    }

    /// Stable name for telemetry fields and prompt assembly.
    pub fn label(&self) -> &'static str {
        match self {
            DialogueState::Idle => "idle",
            DialogueState::Routing => "routing",
            DialogueState::Assessing => "assessing",
            DialogueState::Collect(_) => "collect",
            DialogueState::Confirm(_) => "confirm",
            DialogueState::DigressionAnswering => "digression_answering",
            DialogueState::FinalConfirmation => "final_confirmation",
            DialogueState::Booking => "booking",
            DialogueState::BookingError => "booking_error",
            DialogueState::Escalating => "escalating",
            DialogueState::CallbackScheduled => "callback_scheduled",
            DialogueState::Completed => "completed",
        }
    }

    /// The slot this state collects or confirms, if any.
    pub fn slot(&self) -> Option<SlotName> {
        match self {
            DialogueState::Collect(slot) | DialogueState::Confirm(slot) => Some(*slot),
            _ => None,
        }
    }
}

impl fmt::Display for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot() {
            Some(slot) => write!(f, "{}_{}", self.label(), slot),
            None => write!(f, "{}", self.label()),
        }
    }
}

impl StateMachine for DialogueState {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use DialogueState::*;

        let all_collects = || SlotName::ALL.map(Collect).to_vec();
        let all_confirms = || SlotName::ALL.map(Confirm).to_vec();

        match self {
            Idle => {
                let mut targets = vec![Routing, Assessing, DigressionAnswering, Escalating];
                targets.extend(all_collects());
                targets.extend(all_confirms());
                targets
            }
            Routing => {
                let mut targets = vec![Assessing, DigressionAnswering, Escalating];
                targets.extend(all_collects());
                targets.extend(all_confirms());
                targets
            }
            Assessing => {
                let mut targets = vec![FinalConfirmation];
                targets.extend(all_collects());
                targets
            }
            Collect(slot) => vec![
                Collect(*slot),
                Confirm(*slot),
                DigressionAnswering,
                Escalating,
                Completed,
            ],
            Confirm(slot) => {
                let mut targets = vec![
                    Confirm(*slot),
                    Collect(*slot),
                    Assessing,
                    FinalConfirmation,
                    DigressionAnswering,
                    Escalating,
                    Completed,
                ];
                // Confirming one slot can hand over to collecting the
                // next unmet one via assessing.
                targets.extend(all_collects());
                targets
            }
            DigressionAnswering => {
                let mut targets = vec![
                    DigressionAnswering,
                    FinalConfirmation,
                    Assessing,
                    Escalating,
                    Completed,
                ];
                targets.extend(all_collects());
                targets.extend(all_confirms());
                targets
            }
            FinalConfirmation => {
                let mut targets = vec![
                    FinalConfirmation,
                    Booking,
                    Assessing,
                    DigressionAnswering,
                    Escalating,
                    Completed,
                ];
                targets.extend(all_collects());
                targets
            }
            Booking => vec![Completed, BookingError],
            BookingError => vec![Completed, Escalating],
            Escalating => vec![CallbackScheduled, Completed],
            CallbackScheduled => vec![],
            Completed => vec![],
        }
    }
}
