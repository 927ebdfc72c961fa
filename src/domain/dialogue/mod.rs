//! The dialogue state machine: states, events, and the pure transition
//! function.

mod effects;
mod engine;
mod event;
mod state;

pub use effects::{ContextPatch, PromptPurpose, SideEffect, SlotUpdate, SpeakDirective};
pub use engine::{escalation_transition, transition, Transition};
pub use event::{ClassifiedTurn, ConfirmationOutcome, IntentCategory, TurnEvent};
pub use state::DialogueState;
