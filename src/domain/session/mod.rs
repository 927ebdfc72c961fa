//! Session context model: slots, confirmation counters, digression
//! stack, progressive summary, and the escalation policy.

mod confirmation;
mod context;
mod digression;
mod escalation;
mod slots;
mod summary;

pub use confirmation::{AttemptRecord, ConfirmTarget, ConfirmationCounters};
pub use context::{
    EscalationFlag, OrganizationContext, SessionContext, SessionPhase, TenantConfig,
};
pub use digression::{
    DigressionFrame, DigressionSnapshot, DigressionStack, BOOKING_TOPIC, DEFAULT_MAX_DEPTH,
};
pub use escalation::{should_escalate, EscalationDecision, EscalationReason};
pub use slots::{
    ContactInfo, LocationKind, LocationValue, SlotBoard, SlotName, SlotState, SlotValue,
};
pub use summary::ProgressSummarizer;
