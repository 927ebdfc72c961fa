//! Escalation policy: when repeated failure signals hand the caller
//! off to a human.
//!
//! The evaluator is a total, side-effect-free function over the
//! session context; callers decide what to do with the reason.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::confirmation::ConfirmTarget;
use super::context::SessionContext;

/// Fixed ceiling on accumulated errors before escalating.
const ERROR_HISTORY_CEILING: usize = 5;

/// Consecutive at-capacity turns before digression pressure escalates.
const SATURATION_TURNS: u32 = 2;

/// Why an escalation fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// A slot (or the final confirmation) hit its strike threshold.
    ConfirmationExhausted { target: ConfirmTarget },
    /// The classification retry budget ran out.
    RetryBudgetExhausted { retries: u32 },
    /// The digression stack stayed at capacity across turns.
    DigressionOverload { depth: usize },
    /// The caller went silent past the tenant timeout.
    SessionInactive,
    /// Too many accumulated errors.
    ErrorHistoryOverflow { errors: usize },
    /// Booking persistence failed after its retry.
    BookingFailed,
}

impl EscalationReason {
    /// Short stable code recorded on escalation flags.
    pub fn code(&self) -> &'static str {
        match self {
            EscalationReason::ConfirmationExhausted { .. } => "confirmation_exhausted",
            EscalationReason::RetryBudgetExhausted { .. } => "retry_budget_exhausted",
            EscalationReason::DigressionOverload { .. } => "digression_overload",
            EscalationReason::SessionInactive => "session_inactive",
            EscalationReason::ErrorHistoryOverflow { .. } => "error_history_overflow",
            EscalationReason::BookingFailed => "booking_failed",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::ConfirmationExhausted { target } => {
                write!(f, "confirmation attempts exhausted for {}", target)
            }
            EscalationReason::RetryBudgetExhausted { retries } => {
                write!(f, "repeated classification failure ({} retries)", retries)
            }
            EscalationReason::DigressionOverload { depth } => {
                write!(f, "digression stack saturated at depth {}", depth)
            }
            EscalationReason::SessionInactive => write!(f, "session inactive past timeout"),
            EscalationReason::ErrorHistoryOverflow { errors } => {
                write!(f, "error history overflow ({} errors)", errors)
            }
            EscalationReason::BookingFailed => write!(f, "booking persistence failed after retry"),
        }
    }
}

/// Result of evaluating the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reason: Option<EscalationReason>,
}

impl EscalationDecision {
    fn hold() -> Self {
        Self {
            escalate: false,
            reason: None,
        }
    }

    fn fire(reason: EscalationReason) -> Self {
        Self {
            escalate: true,
            reason: Some(reason),
        }
    }
}

/// Evaluates every escalation signal against the context.
///
/// Signals are checked in a fixed order so the decision is
/// deterministic and idempotent for an unchanged context.
pub fn should_escalate(ctx: &SessionContext, now: DateTime<Utc>) -> EscalationDecision {
    let tenant = ctx.tenant();

    if let Some(target) = ctx.attempts.first_exhausted(|t| tenant.threshold_for(t)) {
        return EscalationDecision::fire(EscalationReason::ConfirmationExhausted { target });
    }

    if ctx.retry_count >= tenant.max_retries {
        return EscalationDecision::fire(EscalationReason::RetryBudgetExhausted {
            retries: ctx.retry_count,
        });
    }

    if ctx.digressions.at_capacity() && ctx.saturated_digression_turns >= SATURATION_TURNS {
        return EscalationDecision::fire(EscalationReason::DigressionOverload {
            depth: ctx.digressions.depth(),
        });
    }

    if ctx.is_expired(now) {
        return EscalationDecision::fire(EscalationReason::SessionInactive);
    }

    if ctx.error_history.len() > ERROR_HISTORY_CEILING {
        return EscalationDecision::fire(EscalationReason::ErrorHistoryOverflow {
            errors: ctx.error_history.len(),
        });
    }

    EscalationDecision::hold()
}
