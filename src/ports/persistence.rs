//! Booking Writer Port - interface to the persistence collaborator.
//!
//! The engine retries a failed write at most once (through the
//! `booking_error` state) before escalating; a persistence failure
//! after that retry is the only error condition surfaced to the
//! transport layer, alongside an already-generated apology.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{BookingId, CallbackId, SessionId};
use crate::domain::session::{SessionContext, SlotName};

/// The booking record written once every slot is locked in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub session_id: SessionId,
    pub business_name: String,
    pub service: String,
    pub time_window: String,
    pub contact: String,
    pub location: Option<String>,
    pub summary: String,
    pub requested_at: DateTime<Utc>,
}

impl BookingRecord {
    /// Builds the record from a session's confirmed slots.
    pub fn from_context(ctx: &SessionContext, now: DateTime<Utc>) -> Self {
        let spoken = |slot: SlotName| ctx.slots.get(slot).map(|s| s.value.spoken());
        Self {
            session_id: ctx.session_id(),
            business_name: ctx.organization().business_name.clone(),
            service: spoken(SlotName::Service).unwrap_or_default(),
            time_window: spoken(SlotName::TimeWindow).unwrap_or_default(),
            contact: spoken(SlotName::Contact).unwrap_or_default(),
            location: spoken(SlotName::Location),
            summary: ctx.progress_summary.clone(),
            requested_at: now,
        }
    }
}

/// The callback record written when a conversation escalates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub session_id: SessionId,
    pub reason: String,
    pub details: String,
    /// Contact to call back, when one was collected before escalating.
    pub contact: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl CallbackRecord {
    /// Builds the record from a session and its latest escalation flag.
    pub fn from_context(ctx: &SessionContext, now: DateTime<Utc>) -> Self {
        let (reason, details) = ctx
            .escalation_flags
            .last()
            .map(|f| (f.reason.clone(), f.details.clone()))
            .unwrap_or_else(|| ("unspecified".to_string(), String::new()));
        Self {
            session_id: ctx.session_id(),
            reason,
            details,
            contact: ctx.slots.get(SlotName::Contact).map(|s| s.value.spoken()),
            requested_at: now,
        }
    }
}

/// Port for the external booking/callback persistence collaborator.
#[async_trait]
pub trait BookingWriter: Send + Sync {
    /// Writes a booking, returning its identifier.
    async fn persist_booking(&self, record: BookingRecord) -> Result<BookingId, PersistenceError>;

    /// Schedules a human callback, returning its identifier.
    async fn persist_callback(
        &self,
        record: CallbackRecord,
    ) -> Result<CallbackId, PersistenceError>;
}

/// Persistence collaborator errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    /// The store is unreachable or unhealthy.
    #[error("persistence unavailable: {message}")]
    Unavailable { message: String },

    /// The write conflicted with existing state.
    #[error("persistence conflict: {message}")]
    Conflict { message: String },

    /// The write did not complete in time.
    #[error("persistence timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u32 },
}

impl PersistenceError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// True when retrying the same write could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistenceError::Unavailable { .. } | PersistenceError::Timeout { .. }
        )
    }
}
