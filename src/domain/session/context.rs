//! Session context: the complete state of one conversation.
//!
//! Mutated exclusively by the turn orchestrator on behalf of one
//! in-flight turn at a time; every change flows through a
//! [`ContextPatch`] produced by the dialogue engine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::dialogue::{ContextPatch, SlotUpdate};
use crate::domain::foundation::SessionId;

use super::confirmation::{ConfirmTarget, ConfirmationCounters};
use super::digression::{DigressionStack, DEFAULT_MAX_DEPTH};
use super::slots::{SlotBoard, SlotName};
use super::summary::ProgressSummarizer;

/// Coarse conversation phase, tracked alongside the engine state for
/// observability and prompt assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Greeting,
    Collecting,
    Confirming,
    Digressing,
    Finalizing,
    Booking,
    Escalated,
    Completed,
}

/// Immutable per-tenant policy, captured at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Default confirmation threshold (three strikes).
    pub confirmation_threshold: u32,
    /// Per-slot overrides of the confirmation threshold.
    #[serde(default)]
    pub slot_thresholds: BTreeMap<SlotName, u32>,
    /// Classification retry budget before escalating.
    pub max_retries: u32,
    /// Whether this tenant collects a location slot.
    pub location_required: bool,
    /// Whether repeated failures hand off to a human callback.
    pub escalation_enabled: bool,
    /// Inactivity window after which the session expires.
    pub session_timeout_secs: u64,
    /// Depth bound for the digression stack.
    pub max_digression_depth: usize,
}

impl TenantConfig {
    /// Threshold for one confirmation target, honoring per-slot
    /// overrides.
    pub fn threshold_for(&self, target: ConfirmTarget) -> u32 {
        match target {
            ConfirmTarget::Slot(slot) => self
                .slot_thresholds
                .get(&slot)
                .copied()
                .unwrap_or(self.confirmation_threshold),
            ConfirmTarget::Final => self.confirmation_threshold,
        }
    }

    /// Session inactivity timeout as a duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::seconds(self.session_timeout_secs as i64)
    }
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 3,
            slot_thresholds: BTreeMap::new(),
            max_retries: 5,
            location_required: false,
            escalation_enabled: true,
            session_timeout_secs: 300,
            max_digression_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Immutable organization facts available to prompt assembly and the
/// digression answerer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationContext {
    pub business_name: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub hours_blurb: Option<String>,
}

/// One appended escalation signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationFlag {
    pub reason: String,
    pub details: String,
    pub raised_at: DateTime<Utc>,
}

/// Complete state of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    session_id: SessionId,
    pub phase: SessionPhase,
    pub slots: SlotBoard,
    pub attempts: ConfirmationCounters,
    pub digressions: DigressionStack,
    pub progress_summary: String,
    pub escalation_flags: Vec<EscalationFlag>,
    pub retry_count: u32,
    pub timeout_count: u32,
    pub error_history: Vec<String>,
    /// Consecutive patches applied with the digression stack at
    /// capacity; feeds the escalation policy's "sustained" signal.
    pub saturated_digression_turns: u32,
    tenant: TenantConfig,
    organization: OrganizationContext,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionContext {
    /// Creates a fresh context at session start.
    pub fn new(
        session_id: SessionId,
        tenant: TenantConfig,
        organization: OrganizationContext,
        now: DateTime<Utc>,
    ) -> Self {
        let digressions = DigressionStack::new(tenant.max_digression_depth);
        Self {
            session_id,
            phase: SessionPhase::Greeting,
            slots: SlotBoard::new(),
            attempts: ConfirmationCounters::new(),
            digressions,
            progress_summary: String::new(),
            escalation_flags: Vec::new(),
            retry_count: 0,
            timeout_count: 0,
            error_history: Vec::new(),
            saturated_digression_turns: 0,
            tenant,
            organization,
            last_activity: now,
            created_at: now,
        }
    }

    /// The immutable session identifier.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The immutable tenant policy.
    pub fn tenant(&self) -> &TenantConfig {
        &self.tenant
    }

    /// The immutable organization facts.
    pub fn organization(&self) -> &OrganizationContext {
        &self.organization
    }

    /// The active conversational topic.
    pub fn current_topic(&self) -> &str {
        self.digressions.current_topic()
    }

    /// Marks inbound activity.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// True when the session has been idle past the tenant timeout.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity > self.tenant.session_timeout()
    }

    /// Applies one engine-produced patch.
    ///
    /// The progress summary is recomputed only when a confirmed flag
    /// actually flips.
    pub fn apply(&mut self, patch: ContextPatch, now: DateTime<Utc>) {
        let mut confirmed_changed = false;

        for update in patch.slot_updates {
            match update {
                SlotUpdate::Fill {
                    slot,
                    value,
                    confidence,
                } => {
                    self.slots.fill(slot, value, confidence, now);
                    // A changed value restarts that slot's strike count.
                    self.attempts = self.attempts.reset(ConfirmTarget::Slot(slot));
                }
                SlotUpdate::Confirm(slot) => {
                    if self.slots.confirm(slot, now) {
                        confirmed_changed = true;
                    }
                }
                SlotUpdate::Clear(slot) => {
                    if self.slots.clear(slot) {
                        confirmed_changed = true;
                    }
                }
            }
        }

        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        if let Some(digressions) = patch.digressions {
            self.digressions = digressions;
            if self.digressions.at_capacity() {
                self.saturated_digression_turns += 1;
            } else {
                self.saturated_digression_turns = 0;
            }
        }
        if patch.record_retry {
            self.retry_count += 1;
        }
        if patch.record_timeout {
            self.timeout_count += 1;
        }
        if let Some(error) = patch.record_error {
            self.error_history.push(error);
        }
        if let Some((reason, details)) = patch.escalation_flag {
            self.escalation_flags.push(EscalationFlag {
                reason,
                details,
                raised_at: now,
            });
        }
        if let Some(phase) = patch.phase {
            self.phase = phase;
        }

        if confirmed_changed {
            self.progress_summary = ProgressSummarizer::recompute(&self.slots);
        }
    }

    /// Returns a copy with the patch applied, for the engine's pure
    /// assess-after-patch chaining.
    pub fn preview(&self, patch: &ContextPatch, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.apply(patch.clone(), now);
        next
    }
}
