//! The dialogue transition function.
//!
//! `transition` is synchronous and performs no I/O: it reads the
//! session context, decides the next state, and describes the required
//! mutations and side effects. The orchestrator executes the effects
//! and feeds collaborator results back in as further events, so every
//! transition stays directly unit-testable.

use chrono::{DateTime, Utc};

use crate::domain::session::{
    ConfirmTarget, DigressionSnapshot, EscalationReason, LocationKind, SessionContext, SlotName,
    SlotValue,
};

use super::effects::{ContextPatch, PromptPurpose, SideEffect, SlotUpdate, SpeakDirective};
use super::event::{ClassifiedTurn, ConfirmationOutcome, IntentCategory, TurnEvent};
use super::state::DialogueState;

/// Longest digression topic kept verbatim; longer questions are
/// truncated for the stack frame label.
const MAX_TOPIC_LEN: usize = 48;

/// The full result of one transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: DialogueState,
    pub patch: ContextPatch,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    fn new(next: DialogueState, patch: ContextPatch, effects: Vec<SideEffect>) -> Self {
        Self {
            next,
            patch,
            effects,
        }
    }

    fn stay(state: DialogueState) -> Self {
        Self::new(state, ContextPatch::default(), Vec::new())
    }
}

/// Decides the next state and effects for one event.
///
/// `now` is injected by the caller so the function stays deterministic;
/// it only timestamps digression frames, never drives control flow.
pub fn transition(
    state: DialogueState,
    ctx: &SessionContext,
    event: &TurnEvent,
    now: DateTime<Utc>,
) -> Transition {
    let mut result = match event {
        TurnEvent::SilenceTimeout => on_silence(state, ctx),
        TurnEvent::User(turn) => on_user(state, ctx, turn, now),
        TurnEvent::DigressionResume => match state {
            DialogueState::DigressionAnswering => resume_digression(ctx, true),
            // A stale auto-return timer for an already-resumed topic.
            _ => Transition::stay(state),
        },
        TurnEvent::BookingSucceeded(_) => match state {
            DialogueState::Booking | DialogueState::BookingError => booked(),
            _ => Transition::stay(state),
        },
        TurnEvent::BookingFailed { .. } => match state {
            DialogueState::Booking => Transition::new(
                DialogueState::BookingError,
                ContextPatch {
                    record_error: Some("booking persistence failed".to_string()),
                    ..ContextPatch::default()
                },
                vec![SideEffect::PersistBooking],
            ),
            DialogueState::BookingError => escalate_with(
                ctx,
                ContextPatch {
                    record_error: Some("booking persistence failed after retry".to_string()),
                    ..ContextPatch::default()
                },
                EscalationReason::BookingFailed,
            ),
            _ => Transition::stay(state),
        },
        TurnEvent::CallbackArranged(_) => match state {
            DialogueState::Escalating => Transition::new(
                DialogueState::CallbackScheduled,
                ContextPatch::default(),
                vec![SideEffect::Speak(SpeakDirective::first(
                    PromptPurpose::CallbackNotice,
                ))],
            ),
            _ => Transition::stay(state),
        },
        TurnEvent::CallbackFailed => match state {
            // The caller is never left without a reply.
            DialogueState::Escalating => Transition::new(
                DialogueState::Completed,
                ContextPatch {
                    record_error: Some("callback scheduling failed".to_string()),
                    ..ContextPatch::default()
                },
                vec![SideEffect::Speak(SpeakDirective::first(
                    PromptPurpose::Apology,
                ))],
            ),
            _ => Transition::stay(state),
        },
    };

    result.patch.phase = Some(result.next.phase());
    result
}

/// Builds the escalation transition for a policy-driven escalation
/// (retry budget, inactivity, error overflow) decided by the caller.
pub fn escalation_transition(ctx: &SessionContext, reason: EscalationReason) -> Transition {
    let mut result = escalate_with(ctx, ContextPatch::default(), reason);
    result.patch.phase = Some(result.next.phase());
    result
}

fn on_user(
    state: DialogueState,
    ctx: &SessionContext,
    turn: &ClassifiedTurn,
    now: DateTime<Utc>,
) -> Transition {
    match state {
        DialogueState::Idle | DialogueState::Routing | DialogueState::Assessing => {
            route(state, ctx, turn, now)
        }
        DialogueState::Collect(slot) => on_collect(slot, ctx, turn, now),
        DialogueState::Confirm(slot) => on_confirm(slot, ctx, turn, now),
        DialogueState::DigressionAnswering => on_digression_turn(ctx, turn, now),
        DialogueState::FinalConfirmation => on_final(ctx, turn, now),
        // Booking/escalation states resolve through internal events
        // within the same turn; a user utterance here is answered but
        // changes nothing.
        DialogueState::Booking | DialogueState::BookingError | DialogueState::Escalating => {
            Transition::new(
                state,
                ContextPatch::default(),
                vec![SideEffect::Speak(SpeakDirective::first(
                    PromptPurpose::Clarify,
                ))],
            )
        }
        DialogueState::CallbackScheduled | DialogueState::Completed => Transition::new(
            state,
            ContextPatch::default(),
            vec![SideEffect::Speak(SpeakDirective::first(
                PromptPurpose::Clarify,
            ))],
        ),
    }
}

/// Intent branching for the entry states.
fn route(
    state: DialogueState,
    ctx: &SessionContext,
    turn: &ClassifiedTurn,
    now: DateTime<Utc>,
) -> Transition {
    match turn.intent {
        IntentCategory::DigressionQuestion => {
            start_digression(state, ctx, turn, assess_target(ctx), 1, now)
        }
        IntentCategory::Greeting => {
            let mut t = assess(ctx);
            t.effects = vec![SideEffect::Speak(SpeakDirective::first(
                PromptPurpose::Greeting,
            ))];
            t
        }
        _ if turn.intent.provided_slot().is_some() => {
            let slot = turn.intent.provided_slot().unwrap_or(SlotName::Service);
            match fill_slot(slot, turn) {
                Some(t) => t,
                None => clarify_into_assessment(ctx),
            }
        }
        IntentCategory::Affirmative | IntentCategory::Negative => assess(ctx),
        IntentCategory::Correction => match turn.correction_slot() {
            Some(slot) => clear_and_reassess(ctx, slot, now),
            None => clarify_into_assessment(ctx),
        },
        _ => clarify_into_assessment(ctx),
    }
}

/// Unclassifiable input: move on through assessment, but lead with a
/// generic clarification.
fn clarify_into_assessment(ctx: &SessionContext) -> Transition {
    let mut t = assess(ctx);
    t.effects = vec![SideEffect::Speak(SpeakDirective::first(
        PromptPurpose::Clarify,
    ))];
    t
}

/// Pure assessment: the next unmet requirement in priority order, or
/// final confirmation once everything is locked in.
fn assess(ctx: &SessionContext) -> Transition {
    let location_required = ctx.tenant().location_required;
    match ctx.slots.next_unmet(location_required) {
        None => {
            let attempt = ctx.attempts.count(ConfirmTarget::Final) + 1;
            Transition::new(
                DialogueState::FinalConfirmation,
                ContextPatch::default(),
                vec![SideEffect::Speak(SpeakDirective::new(
                    PromptPurpose::FinalSummary,
                    attempt,
                ))],
            )
        }
        Some(slot) => {
            let attempt = ctx.attempts.count(ConfirmTarget::Slot(slot)) + 1;
            if ctx.slots.is_validated(slot) {
                Transition::new(
                    DialogueState::Confirm(slot),
                    ContextPatch::default(),
                    vec![SideEffect::Speak(SpeakDirective::new(
                        PromptPurpose::ConfirmSlot(slot),
                        attempt,
                    ))],
                )
            } else {
                Transition::new(
                    DialogueState::Collect(slot),
                    ContextPatch::default(),
                    vec![SideEffect::Speak(SpeakDirective::new(
                        PromptPurpose::CollectSlot(slot),
                        attempt,
                    ))],
                )
            }
        }
    }
}

/// The state assessment would land in, without building the transition.
fn assess_target(ctx: &SessionContext) -> DialogueState {
    match ctx.slots.next_unmet(ctx.tenant().location_required) {
        None => DialogueState::FinalConfirmation,
        Some(slot) if ctx.slots.is_validated(slot) => DialogueState::Confirm(slot),
        Some(slot) => DialogueState::Collect(slot),
    }
}

fn on_collect(
    slot: SlotName,
    ctx: &SessionContext,
    turn: &ClassifiedTurn,
    now: DateTime<Utc>,
) -> Transition {
    if turn.intent == IntentCategory::DigressionQuestion {
        let attempt = ctx.attempts.count(ConfirmTarget::Slot(slot)) + 1;
        return start_digression(
            DialogueState::Collect(slot),
            ctx,
            turn,
            DialogueState::Collect(slot),
            attempt,
            now,
        );
    }

    // A value for any slot is welcome; most callers answer the question
    // they were asked, but volunteered facts are kept too. An offered
    // value that fails validation costs a strike, as does refusing the
    // ask outright.
    match turn.intent.provided_slot() {
        Some(provided) => match fill_slot(provided, turn) {
            Some(t) => t,
            None => record_strike(
                ctx,
                ConfirmTarget::Slot(slot),
                ContextPatch::default(),
                DialogueState::Collect(slot),
                PromptPurpose::CollectSlot(slot),
            ),
        },
        None if turn.intent == IntentCategory::Negative => record_strike(
            ctx,
            ConfirmTarget::Slot(slot),
            ContextPatch::default(),
            DialogueState::Collect(slot),
            PromptPurpose::CollectSlot(slot),
        ),
        // Unclear chatter re-prompts without burning a strike; the
        // classification retry budget bounds it instead.
        None => {
            let attempt = ctx.attempts.count(ConfirmTarget::Slot(slot)) + 1;
            Transition::new(
                DialogueState::Collect(slot),
                ContextPatch::default(),
                vec![SideEffect::Speak(SpeakDirective::new(
                    PromptPurpose::CollectSlot(slot),
                    attempt,
                ))],
            )
        }
    }
}

fn on_confirm(
    slot: SlotName,
    ctx: &SessionContext,
    turn: &ClassifiedTurn,
    now: DateTime<Utc>,
) -> Transition {
    if turn.intent == IntentCategory::DigressionQuestion {
        let attempt = ctx.attempts.count(ConfirmTarget::Slot(slot)) + 1;
        return start_digression(
            DialogueState::Confirm(slot),
            ctx,
            turn,
            DialogueState::Confirm(slot),
            attempt,
            now,
        );
    }

    // A replacement value short-circuits the yes/no exchange.
    if turn.intent.provided_slot() == Some(slot) {
        if let Some(t) = fill_slot(slot, turn) {
            return t;
        }
    }

    match turn.confirmation_outcome() {
        ConfirmationOutcome::Affirmative => {
            let base = ContextPatch {
                slot_updates: vec![SlotUpdate::Confirm(slot)],
                attempts: Some(ctx.attempts.reset(ConfirmTarget::Slot(slot))),
                ..ContextPatch::default()
            };
            chain_assess(ctx, base, now)
        }
        ConfirmationOutcome::Negative => {
            let base = ContextPatch {
                slot_updates: vec![SlotUpdate::Clear(slot)],
                ..ContextPatch::default()
            };
            record_strike(
                ctx,
                ConfirmTarget::Slot(slot),
                base,
                DialogueState::Collect(slot),
                PromptPurpose::CollectSlot(slot),
            )
        }
        ConfirmationOutcome::Ambiguous => record_strike(
            ctx,
            ConfirmTarget::Slot(slot),
            ContextPatch::default(),
            DialogueState::Confirm(slot),
            PromptPurpose::ConfirmSlot(slot),
        ),
    }
}

fn on_digression_turn(
    ctx: &SessionContext,
    turn: &ClassifiedTurn,
    now: DateTime<Utc>,
) -> Transition {
    if turn.intent == IntentCategory::DigressionQuestion {
        // Nested side question; the return path pops back here.
        return start_digression(
            DialogueState::DigressionAnswering,
            ctx,
            turn,
            DialogueState::DigressionAnswering,
            1,
            now,
        );
    }

    // Any other utterance resumes the interrupted flow. Whatever was
    // said while digressing is deliberately not written into the slots.
    resume_digression(ctx, false)
}

fn resume_digression(ctx: &SessionContext, auto: bool) -> Transition {
    let Some((stack, frame)) = ctx.digressions.pop() else {
        return assess(ctx);
    };

    let resume_state = frame.snapshot.resume_state;
    let purpose = match resume_state {
        DialogueState::Collect(slot) => PromptPurpose::CollectSlot(slot),
        DialogueState::Confirm(slot) => PromptPurpose::ConfirmSlot(slot),
        DialogueState::FinalConfirmation => PromptPurpose::FinalSummary,
        _ => PromptPurpose::ResumeAfterDigression,
    };
    let attempt = if auto { 1 } else { frame.snapshot.resume_attempt };

    Transition::new(
        resume_state,
        ContextPatch {
            digressions: Some(stack),
            ..ContextPatch::default()
        },
        vec![SideEffect::Speak(SpeakDirective::new(purpose, attempt))],
    )
}

fn on_final(ctx: &SessionContext, turn: &ClassifiedTurn, now: DateTime<Utc>) -> Transition {
    if turn.intent == IntentCategory::DigressionQuestion {
        let attempt = ctx.attempts.count(ConfirmTarget::Final) + 1;
        return start_digression(
            DialogueState::FinalConfirmation,
            ctx,
            turn,
            DialogueState::FinalConfirmation,
            attempt,
            now,
        );
    }

    // "Actually, make it 4pm" - a late replacement value reopens that
    // slot's confirmation instead of burning a final-confirmation strike.
    if let Some(provided) = turn.intent.provided_slot() {
        if let Some(t) = fill_slot(provided, turn) {
            return t;
        }
    }

    match turn.confirmation_outcome() {
        ConfirmationOutcome::Affirmative => Transition::new(
            DialogueState::Booking,
            ContextPatch {
                attempts: Some(ctx.attempts.reset(ConfirmTarget::Final)),
                ..ContextPatch::default()
            },
            vec![SideEffect::PersistBooking],
        ),
        ConfirmationOutcome::Negative => match turn.correction_slot() {
            Some(slot) => clear_and_reassess(ctx, slot, now),
            None => record_strike(
                ctx,
                ConfirmTarget::Final,
                ContextPatch::default(),
                DialogueState::FinalConfirmation,
                PromptPurpose::FinalSummary,
            ),
        },
        ConfirmationOutcome::Ambiguous => record_strike(
            ctx,
            ConfirmTarget::Final,
            ContextPatch::default(),
            DialogueState::FinalConfirmation,
            PromptPurpose::FinalSummary,
        ),
    }
}

fn on_silence(state: DialogueState, ctx: &SessionContext) -> Transition {
    use crate::domain::foundation::StateMachine;

    if state.is_terminal() {
        return Transition::stay(state);
    }

    let purpose = match state {
        DialogueState::Collect(slot) => PromptPurpose::CollectSlot(slot),
        DialogueState::Confirm(slot) => PromptPurpose::ConfirmSlot(slot),
        DialogueState::FinalConfirmation => PromptPurpose::FinalSummary,
        DialogueState::DigressionAnswering => PromptPurpose::ResumeAfterDigression,
        DialogueState::Idle | DialogueState::Routing | DialogueState::Assessing => {
            PromptPurpose::Greeting
        }
        _ => PromptPurpose::Clarify,
    };
    let attempt = match state {
        DialogueState::Collect(slot) | DialogueState::Confirm(slot) => {
            ctx.attempts.count(ConfirmTarget::Slot(slot)) + 1
        }
        DialogueState::FinalConfirmation => ctx.attempts.count(ConfirmTarget::Final) + 1,
        _ => 1,
    };

    Transition::new(
        state,
        ContextPatch {
            record_timeout: true,
            ..ContextPatch::default()
        },
        vec![SideEffect::Speak(SpeakDirective::new(purpose, attempt))],
    )
}

/// Validates and fills a slot value, moving to its confirmation.
/// Returns `None` when the offered value fails format validation.
fn fill_slot(slot: SlotName, turn: &ClassifiedTurn) -> Option<Transition> {
    let value = if slot == SlotName::Location {
        let kind = turn
            .entity("location_kind")
            .and_then(LocationKind::parse)
            .unwrap_or(LocationKind::AtBusiness);
        let detail = turn.entity("location").or_else(|| {
            let raw = turn.raw_text.trim();
            (!raw.is_empty()).then_some(raw)
        });
        SlotValue::parse_location(kind, detail)
    } else {
        SlotValue::parse(slot, turn.value_for(slot))
    };

    let value = value.ok()?;
    Some(Transition::new(
        DialogueState::Confirm(slot),
        ContextPatch {
            slot_updates: vec![SlotUpdate::Fill {
                slot,
                value,
                confidence: turn.confidence,
            }],
            ..ContextPatch::default()
        },
        vec![SideEffect::Speak(SpeakDirective::first(
            PromptPurpose::ConfirmSlot(slot),
        ))],
    ))
}

/// Records one strike against a target and either re-prompts or
/// escalates when the threshold is reached.
fn record_strike(
    ctx: &SessionContext,
    target: ConfirmTarget,
    base: ContextPatch,
    retry_state: DialogueState,
    retry_purpose: PromptPurpose,
) -> Transition {
    let threshold = ctx.tenant().threshold_for(target);
    let (attempts, record) = ctx.attempts.record(target, threshold);

    let patch = base.merge(ContextPatch {
        attempts: Some(attempts),
        ..ContextPatch::default()
    });

    if record.exhausted {
        escalate_with(ctx, patch, EscalationReason::ConfirmationExhausted { target })
    } else {
        Transition::new(
            retry_state,
            patch,
            vec![SideEffect::Speak(SpeakDirective::new(
                retry_purpose,
                record.count + 1,
            ))],
        )
    }
}

/// Clears a corrected slot and re-assesses, which routes straight back
/// to collecting it.
fn clear_and_reassess(ctx: &SessionContext, slot: SlotName, now: DateTime<Utc>) -> Transition {
    let base = ContextPatch {
        slot_updates: vec![SlotUpdate::Clear(slot)],
        attempts: Some(ctx.attempts.reset(ConfirmTarget::Slot(slot))),
        ..ContextPatch::default()
    };
    chain_assess(ctx, base, now)
}

/// Applies the base patch to a preview of the context, then assesses
/// the result, merging both patches into one transition.
fn chain_assess(ctx: &SessionContext, base: ContextPatch, now: DateTime<Utc>) -> Transition {
    let preview = ctx.preview(&base, now);
    let tail = assess(&preview);
    Transition::new(tail.next, base.merge(tail.patch), tail.effects)
}

/// Pushes a digression frame and answers the side question. A push
/// refused at capacity keeps the conversation on its current topic;
/// the question still gets a brief inline answer.
fn start_digression(
    current: DialogueState,
    ctx: &SessionContext,
    turn: &ClassifiedTurn,
    resume_state: DialogueState,
    resume_attempt: u32,
    now: DateTime<Utc>,
) -> Transition {
    let topic = digression_topic(turn);
    let snapshot = DigressionSnapshot {
        resume_state,
        resume_attempt,
    };

    match ctx.digressions.push(topic, snapshot, now) {
        Some(stack) => Transition::new(
            DialogueState::DigressionAnswering,
            ContextPatch {
                digressions: Some(stack),
                ..ContextPatch::default()
            },
            vec![
                SideEffect::Speak(SpeakDirective::first(PromptPurpose::AnswerDigression)),
                SideEffect::ScheduleDigressionReturn,
            ],
        ),
        None => Transition::new(
            current,
            ContextPatch::default(),
            vec![SideEffect::Speak(SpeakDirective::first(
                PromptPurpose::AnswerDigression,
            ))],
        ),
    }
}

fn digression_topic(turn: &ClassifiedTurn) -> String {
    let raw = turn
        .entity("topic")
        .unwrap_or_else(|| turn.raw_text.trim())
        .to_string();
    if raw.is_empty() {
        return "question".to_string();
    }
    raw.chars().take(MAX_TOPIC_LEN).collect()
}

fn booked() -> Transition {
    Transition::new(
        DialogueState::Completed,
        ContextPatch::default(),
        vec![SideEffect::Speak(SpeakDirective::first(
            PromptPurpose::BookingConfirmed,
        ))],
    )
}

fn escalate_with(
    ctx: &SessionContext,
    base: ContextPatch,
    reason: EscalationReason,
) -> Transition {
    let flagged = base.merge(ContextPatch {
        escalation_flag: Some((reason.code().to_string(), reason.to_string())),
        ..ContextPatch::default()
    });

    if ctx.tenant().escalation_enabled {
        Transition::new(DialogueState::Escalating, flagged, vec![SideEffect::ScheduleCallback])
    } else {
        Transition::new(
            DialogueState::Completed,
            flagged,
            vec![SideEffect::Speak(SpeakDirective::first(
                PromptPurpose::Apology,
            ))],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{BookingId, SessionId};
    use crate::domain::session::{OrganizationContext, SessionPhase, TenantConfig};

    fn ctx_with(tenant: TenantConfig) -> SessionContext {
        SessionContext::new(
            SessionId::new(),
            tenant,
            OrganizationContext::default(),
            Utc::now(),
        )
    }

    fn ctx() -> SessionContext {
        ctx_with(TenantConfig::default())
    }

    fn apply(ctx: &mut SessionContext, t: &Transition) {
        ctx.apply(t.patch.clone(), Utc::now());
    }

    fn user(intent: IntentCategory, raw: &str) -> TurnEvent {
        TurnEvent::User(ClassifiedTurn::new(intent, 0.9, raw))
    }

    fn step(
        state: DialogueState,
        ctx: &mut SessionContext,
        event: TurnEvent,
    ) -> (DialogueState, Vec<SideEffect>) {
        let t = transition(state, ctx, &event, Utc::now());
        apply(ctx, &t);
        (t.next, t.effects)
    }

    fn speak_purpose(effects: &[SideEffect]) -> Option<PromptPurpose> {
        effects.iter().find_map(|e| match e {
            SideEffect::Speak(d) => Some(d.purpose),
            _ => None,
        })
    }

    mod routing {
        use super::*;

        #[test]
        fn greeting_starts_collecting_service() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Idle,
                &mut ctx,
                user(IntentCategory::Greeting, "hi there"),
            );

            assert_eq!(next, DialogueState::Collect(SlotName::Service));
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::Greeting));
        }

        #[test]
        fn unclear_input_clarifies_and_moves_to_first_unmet() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Idle,
                &mut ctx,
                user(IntentCategory::Unclear, "static noise"),
            );

            assert_eq!(next, DialogueState::Collect(SlotName::Service));
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::Clarify));
        }

        #[test]
        fn volunteered_slot_value_goes_straight_to_confirmation() {
            let mut ctx = ctx();
            let event = TurnEvent::User(
                ClassifiedTurn::new(IntentCategory::TimeProvided, 0.9, "Friday at 3pm please")
                    .with_entity("time_window", "Friday 3pm"),
            );
            let (next, effects) = step(DialogueState::Idle, &mut ctx, event);

            assert_eq!(next, DialogueState::Confirm(SlotName::TimeWindow));
            assert_eq!(
                speak_purpose(&effects),
                Some(PromptPurpose::ConfirmSlot(SlotName::TimeWindow))
            );
            assert!(ctx.slots.is_validated(SlotName::TimeWindow));
            assert!(!ctx.slots.is_locked_in(SlotName::TimeWindow));
        }
    }

    mod assessment {
        use super::*;

        #[test]
        fn priority_order_skips_location_when_not_required() {
            let mut ctx = ctx();
            // Lock in service.
            let (next, _) = step(
                DialogueState::Collect(SlotName::Service),
                &mut ctx,
                user(IntentCategory::ServiceProvided, "haircut"),
            );
            assert_eq!(next, DialogueState::Confirm(SlotName::Service));
            let (next, effects) = step(next, &mut ctx, user(IntentCategory::Affirmative, "yes"));

            assert_eq!(next, DialogueState::Collect(SlotName::TimeWindow));
            assert_eq!(
                speak_purpose(&effects),
                Some(PromptPurpose::CollectSlot(SlotName::TimeWindow))
            );
        }

        #[test]
        fn location_is_collected_second_when_required() {
            let tenant = TenantConfig {
                location_required: true,
                ..TenantConfig::default()
            };
            let mut ctx = ctx_with(tenant);

            let (next, _) = step(
                DialogueState::Collect(SlotName::Service),
                &mut ctx,
                user(IntentCategory::ServiceProvided, "gutter cleaning"),
            );
            let (next, _) = step(next, &mut ctx, user(IntentCategory::Affirmative, "yes"));

            assert_eq!(next, DialogueState::Collect(SlotName::Location));
        }

        #[test]
        fn all_slots_locked_in_leads_to_final_confirmation() {
            let mut ctx = ctx();
            let mut state = DialogueState::Collect(SlotName::Service);

            let exchanges = [
                (IntentCategory::ServiceProvided, "haircut"),
                (IntentCategory::Affirmative, "yes"),
                (IntentCategory::TimeProvided, "Friday 3pm"),
                (IntentCategory::Affirmative, "yes"),
                (IntentCategory::ContactProvided, "555-1234"),
            ];
            for (intent, raw) in exchanges {
                state = step(state, &mut ctx, user(intent, raw)).0;
            }
            let (next, effects) = step(state, &mut ctx, user(IntentCategory::Affirmative, "yes"));

            assert_eq!(next, DialogueState::FinalConfirmation);
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::FinalSummary));
            assert_eq!(ctx.phase, SessionPhase::Finalizing);
        }
    }

    mod collecting {
        use super::*;

        #[test]
        fn invalid_value_counts_a_strike_and_reprompts() {
            let mut ctx = ctx();
            let t = transition(
                DialogueState::Collect(SlotName::TimeWindow),
                &ctx,
                &user(IntentCategory::TimeProvided, "whenever really"),
                Utc::now(),
            );
            apply(&mut ctx, &t);

            assert_eq!(t.next, DialogueState::Collect(SlotName::TimeWindow));
            assert_eq!(
                ctx.attempts.count(ConfirmTarget::Slot(SlotName::TimeWindow)),
                1
            );
            let purpose = speak_purpose(&t.effects);
            assert_eq!(purpose, Some(PromptPurpose::CollectSlot(SlotName::TimeWindow)));
            // Re-prompt is attempt-numbered.
            let SideEffect::Speak(directive) = &t.effects[0] else {
                panic!("expected speak effect");
            };
            assert_eq!(directive.attempt, 2);
        }

        #[test]
        fn third_strike_escalates_with_slot_reason() {
            let mut ctx = ctx();
            let mut state = DialogueState::Collect(SlotName::TimeWindow);
            for _ in 0..2 {
                state = step(
                    state,
                    &mut ctx,
                    user(IntentCategory::TimeProvided, "whenever works"),
                )
                .0;
            }
            let (next, effects) = step(
                state,
                &mut ctx,
                user(IntentCategory::TimeProvided, "whenever works"),
            );

            assert_eq!(next, DialogueState::Escalating);
            assert!(effects.contains(&SideEffect::ScheduleCallback));
            assert!(ctx.escalation_flags[0].details.contains("time_window"));
        }

        #[test]
        fn unclear_chatter_reprompts_without_a_strike() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Collect(SlotName::TimeWindow),
                &mut ctx,
                user(IntentCategory::Unclear, "pardon?"),
            );

            assert_eq!(next, DialogueState::Collect(SlotName::TimeWindow));
            assert_eq!(
                ctx.attempts.count(ConfirmTarget::Slot(SlotName::TimeWindow)),
                0
            );
            assert_eq!(
                speak_purpose(&effects),
                Some(PromptPurpose::CollectSlot(SlotName::TimeWindow))
            );
        }

        #[test]
        fn valid_value_resets_strikes() {
            let mut ctx = ctx();
            let mut state = DialogueState::Collect(SlotName::TimeWindow);
            state = step(state, &mut ctx, user(IntentCategory::Unclear, "pardon?")).0;
            assert_eq!(
                ctx.attempts.count(ConfirmTarget::Slot(SlotName::TimeWindow)),
                1
            );

            let (next, _) = step(state, &mut ctx, user(IntentCategory::TimeProvided, "Friday 3pm"));

            assert_eq!(next, DialogueState::Confirm(SlotName::TimeWindow));
            assert_eq!(
                ctx.attempts.count(ConfirmTarget::Slot(SlotName::TimeWindow)),
                0
            );
        }

        #[test]
        fn escalation_disabled_apologizes_and_completes() {
            let tenant = TenantConfig {
                escalation_enabled: false,
                confirmation_threshold: 1,
                ..TenantConfig::default()
            };
            let mut ctx = ctx_with(tenant);

            let (next, effects) = step(
                DialogueState::Collect(SlotName::Service),
                &mut ctx,
                user(IntentCategory::Negative, "no, forget it"),
            );

            assert_eq!(next, DialogueState::Completed);
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::Apology));
        }
    }

    mod confirming {
        use super::*;

        fn ctx_with_time_pending() -> SessionContext {
            let mut ctx = ctx();
            let t = transition(
                DialogueState::Collect(SlotName::TimeWindow),
                &ctx,
                &user(IntentCategory::TimeProvided, "Friday 3pm"),
                Utc::now(),
            );
            ctx.apply(t.patch, Utc::now());
            ctx
        }

        #[test]
        fn affirmative_locks_in_and_updates_summary() {
            let mut ctx = ctx_with_time_pending();
            let (_, _) = step(
                DialogueState::Confirm(SlotName::TimeWindow),
                &mut ctx,
                user(IntentCategory::Affirmative, "yes"),
            );

            assert!(ctx.slots.is_locked_in(SlotName::TimeWindow));
            assert_eq!(ctx.progress_summary, "time: Friday 3pm");
        }

        #[test]
        fn negative_clears_and_recollects() {
            let mut ctx = ctx_with_time_pending();
            let (next, _) = step(
                DialogueState::Confirm(SlotName::TimeWindow),
                &mut ctx,
                user(IntentCategory::Negative, "no"),
            );

            assert_eq!(next, DialogueState::Collect(SlotName::TimeWindow));
            assert!(!ctx.slots.is_validated(SlotName::TimeWindow));
            assert_eq!(
                ctx.attempts.count(ConfirmTarget::Slot(SlotName::TimeWindow)),
                1
            );
        }

        #[test]
        fn ambiguous_reasks_the_same_confirmation() {
            let mut ctx = ctx_with_time_pending();
            let (next, effects) = step(
                DialogueState::Confirm(SlotName::TimeWindow),
                &mut ctx,
                user(IntentCategory::Unclear, "hmm what"),
            );

            assert_eq!(next, DialogueState::Confirm(SlotName::TimeWindow));
            assert_eq!(
                speak_purpose(&effects),
                Some(PromptPurpose::ConfirmSlot(SlotName::TimeWindow))
            );
            assert!(ctx.slots.is_validated(SlotName::TimeWindow));
        }

        #[test]
        fn three_negatives_escalate_referencing_the_slot() {
            let mut ctx = ctx_with_time_pending();
            let mut state = DialogueState::Confirm(SlotName::TimeWindow);

            // no -> recollect, no -> strike, no -> third strike escalates
            state = step(state, &mut ctx, user(IntentCategory::Negative, "no")).0;
            assert_eq!(state, DialogueState::Collect(SlotName::TimeWindow));
            state = step(state, &mut ctx, user(IntentCategory::Negative, "no")).0;
            assert_eq!(state, DialogueState::Collect(SlotName::TimeWindow));
            let (next, _) = step(state, &mut ctx, user(IntentCategory::Negative, "no"));

            assert_eq!(next, DialogueState::Escalating);
            assert!(ctx
                .escalation_flags
                .last()
                .unwrap()
                .details
                .contains("time_window"));
        }

        #[test]
        fn replacement_value_restarts_confirmation() {
            let mut ctx = ctx_with_time_pending();
            let event = TurnEvent::User(
                ClassifiedTurn::new(IntentCategory::TimeProvided, 0.9, "make it Saturday 10am")
                    .with_entity("time_window", "Saturday 10am"),
            );
            let (next, _) = step(DialogueState::Confirm(SlotName::TimeWindow), &mut ctx, event);

            assert_eq!(next, DialogueState::Confirm(SlotName::TimeWindow));
            let slot = ctx.slots.get(SlotName::TimeWindow).unwrap();
            assert_eq!(slot.value, SlotValue::TimeWindow("Saturday 10am".to_string()));
            assert!(!slot.confirmed);
        }
    }

    mod digressions {
        use super::*;

        #[test]
        fn side_question_suspends_and_resumes_collection() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Collect(SlotName::Contact),
                &mut ctx,
                user(IntentCategory::DigressionQuestion, "what are your hours?"),
            );

            assert_eq!(next, DialogueState::DigressionAnswering);
            assert_eq!(ctx.phase, SessionPhase::Digressing);
            assert_eq!(ctx.current_topic(), "what are your hours?");
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::AnswerDigression));
            assert!(effects.contains(&SideEffect::ScheduleDigressionReturn));

            // Next turn pops back to collecting contact.
            let (next, effects) = step(next, &mut ctx, user(IntentCategory::Affirmative, "ok"));
            assert_eq!(next, DialogueState::Collect(SlotName::Contact));
            assert_eq!(ctx.current_topic(), "booking");
            assert_eq!(
                speak_purpose(&effects),
                Some(PromptPurpose::CollectSlot(SlotName::Contact))
            );
        }

        #[test]
        fn slots_survive_a_digression_untouched() {
            let mut ctx = ctx();
            let mut state = DialogueState::Collect(SlotName::Service);
            for (intent, raw) in [
                (IntentCategory::ServiceProvided, "haircut"),
                (IntentCategory::Affirmative, "yes"),
                (IntentCategory::TimeProvided, "Friday 3pm"),
                (IntentCategory::Affirmative, "yes"),
            ] {
                state = step(state, &mut ctx, user(intent, raw)).0;
            }
            assert_eq!(state, DialogueState::Collect(SlotName::Contact));
            let slots_before = ctx.slots.clone();

            state = step(
                state,
                &mut ctx,
                user(IntentCategory::DigressionQuestion, "do you take cards?"),
            )
            .0;
            let (next, _) = step(state, &mut ctx, user(IntentCategory::Affirmative, "thanks"));

            assert_eq!(next, DialogueState::Collect(SlotName::Contact));
            assert_eq!(ctx.slots, slots_before);
            assert!(ctx.slots.is_locked_in(SlotName::Service));
            assert!(ctx.slots.is_locked_in(SlotName::TimeWindow));
        }

        #[test]
        fn slot_values_spoken_while_digressing_do_not_leak() {
            let mut ctx = ctx();
            let state = step(
                DialogueState::Collect(SlotName::Contact),
                &mut ctx,
                user(IntentCategory::DigressionQuestion, "how much is it?"),
            )
            .0;

            // The caller mentions a time while digressing; it must not
            // land in the time slot.
            let event = TurnEvent::User(
                ClassifiedTurn::new(IntentCategory::TimeProvided, 0.9, "maybe Friday 3pm")
                    .with_entity("time_window", "Friday 3pm"),
            );
            let (next, _) = step(state, &mut ctx, event);

            assert_eq!(next, DialogueState::Collect(SlotName::Contact));
            assert!(!ctx.slots.is_validated(SlotName::TimeWindow));
        }

        #[test]
        fn push_at_capacity_answers_inline_without_topic_change() {
            let tenant = TenantConfig {
                max_digression_depth: 1,
                ..TenantConfig::default()
            };
            let mut ctx = ctx_with(tenant);

            let state = step(
                DialogueState::Collect(SlotName::Contact),
                &mut ctx,
                user(IntentCategory::DigressionQuestion, "first question"),
            )
            .0;
            assert_eq!(ctx.digressions.depth(), 1);

            let (next, effects) = step(
                state,
                &mut ctx,
                user(IntentCategory::DigressionQuestion, "second question"),
            );

            assert_eq!(next, DialogueState::DigressionAnswering);
            assert_eq!(ctx.digressions.depth(), 1);
            assert_eq!(ctx.current_topic(), "first question");
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::AnswerDigression));
        }

        #[test]
        fn auto_return_resumes_saved_state() {
            let mut ctx = ctx();
            let state = step(
                DialogueState::Confirm(SlotName::Service),
                &mut ctx,
                user(IntentCategory::DigressionQuestion, "where do I park?"),
            )
            .0;

            let (next, effects) = step(state, &mut ctx, TurnEvent::DigressionResume);

            assert_eq!(next, DialogueState::Confirm(SlotName::Service));
            assert_eq!(
                speak_purpose(&effects),
                Some(PromptPurpose::ConfirmSlot(SlotName::Service))
            );
        }
    }

    mod final_confirmation {
        use super::*;

        fn locked_in_ctx() -> SessionContext {
            let mut ctx = ctx();
            let mut state = DialogueState::Collect(SlotName::Service);
            for (intent, raw) in [
                (IntentCategory::ServiceProvided, "haircut"),
                (IntentCategory::Affirmative, "yes"),
                (IntentCategory::TimeProvided, "Friday 3pm"),
                (IntentCategory::Affirmative, "yes"),
                (IntentCategory::ContactProvided, "555-1234"),
                (IntentCategory::Affirmative, "yes"),
            ] {
                state = step(state, &mut ctx, user(intent, raw)).0;
            }
            assert_eq!(state, DialogueState::FinalConfirmation);
            ctx
        }

        #[test]
        fn affirmative_invokes_booking() {
            let ctx = locked_in_ctx();
            let t = transition(
                DialogueState::FinalConfirmation,
                &ctx,
                &user(IntentCategory::Affirmative, "yes, book it"),
                Utc::now(),
            );

            assert_eq!(t.next, DialogueState::Booking);
            assert!(t.effects.contains(&SideEffect::PersistBooking));
        }

        #[test]
        fn named_correction_reopens_that_slot() {
            let mut ctx = locked_in_ctx();
            let event = TurnEvent::User(
                ClassifiedTurn::new(IntentCategory::Negative, 0.9, "no, the time is wrong")
                    .with_entity("slot", "time"),
            );
            let (next, effects) = step(DialogueState::FinalConfirmation, &mut ctx, event);

            assert_eq!(next, DialogueState::Collect(SlotName::TimeWindow));
            assert_eq!(
                speak_purpose(&effects),
                Some(PromptPurpose::CollectSlot(SlotName::TimeWindow))
            );
            assert!(!ctx.slots.is_validated(SlotName::TimeWindow));
            // Other slots stay locked in.
            assert!(ctx.slots.is_locked_in(SlotName::Service));
            assert!(ctx.slots.is_locked_in(SlotName::Contact));
        }

        #[test]
        fn unnamed_negatives_are_bounded_by_final_strikes() {
            let mut ctx = locked_in_ctx();
            let mut state = DialogueState::FinalConfirmation;
            for _ in 0..2 {
                let (next, effects) =
                    step(state, &mut ctx, user(IntentCategory::Negative, "no"));
                assert_eq!(next, DialogueState::FinalConfirmation);
                assert_eq!(speak_purpose(&effects), Some(PromptPurpose::FinalSummary));
                state = next;
            }
            let (next, _) = step(state, &mut ctx, user(IntentCategory::Negative, "no"));

            assert_eq!(next, DialogueState::Escalating);
            assert!(ctx
                .escalation_flags
                .last()
                .unwrap()
                .details
                .contains("final_confirmation"));
        }
    }

    mod booking_pipeline {
        use super::*;

        #[test]
        fn booking_success_completes_with_confirmation_utterance() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Booking,
                &mut ctx,
                TurnEvent::BookingSucceeded(BookingId::new()),
            );

            assert_eq!(next, DialogueState::Completed);
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::BookingConfirmed));
            assert_eq!(ctx.phase, SessionPhase::Completed);
        }

        #[test]
        fn booking_failure_retries_once_automatically() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Booking,
                &mut ctx,
                TurnEvent::BookingFailed { retryable: true },
            );

            assert_eq!(next, DialogueState::BookingError);
            assert!(effects.contains(&SideEffect::PersistBooking));
        }

        #[test]
        fn second_booking_failure_escalates() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::BookingError,
                &mut ctx,
                TurnEvent::BookingFailed { retryable: true },
            );

            assert_eq!(next, DialogueState::Escalating);
            assert!(effects.contains(&SideEffect::ScheduleCallback));
        }

        #[test]
        fn retry_success_still_completes() {
            let mut ctx = ctx();
            let (next, _) = step(
                DialogueState::BookingError,
                &mut ctx,
                TurnEvent::BookingSucceeded(BookingId::new()),
            );
            assert_eq!(next, DialogueState::Completed);
        }

        #[test]
        fn callback_success_schedules_and_notifies() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Escalating,
                &mut ctx,
                TurnEvent::CallbackArranged(crate::domain::foundation::CallbackId::new()),
            );

            assert_eq!(next, DialogueState::CallbackScheduled);
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::CallbackNotice));
        }

        #[test]
        fn callback_failure_still_yields_an_apology() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Escalating,
                &mut ctx,
                TurnEvent::CallbackFailed,
            );

            assert_eq!(next, DialogueState::Completed);
            assert_eq!(speak_purpose(&effects), Some(PromptPurpose::Apology));
        }
    }

    mod silence {
        use super::*;

        #[test]
        fn silence_reprompts_current_collection() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Collect(SlotName::TimeWindow),
                &mut ctx,
                TurnEvent::SilenceTimeout,
            );

            assert_eq!(next, DialogueState::Collect(SlotName::TimeWindow));
            assert_eq!(
                speak_purpose(&effects),
                Some(PromptPurpose::CollectSlot(SlotName::TimeWindow))
            );
            assert_eq!(ctx.timeout_count, 1);
        }

        #[test]
        fn silence_in_terminal_state_is_a_no_op() {
            let mut ctx = ctx();
            let (next, effects) = step(
                DialogueState::Completed,
                &mut ctx,
                TurnEvent::SilenceTimeout,
            );

            assert_eq!(next, DialogueState::Completed);
            assert!(effects.is_empty());
            assert_eq!(ctx.timeout_count, 0);
        }

        #[test]
        fn silence_does_not_burn_a_strike() {
            let mut ctx = ctx();
            step(
                DialogueState::Confirm(SlotName::Service),
                &mut ctx,
                TurnEvent::SilenceTimeout,
            );
            assert_eq!(ctx.attempts.count(ConfirmTarget::Slot(SlotName::Service)), 0);
        }
    }

    mod invariants {
        use super::*;
        use crate::domain::foundation::StateMachine;

        #[test]
        fn happy_path_transitions_are_all_declared_valid() {
            let mut ctx = ctx();
            let mut state = DialogueState::Collect(SlotName::Service);
            for (intent, raw) in [
                (IntentCategory::ServiceProvided, "haircut"),
                (IntentCategory::Affirmative, "yes"),
                (IntentCategory::TimeProvided, "Friday 3pm"),
                (IntentCategory::Affirmative, "yes"),
                (IntentCategory::ContactProvided, "555-1234"),
                (IntentCategory::Affirmative, "yes"),
            ] {
                let t = transition(state, &ctx, &user(intent, raw), Utc::now());
                assert!(
                    state == t.next || state.can_transition_to(&t.next),
                    "{:?} -> {:?} not declared",
                    state,
                    t.next
                );
                ctx.apply(t.patch, Utc::now());
                state = t.next;
            }
        }

        #[test]
        fn escalation_transition_respects_tenant_flag() {
            let ctx_enabled = ctx();
            let t = escalation_transition(
                &ctx_enabled,
                EscalationReason::RetryBudgetExhausted { retries: 5 },
            );
            assert_eq!(t.next, DialogueState::Escalating);

            let ctx_disabled = ctx_with(TenantConfig {
                escalation_enabled: false,
                ..TenantConfig::default()
            });
            let t = escalation_transition(
                &ctx_disabled,
                EscalationReason::RetryBudgetExhausted { retries: 5 },
            );
            assert_eq!(t.next, DialogueState::Completed);
        }
    }
}
