//! Turn orchestrator: sequences one turn through classification, the
//! state machine, and streamed reply generation.
//!
//! Within a session, turns are strictly sequential: the session entry
//! stays locked from first read to final write-back, and a barge-in
//! abandons the in-flight turn's work entirely instead of merging
//! partial results. Unrelated sessions run fully in parallel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::fastpath;
use crate::application::registry::{
    SessionEntry, SessionMetrics, SessionRegistry, SessionSlot,
};
use crate::domain::dialogue::{
    escalation_transition, transition, ClassifiedTurn, DialogueState, SideEffect, SpeakDirective,
    TurnEvent,
};
use crate::domain::foundation::SessionId;
use crate::domain::frame::{DecisionFrame, FrameSplitter};
use crate::domain::session::{
    should_escalate, ConfirmationCounters, EscalationFlag, OrganizationContext, SessionContext,
    SessionPhase, SlotBoard, TenantConfig,
};
use crate::ports::{
    BookingRecord, BookingWriter, CallbackRecord, Clock, ReplyGenerator, ReplyRequest,
    TurnClassifier,
};

/// Orchestrator tuning knobs, independent of any tenant policy.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Classifier results below this confidence degrade to unclear.
    pub confidence_floor: f32,
    /// Delay before an unanswered digression auto-returns.
    pub digression_return: Duration,
    /// Cadence of the background expiry sweep.
    pub sweep_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            confidence_floor: 0.35,
            digression_return: Duration::from_secs(20),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Errors surfaced to the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    #[error("turn abandoned after barge-in on session {0}")]
    TurnCancelled(SessionId),
}

/// The persistence failure detail attached to a turn that apologized.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceFailure {
    pub retryable: bool,
    pub message: String,
}

/// Result of one processed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The spoken reply (already streamed to the speech sink as it was
    /// produced; returned whole for the transport contract).
    pub response_text: String,
    /// The state the session rests in after this turn.
    pub state: DialogueState,
    /// The parsed decision payload from the generated stream, if any.
    pub frame: Option<DecisionFrame>,
    pub processing_time_ms: u64,
    /// Set only when a booking/callback write failed after its retry.
    pub persistence_failure: Option<PersistenceFailure>,
}

/// Result of ending a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClosure {
    pub final_state: DialogueState,
    pub metrics: SessionMetrics,
}

/// Read-only observability snapshot of a live session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: DialogueState,
    pub phase: SessionPhase,
    pub slots: SlotBoard,
    pub attempts: ConfirmationCounters,
    pub digression_depth: usize,
    pub escalation_flags: Vec<EscalationFlag>,
    pub progress_summary: String,
    pub metrics: SessionMetrics,
}

/// What the per-turn pipeline produced before generation.
struct DrivenTurn {
    directive: Option<SpeakDirective>,
    persistence_failure: Option<PersistenceFailure>,
    schedule_digression_return: bool,
}

/// The dialogue orchestration engine's exposed surface.
///
/// Cheap to clone; all collaborators and the registry are shared.
#[derive(Clone)]
pub struct TurnOrchestrator {
    registry: Arc<SessionRegistry>,
    classifier: Arc<dyn TurnClassifier>,
    generator: Arc<dyn ReplyGenerator>,
    store: Arc<dyn BookingWriter>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

impl TurnOrchestrator {
    /// Wires the orchestrator to its collaborators.
    pub fn new(
        registry: Arc<SessionRegistry>,
        classifier: Arc<dyn TurnClassifier>,
        generator: Arc<dyn ReplyGenerator>,
        store: Arc<dyn BookingWriter>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            classifier,
            generator,
            store,
            clock,
            settings,
        }
    }

    /// The shared registry, for observability surfaces.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Starts a new session.
    pub async fn start_session(
        &self,
        session_id: SessionId,
        tenant: TenantConfig,
        organization: OrganizationContext,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        let context = SessionContext::new(session_id, tenant, organization, now);
        if !self.registry.insert(session_id, SessionEntry::new(context)).await {
            return Err(EngineError::SessionAlreadyExists(session_id));
        }
        info!(session_id = %session_id, "session started");
        Ok(())
    }

    /// Processes one caller utterance.
    pub async fn submit_turn(
        &self,
        session_id: SessionId,
        transcript: &str,
        confidence: f32,
    ) -> Result<TurnOutcome, EngineError> {
        let started = Instant::now();
        let slot = self
            .registry
            .get(session_id)
            .await
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let mut entry = slot.entry.lock().await;
        let epoch = slot.cancel_epoch();

        // Work on copies: a barge-in abandons everything this turn did.
        let mut ctx = entry.context.clone();
        let mut state = entry.state;
        ctx.touch(self.clock.now());

        let mut fast_path = false;
        let mut classifier_failed = false;
        let classified = match fastpath::classify_fast(transcript) {
            Some(turn) => {
                fast_path = true;
                debug!(session_id = %session_id, intent = ?turn.intent, "fast-path classification");
                turn
            }
            None => match self.classifier.classify(transcript, &ctx).await {
                Ok(turn) if turn.confidence >= self.settings.confidence_floor => turn,
                Ok(turn) => {
                    debug!(
                        session_id = %session_id,
                        confidence = turn.confidence,
                        "classification below confidence floor"
                    );
                    ClassifiedTurn::unclear(transcript)
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "classification failed");
                    classifier_failed = true;
                    ctx.apply(
                        crate::domain::dialogue::ContextPatch {
                            record_retry: true,
                            record_error: Some(format!("classification failed: {}", err)),
                            ..Default::default()
                        },
                        self.clock.now(),
                    );
                    ClassifiedTurn::unclear(transcript)
                }
            },
        };

        // Low transport-level recognition confidence also degrades.
        let event = if confidence < self.settings.confidence_floor && !fast_path {
            TurnEvent::User(ClassifiedTurn::unclear(transcript))
        } else {
            TurnEvent::User(classified)
        };

        let driven = self
            .drive(session_id, &slot, &mut ctx, &mut state, event, epoch)
            .await?;
        let (response_text, frame, generation_fallback) = self
            .speak(session_id, &slot, &ctx, state, &driven, epoch)
            .await?;

        // Commit: the turn completed uncancelled.
        let elapsed_ms = started.elapsed().as_millis() as u64;
        entry.context = ctx;
        entry.state = state;
        entry
            .metrics
            .record_turn(elapsed_ms, fast_path, classifier_failed, generation_fallback);

        if driven.schedule_digression_return {
            self.spawn_digression_return(session_id);
        }

        info!(
            session_id = %session_id,
            state = %state,
            turn_ms = elapsed_ms,
            fast_path,
            "turn completed"
        );

        Ok(TurnOutcome {
            response_text,
            state,
            frame,
            processing_time_ms: elapsed_ms,
            persistence_failure: driven.persistence_failure,
        })
    }

    /// Signals that the caller started speaking over the reply: the
    /// in-flight turn for this session abandons its remaining effects.
    pub async fn notify_barge_in(&self, session_id: SessionId) -> Result<(), EngineError> {
        let slot = self
            .registry
            .get(session_id)
            .await
            .ok_or(EngineError::SessionNotFound(session_id))?;
        slot.bump_cancel();
        debug!(session_id = %session_id, "barge-in signalled");
        Ok(())
    }

    /// Delivers a silence timeout as an ordinary sequential event.
    ///
    /// Returns `Ok(None)` when a turn is already in flight for the
    /// session - redundant timeout signals are coalesced, never queued.
    pub async fn notify_silence_timeout(
        &self,
        session_id: SessionId,
    ) -> Result<Option<TurnOutcome>, EngineError> {
        let slot = self
            .registry
            .get(session_id)
            .await
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let Ok(mut entry) = slot.entry.try_lock() else {
            debug!(session_id = %session_id, "silence timeout coalesced; turn in flight");
            return Ok(None);
        };

        let started = Instant::now();
        let epoch = slot.cancel_epoch();
        let mut ctx = entry.context.clone();
        let mut state = entry.state;
        ctx.touch(self.clock.now());

        let driven = self
            .drive(
                session_id,
                &slot,
                &mut ctx,
                &mut state,
                TurnEvent::SilenceTimeout,
                epoch,
            )
            .await?;
        let (response_text, frame, generation_fallback) = self
            .speak(session_id, &slot, &ctx, state, &driven, epoch)
            .await?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        entry.context = ctx;
        entry.state = state;
        entry
            .metrics
            .record_turn(elapsed_ms, false, false, generation_fallback);

        Ok(Some(TurnOutcome {
            response_text,
            state,
            frame,
            processing_time_ms: elapsed_ms,
            persistence_failure: driven.persistence_failure,
        }))
    }

    /// Ends a session, waiting out any in-flight turn.
    pub async fn end_session(
        &self,
        session_id: SessionId,
        reason: &str,
    ) -> Result<SessionClosure, EngineError> {
        let slot = self
            .registry
            .remove(session_id)
            .await
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let entry = slot.entry.lock().await;
        info!(session_id = %session_id, reason, final_state = %entry.state, "session ended");
        Ok(SessionClosure {
            final_state: entry.state,
            metrics: entry.metrics.clone(),
        })
    }

    /// Read-only snapshot for observability; never mutates.
    pub async fn inspect_session(
        &self,
        session_id: SessionId,
    ) -> Result<SessionSnapshot, EngineError> {
        let slot = self
            .registry
            .get(session_id)
            .await
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let entry = slot.entry.lock().await;

        Ok(SessionSnapshot {
            state: entry.state,
            phase: entry.context.phase,
            slots: entry.context.slots.clone(),
            attempts: entry.context.attempts.clone(),
            digression_depth: entry.context.digressions.depth(),
            escalation_flags: entry.context.escalation_flags.clone(),
            progress_summary: entry.context.progress_summary.clone(),
            metrics: entry.metrics.clone(),
        })
    }

    /// Removes sessions idle past their tenant timeout. Returns how
    /// many were removed.
    pub async fn run_expiry_sweep(&self) -> usize {
        let removed = self.registry.sweep_expired(self.clock.now()).await;
        for session_id in &removed {
            info!(session_id = %session_id, "session expired");
        }
        removed.len()
    }

    /// Spawns the periodic expiry sweep. Abort the handle to tear down.
    pub fn spawn_expiry_sweeper(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.settings.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                this.run_expiry_sweep().await;
            }
        })
    }

    /// Runs events through the engine until the queue drains, executing
    /// persistence effects and feeding their results back in, then
    /// applies the escalation policy once.
    async fn drive(
        &self,
        session_id: SessionId,
        slot: &Arc<SessionSlot>,
        ctx: &mut SessionContext,
        state: &mut DialogueState,
        first_event: TurnEvent,
        epoch: u64,
    ) -> Result<DrivenTurn, EngineError> {
        let mut pending = VecDeque::from([first_event]);
        let mut directive: Option<SpeakDirective> = None;
        let mut persistence_failure = None;
        let mut schedule_digression_return = false;
        let mut booking_attempts = 0u32;
        let mut policy_checked = false;

        loop {
            while let Some(event) = pending.pop_front() {
                let now = self.clock.now();
                let result = transition(*state, ctx, &event, now);
                debug!(
                    session_id = %session_id,
                    from = %*state,
                    to = %result.next,
                    "transition"
                );
                ctx.apply(result.patch, now);
                *state = result.next;

                for effect in result.effects {
                    match effect {
                        SideEffect::Speak(d) => directive = Some(d),
                        SideEffect::PersistBooking => {
                            if slot.cancel_epoch() != epoch {
                                return Err(EngineError::TurnCancelled(session_id));
                            }
                            booking_attempts += 1;
                            let record = BookingRecord::from_context(ctx, self.clock.now());
                            match self.store.persist_booking(record).await {
                                Ok(booking_id) => {
                                    pending.push_back(TurnEvent::BookingSucceeded(booking_id));
                                }
                                Err(err) => {
                                    warn!(
                                        session_id = %session_id,
                                        attempt = booking_attempts,
                                        error = %err,
                                        "booking write failed"
                                    );
                                    if booking_attempts >= 2 {
                                        persistence_failure = Some(PersistenceFailure {
                                            retryable: err.is_retryable(),
                                            message: err.to_string(),
                                        });
                                    }
                                    pending.push_back(TurnEvent::BookingFailed {
                                        retryable: err.is_retryable(),
                                    });
                                }
                            }
                        }
                        SideEffect::ScheduleCallback => {
                            let event = self.persist_callback_with_retry(session_id, ctx).await;
                            if let TurnEvent::CallbackFailed = event {
                                persistence_failure.get_or_insert(PersistenceFailure {
                                    retryable: true,
                                    message: "callback scheduling failed".to_string(),
                                });
                            }
                            pending.push_back(event);
                        }
                        SideEffect::ScheduleDigressionReturn => {
                            schedule_digression_return = true;
                        }
                    }
                }
            }

            if !policy_checked {
                policy_checked = true;
                let decision = should_escalate(ctx, self.clock.now());
                if decision.escalate
                    && !matches!(
                        *state,
                        DialogueState::Completed | DialogueState::CallbackScheduled
                    )
                {
                    let reason = decision
                        .reason
                        .expect("escalating decision always carries a reason");
                    info!(session_id = %session_id, reason = %reason, "policy escalation");
                    let result = escalation_transition(ctx, reason);
                    let now = self.clock.now();
                    ctx.apply(result.patch, now);
                    *state = result.next;
                    for effect in result.effects {
                        match effect {
                            SideEffect::Speak(d) => directive = Some(d),
                            SideEffect::ScheduleCallback => {
                                let event =
                                    self.persist_callback_with_retry(session_id, ctx).await;
                                if let TurnEvent::CallbackFailed = event {
                                    persistence_failure.get_or_insert(PersistenceFailure {
                                        retryable: true,
                                        message: "callback scheduling failed".to_string(),
                                    });
                                }
                                pending.push_back(event);
                            }
                            _ => {}
                        }
                    }
                    if !pending.is_empty() {
                        continue;
                    }
                }
            }
            break;
        }

        Ok(DrivenTurn {
            directive,
            persistence_failure,
            schedule_digression_return,
        })
    }

    /// Writes the callback record, retrying once before reporting
    /// failure as an event.
    async fn persist_callback_with_retry(
        &self,
        session_id: SessionId,
        ctx: &SessionContext,
    ) -> TurnEvent {
        for attempt in 1..=2 {
            let record = CallbackRecord::from_context(ctx, self.clock.now());
            match self.store.persist_callback(record).await {
                Ok(callback_id) => return TurnEvent::CallbackArranged(callback_id),
                Err(err) => {
                    warn!(
                        session_id = %session_id,
                        attempt,
                        error = %err,
                        "callback write failed"
                    );
                    if attempt == 2 || !err.is_retryable() {
                        return TurnEvent::CallbackFailed;
                    }
                }
            }
        }
        TurnEvent::CallbackFailed
    }

    /// Generates the reply for the turn's speak directive, streaming it
    /// through the frame splitter. A generator failure substitutes the
    /// canned fallback; a barge-in abandons the turn.
    async fn speak(
        &self,
        session_id: SessionId,
        slot: &Arc<SessionSlot>,
        ctx: &SessionContext,
        state: DialogueState,
        driven: &DrivenTurn,
        epoch: u64,
    ) -> Result<(String, Option<DecisionFrame>, bool), EngineError> {
        let Some(directive) = driven.directive else {
            // Internal events on settled sessions produce no utterance.
            return Ok((String::new(), None, false));
        };

        let request = ReplyRequest::new(state, directive, ctx.clone());
        let mut stream = match self.generator.generate(request).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "generation failed; using fallback");
                return Ok((directive.purpose.canned_fallback(), None, true));
            }
        };

        let mut heard = String::new();
        let mut splitter = FrameSplitter::new();
        let mut broke = false;
        loop {
            if slot.cancel_epoch() != epoch {
                // Barge-in mid-stream: discard the partial payload and
                // abandon the turn's effects entirely.
                debug!(session_id = %session_id, "turn cancelled mid-generation");
                return Err(EngineError::TurnCancelled(session_id));
            }
            match stream.next().await {
                Some(Ok(fragment)) => {
                    // This callback is where the speech sink attaches;
                    // text flows out before the stream completes.
                    let mut sink = |text: &str| heard.push_str(text);
                    splitter.push(&fragment, &mut sink);
                }
                Some(Err(err)) => {
                    warn!(session_id = %session_id, error = %err, "reply stream broke");
                    broke = true;
                    break;
                }
                None => break,
            }
        }

        if slot.cancel_epoch() != epoch {
            return Err(EngineError::TurnCancelled(session_id));
        }

        let mut sink = |text: &str| heard.push_str(text);
        let outcome = splitter.finish(&mut sink);

        if outcome.spoken.is_empty() {
            // Nothing usable arrived; the canned utterance keeps the
            // every-turn-has-a-reply guarantee.
            return Ok((directive.purpose.canned_fallback(), None, true));
        }

        Ok((outcome.spoken, outcome.frame, broke))
    }

    /// Arranges the delayed auto-return from a digression.
    fn spawn_digression_return(&self, session_id: SessionId) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.settings.digression_return).await;
            let Some(slot) = this.registry.get(session_id).await else {
                return;
            };
            // A turn in flight (or already resumed) wins over the timer.
            let Ok(mut entry) = slot.entry.try_lock() else {
                return;
            };
            if entry.state != DialogueState::DigressionAnswering {
                return;
            }

            let epoch = slot.cancel_epoch();
            let mut ctx = entry.context.clone();
            let mut state = entry.state;
            let driven = match this
                .drive(
                    session_id,
                    &slot,
                    &mut ctx,
                    &mut state,
                    TurnEvent::DigressionResume,
                    epoch,
                )
                .await
            {
                Ok(driven) => driven,
                Err(_) => return,
            };
            if this
                .speak(session_id, &slot, &ctx, state, &driven, epoch)
                .await
                .is_err()
            {
                return;
            }
            entry.context = ctx;
            entry.state = state;
            debug!(session_id = %session_id, "digression auto-return completed");
        });
    }
}
