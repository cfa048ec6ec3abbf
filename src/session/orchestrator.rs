use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::{whole_secs, ActiveTimer, Clock};
use super::events::{SessionEvent, SessionWarning};
use super::metrics::{MetricSnapshot, MetricsEngine};
use super::persistence::Persistence;
use super::state::SessionState;
use super::transcript::TranscriptStore;
use super::{EndOutcome, SessionConfig, SessionView, TurnOutcome};
use crate::ai::{ReplyGenerator, ScenarioContext, TranscriptScorer};
use crate::config::SessionTuning;
use crate::error::{CaptureError, LangbaseError, LangbaseResult, ValidationError};
use crate::evaluation::EvaluationFinalizer;
use crate::speech::{
    CaptureEvent, CaptureStatus, PlaybackOutcome, SpeechAdapter, DEFAULT_VOICE_ID,
};
use crate::storage::{Evaluation, Sender, Session, SessionStatus, Storage, Turn};

const EVENT_CAPACITY: usize = 256;
const EVALUATION_DEGRADED_NOTICE: &str =
    "Detailed evaluation is unavailable; scores are based on live session metrics.";

/// Collaborators a session runs against.
pub struct SessionDeps {
    pub replies: Arc<dyn ReplyGenerator>,
    pub scorer: Arc<dyn TranscriptScorer>,
    pub storage: Arc<dyn Storage>,
    pub speech: Arc<SpeechAdapter>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
struct Utterance {
    id: u64,
    text: String,
}

struct Inner {
    state: SessionState,
    paused_from: Option<SessionState>,
    /// Bumped on end; async completions carrying an older value are dropped.
    generation: u64,
    session: Session,
    transcript: TranscriptStore,
    metrics: MetricsEngine,
    timer: ActiveTimer,
    utterance_seq: u64,
    speaking: Option<Utterance>,
    /// Reply text to speak when resuming into `speaking`.
    pending_speech: Option<String>,
    playback_warned: bool,
    evaluation: Option<Evaluation>,
}

enum Next {
    Speak(Utterance),
    Listen,
    Hold,
}

/// State machine for one training attempt.
///
/// All methods take `&self`; share it behind an `Arc` to pause or end from
/// another task while a turn is in flight. Internal state sits behind a
/// mutex that is never held across an await.
pub struct SessionOrchestrator {
    inner: Mutex<Inner>,
    tuning: SessionTuning,
    voice: bool,
    voice_id: String,
    replies: Arc<dyn ReplyGenerator>,
    speech: Arc<SpeechAdapter>,
    clock: Arc<dyn Clock>,
    persistence: Persistence,
    finalizer: EvaluationFinalizer,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(config: SessionConfig, tuning: SessionTuning, deps: SessionDeps) -> Self {
        let session = Session::new(config.user_id, config.scenario, config.mode, config.persona);
        let voice = session.mode.is_voice() && deps.speech.is_voice();
        if session.mode.is_voice() && !voice {
            warn!(session_id = %session.id, "Call mode without a voice backend, running as text");
        }

        let voice_id = session
            .persona
            .voice_id
            .clone()
            .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string());
        let persistence = Persistence::new(deps.storage, tuning.persist_retry());
        let finalizer = EvaluationFinalizer::new(
            deps.scorer,
            persistence.clone(),
            Duration::from_millis(tuning.evaluation_timeout_ms),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Inner {
            state: SessionState::Connecting,
            paused_from: None,
            generation: 0,
            transcript: TranscriptStore::new(&session.id),
            metrics: MetricsEngine::new(tuning.metrics_seed, tuning.metrics_jitter),
            session,
            timer: ActiveTimer::new(),
            utterance_seq: 0,
            speaking: None,
            pending_speech: None,
            playback_warned: false,
            evaluation: None,
        };

        Self {
            inner: Mutex::new(inner),
            tuning,
            voice,
            voice_id,
            replies: deps.replies,
            speech: deps.speech,
            clock: deps.clock,
            persistence,
            finalizer,
            events,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn session_id(&self) -> String {
        self.lock().session.id.clone()
    }

    pub fn is_voice(&self) -> bool {
        self.voice
    }

    pub fn snapshot(&self) -> SessionView {
        let inner = self.lock();
        let active = inner.timer.active_elapsed(self.clock.now());
        let mut session = inner.session.clone();
        if !inner.state.is_terminal() {
            session.active_duration_secs = whole_secs(active);
        }

        SessionView {
            state: inner.state,
            paused_from: inner.paused_from,
            session,
            turns: inner.transcript.all().to_vec(),
            metrics: inner.metrics.latest().cloned(),
            active_secs: active.as_secs_f64(),
            unpersisted: self.persistence.is_degraded(),
            evaluation: inner.evaluation.clone(),
        }
    }

    /// Persist the session, then ask the client for its opening line.
    pub async fn start(&self) -> SessionState {
        let session = {
            let mut inner = self.lock();
            if inner.state != SessionState::Connecting {
                return inner.state;
            }
            inner.session.status = SessionStatus::Active;
            inner.session.clone()
        };

        let persisted = self.persistence.create_session(&session).await;

        let (generation, scenario) = {
            let mut inner = self.lock();
            if inner.state != SessionState::Connecting {
                return inner.state;
            }
            inner.timer.start(self.clock.now());
            self.transition(&mut inner, SessionState::Greeting);
            (inner.generation, ScenarioContext::from(&inner.session))
        };

        info!(
            session_id = %session.id,
            mode = %session.mode,
            voice = self.voice,
            persisted,
            "Session started"
        );

        let reply = self.request_reply(&[], &scenario).await;
        self.apply_reply(generation, reply, None).await;
        self.state()
    }

    /// Process one finalized user utterance through to the client's reply.
    pub async fn handle_user_turn(&self, text: &str) -> TurnOutcome {
        if text.trim().is_empty() {
            debug!("Blank submission ignored");
            return TurnOutcome::Ignored;
        }

        let (generation, user_turn, history, scenario) = {
            let mut inner = self.lock();
            if inner.state != SessionState::Listening {
                debug!(state = %inner.state, "Submission dropped, not listening");
                return TurnOutcome::Busy { state: inner.state };
            }

            let user_turn = match self.append(&mut inner, Sender::User, text) {
                Ok(turn) => turn,
                Err(e) => {
                    debug!(error = %e, "Submission rejected");
                    return TurnOutcome::Ignored;
                }
            };
            self.transition(&mut inner, SessionState::Thinking);

            let history = inner.transcript.window(self.tuning.history_window).to_vec();
            (
                inner.generation,
                user_turn,
                history,
                ScenarioContext::from(&inner.session),
            )
        };

        if self.voice {
            self.speech.stop_capture().await;
        }
        self.persistence.append_turn(&user_turn).await;

        let reply = self.request_reply(&history, &scenario).await;
        self.apply_reply(generation, reply, Some(&user_turn)).await
    }

    pub async fn pause(&self) -> Result<(), ValidationError> {
        let (session_id, active_secs) = {
            let mut inner = self.lock();
            let from = inner.state;
            from.transition(SessionState::Paused)?;

            if from == SessionState::Speaking {
                inner.pending_speech = inner.speaking.take().map(|u| u.text);
            }
            inner.paused_from = Some(from);

            let now = self.clock.now();
            inner.timer.pause(now);
            inner.session.status = SessionStatus::Paused;
            inner.session.active_duration_secs = whole_secs(inner.timer.active_elapsed(now));
            self.transition(&mut inner, SessionState::Paused);

            (inner.session.id.clone(), inner.session.active_duration_secs)
        };

        self.speech.stop_capture().await;
        self.speech.stop_playback();
        self.persistence
            .update_status(&session_id, SessionStatus::Paused, active_secs)
            .await;

        info!(session_id = %session_id, active_secs, "Session paused");
        Ok(())
    }

    /// Return to the state the session was paused from.
    pub async fn resume(&self) -> Result<SessionState, ValidationError> {
        let (generation, to, utterance, session_id, active_secs) = {
            let mut inner = self.lock();
            if inner.state != SessionState::Paused {
                return Err(ValidationError::InvalidTransition {
                    from: inner.state.to_string(),
                    to: "resumed".to_string(),
                });
            }

            let mut to = inner.paused_from.take().unwrap_or(SessionState::Listening);
            let mut utterance = None;
            if to == SessionState::Speaking {
                match inner.pending_speech.take() {
                    Some(text) => {
                        let next = self.next_utterance(&mut inner, text);
                        utterance = Some(next);
                    }
                    None => to = SessionState::Listening,
                }
            }

            inner.timer.resume(self.clock.now());
            inner.session.status = SessionStatus::Active;
            self.transition(&mut inner, to);

            (
                inner.generation,
                to,
                utterance,
                inner.session.id.clone(),
                inner.session.active_duration_secs,
            )
        };

        self.persistence
            .update_status(&session_id, SessionStatus::Active, active_secs)
            .await;
        info!(session_id = %session_id, state = %to, "Session resumed");

        match (to, utterance) {
            (SessionState::Speaking, Some(utterance)) => self.play(generation, utterance).await,
            (SessionState::Listening, _) => self.listen(generation).await,
            _ => {}
        }
        Ok(to)
    }

    /// End the session. Outstanding replies are discarded and, when the
    /// conversation is long enough, the transcript is evaluated.
    pub async fn end(&self) -> EndOutcome {
        let (session, turns, local, too_short) = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return EndOutcome::AlreadyEnded {
                    evaluation: inner.evaluation.clone(),
                };
            }

            inner.generation += 1;
            let active = inner.timer.freeze(self.clock.now());
            inner.session.active_duration_secs = whole_secs(active);
            inner.session.status = SessionStatus::Completed;
            inner.session.completed_at = Some(Utc::now());
            inner.paused_from = None;
            inner.pending_speech = None;
            inner.speaking = None;
            self.transition(&mut inner, SessionState::Ended);

            let turns = inner.transcript.all().to_vec();
            let too_short = turns.len() < self.tuning.min_turns_for_evaluation
                || !inner.transcript.has_both_senders();
            let local = inner
                .metrics
                .latest()
                .cloned()
                .unwrap_or_else(MetricSnapshot::neutral);

            (inner.session.clone(), turns, local, too_short)
        };

        self.shutdown.cancel();
        self.speech.stop_capture().await;
        self.speech.stop_playback();
        self.persistence.end_session(&session, None).await;

        info!(
            session_id = %session.id,
            turns = turns.len(),
            active_secs = session.active_duration_secs,
            "Session ended"
        );

        if too_short {
            info!(session_id = %session.id, "Session too short, evaluation skipped");
            return EndOutcome::TooShort { turns: turns.len() };
        }

        let evaluation = self.evaluate(session, &turns, &local).await;
        EndOutcome::Evaluated { evaluation }
    }

    /// Re-score an ended session whose evaluation came from local metrics.
    /// Returns the current evaluation unchanged when it is already remote,
    /// and `None` when the session was never evaluated.
    pub async fn retry_evaluation(&self) -> Option<Evaluation> {
        let (session, turns, local, existing) = {
            let inner = self.lock();
            if !inner.state.is_terminal() {
                return None;
            }
            let existing = inner.evaluation.clone()?;
            let local = inner
                .metrics
                .latest()
                .cloned()
                .unwrap_or_else(MetricSnapshot::neutral);
            (
                inner.session.clone(),
                inner.transcript.all().to_vec(),
                local,
                existing,
            )
        };

        if !existing.is_fallback() {
            return Some(existing);
        }
        Some(self.evaluate(session, &turns, &local).await)
    }

    /// Re-arm capture after it was halted. Returns true when capture is
    /// running afterwards.
    pub async fn retry_capture(&self) -> bool {
        if !self.voice {
            return false;
        }

        let (listening, generation) = {
            let inner = self.lock();
            (inner.state == SessionState::Listening, inner.generation)
        };
        if !listening {
            self.speech.clear_halt().await;
            return false;
        }

        let status = self.speech.retry_capture().await;
        self.report_capture(status, "Microphone still unavailable");
        if status != CaptureStatus::Listening {
            return false;
        }

        let stale = {
            let inner = self.lock();
            inner.generation != generation || inner.state != SessionState::Listening
        };
        if stale {
            self.speech.stop_capture().await;
            return false;
        }
        true
    }

    /// Drain capture events into the session until it ends. Only the first
    /// call gets a task; the event stream can be taken once.
    pub fn spawn_capture_loop(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.speech.take_events()?;
        let this = Arc::clone(self);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(CaptureEvent::Interim(text)) => {
                            this.emit(SessionEvent::InterimTranscript { text });
                        }
                        Some(CaptureEvent::Final(text)) => {
                            this.handle_user_turn(&text).await;
                        }
                        Some(CaptureEvent::Failed(error)) => {
                            this.on_capture_error(error).await;
                        }
                        None => break,
                    },
                }
            }
            debug!("Capture loop stopped");
        }))
    }

    async fn request_reply(
        &self,
        history: &[Turn],
        scenario: &ScenarioContext,
    ) -> LangbaseResult<String> {
        let timeout_ms = self.tuning.reply_timeout_ms;
        tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.replies.generate_reply(history, scenario),
        )
        .await
        .map_err(|_| LangbaseError::Timeout { timeout_ms })?
    }

    /// Apply a reply (or its failure) for the turn issued under `generation`.
    /// `user_turn` is `None` for the greeting.
    async fn apply_reply(
        &self,
        generation: u64,
        reply: LangbaseResult<String>,
        user_turn: Option<&Turn>,
    ) -> TurnOutcome {
        let (outcome, next, agent_turn) = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state.is_terminal() {
                debug!(session_id = %inner.session.id, "Reply arrived after end, discarded");
                return TurnOutcome::Cancelled;
            }

            let appended = reply.map_err(|e| e.to_string()).and_then(|text| {
                self.append(&mut inner, Sender::Agent, &text)
                    .map_err(|e| format!("Invalid reply: {}", e))
            });

            if let Some(user_turn) = user_turn {
                self.update_metrics(&mut inner, user_turn);
            }

            match appended {
                Ok(agent) => {
                    let paused = inner.state == SessionState::Paused;
                    let next = if paused {
                        if self.voice {
                            inner.paused_from = Some(SessionState::Speaking);
                            inner.pending_speech = Some(agent.text.clone());
                        } else {
                            inner.paused_from = Some(SessionState::Listening);
                        }
                        Next::Hold
                    } else if self.voice {
                        let utterance = self.next_utterance(&mut inner, agent.text.clone());
                        self.transition(&mut inner, SessionState::Speaking);
                        Next::Speak(utterance)
                    } else {
                        self.transition(&mut inner, SessionState::Listening);
                        Next::Listen
                    };

                    let outcome = if paused {
                        TurnOutcome::Deferred {
                            agent: agent.clone(),
                        }
                    } else {
                        TurnOutcome::Replied {
                            agent: agent.clone(),
                        }
                    };
                    (outcome, next, Some(agent))
                }
                Err(message) => {
                    warn!(session_id = %inner.session.id, error = %message, "Client reply failed");
                    self.emit(SessionEvent::Warning {
                        warning: SessionWarning::ReplyFailed {
                            message: "The client did not answer. Please try again.".to_string(),
                        },
                    });

                    let next = if inner.state == SessionState::Paused {
                        inner.paused_from = Some(SessionState::Listening);
                        Next::Hold
                    } else {
                        self.transition(&mut inner, SessionState::Listening);
                        Next::Listen
                    };
                    (TurnOutcome::ReplyFailed { message }, next, None)
                }
            }
        };

        if let Some(agent) = &agent_turn {
            self.persistence.append_turn(agent).await;
        }

        match next {
            Next::Speak(utterance) => self.play(generation, utterance).await,
            Next::Listen => self.listen(generation).await,
            Next::Hold => {}
        }
        outcome
    }

    fn update_metrics(&self, inner: &mut Inner, user_turn: &Turn) {
        let agent_text = inner
            .transcript
            .last_from(Sender::Agent)
            .map(|t| t.text.clone())
            .unwrap_or_default();
        let turn_index = inner.transcript.count(Sender::User);
        let snapshot = inner
            .metrics
            .update(&user_turn.text, &agent_text, turn_index);

        debug!(
            session_id = %inner.session.id,
            turn_index,
            overall = snapshot.overall,
            trend = %snapshot.trend,
            "Metrics updated"
        );
        self.persistence.record_metrics(&inner.session.id, &snapshot);
        self.emit(SessionEvent::MetricsUpdated { snapshot });
    }

    async fn play(&self, generation: u64, utterance: Utterance) {
        if !self.is_current(generation, utterance.id) {
            return;
        }
        let outcome = self.speech.speak(&utterance.text, &self.voice_id).await;

        let relisten = {
            let mut inner = self.lock();
            if !Self::speaking_current(&inner, generation, utterance.id) {
                // Paused, ended or superseded while playing.
                return;
            }
            inner.speaking = None;

            if let PlaybackOutcome::Failed(message) = &outcome {
                warn!(session_id = %inner.session.id, error = %message, "Playback failed");
                if !inner.playback_warned {
                    inner.playback_warned = true;
                    self.emit(SessionEvent::Warning {
                        warning: SessionWarning::PlaybackFailed {
                            message: "Audio playback failed. Replies will continue as text."
                                .to_string(),
                        },
                    });
                }
            }
            self.transition(&mut inner, SessionState::Listening)
        };

        if relisten {
            self.listen(generation).await;
        }
    }

    fn is_current(&self, generation: u64, utterance_id: u64) -> bool {
        Self::speaking_current(&self.lock(), generation, utterance_id)
    }

    fn speaking_current(inner: &Inner, generation: u64, utterance_id: u64) -> bool {
        inner.generation == generation
            && inner.state == SessionState::Speaking
            && inner.speaking.as_ref().map(|u| u.id) == Some(utterance_id)
    }

    async fn listen(&self, generation: u64) {
        if !self.voice {
            return;
        }

        let status = self.speech.start_capture().await;
        let still_listening = {
            let inner = self.lock();
            inner.generation == generation && inner.state == SessionState::Listening
        };
        if !still_listening {
            self.speech.stop_capture().await;
            return;
        }
        self.report_capture(status, "Microphone unavailable");
    }

    async fn on_capture_error(&self, error: CaptureError) {
        let listening = self.lock().state == SessionState::Listening;
        if !listening {
            self.speech.stop_capture().await;
            return;
        }

        let status = self.speech.recover_capture(&error).await;
        self.report_capture(status, &error.to_string());
    }

    fn report_capture(&self, status: CaptureStatus, reason: &str) {
        if let CaptureStatus::Halted { notify: true } = status {
            self.emit(SessionEvent::Warning {
                warning: SessionWarning::CaptureHalted {
                    message: format!("{}. Allow microphone access and retry.", reason),
                },
            });
        }
    }

    async fn evaluate(
        &self,
        mut session: Session,
        turns: &[Turn],
        local: &MetricSnapshot,
    ) -> Evaluation {
        let finalized = self.finalizer.finalize(&session, turns, local).await;
        let evaluation = finalized.evaluation;

        session.final_score = Some(evaluation.overall);
        {
            let mut inner = self.lock();
            inner.session.final_score = Some(evaluation.overall);
            inner.evaluation = Some(evaluation.clone());
        }
        self.persistence
            .end_session(&session, Some(evaluation.overall))
            .await;

        if let Some(reason) = finalized.degraded_reason {
            debug!(session_id = %session.id, reason = %reason, "Evaluation degraded");
            self.emit(SessionEvent::Warning {
                warning: SessionWarning::EvaluationDegraded {
                    message: EVALUATION_DEGRADED_NOTICE.to_string(),
                },
            });
        }
        self.emit(SessionEvent::EvaluationReady {
            evaluation: evaluation.clone(),
        });
        evaluation
    }

    /// Append a turn and bump the session counters under the same lock.
    fn append(
        &self,
        inner: &mut Inner,
        sender: Sender,
        text: &str,
    ) -> Result<Turn, ValidationError> {
        let offset = inner.timer.active_elapsed(self.clock.now()).as_secs_f64();
        let turn = inner.transcript.append(sender, text, offset)?.clone();

        let words = turn.word_count();
        inner.session.message_count += 1;
        match sender {
            Sender::User => inner.session.user_word_count += words,
            Sender::Agent => inner.session.agent_word_count += words,
        }

        self.emit(SessionEvent::TurnAppended { turn: turn.clone() });
        Ok(turn)
    }

    fn next_utterance(&self, inner: &mut Inner, text: String) -> Utterance {
        inner.utterance_seq += 1;
        let utterance = Utterance {
            id: inner.utterance_seq,
            text,
        };
        inner.speaking = Some(utterance.clone());
        utterance
    }

    fn transition(&self, inner: &mut Inner, to: SessionState) -> bool {
        match inner.state.transition(to) {
            Ok(to) => {
                let from = inner.state;
                inner.state = to;
                debug!(session_id = %inner.session.id, %from, %to, "State changed");
                self.emit(SessionEvent::StateChanged { from, to });
                true
            }
            Err(e) => {
                warn!(session_id = %inner.session.id, error = %e, "Transition rejected");
                false
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
