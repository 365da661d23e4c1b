//! Voice Session Controller
//!
//! Owns the lifecycle of one conversation: the greeting, the turn loop, the
//! inactivity watchdog, backend failure handling and termination.
//!
//! All state transitions go through a single async mutex. The turn loop, the
//! watchdog and the recognizer binding only ever touch the session through the
//! `on_*` entry points, so a watchdog firing can never race a user saying
//! goodbye, and a transcript that refreshes the activity timestamp is always
//! seen by the next watchdog check.

use crate::binding::{DEFAULT_RECONNECT_BACKOFF, ResilientBinding};
use crate::capabilities::{Capabilities, SessionEvent};
use crate::classifier::{Disposition, ErrorClassifier, ErrorPolicy};
use crate::error::{Backend, BackendError, ErrorKind};
use crate::instructions::SystemInstruction;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

/// Words that end the conversation when they appear anywhere in a transcript.
pub const TERMINATION_KEYWORDS: [&str; 4] = ["bye", "goodbye", "exit", "quit"];

/// User turn sent to the model when the session starts.
pub const GREETING_PROMPT: &str =
    "Give a short, 1 sentence greeting. Offer to answer any questions.";

pub const FAREWELL: &str = "Goodbye, have a great day!";
pub const SILENCE_FAREWELL: &str = "It seems quiet, I'll end our chat now. Goodbye!";
pub const ERROR_FAREWELL: &str =
    "Sorry, I'm having some trouble on my end, so I'll end our chat now. Goodbye!";

const EVENT_CHANNEL_SIZE: usize = 32;

/// Returns true when `text` asks to end the conversation.
pub fn is_termination_request(text: &str) -> bool {
    let lowered = text.to_lowercase();
    TERMINATION_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Speaking,
    Listening,
    Erroring,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Speaking => "speaking",
            Phase::Listening => "listening",
            Phase::Erroring => "erroring",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why a session reached [`Phase::Terminated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The participant said one of the [`TERMINATION_KEYWORDS`].
    UserFarewell,
    /// The watchdog saw no activity for longer than the inactivity limit.
    Inactivity,
    /// The recognizer hung up on a silent line.
    BackendClosed,
    /// A backend failure the policy classifies as fatal.
    FatalError,
    /// Every transcript producer went away.
    TransportClosed,
    /// The host process asked the session to stop.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceKind {
    Greeting,
    Reply,
    Farewell,
    SilenceClosing,
    ErrorClosing,
}

/// Notifications published to an optional observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    PhaseChanged { from: Phase, to: Phase },
    UtteranceDelivered { kind: UtteranceKind, text: String },
    Terminated { reason: TerminationReason, turn_count: u64 },
}

/// Timing and failure-handling knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Silence longer than this ends the session.
    pub inactivity_limit: Duration,
    /// How often the watchdog looks at the activity timestamp.
    pub watchdog_interval: Duration,
    /// Pause between recognizer attach attempts.
    pub reconnect_backoff: Duration,
    /// Longest a single reply generation or playback may take before it
    /// counts as failed.
    pub response_timeout: Duration,
    pub error_policy: ErrorPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_limit: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(5),
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            response_timeout: Duration::from_secs(30),
            error_policy: ErrorPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    last_activity: Instant,
    turn_count: u64,
    reason: Option<TerminationReason>,
}

/// A point-in-time view of the session, for observers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub turn_count: u64,
    pub idle_for: Duration,
    pub watchdog_checks: u64,
}

/// The outcome of [`SessionController::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub turn_count: u64,
    pub reason: TerminationReason,
}

/// Result of a failure once it has been routed through the classifier.
enum Recovery {
    Retry,
    Skip,
    Terminated,
}

/// Drives a single voice session from greeting to termination.
pub struct SessionController {
    id: Uuid,
    instruction: SystemInstruction,
    capabilities: Capabilities,
    classifier: ErrorClassifier,
    config: SessionConfig,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
    /// Fired by `shutdown` before it waits for the state lock, so an in-flight
    /// backend call gives the lock up.
    stop: CancellationToken,
    watchdog_checks: AtomicU64,
    updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
}

impl SessionController {
    /// Creates a controller in the `Idle` phase.
    ///
    /// The instruction is fixed for the lifetime of the session.
    pub fn new(
        instruction: SystemInstruction,
        capabilities: Capabilities,
        config: SessionConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            id: Uuid::new_v4(),
            instruction,
            capabilities,
            classifier: ErrorClassifier::new(config.error_policy),
            config,
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                last_activity: Instant::now(),
                turn_count: 0,
                reason: None,
            }),
            stop: cancel.child_token(),
            cancel,
            watchdog_checks: AtomicU64::new(0),
            updates: None,
        }
    }

    /// Publishes [`SessionUpdate`]s on `tx` for the lifetime of the session.
    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<SessionUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn instruction(&self) -> &SystemInstruction {
        &self.instruction
    }

    /// Fires once the session has terminated.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            phase: state.phase,
            turn_count: state.turn_count,
            idle_for: state.last_activity.elapsed(),
            watchdog_checks: self.watchdog_checks.load(Ordering::SeqCst),
        }
    }

    /// Runs the session until it terminates.
    ///
    /// Joins the room, starts the watchdog and the recognizer binding, greets
    /// the participant and then processes transcript events. Returns once the
    /// session is terminated and every background task has stopped.
    pub async fn run(self: Arc<Self>) -> SessionSummary {
        let span = tracing::info_span!("session", session_id = %self.id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self: Arc<Self>) -> SessionSummary {
        if self.cancel.is_cancelled() {
            info!("Session ended before it started");
            return self.summary().await;
        }

        info!("Starting voice session");
        match self.capabilities.room.join().await {
            Ok(()) if self.cancel.is_cancelled() => {
                // Terminated while joining: the earlier leave ran too soon.
                self.capabilities.room.leave().await;
            }
            Ok(()) => {
                self.state.lock().await.last_activity = Instant::now();
            }
            Err(e) => {
                // Nobody can hear a farewell if the room never opened.
                error!(error = %e, "Failed to join the room");
                let mut state = self.state.lock().await;
                self.finish(&mut state, TerminationReason::FatalError, None)
                    .await;
            }
        }

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let watchdog = tokio::spawn(self.clone().watch_inactivity().in_current_span());

        let binding = ResilientBinding::new(self.config.reconnect_backoff, self.cancel.clone());
        let stt = self.capabilities.stt.clone();
        let attach = tokio::spawn(
            async move { binding.attach_with_retry(&*stt, events_tx).await }.in_current_span(),
        );

        self.on_greet().await;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events_rx.recv() => match event {
                    Some(SessionEvent::Transcript { text, is_final: true }) => {
                        self.on_transcript(&text).await;
                    }
                    Some(SessionEvent::Transcript { is_final: false, .. }) => {
                        self.on_partial_transcript().await;
                    }
                    Some(SessionEvent::Error(e)) => self.on_error(e).await,
                    None => {
                        info!("Transcript stream ended");
                        let mut state = self.state.lock().await;
                        self.finish(
                            &mut state,
                            TerminationReason::TransportClosed,
                            Some((UtteranceKind::Farewell, FAREWELL)),
                        )
                        .await;
                        break;
                    }
                },
            }
        }

        if let Err(e) = watchdog.await {
            warn!(error = ?e, "Inactivity watchdog task failed");
        }
        match attach.await {
            Ok(outcome) => debug!(?outcome, "Speech-to-text binding finished"),
            Err(e) => warn!(error = ?e, "Speech-to-text binding task failed"),
        }

        self.summary().await
    }

    async fn summary(&self) -> SessionSummary {
        let state = self.state.lock().await;
        let summary = SessionSummary {
            session_id: self.id,
            turn_count: state.turn_count,
            reason: state.reason.unwrap_or(TerminationReason::Shutdown),
        };
        info!(turn_count = summary.turn_count, reason = ?summary.reason, "Voice session finished");
        summary
    }

    /// Greets the participant. Only has an effect on an `Idle` session.
    pub async fn on_greet(&self) {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Idle {
            return;
        }
        if let Some(greeting) = self.generate(&mut state, GREETING_PROMPT).await {
            self.deliver(&mut state, UtteranceKind::Greeting, &greeting)
                .await;
        }
        self.settle(&mut state);
    }

    /// Handles a final transcript: one user turn.
    pub async fn on_transcript(&self, text: &str) {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Terminated {
            debug!("Ignoring transcript after termination");
            return;
        }
        state.last_activity = Instant::now();
        state.turn_count += 1;
        info!(turn = state.turn_count, text, "User said");

        if is_termination_request(text) {
            self.finish(
                &mut state,
                TerminationReason::UserFarewell,
                Some((UtteranceKind::Farewell, FAREWELL)),
            )
            .await;
            return;
        }

        if let Some(reply) = self.generate(&mut state, text).await {
            self.deliver(&mut state, UtteranceKind::Reply, &reply).await;
        }
        self.settle(&mut state);
    }

    /// A partial transcript means the participant is talking.
    pub async fn on_partial_transcript(&self) {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Terminated {
            state.last_activity = Instant::now();
        }
    }

    /// Handles a failure a backend raised outside of any in-flight operation.
    pub async fn on_error(&self, error: BackendError) {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Terminated {
            debug!(error = %error, "Ignoring backend failure after termination");
            return;
        }
        // There is no operation to re-run, so a retry degrades to ignore.
        self.recover(&mut state, &error, false).await;
        self.settle(&mut state);
    }

    /// One watchdog check. Ends the session when it has been silent for longer
    /// than the inactivity limit. Returns true once the session is terminated.
    pub async fn on_idle_check(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Terminated {
            return true;
        }
        self.watchdog_checks.fetch_add(1, Ordering::SeqCst);

        let idle = state.last_activity.elapsed();
        if idle <= self.config.inactivity_limit {
            return false;
        }
        info!(idle_secs = idle.as_secs(), "No user activity, closing session");
        self.finish(
            &mut state,
            TerminationReason::Inactivity,
            Some((UtteranceKind::SilenceClosing, SILENCE_FAREWELL)),
        )
        .await;
        true
    }

    /// Ends the session from outside, saying goodbye first.
    ///
    /// A reply or playback in flight is abandoned rather than awaited.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let mut state = self.state.lock().await;
        self.finish(
            &mut state,
            TerminationReason::Shutdown,
            Some((UtteranceKind::Farewell, FAREWELL)),
        )
        .await;
    }

    async fn watch_inactivity(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.watchdog_interval) => {
                    if self.on_idle_check().await {
                        break;
                    }
                }
            }
        }
        debug!(
            checks = self.watchdog_checks.load(Ordering::SeqCst),
            "Inactivity watchdog stopped"
        );
    }

    /// Asks the model for a reply, honoring the retry policy.
    async fn generate(&self, state: &mut SessionState, user_turn: &str) -> Option<String> {
        let mut attempt = 0;
        loop {
            self.set_phase(state, Phase::Speaking);
            let reply = self
                .bounded(
                    self.capabilities
                        .llm
                        .generate_reply(&self.instruction, user_turn),
                    || {
                        BackendError::llm(
                            ErrorKind::GenerationFailed,
                            "no reply within the response timeout",
                        )
                    },
                )
                .await?;
            match reply {
                Ok(reply) => return Some(reply),
                Err(e) => {
                    let can_retry = attempt < self.classifier.policy().max_retries;
                    match self.recover(state, &e, can_retry).await {
                        Recovery::Retry => {
                            attempt += 1;
                            info!(attempt, "Retrying reply generation");
                        }
                        Recovery::Skip | Recovery::Terminated => return None,
                    }
                }
            }
        }
    }

    /// Speaks an utterance, honoring the retry policy.
    async fn deliver(&self, state: &mut SessionState, kind: UtteranceKind, text: &str) -> bool {
        let mut attempt = 0;
        loop {
            self.set_phase(state, Phase::Speaking);
            let Some(result) = self
                .bounded(self.capabilities.tts.speak(text), playback_timeout)
                .await
            else {
                return false;
            };
            match result {
                Ok(()) => {
                    self.delivered(state, kind, text);
                    return true;
                }
                Err(e) => {
                    let can_retry = attempt < self.classifier.policy().max_retries;
                    match self.recover(state, &e, can_retry).await {
                        Recovery::Retry => {
                            attempt += 1;
                            info!(attempt, ?kind, "Retrying playback");
                        }
                        Recovery::Skip | Recovery::Terminated => return false,
                    }
                }
            }
        }
    }

    /// Speaks a closing line. Failures are logged and otherwise ignored.
    async fn say_best_effort(&self, state: &mut SessionState, kind: UtteranceKind, text: &str) {
        self.set_phase(state, Phase::Speaking);
        let result = tokio::time::timeout(
            self.config.response_timeout,
            self.capabilities.tts.speak(text),
        )
        .await
        .unwrap_or_else(|_| Err(playback_timeout()));
        match result {
            Ok(()) => self.delivered(state, kind, text),
            Err(e) => warn!(error = %e, ?kind, "Could not deliver closing utterance"),
        }
    }

    /// Runs a backend call under the response timeout. Returns `None` when
    /// the session is shutting down.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
        on_timeout: impl FnOnce() -> BackendError,
    ) -> Option<Result<T, BackendError>> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => {
                debug!("Backend call abandoned, session is stopping");
                None
            }
            result = tokio::time::timeout(self.config.response_timeout, call) => {
                Some(result.unwrap_or_else(|_| Err(on_timeout())))
            }
        }
    }

    fn delivered(&self, state: &mut SessionState, kind: UtteranceKind, text: &str) {
        state.last_activity = Instant::now();
        info!(?kind, text, "Utterance delivered");
        self.publish(SessionUpdate::UtteranceDelivered {
            kind,
            text: text.to_string(),
        });
    }

    async fn recover(
        &self,
        state: &mut SessionState,
        error: &BackendError,
        can_retry: bool,
    ) -> Recovery {
        self.set_phase(state, Phase::Erroring);
        match self.classifier.classify(error) {
            Disposition::Retry if can_retry => Recovery::Retry,
            Disposition::Retry | Disposition::Ignore => {
                self.set_phase(state, Phase::Listening);
                Recovery::Skip
            }
            Disposition::Fatal => {
                let (reason, kind, text) = match (error.backend, error.kind) {
                    (Backend::Stt, ErrorKind::SilenceTimeout) => (
                        TerminationReason::BackendClosed,
                        UtteranceKind::SilenceClosing,
                        SILENCE_FAREWELL,
                    ),
                    _ => (
                        TerminationReason::FatalError,
                        UtteranceKind::ErrorClosing,
                        ERROR_FAREWELL,
                    ),
                };
                self.finish(state, reason, Some((kind, text))).await;
                Recovery::Terminated
            }
        }
    }

    /// Moves the session into the absorbing `Terminated` phase and releases
    /// every backend. Does nothing when already terminated.
    async fn finish(
        &self,
        state: &mut SessionState,
        reason: TerminationReason,
        closing: Option<(UtteranceKind, &str)>,
    ) {
        if state.phase == Phase::Terminated {
            return;
        }
        if let Some((kind, text)) = closing {
            self.say_best_effort(state, kind, text).await;
        }
        self.set_phase(state, Phase::Terminated);
        state.reason = Some(reason);
        self.cancel.cancel();

        self.capabilities.stt.close().await;
        self.capabilities.room.leave().await;

        info!(?reason, turn_count = state.turn_count, "Session terminated");
        self.publish(SessionUpdate::Terminated {
            reason,
            turn_count: state.turn_count,
        });
    }

    /// Returns to `Listening` unless the session is over.
    fn settle(&self, state: &mut SessionState) {
        if state.phase != Phase::Terminated {
            self.set_phase(state, Phase::Listening);
        }
    }

    fn set_phase(&self, state: &mut SessionState, to: Phase) {
        let from = state.phase;
        if from == to {
            return;
        }
        state.phase = to;
        info!(%from, %to, "Session phase changed");
        self.publish(SessionUpdate::PhaseChanged { from, to });
    }

    fn publish(&self, update: SessionUpdate) {
        if let Some(tx) = &self.updates {
            if tx.send(update).is_err() {
                debug!("Session update dropped: receiver closed.");
            }
        }
    }
}

fn playback_timeout() -> BackendError {
    BackendError::tts(
        ErrorKind::PlaybackFailed,
        "playback did not finish within the response timeout",
    )
}
