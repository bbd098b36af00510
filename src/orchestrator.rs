//! Turn orchestration
//!
//! One turn runs: transcript → optional search → chat completion → speech
//! synthesis → playback. Search and speech are best-effort; chat is the only
//! step whose failure aborts the turn.
//!
//! ```text
//!            wake               transcript             chat ok
//!   Idle ──────────▶ Listening ───────────▶ Processing ────────▶ Speaking
//!    ▲                  ▲                       │                   │
//!    │ 3s               │ 3s / 1s               │ chat failed       │ done
//!    └──── Error ◀──────┴───────────────────────┘                   ▼
//!                       └────────────────────────────────────────  Idle
//! ```
//!
//! Every delayed transition is tied to the epoch that scheduled it. Starting
//! a turn, waking, reporting an error or deactivating bumps the epoch and
//! aborts the pending timer, so a late timer can never undo newer state.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::chat::ChatCompletion;
use crate::config::TimingConfig;
use crate::error::SynthesisError;
use crate::search::{SearchTrigger, WebSearch, format_context};
use crate::session::{ChatMessage, Phase, Role, SessionState, Transcript};
use crate::voice::{AudioSink, SpeechSynthesizer};
use crate::{Error, Result};

/// Channel capacity for assistant events
const CHANNEL_CAPACITY: usize = 64;

/// External services a turn calls into
#[derive(Clone)]
pub struct Collaborators {
    pub chat: Arc<dyn ChatCompletion>,
    pub search: Arc<dyn WebSearch>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub playback: Arc<dyn AudioSink>,
}

/// Turn policy knobs
#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// Decides which transcripts get search context
    pub trigger: SearchTrigger,

    /// How many search results go into the context
    pub context_results: usize,

    /// Recovery delays and per-call timeouts
    pub timing: TimingConfig,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            trigger: SearchTrigger::default(),
            context_results: 2,
            timing: TimingConfig::default(),
        }
    }
}

/// Notifications for whatever is presenting the session
#[derive(Debug, Clone)]
pub enum AssistantEvent {
    /// Session state changed
    StateChanged(SessionState),
    /// A message was added to the transcript
    MessageAppended(ChatMessage),
}

/// Why a response could not be spoken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechFailure {
    InvalidCredential,
    RateLimited,
    Unavailable,
    Playback,
    TimedOut,
    Other,
}

impl SpeechFailure {
    fn from_synthesis(err: &Error) -> Self {
        match err {
            Error::Synthesis(SynthesisError::InvalidCredential) => Self::InvalidCredential,
            Error::Synthesis(SynthesisError::RateLimited) => Self::RateLimited,
            Error::Synthesis(SynthesisError::Unavailable(_)) => Self::Unavailable,
            Error::Timeout { .. } => Self::TimedOut,
            _ => Self::Other,
        }
    }

    fn from_playback(err: &Error) -> Self {
        match err {
            Error::Timeout { .. } => Self::TimedOut,
            _ => Self::Playback,
        }
    }

    /// Message appended to the transcript in place of speech
    #[must_use]
    pub const fn notice(self) -> &'static str {
        match self {
            Self::InvalidCredential => "Voice synthesis unavailable - invalid speech API key",
            Self::RateLimited => "Voice synthesis rate limit exceeded - please try again later",
            Self::Unavailable => "Voice synthesis service temporarily unavailable",
            Self::Playback => "Audio playback failed - response shown as text only",
            Self::TimedOut => "Voice synthesis timed out - response shown as text only",
            Self::Other => "Voice synthesis unavailable - check speech API key",
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Response was spoken
    Spoken,
    /// Response was shown but not spoken
    TextOnly(SpeechFailure),
    /// Chat completion failed; the message is what the user sees
    Failed(String),
}

/// Summary of a finished turn
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Turn identifier
    pub turn: u64,

    /// Search context, if search was attempted (empty when it failed)
    pub search_context: Option<String>,

    /// Assistant response, if chat succeeded
    pub response: Option<String>,

    /// How the turn ended
    pub outcome: TurnOutcome,
}

/// Delayed transition kinds
#[derive(Debug, Clone, Copy)]
enum Recovery {
    /// Turn finished: Idle → Listening
    ResumeListening,
    /// Chat failed: Error → Listening
    RetryListening,
    /// General error: Error → Idle
    ClearError,
}

struct Controller {
    session: SessionState,
    transcript: Transcript,
    epoch: u64,
    pending: Option<JoinHandle<()>>,
    active: bool,
    voice_input: bool,
}

impl Controller {
    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.cancel_pending();
        self.epoch += 1;
        self.epoch
    }
}

struct Inner {
    collaborators: Collaborators,
    options: TurnOptions,
    controller: Mutex<Controller>,
    busy: AtomicBool,
    events: broadcast::Sender<AssistantEvent>,
}

impl Inner {
    fn publish_state(&self, ctrl: &Controller) {
        // No subscribers is fine
        let _ = self
            .events
            .send(AssistantEvent::StateChanged(ctrl.session.clone()));
    }

    fn append(&self, ctrl: &mut Controller, message: ChatMessage) {
        ctrl.transcript.push(message.clone());
        let _ = self.events.send(AssistantEvent::MessageAppended(message));
    }

    fn schedule(self: &Arc<Self>, ctrl: &mut Controller, delay: Duration, recovery: Recovery) {
        ctrl.cancel_pending();
        let epoch = ctrl.epoch;
        let inner = Arc::clone(self);

        ctrl.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut ctrl = inner.controller.lock().await;
            if ctrl.epoch != epoch {
                tracing::trace!(epoch, current = ctrl.epoch, "stale recovery skipped");
                return;
            }
            ctrl.pending = None;

            let listen = if ctrl.active { Phase::Listening } else { Phase::Idle };
            match recovery {
                Recovery::ResumeListening => {
                    if ctrl.session.phase != Phase::Idle {
                        return;
                    }
                    ctrl.session.phase = listen;
                }
                Recovery::RetryListening => ctrl.session.recover(listen),
                Recovery::ClearError => ctrl.session.recover(Phase::Idle),
            }

            tracing::debug!(?recovery, phase = ?ctrl.session.phase, "scheduled transition");
            inner.publish_state(&ctrl);
        }));
    }
}

/// Releases the turn flag on every exit path
struct TurnGuard<'a>(&'a AtomicBool);

impl<'a> TurnGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::TurnInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn with_timeout<T>(
    step: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Error::Timeout { step, after })?
}

/// The assistant controller
///
/// Owns the session state and transcript; cheap to clone, all clones share
/// one session.
#[derive(Clone)]
pub struct Assistant {
    inner: Arc<Inner>,
}

impl Assistant {
    /// Create an inactive assistant
    #[must_use]
    pub fn new(collaborators: Collaborators, options: TurnOptions) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                collaborators,
                options,
                controller: Mutex::new(Controller {
                    session: SessionState::default(),
                    transcript: Transcript::new(),
                    epoch: 0,
                    pending: None,
                    active: false,
                    voice_input: true,
                }),
                busy: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Subscribe to state and transcript updates
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the session state
    pub async fn state(&self) -> SessionState {
        self.inner.controller.lock().await.session.clone()
    }

    /// Snapshot of the transcript
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner
            .controller
            .lock()
            .await
            .transcript
            .as_slice()
            .to_vec()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.controller.lock().await.active
    }

    /// Whether a turn is currently running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Switch the assistant on
    pub async fn activate(&self) {
        let mut ctrl = self.inner.controller.lock().await;
        if ctrl.active {
            return;
        }
        ctrl.active = true;
        tracing::info!("assistant activated");
        self.inner.publish_state(&ctrl);
    }

    /// Switch the assistant off, cancelling pending transitions
    ///
    /// A running turn is allowed to finish; it will not resume listening.
    pub async fn deactivate(&self) {
        let mut ctrl = self.inner.controller.lock().await;
        ctrl.next_epoch();
        ctrl.active = false;
        ctrl.session.wake_active = false;
        if !self.is_busy() {
            ctrl.session.recover(Phase::Idle);
        }
        tracing::info!("assistant deactivated");
        self.inner.publish_state(&ctrl);
    }

    /// Wake phrase heard: start listening for a command
    ///
    /// # Errors
    ///
    /// Returns error if a turn is running, the assistant is inactive, or
    /// voice input has been disabled
    pub async fn wake_word_detected(&self) -> Result<()> {
        let mut ctrl = self.inner.controller.lock().await;
        if self.is_busy() {
            return Err(Error::TurnInProgress);
        }
        if !ctrl.active {
            return Err(Error::Inactive);
        }
        if !ctrl.voice_input {
            return Err(Error::Unsupported("voice input unavailable".to_string()));
        }

        ctrl.next_epoch();
        ctrl.session.wake_active = true;
        ctrl.session.recover(Phase::Listening);
        tracing::info!("wake word detected, listening");
        self.inner.publish_state(&ctrl);
        Ok(())
    }

    /// Run one turn for a transcript
    ///
    /// Search and speech failures degrade the turn; a chat failure ends it
    /// in [`Phase::Error`] and is reported as [`TurnOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyTranscript`] for blank input and
    /// [`Error::TurnInProgress`] if another turn is running
    pub async fn transcript_received(&self, text: &str, voice: bool) -> Result<TurnReport> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyTranscript);
        }
        let _guard = TurnGuard::acquire(&self.inner.busy)?;
        let inner = &self.inner;
        let timing = inner.options.timing;

        let turn = {
            let mut ctrl = inner.controller.lock().await;
            let turn = ctrl.next_epoch();
            ctrl.session.begin_turn(text);
            inner.publish_state(&ctrl);
            inner.append(&mut ctrl, ChatMessage::new(Role::User, text, voice));
            turn
        };
        tracing::info!(turn, transcript = text, "turn started");

        let search_context = if inner.options.trigger.matches(text) {
            let context = self.gather_context(turn, text).await;
            let mut ctrl = inner.controller.lock().await;
            ctrl.session.last_search_result = Some(context.clone());
            inner.publish_state(&ctrl);
            Some(context)
        } else {
            None
        };

        let completion = with_timeout(
            "chat completion",
            timing.chat_timeout,
            inner
                .collaborators
                .chat
                .complete(text, search_context.as_deref()),
        )
        .await;

        let response = match completion {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                tracing::error!(turn, error = %message, "chat completion failed");

                let mut ctrl = inner.controller.lock().await;
                ctrl.session.fail(message.clone());
                inner.publish_state(&ctrl);
                inner.schedule(&mut ctrl, timing.error_recovery, Recovery::RetryListening);

                return Ok(TurnReport {
                    turn,
                    search_context,
                    response: None,
                    outcome: TurnOutcome::Failed(message),
                });
            }
        };

        {
            let mut ctrl = inner.controller.lock().await;
            ctrl.session.last_response = Some(response.clone());
            ctrl.session.phase = Phase::Speaking;
            inner.publish_state(&ctrl);
            inner.append(&mut ctrl, ChatMessage::new(Role::Assistant, &response, true));
        }

        let outcome = match self.speak(&response).await {
            Ok(()) => {
                tracing::debug!(turn, "speech playback completed");
                TurnOutcome::Spoken
            }
            Err(failure) => {
                tracing::warn!(turn, ?failure, "speech unavailable, continuing with text");
                let mut ctrl = inner.controller.lock().await;
                inner.append(
                    &mut ctrl,
                    ChatMessage::new(Role::Assistant, failure.notice(), false),
                );
                TurnOutcome::TextOnly(failure)
            }
        };

        {
            let mut ctrl = inner.controller.lock().await;
            ctrl.session.phase = Phase::Idle;
            inner.publish_state(&ctrl);
            inner.schedule(&mut ctrl, timing.resume_listening, Recovery::ResumeListening);
        }
        tracing::info!(turn, ?outcome, "turn finished");

        Ok(TurnReport {
            turn,
            search_context,
            response: Some(response),
            outcome,
        })
    }

    /// Speech recognition failed; shown as a general error
    pub async fn recognition_failed(&self, reason: &str) {
        self.report_error(format!("Voice recognition error: {reason}"))
            .await;
    }

    /// Show an error, then return to idle after the recovery delay
    ///
    /// Ignored while a turn is running; the turn owns the state until it ends.
    pub async fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        let mut ctrl = self.inner.controller.lock().await;
        if self.is_busy() {
            tracing::warn!(error = %message, "error reported during a turn, not interrupting");
            return;
        }

        tracing::error!(error = %message, "assistant error");
        ctrl.next_epoch();
        ctrl.session.fail(message);
        self.inner.publish_state(&ctrl);
        self.inner.schedule(
            &mut ctrl,
            self.inner.options.timing.error_recovery,
            Recovery::ClearError,
        );
    }

    /// A required capability is missing; voice input is disabled for good
    ///
    /// Only the first call surfaces an error.
    pub async fn voice_input_unsupported(&self, reason: &str) {
        {
            let mut ctrl = self.inner.controller.lock().await;
            if !ctrl.voice_input {
                return;
            }
            ctrl.voice_input = false;
            ctrl.session.wake_active = false;
        }
        self.report_error(format!("Voice input unavailable: {reason}"))
            .await;
    }

    async fn gather_context(&self, turn: u64, query: &str) -> String {
        let options = &self.inner.options;
        tracing::debug!(turn, query, "searching for context");

        match with_timeout(
            "search",
            options.timing.search_timeout,
            self.inner.collaborators.search.search(query),
        )
        .await
        {
            Ok(results) => {
                let context = format_context(&results, options.context_results);
                tracing::debug!(turn, results = results.len(), "search context ready");
                context
            }
            Err(e) => {
                tracing::warn!(turn, error = %e, "search failed, continuing without context");
                String::new()
            }
        }
    }

    async fn speak(&self, text: &str) -> std::result::Result<(), SpeechFailure> {
        let timing = self.inner.options.timing;
        let collaborators = &self.inner.collaborators;

        let clip = with_timeout(
            "speech synthesis",
            timing.synthesis_timeout,
            collaborators.speech.synthesize(text),
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "speech synthesis failed");
            SpeechFailure::from_synthesis(&e)
        })?;

        with_timeout(
            "audio playback",
            timing.playback_timeout,
            collaborators.playback.play(clip),
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "audio playback failed");
            SpeechFailure::from_playback(&e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_failure_classification() {
        let cases = [
            (
                Error::Synthesis(SynthesisError::InvalidCredential),
                SpeechFailure::InvalidCredential,
            ),
            (
                Error::Synthesis(SynthesisError::RateLimited),
                SpeechFailure::RateLimited,
            ),
            (
                Error::Synthesis(SynthesisError::Unavailable(503)),
                SpeechFailure::Unavailable,
            ),
            (
                Error::Synthesis(SynthesisError::Failed("nope".to_string())),
                SpeechFailure::Other,
            ),
            (
                Error::Timeout {
                    step: "speech synthesis",
                    after: Duration::from_secs(1),
                },
                SpeechFailure::TimedOut,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(SpeechFailure::from_synthesis(&err), expected);
        }
        assert_eq!(
            SpeechFailure::from_playback(&Error::Audio("device gone".to_string())),
            SpeechFailure::Playback
        );
    }

    #[test]
    fn test_notices_are_distinct() {
        let all = [
            SpeechFailure::InvalidCredential,
            SpeechFailure::RateLimited,
            SpeechFailure::Unavailable,
            SpeechFailure::Playback,
            SpeechFailure::TimedOut,
            SpeechFailure::Other,
        ];
        let notices: std::collections::HashSet<_> = all.iter().map(|f| f.notice()).collect();
        assert_eq!(notices.len(), all.len());
    }

    #[test]
    fn test_turn_guard_rejects_second_holder() {
        let flag = AtomicBool::new(false);
        let guard = TurnGuard::acquire(&flag).unwrap();
        assert!(matches!(TurnGuard::acquire(&flag), Err(Error::TurnInProgress)));
        drop(guard);
        assert!(TurnGuard::acquire(&flag).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        };
        let result = with_timeout("search", Duration::from_secs(1), slow).await;
        assert!(matches!(result, Err(Error::Timeout { step: "search", .. })));
    }
}
