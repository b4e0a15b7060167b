//! Rubber-duck voice session.
//!
//! `idle -> listening -> processing -> speaking -> idle`, one state at a
//! time. Capture only advances when the user stops it. A finished transcript
//! that matches an exit phrase ends the session without a model call. Any
//! state can be interrupted by terminating the session, which aborts capture,
//! cuts playback, and abandons an in-flight model turn.

use super::capability::{SpeechToText, TextToSpeech, TranscriptUpdate};
use crate::config::VoiceSettings;
use crate::error::VoiceError;
use crate::llm::prompts::{RUBBER_DUCK_FALLBACK, RUBBER_DUCK_SYSTEM};
use crate::llm::{ChatMessage, LanguageModel, Model, ModelRequest};
use crate::util::normalize_phrase;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl VoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceState::Idle => "idle",
            VoiceState::Listening => "listening",
            VoiceState::Processing => "processing",
            VoiceState::Speaking => "speaking",
        }
    }
}

/// Ordered turns of one session. Oldest turns are dropped past the cap.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
    max_len: usize,
}

impl ConversationHistory {
    /// `max_len` of 0 keeps everything.
    pub fn new(max_len: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_len,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.max_len > 0 && self.messages.len() > self.max_len {
            let excess = self.messages.len() - self.max_len;
            self.messages.drain(..excess);
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Result of stopping capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Nothing was said; back to idle
    Empty,
    /// An exit phrase ended the session
    Exited,
    /// A turn is ready to send; the session is processing
    Ready(String),
}

/// Result of one complete turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Empty,
    Exited,
    Replied(String),
    /// The model call failed and the fallback line was recorded instead
    Fallback,
    /// The session was terminated mid-turn
    Cancelled,
}

#[derive(Debug, Default)]
struct TranscriptBuffer {
    finals: Vec<String>,
    interim: String,
}

impl TranscriptBuffer {
    fn apply(&mut self, update: TranscriptUpdate) {
        if update.is_final {
            let text = update.text.trim();
            if !text.is_empty() {
                self.finals.push(text.to_string());
            }
            self.interim.clear();
        } else {
            self.interim = update.text;
        }
    }

    fn live(&self) -> String {
        let mut parts: Vec<&str> = self.finals.iter().map(String::as_str).collect();
        let interim = self.interim.trim();
        if !interim.is_empty() {
            parts.push(interim);
        }
        parts.join(" ")
    }

    fn take(&mut self) -> String {
        let text = self.live();
        self.finals.clear();
        self.interim.clear();
        text
    }
}

fn lock_history(history: &Mutex<ConversationHistory>) -> MutexGuard<'_, ConversationHistory> {
    history
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ends a session from outside the task driving it.
///
/// Termination is complete on its own: history is cleared and the state is
/// back to idle whether or not a turn was running.
#[derive(Clone)]
pub struct SessionTerminator {
    id: Uuid,
    token: CancellationToken,
    active: Arc<AtomicBool>,
    capture: Arc<dyn SpeechToText>,
    speaker: Arc<dyn TextToSpeech>,
    history: Arc<Mutex<ConversationHistory>>,
    state: Arc<watch::Sender<VoiceState>>,
}

impl SessionTerminator {
    pub fn terminate(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.capture.abort();
        self.speaker.cancel();
        self.token.cancel();
        lock_history(&self.history).clear();
        self.state.send_replace(VoiceState::Idle);
        info!(session = %self.id, "voice session ended");
    }
}

pub struct VoiceSession {
    id: Uuid,
    model: Arc<dyn LanguageModel>,
    capture: Arc<dyn SpeechToText>,
    speaker: Arc<dyn TextToSpeech>,
    exit_phrases: Vec<String>,
    history: Arc<Mutex<ConversationHistory>>,
    state: Arc<watch::Sender<VoiceState>>,
    active: Arc<AtomicBool>,
    token: CancellationToken,
    updates: Option<mpsc::UnboundedReceiver<TranscriptUpdate>>,
    transcript: TranscriptBuffer,
}

impl VoiceSession {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        capture: Arc<dyn SpeechToText>,
        speaker: Arc<dyn TextToSpeech>,
        settings: &VoiceSettings,
    ) -> Self {
        let (state, _) = watch::channel(VoiceState::Idle);
        let id = Uuid::new_v4();
        info!(session = %id, "voice session started");
        Self {
            id,
            model,
            capture,
            speaker,
            exit_phrases: settings
                .exit_phrases
                .iter()
                .map(|p| normalize_phrase(p))
                .filter(|p| !p.is_empty())
                .collect(),
            history: Arc::new(Mutex::new(ConversationHistory::new(settings.max_history))),
            state: Arc::new(state),
            active: Arc::new(AtomicBool::new(true)),
            token: CancellationToken::new(),
            updates: None,
            transcript: TranscriptBuffer::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> VoiceState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<VoiceState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Snapshot of the conversation so far.
    pub fn history(&self) -> ConversationHistory {
        lock_history(&self.history).clone()
    }

    pub fn terminator(&self) -> SessionTerminator {
        SessionTerminator {
            id: self.id,
            token: self.token.clone(),
            active: Arc::clone(&self.active),
            capture: Arc::clone(&self.capture),
            speaker: Arc::clone(&self.speaker),
            history: Arc::clone(&self.history),
            state: Arc::clone(&self.state),
        }
    }

    /// Whether a transcript is one of the exit phrases, ignoring case,
    /// surrounding whitespace, and trailing punctuation.
    pub fn is_exit_phrase(&self, transcript: &str) -> bool {
        let normalized = normalize_phrase(transcript);
        self.exit_phrases.iter().any(|p| *p == normalized)
    }

    pub fn start_listening(&mut self) -> Result<(), VoiceError> {
        self.ensure_active()?;
        let state = self.state();
        if state != VoiceState::Idle {
            return Err(VoiceError::InvalidState {
                action: "start listening",
                state: state.as_str(),
            });
        }
        if !self.capture.is_supported() {
            return Err(VoiceError::Unsupported);
        }
        self.updates = Some(self.capture.start()?);
        self.transcript = TranscriptBuffer::default();
        self.set_state(VoiceState::Listening);
        Ok(())
    }

    /// Feed one capture update directly.
    pub fn on_transcript(&mut self, update: TranscriptUpdate) {
        if self.state() == VoiceState::Listening {
            self.transcript.apply(update);
        }
    }

    /// Pull whatever the capture has delivered so far without waiting.
    pub fn poll_transcript(&mut self) {
        let mut pending = Vec::new();
        if let Some(rx) = self.updates.as_mut() {
            while let Ok(update) = rx.try_recv() {
                pending.push(update);
            }
        }
        for update in pending {
            self.on_transcript(update);
        }
    }

    /// Everything heard so far, including the latest interim result.
    pub fn live_transcript(&self) -> String {
        self.transcript.live()
    }

    /// Stop capture and decide what the finished transcript means.
    pub async fn stop_listening(&mut self) -> Result<CaptureOutcome, VoiceError> {
        self.ensure_active()?;
        let state = self.state();
        if state != VoiceState::Listening {
            return Err(VoiceError::InvalidState {
                action: "stop listening",
                state: state.as_str(),
            });
        }

        self.capture.stop().await;
        self.poll_transcript();
        self.updates = None;
        let transcript = self.transcript.take();

        if transcript.is_empty() {
            debug!(session = %self.id, "empty transcript");
            self.set_state(VoiceState::Idle);
            return Ok(CaptureOutcome::Empty);
        }
        if self.is_exit_phrase(&transcript) {
            info!(session = %self.id, phrase = %transcript, "exit phrase detected");
            self.end();
            return Ok(CaptureOutcome::Exited);
        }

        self.set_state(VoiceState::Processing);
        Ok(CaptureOutcome::Ready(transcript))
    }

    /// Run the model turn for a transcript and play the reply.
    pub async fn respond(&mut self, transcript: String) -> Result<TurnOutcome, VoiceError> {
        self.ensure_active()?;
        let state = self.state();
        if state != VoiceState::Processing {
            return Err(VoiceError::InvalidState {
                action: "respond",
                state: state.as_str(),
            });
        }

        let messages = {
            let mut history = lock_history(&self.history);
            history.push(ChatMessage::user(transcript));
            history.messages().to_vec()
        };
        let request =
            ModelRequest::conversation(Model::Balanced, messages).with_system(RUBBER_DUCK_SYSTEM);

        let token = self.token.clone();
        let model = Arc::clone(&self.model);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = model.complete(request) => Some(result),
        };
        let Some(result) = result.filter(|_| self.is_active()) else {
            return Ok(self.terminated());
        };

        let reply = match result {
            Ok(response) => response.content.trim().to_string(),
            Err(err) => {
                warn!(session = %self.id, error = %err, "model turn failed");
                self.record_reply(RUBBER_DUCK_FALLBACK);
                self.set_state(VoiceState::Idle);
                return Ok(TurnOutcome::Fallback);
            }
        };
        if reply.is_empty() {
            self.record_reply(RUBBER_DUCK_FALLBACK);
            self.set_state(VoiceState::Idle);
            return Ok(TurnOutcome::Fallback);
        }

        self.record_reply(&reply);
        self.set_state(VoiceState::Speaking);

        let speaker = Arc::clone(&self.speaker);
        let played = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = speaker.speak(&reply) => Some(result),
        };
        match played {
            None => return Ok(self.terminated()),
            Some(Err(err)) => warn!(session = %self.id, error = %err, "playback failed"),
            Some(Ok(())) => {}
        }

        self.set_state(VoiceState::Idle);
        Ok(TurnOutcome::Replied(reply))
    }

    /// Stop capture and, if there is something to answer, answer it.
    pub async fn complete_turn(&mut self) -> Result<TurnOutcome, VoiceError> {
        match self.stop_listening().await? {
            CaptureOutcome::Empty => Ok(TurnOutcome::Empty),
            CaptureOutcome::Exited => Ok(TurnOutcome::Exited),
            CaptureOutcome::Ready(transcript) => self.respond(transcript).await,
        }
    }

    /// End the session now, releasing capture and playback.
    pub fn end(&mut self) {
        self.terminated();
    }

    fn terminated(&mut self) -> TurnOutcome {
        self.terminator().terminate();
        lock_history(&self.history).clear();
        self.updates = None;
        self.transcript = TranscriptBuffer::default();
        self.set_state(VoiceState::Idle);
        TurnOutcome::Cancelled
    }

    fn record_reply(&self, content: &str) {
        lock_history(&self.history).push(ChatMessage::assistant(content));
    }

    /// Fails once the session has ended, dropping anything left over from
    /// an outside termination.
    fn ensure_active(&mut self) -> Result<(), VoiceError> {
        if self.is_active() {
            Ok(())
        } else {
            self.terminated();
            Err(VoiceError::SessionEnded)
        }
    }

    fn set_state(&self, next: VoiceState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(session = %self.id, from = previous.as_str(), to = next.as_str(), "voice state");
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.terminator().terminate();
    }
}
