//! Pluggable speech capabilities.
//!
//! The session never talks to an audio device directly. Capture and playback
//! are provided by whatever host embeds the session; the CLI uses
//! [`TypedCapture`] and [`ConsoleSpeaker`], where typed lines stand in for
//! speech and replies are printed.

use crate::error::VoiceError;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One incremental recognition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptUpdate {
    pub text: String,
    /// Final for this utterance; interim results may still be revised
    pub is_final: bool,
}

impl TranscriptUpdate {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Speech-to-text. Capture is continuous until stopped.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Begin capturing; updates arrive on the returned channel.
    fn start(&self) -> Result<mpsc::UnboundedReceiver<TranscriptUpdate>, VoiceError>;

    /// Stop capturing. Resolves once every pending result has been delivered.
    async fn stop(&self);

    /// Stop immediately, discarding anything not yet delivered.
    fn abort(&self);
}

/// Text-to-speech.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Resolves when playback has finished.
    async fn speak(&self, text: &str) -> Result<(), VoiceError>;

    /// Halt playback now and release the output.
    fn cancel(&self);
}

/// Capture fed by explicit lines of text.
#[derive(Default)]
pub struct TypedCapture {
    sender: Mutex<Option<mpsc::UnboundedSender<TranscriptUpdate>>>,
}

impl TypedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a line as a final result. Returns false when not capturing.
    pub fn push_line(&self, line: &str) -> bool {
        self.push(TranscriptUpdate::final_text(line))
    }

    pub fn push(&self, update: TranscriptUpdate) -> bool {
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(update).is_ok(),
            None => false,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

#[async_trait]
impl SpeechToText for TypedCapture {
    fn is_supported(&self) -> bool {
        true
    }

    fn start(&self) -> Result<mpsc::UnboundedReceiver<TranscriptUpdate>, VoiceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        self.close();
    }

    fn abort(&self) {
        self.close();
    }
}

/// Playback that prints the reply to stdout.
pub struct ConsoleSpeaker {
    prefix: String,
}

impl ConsoleSpeaker {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl TextToSpeech for ConsoleSpeaker {
    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}{}", self.prefix, text).map_err(|e| VoiceError::Playback(e.to_string()))?;
        out.flush().map_err(|e| VoiceError::Playback(e.to_string()))
    }

    fn cancel(&self) {}
}
