//! Rubber-duck voice mode: capture, model turn, playback.

pub mod capability;
pub mod session;

pub use capability::{ConsoleSpeaker, SpeechToText, TextToSpeech, TranscriptUpdate, TypedCapture};
pub use session::{
    CaptureOutcome, ConversationHistory, SessionTerminator, TurnOutcome, VoiceSession, VoiceState,
};
