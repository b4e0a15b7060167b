//! Error taxonomy for the model, voice, and vibe-edit paths.
//!
//! Every failure that can reach the editing surface lands in one of four
//! buckets: configuration (no credential), transport/service, malformed
//! model output, or staleness. Staleness is never surfaced as an error value;
//! stale results are dropped where they are detected.

use thiserror::Error;

/// Failures from a language-model call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No credential is configured for the model service.
    #[error("No API key configured. Run 'pairpad setup' or set PAIRPAD_API_KEY.")]
    MissingCredential,

    /// The request never produced an HTTP response.
    #[error("Model request failed: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// The response envelope could not be decoded.
    #[error("Malformed model response: {0}")]
    Malformed(String),

    /// The caller abandoned the request.
    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_missing_credential(&self) -> bool {
        matches!(self, LlmError::MissingCredential)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

/// Failures from the speech capture/playback capabilities or misuse of the
/// voice state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Speech recognition is not supported here")]
    Unsupported,

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Voice session has ended")]
    SessionEnded,
}

/// Failures from a vibe edit. None of these mutate the workspace.
#[derive(Debug, Error)]
pub enum VibeError {
    #[error("missing credential")]
    MissingCredential,

    #[error("model service error: {0}")]
    Service(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response did not include updated content")]
    EmptyContent,

    #[error("no instruction given")]
    EmptyInstruction,
}

/// Failures from workspace file operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("No file named '{0}'")]
    NotFound(String),

    #[error("A file named '{0}' already exists")]
    AlreadyExists(String),

    #[error("'{0}' is not a valid file name")]
    InvalidName(String),

    #[error("No file is open")]
    NoActiveFile,
}

impl VibeError {
    /// The single human-readable status line shown for this failure.
    pub fn status_message(&self) -> String {
        match self {
            VibeError::MissingCredential => {
                "Add an API key to use vibe edits (run 'pairpad setup').".to_string()
            }
            VibeError::EmptyInstruction => "Describe the change you want first.".to_string(),
            _ => "Vibe edit failed. Please try again.".to_string(),
        }
    }
}

impl From<LlmError> for VibeError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingCredential => VibeError::MissingCredential,
            LlmError::Malformed(detail) => VibeError::Malformed(detail),
            other => VibeError::Service(other.to_string()),
        }
    }
}
