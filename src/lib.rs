//! pairpad library crate
//!
//! The AI-assisted editing pipeline: function extraction and batched
//! explanations, edit-driven re-analysis, vibe edits, and the rubber-duck
//! voice session. The `pairpad` binary is a thin front end over these.

pub mod analysis;
pub mod config;
pub mod edit;
pub mod error;
pub mod keyring;
pub mod llm;
pub mod messages;
pub mod studio;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod util;
pub mod vibe;
pub mod voice;
pub mod workspace;

pub use studio::{EditorMode, Studio, StudioUpdate};
pub use workspace::Workspace;
