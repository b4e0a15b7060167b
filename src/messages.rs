//! Messages from background tasks back onto the studio's event sequence.
//!
//! Channel sends use `let _ =`: a closed receiver means the studio has been
//! dropped and nobody is waiting for the result.

use crate::error::VibeError;
use crate::vibe::VibeEdit;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tracing::warn;

pub enum StudioMessage {
    /// A vibe edit request resolved
    VibeFinished {
        file_name: String,
        result: Result<VibeEdit, VibeError>,
    },
    /// A background task panicked
    TaskCrashed { task: &'static str, detail: String },
}

/// Run a future on the runtime, reporting a panic as a message instead of
/// losing it.
pub fn spawn_background<F>(tx: mpsc::UnboundedSender<StudioMessage>, task: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            let detail = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            warn!(task, detail = %detail, "background task crashed");
            let _ = tx.send(StudioMessage::TaskCrashed { task, detail });
        }
    });
}
