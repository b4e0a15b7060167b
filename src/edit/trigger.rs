//! Edit-driven re-analysis.
//!
//! Each content change is measured in changed lines and feeds two consumers:
//! a debounced full analysis (only the settled state after a pause is
//! analyzed) and a threshold-based preview refresh for the lower-fidelity
//! preview panel.

use super::debounce::{Debouncer, Fired};
use super::diff::changed_line_magnitude;
use crate::config::AnalysisSettings;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Pending changed-line counts per file.
#[derive(Debug, Clone, Default)]
pub struct EditAccumulator {
    counts: HashMap<String, usize>,
}

impl EditAccumulator {
    pub fn get(&self, file_name: &str) -> usize {
        self.counts.get(file_name).copied().unwrap_or(0)
    }

    /// Add magnitude to a file's count and return the new total.
    pub fn add(&mut self, file_name: &str, magnitude: usize) -> usize {
        let count = self.counts.entry(file_name.to_string()).or_insert(0);
        *count += magnitude;
        *count
    }

    pub fn reset(&mut self, file_name: &str) {
        self.counts.insert(file_name.to_string(), 0);
    }

    pub fn forget(&mut self, file_name: &str) {
        self.counts.remove(file_name);
    }
}

/// The preview panel's view of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSnapshot {
    pub file_name: String,
    pub content: String,
}

/// What one edit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub magnitude: usize,
    /// A debounced analysis is now pending
    pub analysis_armed: bool,
    /// The preview panel should show this snapshot
    pub preview: Option<PreviewSnapshot>,
}

pub struct EditTrigger {
    threshold: usize,
    accumulator: EditAccumulator,
    debouncer: Debouncer<String>,
}

impl EditTrigger {
    pub fn new(settings: &AnalysisSettings) -> (Self, mpsc::UnboundedReceiver<Fired<String>>) {
        let (debouncer, rx) = Debouncer::new(settings.debounce());
        (
            Self {
                threshold: settings.preview_threshold.max(1),
                accumulator: EditAccumulator::default(),
                debouncer,
            },
            rx,
        )
    }

    /// Handle a content change on the active file.
    ///
    /// `analyzable` is whether the editor is in a mode that re-analyzes on
    /// edit. Zero-magnitude events change nothing.
    pub fn on_edit(
        &mut self,
        file_name: &str,
        before: &str,
        after: &str,
        analyzable: bool,
    ) -> EditOutcome {
        let magnitude = changed_line_magnitude(before, after);
        if magnitude == 0 {
            return EditOutcome {
                magnitude,
                analysis_armed: self.debouncer.is_armed(),
                preview: None,
            };
        }

        if analyzable {
            self.debouncer.arm(file_name.to_string());
        }

        let total = self.accumulator.add(file_name, magnitude);
        let preview = if total >= self.threshold {
            self.accumulator.reset(file_name);
            debug!(file = file_name, lines = total, "preview refresh threshold reached");
            Some(PreviewSnapshot {
                file_name: file_name.to_string(),
                content: after.to_string(),
            })
        } else {
            None
        };

        EditOutcome {
            magnitude,
            analysis_armed: self.debouncer.is_armed(),
            preview,
        }
    }

    /// The active file changed: drop pending work, reset the accumulators,
    /// and re-seed the preview from the new file.
    pub fn on_file_switch(
        &mut self,
        previous: Option<&str>,
        file_name: &str,
        content: &str,
    ) -> PreviewSnapshot {
        self.debouncer.cancel();
        if let Some(previous) = previous {
            self.accumulator.reset(previous);
        }
        self.accumulator.reset(file_name);
        PreviewSnapshot {
            file_name: file_name.to_string(),
            content: content.to_string(),
        }
    }

    /// Validate a delivered debounce fire; returns the file to analyze.
    pub fn accept_fired(&mut self, fired: Fired<String>) -> Option<String> {
        if self.debouncer.accept(&fired) {
            debug!(file = %fired.payload, "edit settled");
            Some(fired.payload)
        } else {
            None
        }
    }

    /// Drop any pending debounced analysis.
    pub fn cancel_pending(&mut self) {
        self.debouncer.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_armed()
    }

    pub fn pending_lines(&self, file_name: &str) -> usize {
        self.accumulator.get(file_name)
    }

    pub fn forget_file(&mut self, file_name: &str) {
        self.accumulator.forget(file_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> AnalysisSettings {
        AnalysisSettings {
            batch_size: 5,
            debounce_ms: 1500,
            preview_threshold: 5,
        }
    }

    fn lines(n: usize, tag: &str) -> String {
        (0..n).map(|i| format!("{}{}", tag, i)).collect::<Vec<_>>().join("\n")
    }

    #[tokio::test]
    async fn test_threshold_refreshes_once_and_resets() {
        let (mut trigger, _rx) = EditTrigger::new(&settings());
        let v0 = lines(10, "a");
        // 3 changed lines
        let v1 = format!("x0\nx1\nx2\n{}", &v0[v0.find("a3").unwrap()..]);
        let first = trigger.on_edit("f.py", &v0, &v1, true);
        assert_eq!(first.magnitude, 3);
        assert!(first.preview.is_none());
        assert_eq!(trigger.pending_lines("f.py"), 3);

        // no-op edit keeps the accumulator
        let second = trigger.on_edit("f.py", &v1, &v1, true);
        assert_eq!(second.magnitude, 0);
        assert!(second.preview.is_none());
        assert_eq!(trigger.pending_lines("f.py"), 3);

        let v2 = format!("y0\ny1\ny2\n{}", &v0[v0.find("a3").unwrap()..]);
        let third = trigger.on_edit("f.py", &v1, &v2, true);
        assert_eq!(third.magnitude, 3);
        let preview = third.preview.unwrap();
        assert_eq!(preview.content, v2);
        assert_eq!(trigger.pending_lines("f.py"), 0);
    }

    #[tokio::test]
    async fn test_accumulators_are_per_file() {
        let (mut trigger, _rx) = EditTrigger::new(&settings());
        trigger.on_edit("a.py", "1\n2\n3", "x\ny\nz", false);
        trigger.on_edit("b.py", "1", "2", false);
        assert_eq!(trigger.pending_lines("a.py"), 3);
        assert_eq!(trigger.pending_lines("b.py"), 1);
    }

    #[tokio::test]
    async fn test_file_switch_resets_and_reseeds() {
        let (mut trigger, _rx) = EditTrigger::new(&settings());
        trigger.on_edit("a.py", "1\n2", "x\ny", true);
        assert!(trigger.is_pending());

        let snapshot = trigger.on_file_switch(Some("a.py"), "b.py", "print(1)");
        assert_eq!(snapshot.file_name, "b.py");
        assert_eq!(snapshot.content, "print(1)");
        assert_eq!(trigger.pending_lines("a.py"), 0);
        assert_eq!(trigger.pending_lines("b.py"), 0);
        assert!(!trigger.is_pending());
    }

    #[tokio::test]
    async fn test_non_analyzable_edits_do_not_arm() {
        let (mut trigger, _rx) = EditTrigger::new(&settings());
        let outcome = trigger.on_edit("a.py", "1", "2", false);
        assert!(!outcome.analysis_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_settled_state_fires() {
        let (mut trigger, mut rx) = EditTrigger::new(&settings());
        trigger.on_edit("a.py", "1", "2", true);
        tokio::time::advance(Duration::from_millis(1000)).await;
        trigger.on_edit("a.py", "2", "3", true);
        tokio::time::advance(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(600)).await;
        let fired = rx.recv().await.unwrap();
        assert_eq!(trigger.accept_fired(fired), Some("a.py".to_string()));
        assert!(!trigger.is_pending());
    }
}
