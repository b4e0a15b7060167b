//! Merged explanation state shown in the explanation panel.
//!
//! The board follows exactly one run at a time. Events tagged with any other
//! run id are ignored, so nothing from a superseded run ever becomes visible.

use super::run::{AnalysisEvent, RunId, RunStart};
use super::{AnalysisMode, ExplanationEntry};
use crate::llm::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    /// No run has been shown yet, or the panel was cleared
    Idle,
    /// Waiting for batches; entries may be partially filled
    Loading,
    /// The file has no analyzable units
    NothingToAnalyze,
    Ready,
}

#[derive(Debug, Clone)]
pub struct ExplanationBoard {
    run_id: Option<RunId>,
    mode: Option<AnalysisMode>,
    file_name: Option<String>,
    state: PanelState,
    expected: usize,
    entries: Vec<ExplanationEntry>,
    notice: Option<String>,
    usage: Usage,
}

impl Default for ExplanationBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ExplanationBoard {
    pub fn new() -> Self {
        Self {
            run_id: None,
            mode: None,
            file_name: None,
            state: PanelState::Idle,
            expected: 0,
            entries: Vec::new(),
            notice: None,
            usage: Usage::default(),
        }
    }

    /// Switch the board to a freshly started run.
    pub fn begin(&mut self, start: &RunStart) {
        self.entries.clear();
        self.notice = None;
        self.usage = Usage::default();
        match start {
            RunStart::NothingToAnalyze {
                run_id,
                file_name,
                mode,
            } => {
                self.run_id = Some(*run_id);
                self.file_name = Some(file_name.clone());
                self.mode = Some(*mode);
                self.expected = 0;
                self.state = PanelState::NothingToAnalyze;
            }
            RunStart::Started {
                run_id,
                file_name,
                mode,
                total_units,
                ..
            } => {
                self.run_id = Some(*run_id);
                self.file_name = Some(file_name.clone());
                self.mode = Some(*mode);
                self.expected = *total_units;
                self.state = PanelState::Loading;
            }
        }
    }

    /// Apply a run event. Returns false when the event belongs to another run.
    pub fn apply(&mut self, event: AnalysisEvent) -> bool {
        if self.run_id != Some(event.run_id()) || self.state != PanelState::Loading {
            return false;
        }
        match event {
            AnalysisEvent::BatchMerged {
                entries,
                notice,
                usage,
                ..
            } => {
                self.entries.extend(entries);
                if notice.is_some() {
                    self.notice = notice;
                }
                if let Some(u) = usage {
                    self.usage.accumulate(&u);
                }
            }
            AnalysisEvent::Done { .. } => {
                self.state = PanelState::Ready;
            }
        }
        true
    }

    /// Forget the current run (mode left the analyzable set, file closed).
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    pub fn state(&self) -> PanelState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == PanelState::Loading
    }

    pub fn mode(&self) -> Option<AnalysisMode> {
        self.mode
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn entries(&self) -> &[ExplanationEntry] {
        &self.entries
    }

    /// Entry for a unit name (first match).
    pub fn entry(&self, unit_name: &str) -> Option<&ExplanationEntry> {
        self.entries.iter().find(|e| e.unit_name == unit_name)
    }

    /// Units still waiting for an entry.
    pub fn pending(&self) -> usize {
        self.expected.saturating_sub(self.entries.len())
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }
}
