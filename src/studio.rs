//! The editing surface's single event sequence.
//!
//! `Studio` owns the workspace and every pipeline that reacts to it. User
//! actions are plain method calls; results of background work (debounce
//! fires, analysis batches, vibe edits) come back over channels and are
//! applied one at a time by [`Studio::next_update`] or [`Studio::drain`], so
//! every mutation happens in order on the caller's task.

use crate::analysis::{
    AnalysisEvent, AnalysisMode, AnalysisRunController, ExplanationBoard, RunId, RunStart,
    RunTrigger,
};
use crate::config::{Config, VoiceSettings};
use crate::edit::{EditOutcome, EditTrigger, Fired, PreviewSnapshot};
use crate::error::WorkspaceError;
use crate::llm::LanguageModel;
use crate::messages::{spawn_background, StudioMessage};
use crate::vibe::{self, VibeEditor};
use crate::voice::{SpeechToText, TextToSpeech, VoiceSession};
use crate::workspace::Workspace;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditorMode {
    #[default]
    Plain,
    Teacher,
    Reviewer,
    Vibe,
    RubberDuck,
}

impl EditorMode {
    /// The explanation flavour this mode re-analyzes with, if any.
    pub fn analysis_mode(&self) -> Option<AnalysisMode> {
        match self {
            EditorMode::Teacher => Some(AnalysisMode::Teacher),
            EditorMode::Reviewer => Some(AnalysisMode::Reviewer),
            _ => None,
        }
    }

    pub fn is_analyzable(&self) -> bool {
        self.analysis_mode().is_some()
    }

    pub fn label(&self) -> &'static str {
        match self {
            EditorMode::Plain => "plain",
            EditorMode::Teacher => "teacher",
            EditorMode::Reviewer => "reviewer",
            EditorMode::Vibe => "vibe",
            EditorMode::RubberDuck => "rubber duck",
        }
    }
}

impl std::str::FromStr for EditorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "edit" => Ok(EditorMode::Plain),
            "teacher" | "teach" => Ok(EditorMode::Teacher),
            "reviewer" | "review" => Ok(EditorMode::Reviewer),
            "vibe" => Ok(EditorMode::Vibe),
            "duck" | "rubber duck" | "rubber-duck" | "rubberduck" => Ok(EditorMode::RubberDuck),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Something the studio applied while processing background results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioUpdate {
    AnalysisStarted(RunStart),
    EntriesMerged { run_id: RunId, added: usize },
    AnalysisDone { run_id: RunId },
    VibeFinished { applied: bool, status: String },
    /// A result arrived for work that had already been superseded
    Stale,
    TaskCrashed { task: &'static str },
}

enum Incoming {
    Settled(Fired<String>),
    Analysis(AnalysisEvent),
    Message(StudioMessage),
}

pub struct Studio {
    model: Arc<dyn LanguageModel>,
    voice_settings: VoiceSettings,
    workspace: Workspace,
    mode: EditorMode,
    trigger: EditTrigger,
    settled_rx: mpsc::UnboundedReceiver<Fired<String>>,
    controller: AnalysisRunController,
    analysis_rx: mpsc::UnboundedReceiver<AnalysisEvent>,
    board: ExplanationBoard,
    preview: Option<PreviewSnapshot>,
    vibe: VibeEditor,
    vibe_in_flight: usize,
    status: Option<String>,
    tx: mpsc::UnboundedSender<StudioMessage>,
    rx: mpsc::UnboundedReceiver<StudioMessage>,
}

impl Studio {
    pub fn new(model: Arc<dyn LanguageModel>, config: &Config, workspace: Workspace) -> Self {
        let (trigger, settled_rx) = EditTrigger::new(&config.analysis);
        let (controller, analysis_rx) =
            AnalysisRunController::new(Arc::clone(&model), config.analysis.batch_size);
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            vibe: VibeEditor::new(Arc::clone(&model)),
            model,
            voice_settings: config.voice.clone(),
            workspace,
            mode: EditorMode::Plain,
            trigger,
            settled_rx,
            controller,
            analysis_rx,
            board: ExplanationBoard::new(),
            preview: None,
            vibe_in_flight: 0,
            status: None,
            tx,
            rx,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    /// The explanation panel.
    pub fn board(&self) -> &ExplanationBoard {
        &self.board
    }

    /// The preview panel's snapshot.
    pub fn preview(&self) -> Option<&PreviewSnapshot> {
        self.preview.as_ref()
    }

    /// Latest inline status message.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.controller.is_busy()
    }

    pub fn edit_pending(&self) -> bool {
        self.trigger.is_pending()
    }

    /// No debounce, run, or vibe edit is outstanding.
    pub fn is_settled(&self) -> bool {
        !self.controller.is_busy() && !self.trigger.is_pending() && self.vibe_in_flight == 0
    }

    // ── files ──

    pub fn create_file(
        &mut self,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), WorkspaceError> {
        self.workspace.create(name, content)
    }

    /// Make a file active. Re-seeds the preview and, in an analyzable mode,
    /// analyzes the file.
    pub fn open_file(&mut self, name: &str) -> Result<Option<RunStart>, WorkspaceError> {
        let previous = self.workspace.active().map(str::to_string);
        let content = self.workspace.open(name)?.to_string();
        if previous.as_deref() == Some(name) {
            return Ok(None);
        }

        self.preview = Some(
            self.trigger
                .on_file_switch(previous.as_deref(), name, &content),
        );
        debug!(file = name, "active file changed");
        if self.mode.is_analyzable() {
            Ok(self.start_analysis(RunTrigger::FileSwitch))
        } else {
            self.board.clear();
            Ok(None)
        }
    }

    pub fn delete_file(&mut self, name: &str) -> Result<(), WorkspaceError> {
        let was_active = self.workspace.active() == Some(name);
        self.workspace.delete(name)?;
        self.trigger.forget_file(name);
        if was_active {
            self.trigger.cancel_pending();
            self.controller.cancel();
            self.board.clear();
            self.preview = None;
        }
        Ok(())
    }

    pub fn rename_file(&mut self, from: &str, to: &str) -> Result<(), WorkspaceError> {
        let was_active = self.workspace.active() == Some(from);
        self.workspace.rename(from, to)?;
        self.trigger.forget_file(from);
        if was_active {
            if let Some(active) = self.workspace.active().map(str::to_string) {
                let content = self.workspace.active_content().unwrap_or_default().to_string();
                self.preview = Some(self.trigger.on_file_switch(None, &active, &content));
                if self.mode.is_analyzable() {
                    self.start_analysis(RunTrigger::FileSwitch);
                }
            }
        }
        Ok(())
    }

    // ── editing ──

    /// Replace the active file's content, as the editor widget does on every
    /// change.
    pub fn edit(&mut self, content: impl Into<String>) -> Result<EditOutcome, WorkspaceError> {
        let content = content.into();
        self.edit_with(move |_| content)
    }

    /// Read-modify-write the active file's content.
    pub fn edit_with<F>(&mut self, f: F) -> Result<EditOutcome, WorkspaceError>
    where
        F: FnOnce(&str) -> String,
    {
        let active = self
            .workspace
            .active()
            .map(str::to_string)
            .ok_or(WorkspaceError::NoActiveFile)?;
        let change = self.workspace.update(&active, f)?;
        let outcome = self.trigger.on_edit(
            &active,
            &change.before,
            &change.after,
            self.mode.is_analyzable(),
        );
        if let Some(preview) = &outcome.preview {
            self.preview = Some(preview.clone());
        }
        Ok(outcome)
    }

    // ── modes ──

    pub fn set_mode(&mut self, mode: EditorMode) -> Option<RunStart> {
        if mode == self.mode {
            return None;
        }
        info!(from = self.mode.label(), to = mode.label(), "editor mode changed");
        self.mode = mode;

        if mode.is_analyzable() {
            self.start_analysis(RunTrigger::ModeSwitch)
        } else {
            self.trigger.cancel_pending();
            self.controller.cancel();
            self.board.clear();
            None
        }
    }

    /// Analyze the active file now.
    pub fn analyze_now(&mut self) -> Option<RunStart> {
        self.trigger.cancel_pending();
        self.start_analysis(RunTrigger::Manual)
    }

    /// Explain a selected snippet of the active file in the current mode.
    pub fn analyze_selection(&mut self, snippet: &str) -> Option<RunStart> {
        let Some(mode) = self.mode.analysis_mode() else {
            self.status = Some("Switch to teacher or reviewer mode to explain a selection.".to_string());
            return None;
        };
        let file_name = self.workspace.active()?.to_string();
        if snippet.trim().is_empty() {
            self.status = Some("Select some code first.".to_string());
            return None;
        }
        self.trigger.cancel_pending();
        let start = self.controller.start_selection(&file_name, snippet, mode);
        self.board.begin(&start);
        Some(start)
    }

    // ── vibe ──

    /// Ask for an instruction-driven edit of the active file. The result is
    /// applied when it arrives, to this file only.
    pub fn request_vibe_edit(&mut self, instruction: &str) -> Result<(), WorkspaceError> {
        let file_name = self
            .workspace
            .active()
            .map(str::to_string)
            .ok_or(WorkspaceError::NoActiveFile)?;
        let content = self.workspace.active_content().unwrap_or_default().to_string();
        let instruction = instruction.to_string();
        let editor = self.vibe.clone();
        let tx = self.tx.clone();

        self.vibe_in_flight += 1;
        self.status = Some(format!("Editing `{}`...", file_name));
        info!(file = %file_name, "vibe edit requested");

        spawn_background(self.tx.clone(), "vibe_edit", async move {
            let result = editor.request(&file_name, &content, &instruction).await;
            let _ = tx.send(StudioMessage::VibeFinished { file_name, result });
        });
        Ok(())
    }

    // ── voice ──

    /// A rubber-duck session sharing this studio's model and voice settings.
    pub fn voice_session(
        &self,
        capture: Arc<dyn SpeechToText>,
        speaker: Arc<dyn TextToSpeech>,
    ) -> VoiceSession {
        VoiceSession::new(Arc::clone(&self.model), capture, speaker, &self.voice_settings)
    }

    // ── background results ──

    /// Wait for the next background result and apply it.
    pub async fn next_update(&mut self) -> Option<StudioUpdate> {
        let incoming = tokio::select! {
            Some(fired) = self.settled_rx.recv() => Incoming::Settled(fired),
            Some(event) = self.analysis_rx.recv() => Incoming::Analysis(event),
            Some(message) = self.rx.recv() => Incoming::Message(message),
            else => return None,
        };
        Some(self.handle(incoming))
    }

    /// Apply every result that is already waiting, without blocking.
    pub fn drain(&mut self) -> Vec<StudioUpdate> {
        let mut incoming = Vec::new();
        while let Ok(fired) = self.settled_rx.try_recv() {
            incoming.push(Incoming::Settled(fired));
        }
        while let Ok(event) = self.analysis_rx.try_recv() {
            incoming.push(Incoming::Analysis(event));
        }
        while let Ok(message) = self.rx.try_recv() {
            incoming.push(Incoming::Message(message));
        }
        incoming.into_iter().map(|i| self.handle(i)).collect()
    }

    /// Keep applying results until nothing is outstanding.
    pub async fn settle(&mut self) -> Vec<StudioUpdate> {
        let mut updates = Vec::new();
        while !self.is_settled() {
            match self.next_update().await {
                Some(update) => updates.push(update),
                None => break,
            }
        }
        updates
    }

    fn handle(&mut self, incoming: Incoming) -> StudioUpdate {
        match incoming {
            Incoming::Settled(fired) => {
                let Some(file_name) = self.trigger.accept_fired(fired) else {
                    return StudioUpdate::Stale;
                };
                if self.workspace.active() != Some(file_name.as_str()) {
                    return StudioUpdate::Stale;
                }
                match self.start_analysis(RunTrigger::ContentSettled) {
                    Some(start) => StudioUpdate::AnalysisStarted(start),
                    None => StudioUpdate::Stale,
                }
            }
            Incoming::Analysis(event) => self.apply_analysis(event),
            Incoming::Message(StudioMessage::VibeFinished { file_name, result }) => {
                self.vibe_in_flight = self.vibe_in_flight.saturating_sub(1);
                match result {
                    Ok(edit) => {
                        let outcome = vibe::apply(&mut self.workspace, edit);
                        if let Some(change) = &outcome.change {
                            if self.workspace.active() == Some(change.file_name.as_str()) {
                                let edit_outcome = self.trigger.on_edit(
                                    &change.file_name,
                                    &change.before,
                                    &change.after,
                                    self.mode.is_analyzable(),
                                );
                                if let Some(preview) = edit_outcome.preview {
                                    self.preview = Some(preview);
                                }
                            }
                        }
                        self.status = Some(outcome.status.clone());
                        StudioUpdate::VibeFinished {
                            applied: outcome.applied(),
                            status: outcome.status,
                        }
                    }
                    Err(err) => {
                        warn!(file = %file_name, error = %err, "vibe edit failed");
                        let status = err.status_message();
                        self.status = Some(status.clone());
                        StudioUpdate::VibeFinished {
                            applied: false,
                            status,
                        }
                    }
                }
            }
            Incoming::Message(StudioMessage::TaskCrashed { task, detail }) => {
                if task == "vibe_edit" {
                    self.vibe_in_flight = self.vibe_in_flight.saturating_sub(1);
                }
                self.status = Some(format!("Background task '{}' crashed: {}", task, detail));
                StudioUpdate::TaskCrashed { task }
            }
        }
    }

    fn apply_analysis(&mut self, event: AnalysisEvent) -> StudioUpdate {
        if !self.controller.observe(&event) {
            return StudioUpdate::Stale;
        }
        let run_id = event.run_id();
        let added = match &event {
            AnalysisEvent::BatchMerged { entries, notice, .. } => {
                if let Some(notice) = notice {
                    self.status = Some(notice.clone());
                }
                Some(entries.len())
            }
            AnalysisEvent::Done { .. } => None,
        };
        if !self.board.apply(event) {
            return StudioUpdate::Stale;
        }
        match added {
            Some(added) => StudioUpdate::EntriesMerged { run_id, added },
            None => StudioUpdate::AnalysisDone { run_id },
        }
    }

    fn start_analysis(&mut self, trigger: RunTrigger) -> Option<RunStart> {
        let mode = self.mode.analysis_mode()?;
        let file_name = self.workspace.active()?.to_string();
        let content = self.workspace.content(&file_name)?.to_string();
        let start = self.controller.start(&file_name, &content, mode, trigger);
        self.board.begin(&start);
        Some(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_and_analyzability() {
        assert_eq!("Teacher".parse::<EditorMode>(), Ok(EditorMode::Teacher));
        assert_eq!("rubber-duck".parse::<EditorMode>(), Ok(EditorMode::RubberDuck));
        assert!(EditorMode::Reviewer.is_analyzable());
        assert!(!EditorMode::Vibe.is_analyzable());
        assert!(!EditorMode::Plain.is_analyzable());
        assert!("loud".parse::<EditorMode>().is_err());
    }
}
