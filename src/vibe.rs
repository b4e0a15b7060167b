//! Instruction-driven whole-file edits.
//!
//! One request carries the instruction plus the full file; the model answers
//! with `{summary?, updatedContent}`. The result is applied only to the file
//! that was active when the request was made, and only if it still exists.

use crate::error::VibeError;
use crate::llm::parse::parse_vibe_edit;
use crate::llm::prompts::VIBE_EDIT_SYSTEM;
use crate::llm::{LanguageModel, Model, ModelRequest, Usage};
use crate::workspace::{ContentChange, Workspace};
use std::sync::Arc;
use tracing::{info, warn};

/// A validated edit waiting to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct VibeEdit {
    /// File the edit was requested for
    pub file_name: String,
    pub summary: Option<String>,
    pub updated_content: String,
    pub usage: Option<Usage>,
}

/// What applying an edit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VibeOutcome {
    pub status: String,
    pub change: Option<ContentChange>,
}

impl VibeOutcome {
    pub fn applied(&self) -> bool {
        self.change.is_some()
    }
}

#[derive(Clone)]
pub struct VibeEditor {
    model: Arc<dyn LanguageModel>,
}

impl VibeEditor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub fn build_request(file_name: &str, content: &str, instruction: &str) -> ModelRequest {
        let prompt = format!(
            "INSTRUCTION:\n{}\n\nFILE: {}\n\nCURRENT CONTENT:\n```\n{}\n```",
            instruction.trim(),
            file_name,
            content
        );
        ModelRequest::prompt(Model::Smart, prompt)
            .with_system(VIBE_EDIT_SYSTEM)
            .json()
    }

    /// Ask the model for an edit. Nothing is applied here.
    pub async fn request(
        &self,
        file_name: &str,
        content: &str,
        instruction: &str,
    ) -> Result<VibeEdit, VibeError> {
        if instruction.trim().is_empty() {
            return Err(VibeError::EmptyInstruction);
        }

        let response = self
            .model
            .complete(Self::build_request(file_name, content, instruction))
            .await?;
        let parsed = parse_vibe_edit(&response.content).map_err(|e| {
            warn!(file = file_name, error = %e, "vibe edit response rejected");
            VibeError::Malformed(e)
        })?;
        if parsed.updated_content.trim().is_empty() {
            return Err(VibeError::EmptyContent);
        }

        Ok(VibeEdit {
            file_name: file_name.to_string(),
            summary: parsed.summary,
            updated_content: parsed.updated_content,
            usage: response.usage,
        })
    }
}

/// Apply an edit to the file it was requested for. A file that has since
/// been deleted (or renamed away) is left alone.
pub fn apply(workspace: &mut Workspace, edit: VibeEdit) -> VibeOutcome {
    let VibeEdit {
        file_name,
        summary,
        updated_content,
        ..
    } = edit;

    match workspace.replace(&file_name, updated_content) {
        Ok(change) => {
            info!(file = %file_name, "vibe edit applied");
            let status = summary.unwrap_or_else(|| format!("Applied update to `{}`", file_name));
            VibeOutcome {
                status,
                change: Some(change),
            }
        }
        Err(_) => {
            info!(file = %file_name, "vibe edit dropped; file no longer exists");
            VibeOutcome {
                status: format!("`{}` no longer exists; edit discarded", file_name),
                change: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::testing::FakeModel;

    fn editor(model: FakeModel) -> (VibeEditor, Arc<FakeModel>) {
        let model = Arc::new(model);
        (VibeEditor::new(model.clone()), model)
    }

    fn workspace() -> Workspace {
        Workspace::with_files([("main.py", "x = 0\n"), ("other.py", "y = 0\n")]).unwrap()
    }

    #[tokio::test]
    async fn test_edit_without_summary_uses_generic_status() {
        let (editor, model) = editor(FakeModel::replying(r#"{"updatedContent": "x = 1"}"#));
        let edit = editor.request("main.py", "x = 0\n", "set x to 1").await.unwrap();
        assert_eq!(edit.summary, None);

        let mut ws = workspace();
        let outcome = apply(&mut ws, edit);
        assert_eq!(outcome.status, "Applied update to `main.py`");
        assert_eq!(ws.content("main.py"), Some("x = 1"));
        assert_eq!(ws.content("other.py"), Some("y = 0\n"));

        let request = &model.calls()[0];
        assert_eq!(request.model, Model::Smart);
        assert!(request.last_user_prompt().unwrap().contains("set x to 1"));
    }

    #[tokio::test]
    async fn test_summary_becomes_status() {
        let (editor, _) = editor(FakeModel::replying(
            "```json\n{\"summary\": \"Renamed x to count.\", \"updatedContent\": \"count = 0\\n\"}\n```",
        ));
        let edit = editor.request("main.py", "x = 0\n", "rename x").await.unwrap();
        let mut ws = workspace();
        let outcome = apply(&mut ws, edit);
        assert_eq!(outcome.status, "Renamed x to count.");
        assert!(outcome.applied());
    }

    #[tokio::test]
    async fn test_deleted_file_is_noop() {
        let (editor, _) = editor(FakeModel::replying(r#"{"updatedContent": "x = 2"}"#));
        let edit = editor.request("main.py", "x = 0\n", "bump").await.unwrap();
        let mut ws = workspace();
        ws.delete("main.py").unwrap();

        let outcome = apply(&mut ws, edit);
        assert!(!outcome.applied());
        assert!(!ws.contains("main.py"));
        assert_eq!(ws.list(), vec!["other.py"]);
    }

    async fn request_err(model: FakeModel) -> VibeError {
        let (editor, _) = editor(model);
        editor
            .request("main.py", "x = 0\n", "change")
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_failures_do_not_produce_edits() {
        let err = request_err(FakeModel::failing(|| LlmError::MissingCredential)).await;
        assert!(matches!(err, VibeError::MissingCredential));

        let err = request_err(FakeModel::failing(|| LlmError::Transport("reset".into()))).await;
        assert!(matches!(err, VibeError::Service(_)));

        let err = request_err(FakeModel::replying("not json at all")).await;
        assert!(matches!(err, VibeError::Malformed(_)));

        let err = request_err(FakeModel::replying(r#"{"summary": "did it"}"#)).await;
        assert!(matches!(err, VibeError::Malformed(_)));

        let err = request_err(FakeModel::replying(r#"{"updatedContent": "   "}"#)).await;
        assert!(matches!(err, VibeError::EmptyContent));
    }

    #[tokio::test]
    async fn test_blank_instruction_skips_model() {
        let (editor, model) = editor(FakeModel::replying("{}"));
        let err = editor.request("main.py", "x", "  ").await.unwrap_err();
        assert!(matches!(err, VibeError::EmptyInstruction));
        assert_eq!(model.call_count(), 0);
    }
}
