//! Function-level explanation pipeline
//!
//! Source text is split into units (function-like blocks), grouped into
//! fixed-size batches, and each batch is explained by the model in one
//! request. Runs are identified by a monotonic id; a newer run supersedes
//! every older one and stale batch results are dropped before merging.

pub mod batcher;
pub mod board;
pub mod extractor;
pub mod run;

use serde::{Deserialize, Serialize};

pub use batcher::{batch_units, render_batch_request, AnalysisBatch};
pub use board::{ExplanationBoard, PanelState};
pub use extractor::{extract_unit_spans, extract_units, UnitSpan};
pub use run::{
    AnalysisEvent, AnalysisRun, AnalysisRunController, RunHandle, RunId, RunStart, RunStatus,
    RunTrigger, SELECTION_UNIT_NAME,
};

/// Shown for any unit the model could not explain.
pub const FALLBACK_EXPLANATION: &str = "Unable to analyze this function.";

/// Which flavour of explanation a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Beginner-friendly teaching explanations
    Teacher,
    /// Practical review notes
    Reviewer,
}

impl AnalysisMode {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisMode::Teacher => "teacher",
            AnalysisMode::Reviewer => "reviewer",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            AnalysisMode::Teacher => crate::llm::prompts::TEACHER_SYSTEM,
            AnalysisMode::Reviewer => crate::llm::prompts::REVIEWER_SYSTEM,
        }
    }
}

impl std::str::FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "teacher" | "teach" | "explain" => Ok(AnalysisMode::Teacher),
            "reviewer" | "review" => Ok(AnalysisMode::Reviewer),
            other => Err(format!("unknown analysis mode '{}'", other)),
        }
    }
}

/// One analyzable block extracted from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub source_text: String,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_text: source_text.into(),
        }
    }
}

/// One displayed explanation, either from the model or the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplanationEntry {
    pub unit_name: String,
    pub text: String,
    pub is_fallback: bool,
}

impl ExplanationEntry {
    pub fn fallback(unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            text: FALLBACK_EXPLANATION.to_string(),
            is_fallback: true,
        }
    }
}
