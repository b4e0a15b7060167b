use super::{AnalysisMode, SourceUnit};
use crate::llm::{Model, ModelRequest};
use std::path::Path;

/// Longest unit body sent to the model, in characters.
const MAX_UNIT_CHARS: usize = 6000;

/// An ordered slice of at most `batch_size` units sent in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisBatch {
    /// 0-based position of this batch within its run
    pub index: usize,
    pub units: Vec<SourceUnit>,
}

/// Group units into ordered batches of at most `batch_size`.
///
/// Concatenating the batches' units reproduces `units` exactly.
pub fn batch_units(units: &[SourceUnit], batch_size: usize) -> Vec<AnalysisBatch> {
    units
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| AnalysisBatch {
            index,
            units: chunk.to_vec(),
        })
        .collect()
}

/// Render one batch into a model request for the given mode.
pub fn render_batch_request(
    batch: &AnalysisBatch,
    mode: AnalysisMode,
    file_name: &str,
) -> ModelRequest {
    let lang = language_hint(file_name);
    let noun = match mode {
        AnalysisMode::Teacher => "Explain",
        AnalysisMode::Reviewer => "Review",
    };

    let mut prompt = format!(
        "File: {}\n{} the following {} function(s).\n",
        file_name,
        noun,
        batch.units.len()
    );
    for (i, unit) in batch.units.iter().enumerate() {
        prompt.push_str(&format!(
            "\nFunction {}: {}\n```{}\n{}\n```\n",
            i + 1,
            unit.name,
            lang,
            truncate_content(&unit.source_text, MAX_UNIT_CHARS)
        ));
    }
    prompt.push_str(&format!(
        "\nRespond with a JSON array of exactly {} objects, each with string fields \"unitName\" and \"explanation\".",
        batch.units.len()
    ));

    ModelRequest::prompt(Model::Speed, prompt).with_system(mode.system_prompt())
}

/// Markdown fence language for a file name
fn language_hint(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "rb" => "ruby",
        _ => "",
    }
}

/// Truncate long content for prompt safety (keep beginning + end)
fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let head: String = content.chars().take(max_chars / 2).collect();
        let tail: String = content
            .chars()
            .rev()
            .take(max_chars / 2)
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        format!("{}\n\n... [truncated] ...\n\n{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: usize) -> Vec<SourceUnit> {
        (0..n)
            .map(|i| SourceUnit::new(format!("f{}", i), format!("def f{}():\n    pass", i)))
            .collect()
    }

    #[test]
    fn test_two_units_fit_one_batch() {
        let batches = batch_units(&units(2), 5);
        assert_eq!(batches.len(), 1);
        let names: Vec<_> = batches[0].units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["f0", "f1"]);
    }

    #[test]
    fn test_last_batch_may_be_short_and_order_is_preserved() {
        let all = units(12);
        let batches = batch_units(&all, 5);
        let sizes: Vec<_> = batches.iter().map(|b| b.units.len()).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(batches[2].index, 2);

        let flattened: Vec<SourceUnit> = batches.into_iter().flat_map(|b| b.units).collect();
        assert_eq!(flattened, all);
    }

    #[test]
    fn test_empty_units_yield_no_batches() {
        assert!(batch_units(&[], 5).is_empty());
    }

    #[test]
    fn test_zero_batch_size_is_treated_as_one() {
        assert_eq!(batch_units(&units(3), 0).len(), 3);
    }

    #[test]
    fn test_request_embeds_units_with_positions_and_mode_template() {
        let batch = &batch_units(&units(2), 5)[0];
        let request = render_batch_request(batch, AnalysisMode::Reviewer, "app.py");
        let prompt = request.last_user_prompt().unwrap();
        assert!(prompt.contains("Function 1: f0"));
        assert!(prompt.contains("Function 2: f1"));
        assert!(prompt.contains("```python\ndef f1():"));
        assert!(prompt.contains("exactly 2 objects"));
        assert_eq!(
            request.system.as_deref(),
            Some(AnalysisMode::Reviewer.system_prompt())
        );
    }

    #[test]
    fn test_truncate_content_keeps_head_and_tail() {
        let content = format!("{}{}", "a".repeat(50), "z".repeat(50));
        let out = truncate_content(&content, 20);
        assert!(out.starts_with("aaaaaaaaaa\n"));
        assert!(out.ends_with("\nzzzzzzzzzz"));
        assert!(out.contains("[truncated]"));
    }
}
