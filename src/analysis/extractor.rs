//! Indentation-based unit extraction.
//!
//! A line matching a function-definition pattern at indentation `d` opens a
//! unit. The unit grows upward over contiguous same-indentation decorator or
//! attribute lines, and downward while non-blank lines are indented deeper
//! than `d`. A lone closing-delimiter line at exactly `d` (`}`, `});`, `end`)
//! closes the unit and is kept in it, so brace languages keep their braces.
//! Scanning resumes after the unit, so nested definitions stay inside
//! their parent.

use super::SourceUnit;
use regex::Regex;
use std::sync::OnceLock;

/// Positional boundaries of one extracted unit (0-based, inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpan {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

const TAB_WIDTH: usize = 4;

fn definition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[ \t]*(?:export\s+(?:default\s+)?)?(?:pub(?:\([^)]*\))?\s+)?(?:(?:async|unsafe|const|static|extern)\s+)*(?:def|fn|func|function\*?)\s+(?:\([^)]*\)\s*)?([A-Za-z_$][\w$]*)",
        )
        .expect("definition regex is valid")
    })
}

fn arrow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[ \t]*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|[A-Za-z_$][\w$]*\s*=>)",
        )
        .expect("arrow regex is valid")
    })
}

/// Name of the function a line introduces, if it introduces one.
pub fn definition_name(line: &str) -> Option<&str> {
    definition_re()
        .captures(line)
        .or_else(|| arrow_re().captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { TAB_WIDTH } else { 1 })
        .sum()
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_decorator(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('@') || trimmed.starts_with("#[")
}

fn is_closing_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed == "end"
        || (!trimmed.is_empty()
            && trimmed
                .chars()
                .all(|c| matches!(c, '}' | ')' | ']' | ';' | ',')))
}

/// Find unit boundaries in file content, ordered by position.
pub fn extract_unit_spans(content: &str) -> Vec<UnitSpan> {
    let lines: Vec<&str> = content.lines().collect();
    let mut spans = Vec::new();
    let mut consumed = 0;
    let mut i = 0;

    while i < lines.len() {
        let Some(name) = definition_name(lines[i]) else {
            i += 1;
            continue;
        };
        let depth = indentation(lines[i]);

        let mut start = i;
        while start > consumed
            && is_decorator(lines[start - 1])
            && indentation(lines[start - 1]) == depth
        {
            start -= 1;
        }

        let mut end = i;
        let mut j = i + 1;
        while j < lines.len() {
            let line = lines[j];
            if is_blank(line) {
                j += 1;
                continue;
            }
            let indent = indentation(line);
            if indent > depth {
                end = j;
                j += 1;
                continue;
            }
            // A closer at the opening depth belongs to the unit only when it
            // directly follows the body.
            if indent == depth && j == end + 1 && is_closing_line(line) {
                end = j;
            }
            break;
        }

        spans.push(UnitSpan {
            name: name.to_string(),
            start_line: start,
            end_line: end,
        });
        consumed = end + 1;
        i = end + 1;
    }

    spans
}

/// Split file content into ordered, non-overlapping units.
pub fn extract_units(content: &str) -> Vec<SourceUnit> {
    let lines: Vec<&str> = content.lines().collect();
    extract_unit_spans(content)
        .into_iter()
        .map(|span| SourceUnit {
            source_text: lines[span.start_line..=span.end_line]
                .join("\n")
                .trim()
                .to_string(),
            name: span.name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON: &str = r#"import os

@app.route("/")
@login_required
def index():
    user = current_user()

    return render(user)

def helper(x):
    def inner(y):
        return y * 2
    return inner(x)

class Greeter:
    def greet(self, name):
        return f"hi {name}"
"#;

    #[test]
    fn test_python_units_with_decorators_and_blank_lines() {
        let units = extract_units(PYTHON);
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["index", "helper", "greet"]);

        assert!(units[0].source_text.starts_with("@app.route"));
        assert!(units[0].source_text.ends_with("return render(user)"));
        // nested def stays inside its parent
        assert!(units[1].source_text.contains("def inner"));
        assert_eq!(units[2].source_text, "def greet(self, name):\n        return f\"hi {name}\"");
    }

    #[test]
    fn test_decorator_separated_by_blank_line_is_not_attached() {
        let content = "@cached\n\ndef f():\n    return 1\n";
        let spans = extract_unit_spans(content);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_line, 2);
    }

    #[test]
    fn test_decorator_at_other_indentation_is_not_attached() {
        let content = "    @cached\ndef f():\n    return 1\n";
        let spans = extract_unit_spans(content);
        assert_eq!(spans[0].start_line, 1);
    }

    #[test]
    fn test_brace_languages_keep_closing_brace() {
        let content = "#[inline]\nfn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\npub async fn run() {\n    go().await;\n}\n";
        let units = extract_units(content);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "add");
        assert_eq!(units[0].source_text, "#[inline]\nfn add(a: i32, b: i32) -> i32 {\n    a + b\n}");
        assert_eq!(units[1].name, "run");
        assert!(units[1].source_text.ends_with('}'));
    }

    #[test]
    fn test_closing_line_at_opening_depth_only_when_adjacent() {
        let content = "def f():\n    return 1\n)\n\ndef g():\n    return [\n        2,\n    ]\n\n]\ndef h():\n    pass\n";
        let units = extract_units(content);
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["f", "g", "h"]);

        assert_eq!(units[0].source_text, "def f():\n    return 1\n)");
        assert_eq!(
            units[1].source_text,
            "def g():\n    return [\n        2,\n    ]"
        );
        assert_eq!(units[2].source_text, "def h():\n    pass");
    }

    #[test]
    fn test_javascript_forms() {
        let content = "function a() {\n  return 1;\n}\nexport const b = async (x) => {\n  return x;\n};\nconst c = y => y + 1;\nfunc (s *Server) Start() error {\n\treturn nil\n}\n";
        let names: Vec<_> = extract_units(content).into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["a", "b", "c", "Start"]);
    }

    #[test]
    fn test_no_definitions_yields_empty() {
        assert!(extract_units("x = 1\nprint(x)\n").is_empty());
        assert!(extract_units("").is_empty());
    }

    #[test]
    fn test_spans_are_ordered_and_disjoint_and_cover_every_definition() {
        let spans = extract_unit_spans(PYTHON);
        for pair in spans.windows(2) {
            assert!(pair[0].end_line < pair[1].start_line);
        }
        for (idx, line) in PYTHON.lines().enumerate() {
            if definition_name(line).is_some() {
                assert!(
                    spans
                        .iter()
                        .any(|s| s.start_line <= idx && idx <= s.end_line),
                    "definition on line {} not covered",
                    idx
                );
            }
        }
    }

    #[test]
    fn test_unit_text_is_trimmed_and_crlf_safe() {
        let units = extract_units("def f():\r\n    return 1\r\n\r\n");
        assert_eq!(units[0].source_text, "def f():\n    return 1");
    }
}
