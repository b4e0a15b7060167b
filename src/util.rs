pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Lowercase, trim, collapse internal whitespace, and drop trailing
/// sentence punctuation. Used to compare spoken phrases.
pub fn normalize_phrase(s: &str) -> String {
    let collapsed = s
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ',' | ';' | ':'))
        .trim_end()
        .replace('\u{2019}', "'")
}

/// Whether a string is truthy in an environment-variable sense.
pub fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name)
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::{normalize_phrase, truncate};

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_normalize_phrase() {
        assert_eq!(normalize_phrase("  STOP  "), "stop");
        assert_eq!(normalize_phrase("That's   all."), "that's all");
        assert_eq!(normalize_phrase("we\u{2019}re done!"), "we're done");
        assert_eq!(normalize_phrase(""), "");
    }
}
