/// Changed-line magnitude between two versions of a file.
///
/// Matching leading lines are trimmed, then matching trailing lines from what
/// remains; the magnitude is the larger of the two remaining line counts.
/// Identical content yields 0, and only identical content does. The measure
/// is not symmetric in general.
pub fn changed_line_magnitude(before: &str, after: &str) -> usize {
    if before == after {
        return 0;
    }

    // split('\n') rather than lines(): a trailing newline must count as a change
    let old: Vec<&str> = before.split('\n').collect();
    let new: Vec<&str> = after.split('\n').collect();

    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let old_rest = &old[prefix..];
    let new_rest = &new[prefix..];
    let suffix = old_rest
        .iter()
        .rev()
        .zip(new_rest.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    (old_rest.len() - suffix).max(new_rest.len() - suffix)
}
