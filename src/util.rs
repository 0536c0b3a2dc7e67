//! Shared text helpers used across the relay.

/// Collapse all whitespace runs into single spaces and truncate the result to
/// at most `limit` characters, replacing the final kept character with `…`
/// when truncation happens.
///
/// Safe for multi-byte UTF-8 input: truncation counts characters, not bytes.
pub fn compact_one_line(s: &str, limit: usize) -> String {
    let one_line = s.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&one_line, limit)
}

/// Truncate `s` to at most `limit` characters, ellipsizing with `…`.
///
/// Returns the input unchanged when it already fits. The result never exceeds
/// `limit` characters including the ellipsis.
pub fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut out: String = s.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Return the last `limit` characters of `s`, on a character boundary.
pub fn tail_chars(s: &str, limit: usize) -> String {
    let total = s.chars().count();
    if total <= limit {
        return s.to_string();
    }
    s.chars().skip(total - limit).collect()
}
