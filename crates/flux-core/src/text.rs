//! Char-boundary-safe truncation for log previews and error samples.

/// Longest prefix of `s` holding at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Like [`truncate_chars`], appending `...` when anything was cut.
pub fn preview(s: &str, max_chars: usize) -> String {
    let head = truncate_chars(s, max_chars);
    if head.len() == s.len() {
        head.to_owned()
    } else {
        format!("{head}...")
    }
}
