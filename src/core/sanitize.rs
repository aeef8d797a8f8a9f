//! Name sanitization for user-supplied session/player names (§3/§6).

use crate::config::MAX_NAME_LEN;

/// HTML-entity-encode the five characters that matter for safely embedding
/// a name in an HTML context downstream (`& < > " '`), then truncate to
/// [`MAX_NAME_LEN`] characters. Encoding happens before truncation is
/// measured isn't required by the spec's ≤50-char bound, which is stated in
/// terms of the name itself — truncate first, then encode, so the bound is
/// on what the user typed.
pub fn sanitize_name(raw: &str) -> String {
    let truncated: String = raw.chars().take(MAX_NAME_LEN).collect();
    let mut out = String::with_capacity(truncated.len());
    for ch in truncated.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_the_five_reserved_characters() {
        assert_eq!(sanitize_name(r#"<script>&'"'"#), "&lt;script&gt;&amp;&#39;&quot;&#39;");
    }

    #[test]
    fn truncates_before_encoding() {
        let long = "a".repeat(60);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn leaves_plain_names_untouched() {
        assert_eq!(sanitize_name("Dana"), "Dana");
    }
}
