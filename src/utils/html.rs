use ammonia;

/// Clean comment bodies using the ammonia library.
///
/// Whitelist-based sanitization: safe inline tags (like <b>, <p>) survive,
/// dangerous tags (like <script>, <iframe>) and attributes (like onclick)
/// are stripped. Comments are stored already-sanitized, so every render
/// path gets the same safe text.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tags() {
        let cleaned = clean_html("hi <script>alert(1)</script><b>there</b>");
        assert!(!cleaned.contains("script"));
        assert!(cleaned.contains("<b>there</b>"));
    }
}
