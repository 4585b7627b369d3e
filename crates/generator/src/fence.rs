const FENCE: &str = "```";

/// Removes Markdown code fences (```` ``` ```` with an optional language
/// tag such as `glsl`) wherever they appear, then trims the result.
pub fn strip_code_fences(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(index) = rest.find(FENCE) {
        cleaned.push_str(&rest[..index]);
        rest = skip_fence_tag(&rest[index + FENCE.len()..]);
        rest = rest
            .strip_prefix("\r\n")
            .or_else(|| rest.strip_prefix('\n'))
            .unwrap_or(rest);
    }
    cleaned.push_str(rest);
    cleaned.trim().to_string()
}

/// Skips a language tag directly after an opening fence. A word counts as a
/// tag when it ends the line or is `glsl`.
fn skip_fence_tag(after: &str) -> &str {
    let tag_len = after
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '+' | '-')))
        .unwrap_or(after.len());
    if tag_len == 0 {
        return after;
    }
    let (tag, remainder) = after.split_at(tag_len);
    let ends_line =
        remainder.is_empty() || remainder.starts_with('\n') || remainder.starts_with("\r\n");
    if ends_line || tag.eq_ignore_ascii_case("glsl") {
        remainder
    } else {
        after
    }
}
