//! Escaping rules for the two Telegram markup dialects.

const MARKDOWN_V2_ESCAPED: &str = "_*[]()~`>#+-=|{}.!\\";
const MARKDOWN_V2_CODE_ESCAPED: &str = "\\`";

/// Escape text for Telegram HTML mode.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape text for Telegram MarkdownV2 mode.
pub fn escape_markdown_v2(value: &str) -> String {
    escape_with_set(value, MARKDOWN_V2_ESCAPED)
}

/// Escape inline code or code block payload for MarkdownV2 mode.
pub fn escape_markdown_v2_code(value: &str) -> String {
    escape_with_set(value, MARKDOWN_V2_CODE_ESCAPED)
}

fn escape_with_set(value: &str, escaped: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(value.len() * 2);
    for c in value.chars() {
        if escaped.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
