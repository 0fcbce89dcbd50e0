// Presentation helpers. Pure functions of their input.
use chrono::{DateTime, Local, Utc};

/// First `max_chars` characters followed by `...`, or the text unchanged
/// when it already fits.
pub fn truncate(text: Option<&str>, max_chars: usize) -> String {
    let Some(text) = text else {
        return String::new();
    };
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}...", &text[..cut]),
    }
}

/// Split multi-line analysis text into list items: blank lines dropped, any
/// leading `N.` marker stripped so the renderer can number them afresh.
pub fn numbered_lines(text: Option<&str>) -> Vec<String> {
    text.unwrap_or_default()
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(|line| strip_marker(line).to_string())
        .collect()
}

fn strip_marker(line: &str) -> &str {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return line;
    }
    match line[digits..].strip_prefix('.') {
        Some(rest) => rest.trim_start(),
        None => line,
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
