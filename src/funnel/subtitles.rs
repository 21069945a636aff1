//! WebVTT / SRT flattening

use regex::Regex;
use std::sync::LazyLock;

static TIMING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2}:)?\d{2}:\d{2}[.,]\d{3}\s*-->").expect("valid timing regex")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>|\{\\[^}]*\}").expect("valid tag regex"));

/// Flatten subtitle cues into space-joined text.
///
/// Drops the WEBVTT header, NOTE/STYLE/REGION blocks, cue numbers, timing
/// lines and inline markup. Consecutive duplicate lines (rolling auto
/// captions) are collapsed.
pub fn to_plain_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut skipping_block = false;

    for line in raw.lines() {
        let trimmed = line.trim().trim_start_matches('\u{feff}');

        if trimmed.is_empty() {
            skipping_block = false;
            continue;
        }
        if skipping_block {
            continue;
        }
        if trimmed.starts_with("WEBVTT")
            || trimmed.starts_with("NOTE")
            || trimmed == "STYLE"
            || trimmed == "REGION"
        {
            skipping_block = true;
            continue;
        }
        if TIMING_RE.is_match(trimmed) || trimmed.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let text = TAG_RE.replace_all(trimmed, "");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() || lines.last() == Some(&text) {
            continue;
        }
        lines.push(text);
    }

    lines.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webvtt() {
        let raw = "WEBVTT\nKind: captions\nLanguage: en\n\nNOTE produced by hand\nsecond note line\n\n1\n00:00:01.000 --> 00:00:03.000 align:start\n<v Speaker>Hello <b>world</b></v>\n\n00:00:03.000 --> 00:00:05.000\nHello <b>world</b>\nsecond line\n";
        assert_eq!(to_plain_text(raw), "Hello world second line");
    }

    #[test]
    fn test_srt() {
        let raw = "1\r\n00:00:01,000 --> 00:00:02,500\r\n{\\an8}First cue\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\nSecond   cue\r\n";
        assert_eq!(to_plain_text(raw), "First cue Second cue");
    }

    #[test]
    fn test_empty_file_yields_empty_text() {
        assert_eq!(to_plain_text(""), "");
        assert_eq!(to_plain_text("WEBVTT\n\n"), "");
    }
}
