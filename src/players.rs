//! Player counts from free-form console output.

use regex::Regex;
use std::sync::OnceLock;

struct Recognizers {
    fraction: Regex,
    numbered_line: Regex,
    online_header: Regex,
}

fn recognizers() -> &'static Recognizers {
    static RECOGNIZERS: OnceLock<Recognizers> = OnceLock::new();

    RECOGNIZERS.get_or_init(|| Recognizers {
        fraction: Regex::new(r"^\s*(\d+)\s*/\s*(\d+)\s*$").expect("valid fraction pattern"),
        numbered_line: Regex::new(r"^\s*\d+\.\s*[^,]+,.*$").expect("valid numbered line pattern"),
        online_header: Regex::new(r"Online players \((\d+)\):").expect("valid online header pattern"),
    })
}

/// Count the players in a console reply.
///
/// Recognizers are tried in a fixed order and the first match wins:
///
/// 1. the whole text is `online/max`,
/// 2. one `<index>. <name>, <rest>` line per player,
/// 3. a `name,playeruid,steamid` CSV header followed by one row per player,
/// 4. an `Online players (N):` line,
/// 5. the caller's `custom` pattern (first capture group, or the whole match).
///
/// Anything else counts as 0.
pub fn extract_player_count(text: Option<&str>, custom: Option<&Regex>) -> u32 {
    let text = match text {
        Some(text) if text.chars().any(|c| c.is_ascii_digit()) => text,
        Some(text) if !text.is_empty() => {
            tracing::debug!("No digits in console output, counting 0 players");
            return 0;
        }
        _ => return 0,
    };
    let recognizers = recognizers();

    if let Some(online) = recognizers
        .fraction
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return online;
    }

    let numbered = text
        .lines()
        .filter(|line| recognizers.numbered_line.is_match(line))
        .count();

    if numbered > 0 {
        return numbered as u32;
    }

    if let Some(rows) = count_csv_rows(text) {
        return rows;
    }

    if let Some(online) = recognizers
        .online_header
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return online;
    }

    if let Some(pattern) = custom {
        if let Some(count) = pattern
            .captures(text)
            .and_then(|c| c.get(1).or_else(|| c.get(0)))
            .and_then(|m| m.as_str().trim().parse().ok())
        {
            return count;
        }
    }

    tracing::debug!("No player count format matched console output: {:?}", text);

    0
}

/// Rows below a `name,playeruid,steamid` header, if the header is present.
fn count_csv_rows(text: &str) -> Option<u32> {
    let mut lines = text.lines();

    lines.find(|line| line.to_ascii_lowercase().contains("name,playeruid,steamid"))?;

    Some(
        lines
            .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with("name,"))
            .count() as u32,
    )
}
