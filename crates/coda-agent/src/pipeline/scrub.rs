//! Response scrubbing — the deterministic safety net behind the
//! restrictive pass-2 prompt.
//!
//! Strips residual JSON, tool mentions, and hedging fillers from a reply
//! before it is committed and spoken. Applied exactly once per turn.

use std::sync::OnceLock;

use regex::Regex;

use crate::tools::basic::{current_date_reply, current_time_reply};

pub const APOLOGY: &str = "I'm sorry, I couldn't process that properly.";
const MIN_REPLY_CHARS: usize = 5;

struct Scrubber {
    bracket_block: Regex,
    brace_block: Regex,
    stray_braces: Regex,
    tool_mentions: Regex,
    hedges: Regex,
    spaces: Regex,
    space_before_period: Regex,
    leading_punct: Regex,
}

fn scrubber() -> &'static Scrubber {
    static SCRUBBER: OnceLock<Scrubber> = OnceLock::new();
    SCRUBBER.get_or_init(|| Scrubber {
        bracket_block: Regex::new(r"(?s)\[.*?\]").unwrap(),
        brace_block: Regex::new(r"(?s)\{.*?\}").unwrap(),
        stray_braces: Regex::new(r"[{}\[\]]+").unwrap(),
        tool_mentions: Regex::new(
            r"(?i)tool_call|tool result|according to the tool|the tool says|based on the tool",
        )
        .unwrap(),
        hedges: Regex::new(
            r"(?i)let me check|i found that|i can tell you that|i need to use a tool|i'll check",
        )
        .unwrap(),
        spaces: Regex::new(r"\s+").unwrap(),
        space_before_period: Regex::new(r"\s+\.").unwrap(),
        leading_punct: Regex::new(r"^[,.\s]+").unwrap(),
    })
}

/// Clean a raw reply for speaking.
///
/// `tool` is the canonical tool name of this turn, if any; it selects a
/// factual fallback when scrubbing leaves nothing worth saying.
pub fn clean_response(response: &str, tool: Option<&str>) -> String {
    let s = scrubber();

    // Prefer natural language trailing a JSON block, when present.
    let mut text = response.to_string();
    let json_end = text.rfind('}').into_iter().chain(text.rfind(']')).max();
    if let Some(end) = json_end {
        if end + 1 < text.len() {
            let tail = text[end + 1..].trim();
            if tail.chars().count() > MIN_REPLY_CHARS {
                text = tail.to_string();
            }
        }
    }

    // Non-greedy block removal leaves the outer shell of nested JSON;
    // iterate to a fixpoint, then drop any orphaned delimiters.
    let mut text = text;
    for _ in 0..4 {
        let stripped = s.bracket_block.replace_all(&text, "").to_string();
        let stripped = s.brace_block.replace_all(&stripped, "").to_string();
        if stripped == text {
            break;
        }
        text = stripped;
    }
    let text = s.stray_braces.replace_all(&text, "");
    let text = s.tool_mentions.replace_all(&text, "");
    let text = s.hedges.replace_all(&text, "");
    let text = s.spaces.replace_all(&text, " ");
    let text = s.space_before_period.replace_all(&text, ".");
    let text = s.leading_punct.replace_all(&text, "");
    let text = text.trim();

    if text.chars().count() < MIN_REPLY_CHARS {
        return match tool {
            Some("get_date") => current_date_reply(),
            Some("get_time") => current_time_reply(),
            _ => APOLOGY.to_string(),
        };
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(clean_response("Hi there!", None), "Hi there!");
    }

    #[test]
    fn json_blocks_are_stripped() {
        let raw = r#"{"tool_call":{"name":"get_time","args":{}}} It's 14:05 right now."#;
        assert_eq!(clean_response(raw, Some("get_time")), "It's 14:05 right now.");
    }

    #[test]
    fn tool_mentions_and_hedges_are_removed() {
        let raw = "Let me check. According to the tool, it's Tuesday today.";
        let clean = clean_response(raw, None);
        assert!(!clean.to_lowercase().contains("tool"));
        assert!(!clean.to_lowercase().contains("let me check"));
        assert!(clean.contains("Tuesday"));
    }

    #[test]
    fn whitespace_and_punctuation_normalize() {
        let raw = ", ,   so   the answer   is 42 .";
        assert_eq!(clean_response(raw, None), "so the answer is 42.");
    }

    #[test]
    fn nested_json_leaves_no_stray_braces() {
        assert_eq!(
            clean_response(r#"Answer: {"a":{"b":1}} no"#, None),
            "Answer: no"
        );
    }

    #[test]
    fn empty_result_falls_back_to_apology() {
        assert_eq!(clean_response("{\"a\": 1}", None), APOLOGY);
        assert_eq!(clean_response("  ", None), APOLOGY);
    }

    #[test]
    fn time_tool_gets_factual_fallback() {
        let fallback = clean_response("{}", Some("get_time"));
        assert!(fallback.starts_with("It's "));
        let fallback = clean_response("{}", Some("get_date"));
        assert!(fallback.starts_with("Today is "));
    }

    #[test]
    fn natural_text_after_json_is_preferred() {
        let raw = "{\"tool_call\":{\"name\":\"tell_joke\",\"args\":{}}}Why did the bicycle fall over?";
        let clean = clean_response(raw, Some("tell_joke"));
        assert_eq!(clean, "Why did the bicycle fall over?");
    }
}
