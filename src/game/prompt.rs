//! Prompt construction and response parsing.
//!
//! The system prompt is a fixed template with `{{color}}` substituted. Two
//! schemas are supported: a bare-SAN reply and a JSON reply carrying
//! `{"move", "dialogue"}`. Response parsing tries JSON first and falls back
//! to scanning whitespace tokens for something SAN-shaped.

use serde::Deserialize;

use crate::types::Color;

/// Which reply format the system prompt requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSchema {
    /// Reply with nothing but the SAN move.
    BareSan,
    /// Reply with a JSON object `{"move": "...", "dialogue": "..."}`.
    Json,
}

impl std::str::FromStr for PromptSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "san" | "bare" | "baresan" => Ok(Self::BareSan),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown prompt schema: {other}")),
        }
    }
}

const SYSTEM_TEMPLATE_JSON: &str = "You are a chess grandmaster playing {{color}} in a live arena \
match. On each turn you receive the game so far as PGN move text. Choose the strongest legal move \
for {{color}}.\n\nRespond with a single JSON object and nothing else:\n\
{\"move\": \"<your move in standard algebraic notation>\", \"dialogue\": \"<one short line of \
table talk>\"}\n\nUse standard algebraic notation exactly (examples: e4, Nf3, exd5, O-O, e8=Q). \
Do not add commentary outside the JSON object.";

const SYSTEM_TEMPLATE_SAN: &str = "You are a chess grandmaster playing {{color}} in a live arena \
match. On each turn you receive the game so far as PGN move text. Choose the strongest legal move \
for {{color}}.\n\nRespond with only your move in standard algebraic notation (examples: e4, Nf3, \
exd5, O-O, e8=Q). No commentary, no punctuation, nothing else.";

/// Fixed opening user message, sent before any ply has been played.
pub const GAME_START_MESSAGE: &str = "The game starts now. You have the first move.";

/// Render the system prompt for one side.
#[must_use]
pub fn system_prompt(schema: PromptSchema, color: Color) -> String {
    let template = match schema {
        PromptSchema::Json => SYSTEM_TEMPLATE_JSON,
        PromptSchema::BareSan => SYSTEM_TEMPLATE_SAN,
    };
    template.replace("{{color}}", color.name())
}

/// Render the user message: the PGN so far, or the fixed opening line.
#[must_use]
pub fn user_message(pgn: &str) -> String {
    if pgn.is_empty() {
        GAME_START_MESSAGE.to_string()
    } else {
        pgn.to_string()
    }
}

/// Augment a user message after an illegal attempt.
#[must_use]
pub fn retry_user_message(base: &str, illegal_san: &str) -> String {
    format!(
        "{base}\n\nYour previous reply \"{illegal_san}\" is not a legal move in this position. \
Play a different, legal move."
    )
}

/// A parsed LLM reply: the move text and optional table talk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// The SAN candidate extracted from the reply.
    pub san: String,
    /// Dialogue, present only on the JSON path.
    pub dialogue: Option<String>,
}

/// Extract a move from a raw reply.
///
/// First attempt: parse the first `{...}` substring as JSON and take its
/// `move` (and optional `dialogue`) fields. Fallback: strip residual think
/// tags and surrounding quotes, scan whitespace tokens for one shaped like
/// SAN, else take the last token, then strip trailing punctuation.
#[must_use]
pub fn parse_response(raw: &str) -> ParsedResponse {
    if let Some(parsed) = parse_json_response(raw) {
        return parsed;
    }

    let cleaned = strip_think_blocks(raw);
    let cleaned = cleaned.trim();
    let cleaned = strip_surrounding_quotes(cleaned);

    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    let token = match tokens.as_slice() {
        [] => "",
        [only] => only,
        many => many
            .iter()
            .copied()
            .find(|t| looks_like_san(t))
            .unwrap_or(many[many.len() - 1]),
    };

    ParsedResponse {
        san: strip_trailing_punctuation(token).to_string(),
        dialogue: None,
    }
}

fn parse_json_response(raw: &str) -> Option<ParsedResponse> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&raw[start..=end]).ok()?;
    let san = value.get("move")?.as_str()?.trim().to_string();
    let dialogue = value
        .get("dialogue")
        .and_then(|d| d.as_str())
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    Some(ParsedResponse { san, dialogue })
}

/// Remove `<think>...</think>` blocks left in the content stream. An
/// unterminated opener drops everything after it.
fn strip_think_blocks(raw: &str) -> String {
    let mut out = String::new();
    let mut rest = raw;
    loop {
        match find_ascii_ignore_case(rest, "<think>") {
            Some(open) => {
                out.push_str(&rest[..open]);
                let after = &rest[open + "<think>".len()..];
                match find_ascii_ignore_case(after, "</think>") {
                    Some(close) => rest = &after[close + "</think>".len()..],
                    None => break,
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

fn find_ascii_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

fn strip_surrounding_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn strip_trailing_punctuation(s: &str) -> &str {
    s.trim_end_matches(['.', ',', ';', ':', '!', '?', '"', '\''])
}

/// Token shape test: `^[KQRBNa-h][a-h1-8x=+#]*$` or a castling literal.
fn looks_like_san(token: &str) -> bool {
    if matches!(token, "O-O" | "O-O-O" | "0-0" | "0-0-0") {
        return true;
    }
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !matches!(first, 'K' | 'Q' | 'R' | 'B' | 'N' | 'a'..='h') {
        return false;
    }
    chars.all(|c| matches!(c, 'a'..='h' | '1'..='8' | 'x' | '=' | '+' | '#'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_substitutes_color() {
        let prompt = system_prompt(PromptSchema::Json, Color::Black);
        assert!(prompt.contains("playing Black"));
        assert!(!prompt.contains("{{color}}"));
        assert!(prompt.contains("\"move\""));
        let bare = system_prompt(PromptSchema::BareSan, Color::White);
        assert!(bare.contains("playing White"));
        assert!(!bare.contains("\"move\""));
    }

    #[test]
    fn user_message_uses_pgn_or_start_line() {
        assert_eq!(user_message(""), GAME_START_MESSAGE);
        assert_eq!(user_message("1. e4"), "1. e4");
    }

    #[test]
    fn retry_message_names_the_illegal_san() {
        let msg = retry_user_message("1. e4", "Ke4");
        assert!(msg.starts_with("1. e4"));
        assert!(msg.contains("\"Ke4\""));
        assert!(msg.contains("legal move"));
    }

    #[test]
    fn json_response_wins() {
        let parsed = parse_response(r#"Sure! {"move": "Nf3", "dialogue": "Developing."}"#);
        assert_eq!(parsed.san, "Nf3");
        assert_eq!(parsed.dialogue.as_deref(), Some("Developing."));
    }

    #[test]
    fn json_without_move_falls_through() {
        let parsed = parse_response(r#"{"notmove": "e4"} I play d4"#);
        assert_eq!(parsed.san, "d4");
        assert_eq!(parsed.dialogue, None);
    }

    #[test]
    fn bare_san_passes_through() {
        assert_eq!(parse_response("e4").san, "e4");
        assert_eq!(parse_response("  O-O  ").san, "O-O");
    }

    #[test]
    fn quoted_response_is_unwrapped() {
        assert_eq!(parse_response("\"exd5\"").san, "exd5");
    }

    #[test]
    fn prose_is_scanned_for_a_san_token() {
        let parsed = parse_response("I will play Nf3 and develop");
        assert_eq!(parsed.san, "Nf3");
        let parsed = parse_response("My move is e4.");
        assert_eq!(parsed.san, "e4");
    }

    #[test]
    fn falls_back_to_last_token() {
        let parsed = parse_response("I resign... just kidding: Qxf7#");
        assert_eq!(parsed.san, "Qxf7#");
        let parsed = parse_response("something something mystery");
        assert_eq!(parsed.san, "mystery");
    }

    #[test]
    fn think_blocks_are_removed_in_fallback() {
        let parsed = parse_response("<think>e4 looks bad</think>d4");
        assert_eq!(parsed.san, "d4");
        let parsed = parse_response("<THINK>loud thoughts</THINK> c5");
        assert_eq!(parsed.san, "c5");
    }

    #[test]
    fn trailing_punctuation_is_stripped() {
        assert_eq!(parse_response("e4!").san, "e4");
        assert_eq!(parse_response("e4.").san, "e4");
        assert_eq!(parse_response("play O-O.").san, "O-O");
    }

    #[test]
    fn san_shape_test() {
        assert!(looks_like_san("e4"));
        assert!(looks_like_san("Nf3"));
        assert!(looks_like_san("exd5"));
        assert!(looks_like_san("Qh4#"));
        assert!(looks_like_san("0-0"));
        assert!(!looks_like_san("hello"));
        assert!(!looks_like_san("Z9"));
        assert!(!looks_like_san("64"));
    }
}
