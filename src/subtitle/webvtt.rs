//! Karaoke WebVTT codec
//!
//! Each lyric line is one cue. The cue payload opens with a voice tag naming
//! the singer (`<v A>`, or `<v.backup A>` for backup-vocal lines) followed
//! by the words, each bracketed by absolute karaoke timestamps:
//!
//! ```text
//! 00:00:12.370 --> 00:00:15.703
//! <v A><00:00:12.370>hi<00:00:12.670> <00:00:12.770>there<00:00:13.150>
//! ```
//!
//! All emitted timestamps are wire time; decoding removes the encoder delay
//! again and rounds to the millisecond grid the format can carry. Cues with
//! malformed timestamps are dropped and reported, never fatal.

use super::{format_timestamp, parse_timestamp, CueParseError};
use crate::error::{Error, Result};
use crate::song::{LyricLine, Word};
use crate::timing::EncoderDelay;
use tracing::warn;

/// Snap a decoded timestamp back to the millisecond grid
fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Result of decoding a karaoke WebVTT document
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeReport {
    pub lines: Vec<LyricLine>,
    /// Cues dropped because they could not be parsed
    pub dropped: Vec<CueParseError>,
}

/// Cue-per-line karaoke WebVTT reader/writer
pub struct KaraokeVtt;

impl KaraokeVtt {
    /// Render lines as a WebVTT document, shifting every timestamp to wire
    /// time
    pub fn encode(lines: &[LyricLine], delay: &EncoderDelay) -> String {
        let mut out = String::from("WEBVTT\n\n");
        for line in lines {
            out.push_str(&format!(
                "{} --> {}\n",
                format_timestamp(delay.to_wire(line.start_sec)),
                format_timestamp(delay.to_wire(line.end_sec)),
            ));
            if line.disabled {
                out.push_str(&format!("<v.backup {}>", line.singer_id));
            } else {
                out.push_str(&format!("<v {}>", line.singer_id));
            }
            if line.words.is_empty() {
                out.push_str(&line.text);
            } else {
                for (i, word) in line.words.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    out.push_str(&format!(
                        "<{}>{}<{}>",
                        format_timestamp(delay.to_wire(word.start_sec)),
                        word.text,
                        format_timestamp(delay.to_wire(word.end_sec)),
                    ));
                }
            }
            out.push_str("\n\n");
        }
        out
    }

    /// Parse a WebVTT document back into lyric lines, removing the encoder
    /// delay from every timestamp
    pub fn decode(content: &str, delay: &EncoderDelay) -> Result<DecodeReport> {
        let mut input = content.lines();
        match input.next() {
            Some(first) if first.trim_start_matches('\u{feff}').starts_with("WEBVTT") => {}
            _ => return Err(Error::payload("missing WEBVTT header")),
        }

        // Remainder of the header block, up to the first blank line
        let mut rest: Vec<&str> = input.collect();
        while let Some(first) = rest.first() {
            let blank = first.trim().is_empty();
            rest.remove(0);
            if blank {
                break;
            }
        }

        let mut lines = Vec::new();
        let mut dropped = Vec::new();
        for (index, block) in cue_blocks(&rest).into_iter().enumerate() {
            match parse_cue(&block, delay) {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {}
                Err(reason) => {
                    warn!(cue = index, %reason, "dropping malformed cue");
                    dropped.push(CueParseError { cue: index, reason });
                }
            }
        }
        Ok(DecodeReport { lines, dropped })
    }
}

/// Group the body into blocks separated by blank lines
fn cue_blocks<'t>(body: &[&'t str]) -> Vec<Vec<&'t str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for &line in body {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn parse_cue(block: &[&str], delay: &EncoderDelay) -> std::result::Result<Option<LyricLine>, String> {
    // NOTE comments are not cues
    if block
        .first()
        .map(|l| l.starts_with("NOTE"))
        .unwrap_or(true)
    {
        return Ok(None);
    }

    // The timing line is the first or, after a cue identifier, second line
    let timing_at = block
        .iter()
        .position(|l| l.contains("-->"))
        .ok_or_else(|| "no timing line".to_string())?;

    let mut timing = block[timing_at].split_whitespace();
    let start_text = timing.next().ok_or_else(|| "empty timing line".to_string())?;
    match timing.next() {
        Some("-->") => {}
        _ => return Err("timing line missing arrow".to_string()),
    }
    let end_text = timing.next().ok_or_else(|| "missing end timestamp".to_string())?;

    let start = parse_timestamp(start_text)
        .ok_or_else(|| format!("bad start timestamp '{}'", start_text))?;
    let end =
        parse_timestamp(end_text).ok_or_else(|| format!("bad end timestamp '{}'", end_text))?;
    if end < start {
        return Err(format!("cue ends before it starts ({} < {})", end, start));
    }

    let payload = block[timing_at + 1..].join("\n");
    let (voice, backup, body) = split_voice_tag(&payload);
    let (words, plain) = parse_karaoke_body(&body, end, delay)?;

    let text = if words.is_empty() {
        plain
    } else {
        words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };

    Ok(Some(LyricLine {
        singer_id: voice.unwrap_or_default(),
        start_sec: round_ms(delay.to_logical(start)),
        end_sec: round_ms(delay.to_logical(end)),
        text,
        disabled: backup,
        words,
    }))
}

/// Split a leading `<v ...>` or `<v.class... ...>` tag off the payload
fn split_voice_tag(payload: &str) -> (Option<String>, bool, String) {
    let rest = match payload.strip_prefix("<v") {
        Some(rest) => rest,
        None => return (None, false, payload.to_string()),
    };
    let close = match rest.find('>') {
        Some(close) => close,
        None => return (None, false, payload.to_string()),
    };
    let tag = &rest[..close];
    let body = rest[close + 1..].to_string();

    let (classes, name) = match tag.find(' ') {
        Some(space) => (&tag[..space], tag[space + 1..].trim()),
        None => (tag, ""),
    };
    let backup = classes.split('.').any(|c| c == "backup");
    let voice = if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    };
    (voice, backup, body)
}

enum Token {
    Time(f64),
    Text(String),
}

/// Scan a cue body into timestamp tags and text runs; non-timestamp markup
/// (`</v>`, `<c>` spans) is stripped
fn scan_tokens(body: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find('<') {
        if !rest[..open].is_empty() {
            tokens.push(Token::Text(rest[..open].to_string()));
        }
        let close = rest[open..]
            .find('>')
            .map(|i| open + i)
            .ok_or_else(|| "unterminated tag".to_string())?;
        let inner = &rest[open + 1..close];
        if let Some(time) = parse_timestamp(inner) {
            tokens.push(Token::Time(time));
        }
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

/// Assemble `<start>text<end>` groups into words. Returns the words and, for
/// cues without karaoke tags, the plain payload text.
fn parse_karaoke_body(
    body: &str,
    cue_end_wire: f64,
    delay: &EncoderDelay,
) -> std::result::Result<(Vec<Word>, String), String> {
    let tokens = scan_tokens(body)?;

    let mut words: Vec<Word> = Vec::new();
    let mut plain = String::new();
    let mut pending_start: Option<f64> = None;
    let mut pending_text: Option<String> = None;

    for token in tokens {
        match token {
            Token::Time(time) => match (pending_start, pending_text.take()) {
                (Some(start), Some(text)) => {
                    words.push(make_word(start, time, text, delay));
                    pending_start = None;
                }
                _ => pending_start = Some(time),
            },
            Token::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if pending_start.is_some() && pending_text.is_none() {
                    pending_text = Some(trimmed.to_string());
                } else {
                    if !plain.is_empty() {
                        plain.push(' ');
                    }
                    plain.push_str(trimmed);
                }
            }
        }
    }

    // A trailing word without an explicit end tag closes at the cue end
    if let (Some(start), Some(text)) = (pending_start, pending_text) {
        words.push(make_word(start, cue_end_wire, text, delay));
    }

    Ok((words, plain))
}

fn make_word(start_wire: f64, end_wire: f64, text: String, delay: &EncoderDelay) -> Word {
    Word {
        start_sec: round_ms(delay.to_logical(start_wire)),
        end_sec: round_ms(delay.to_logical(end_wire)),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(start: f64, end: f64, text: &str) -> Word {
        Word {
            start_sec: start,
            end_sec: end,
            text: text.to_string(),
        }
    }

    fn karaoke_line() -> LyricLine {
        LyricLine {
            singer_id: "A".to_string(),
            start_sec: 12.345,
            end_sec: 15.678,
            text: "hi there".to_string(),
            disabled: false,
            words: vec![word(12.345, 12.645, "hi"), word(12.745, 13.15, "there")],
        }
    }

    #[test]
    fn test_roundtrip_exact() {
        let lines = vec![karaoke_line(), {
            let mut backup = karaoke_line();
            backup.singer_id = "B".to_string();
            backup.disabled = true;
            backup
        }];
        for samples in [0u32, 1105, 4096] {
            let delay = EncoderDelay::new(samples, 44_100);
            let report =
                KaraokeVtt::decode(&KaraokeVtt::encode(&lines, &delay), &delay).unwrap();
            assert!(report.dropped.is_empty());
            assert_eq!(report.lines, lines, "delay samples = {}", samples);
        }
    }

    #[test]
    fn test_encode_applies_delay() {
        let delay = EncoderDelay::new(4410, 44_100); // 100 ms
        let text = KaraokeVtt::encode(&[karaoke_line()], &delay);
        assert!(text.contains("00:00:12.445 --> 00:00:15.778"));
        assert!(text.contains("<00:00:12.445>hi<00:00:12.745>"));
    }

    #[test]
    fn test_backup_class() {
        let mut line = karaoke_line();
        line.disabled = true;
        let delay = EncoderDelay::none();
        let text = KaraokeVtt::encode(std::slice::from_ref(&line), &delay);
        assert!(text.contains("<v.backup A>"));
        let report = KaraokeVtt::decode(&text, &delay).unwrap();
        assert!(report.lines[0].disabled);
        assert_eq!(report.lines[0].singer_id, "A");
    }

    #[test]
    fn test_plain_cue_without_word_tags() {
        let content = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\n<v A>plain line\n";
        let report = KaraokeVtt::decode(content, &EncoderDelay::none()).unwrap();
        assert_eq!(report.lines.len(), 1);
        assert_eq!(report.lines[0].text, "plain line");
        assert!(report.lines[0].words.is_empty());
    }

    #[test]
    fn test_malformed_cue_is_dropped_not_fatal() {
        let content = "WEBVTT\n\n\
            00:00:01.000 --> 00:00:02.000\n<v A>good\n\n\
            garbage --> 00:00:05.000\n<v A>bad\n\n\
            00:00:06.000 --> 00:00:07.000\n<v B>also good\n";
        let report = KaraokeVtt::decode(content, &EncoderDelay::none()).unwrap();
        assert_eq!(report.lines.len(), 2);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].cue, 1);
    }

    #[test]
    fn test_missing_header_is_error() {
        assert!(KaraokeVtt::decode("00:00:01.000 --> 00:00:02.000\nhi", &EncoderDelay::none())
            .is_err());
    }

    #[test]
    fn test_cue_identifier_is_skipped() {
        let content = "WEBVTT\n\nline-1\n00:00:01.000 --> 00:00:02.000\n<v A>hi\n";
        let report = KaraokeVtt::decode(content, &EncoderDelay::none()).unwrap();
        assert_eq!(report.lines.len(), 1);
        assert_eq!(report.lines[0].singer_id, "A");
    }

    #[test]
    fn test_note_blocks_ignored() {
        let content = "WEBVTT\n\nNOTE generated for testing\n\n\
            00:00:01.000 --> 00:00:02.000\n<v A>hi\n";
        let report = KaraokeVtt::decode(content, &EncoderDelay::none()).unwrap();
        assert_eq!(report.lines.len(), 1);
        assert!(report.dropped.is_empty());
    }

    #[test]
    fn test_word_without_end_tag_closes_at_cue_end() {
        let content = "WEBVTT\n\n00:00:01.000 --> 00:00:03.000\n<v A><00:00:01.000>solo\n";
        let report = KaraokeVtt::decode(content, &EncoderDelay::none()).unwrap();
        let line = &report.lines[0];
        assert_eq!(line.words.len(), 1);
        assert!((line.words[0].end_sec - 3.0).abs() < 1e-9);
    }
}
