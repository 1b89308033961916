//! Karaoke text track support
//!
//! The lyric text track is carried as cue-per-line WebVTT. This module holds
//! the timestamp helpers; the WebVTT codec itself lives in [`webvtt`] and
//! the extraction of cue samples from the container's `mov_text` track in
//! [`track`].

pub mod track;
pub mod webvtt;

pub use webvtt::{DecodeReport, KaraokeVtt};

/// A cue that could not be parsed; reported, never fatal
#[derive(Debug, Clone, PartialEq)]
pub struct CueParseError {
    /// Index of the cue block within the file
    pub cue: usize,
    pub reason: String,
}

/// Format a karaoke timestamp as `HH:MM:SS.mmm`
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

/// Parse a `HH:MM:SS.mmm` or `MM:SS.mmm` timestamp into seconds
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let (clock, millis) = s.split_once('.')?;
    if millis.len() != 3 {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;

    let parts: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds): (u64, u64, u64) = match parts.len() {
        2 => (0, parts[0].parse().ok()?, parts[1].parse().ok()?),
        3 => (
            parts[0].parse().ok()?,
            parts[1].parse().ok()?,
            parts[2].parse().ok()?,
        ),
        _ => return None,
    };
    if minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some((hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + millis) as f64 / 1000.0)
}
