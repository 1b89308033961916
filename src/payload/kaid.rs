//! `kaid` karaoke JSON document
//!
//! The primary metadata payload, stored as UTF-8 JSON in the freeform item
//! `com.stems:kaid`. Line times are absolute logical seconds; word timings
//! are stored relative to their line start. Serialisation is deterministic
//! (struct field order is the canonical key order) so repeated saves produce
//! minimal byte diffs, and unknown keys survive a round trip through the
//! flattened extra maps.

use crate::error::Result;
use crate::song::{
    AudioConfig, LyricLine, MixPreset, Singer, Song, StemProfile, StemRole, StemSource,
    TimingConfig, TimingReference, Word,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Schema version this crate writes
pub const KAID_VERSION: &str = "1.0";

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Top-level `kaid` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KaraokeTags {
    pub stems_karaoke_version: String,
    pub audio: AudioSection,
    pub timing: TimingSection,
    pub singers: Vec<SingerEntry>,
    pub lines: Vec<LineEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSection {
    pub profile: StemProfile,
    pub encoder_delay_samples: u32,
    pub sources: Vec<SourceEntry>,
    pub presets: Vec<PresetEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub track: u32,
    pub id: String,
    pub role: StemRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub id: String,
    pub levels: BTreeMap<StemRole, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSection {
    pub reference: TimingReference,
    pub offset_sec: f32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingerEntry {
    pub id: String,
    pub name: String,
    pub guide_track: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineEntry {
    pub singer_id: String,
    /// Absolute logical start, seconds
    pub start: f64,
    /// Absolute logical end, seconds
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    /// Per-word `[start, end]` pairs relative to `start`
    pub word_timing: Vec<(f64, f64)>,
}

impl KaraokeTags {
    /// Build the document from a song
    pub fn from_song(song: &Song) -> Self {
        KaraokeTags {
            stems_karaoke_version: KAID_VERSION.to_string(),
            audio: AudioSection {
                profile: song.audio.profile.clone(),
                encoder_delay_samples: song.audio.encoder_delay_samples,
                sources: song
                    .audio
                    .sources
                    .iter()
                    .map(|s| SourceEntry {
                        track: s.track,
                        id: s.id.clone(),
                        role: s.role.clone(),
                    })
                    .collect(),
                presets: song
                    .audio
                    .presets
                    .iter()
                    .map(|p| PresetEntry {
                        id: p.id.clone(),
                        levels: p.levels.clone(),
                    })
                    .collect(),
                extra: song.audio.extra.clone(),
            },
            timing: TimingSection {
                reference: song.timing.reference.clone(),
                offset_sec: song.timing.offset_sec,
                extra: song.timing.extra.clone(),
            },
            singers: song
                .singers
                .iter()
                .map(|s| SingerEntry {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    guide_track: s.guide_track,
                })
                .collect(),
            lines: song.lines.iter().map(LineEntry::from_line).collect(),
            extra: song.extra.clone(),
        }
    }

    /// Fold the document into a song, replacing the fields it carries
    pub fn merge_into_song(self, song: &mut Song) {
        song.audio = AudioConfig {
            profile: self.audio.profile,
            encoder_delay_samples: self.audio.encoder_delay_samples,
            sources: self
                .audio
                .sources
                .into_iter()
                .map(|s| StemSource {
                    track: s.track,
                    id: s.id,
                    role: s.role,
                })
                .collect(),
            presets: self
                .audio
                .presets
                .into_iter()
                .map(|p| MixPreset {
                    id: p.id,
                    levels: p.levels,
                })
                .collect(),
            extra: self.audio.extra,
        };
        song.timing = TimingConfig {
            reference: self.timing.reference,
            offset_sec: self.timing.offset_sec,
            extra: self.timing.extra,
        };
        song.singers = self
            .singers
            .into_iter()
            .map(|s| Singer {
                id: s.id,
                name: s.name,
                guide_track: s.guide_track,
            })
            .collect();
        song.lines = self.lines.into_iter().map(LineEntry::into_line).collect();
        song.extra = self.extra;
    }

    /// Serialise to canonical JSON bytes
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl LineEntry {
    fn from_line(line: &LyricLine) -> Self {
        LineEntry {
            singer_id: line.singer_id.clone(),
            start: line.start_sec,
            end: line.end_sec,
            text: line.text.clone(),
            disabled: line.disabled,
            word_timing: line
                .words
                .iter()
                .map(|w| (w.start_sec - line.start_sec, w.end_sec - line.start_sec))
                .collect(),
        }
    }

    /// Rebuild a domain line; word text comes from splitting the line text
    /// on whitespace, paired positionally with the stored timing
    fn into_line(self) -> LyricLine {
        let words = self
            .text
            .split_whitespace()
            .zip(self.word_timing.iter())
            .map(|(token, &(rel_start, rel_end))| Word {
                start_sec: self.start + rel_start,
                end_sec: self.start + rel_end,
                text: token.to_string(),
            })
            .collect();
        LyricLine {
            singer_id: self.singer_id,
            start_sec: self.start,
            end_sec: self.end,
            text: self.text,
            disabled: self.disabled,
            words,
        }
    }
}
