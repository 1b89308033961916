//! Song domain model
//!
//! A [`Song`] is the unified in-memory value a loaded stem container
//! decodes into and a save serialises from: the stem layout, timing
//! configuration, singers, lyric lines with per-word timing, the optional
//! pitch and onset side-channels and the iTunes metadata. The container and
//! payload codecs live elsewhere; this module owns the semantic invariants
//! (`validate`) that must hold before a save is allowed to touch the file.

use crate::error::{Error, Result};
use crate::payload::itunes::ItunesMetadata;
use crate::payload::pitch::PitchCurve;
use crate::timing::{EncoderDelay, DEFAULT_SAMPLE_RATE};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Overlap tolerance when comparing line boundaries, in seconds
const TIME_EPSILON: f64 = 1e-9;

macro_rules! string_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident => $text:literal,)+ } fallback $fallback:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant,)+
            /// Any value this crate does not recognise, carried through
            $fallback(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::$fallback(s) => s.as_str(),
                }
            }

            pub fn from_str(s: &str) -> Self {
                match s {
                    $($text => Self::$variant,)+
                    other => Self::$fallback(other.to_string()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                struct V;
                impl<'de> Visitor<'de> for V {
                    type Value = $name;
                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "a string")
                    }
                    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<$name, E> {
                        Ok($name::from_str(v))
                    }
                }
                deserializer.deserialize_str(V)
            }
        }
    };
}

string_enum! {
    /// Role set of the container
    StemProfile {
        Stems2 => "stems-2",
        Stems4 => "stems-4",
    } fallback Other
}

impl StemProfile {
    /// Audio tracks a container of this profile carries (mixdown included)
    pub fn track_count(&self) -> Option<usize> {
        match self {
            Self::Stems2 => Some(3),
            Self::Stems4 => Some(5),
            Self::Other(_) => None,
        }
    }
}

string_enum! {
    /// Role of one audio source track
    StemRole {
        Mixdown => "mixdown",
        Drums => "drums",
        Bass => "bass",
        Other => "other",
        Vocals => "vocals",
        Music => "music",
    } fallback Custom
}

string_enum! {
    /// Which track the lyric timeline is aligned against
    TimingReference {
        AlignedToVocals => "aligned_to_vocals",
        AlignedToMixdown => "aligned_to_mixdown",
    } fallback Other
}

/// One audio source track inside the container
#[derive(Debug, Clone, PartialEq)]
pub struct StemSource {
    /// Audio track index in the container, mixdown first
    pub track: u32,
    pub id: String,
    pub role: StemRole,
}

/// A named per-role level map in decibels
#[derive(Debug, Clone, PartialEq)]
pub struct MixPreset {
    pub id: String,
    pub levels: BTreeMap<StemRole, f32>,
}

/// Stem layout and encoder parameters of the container
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub profile: StemProfile,
    /// Priming samples the encoder inserted; authority for all wire offsets
    pub encoder_delay_samples: u32,
    pub sources: Vec<StemSource>,
    pub presets: Vec<MixPreset>,
    /// Unknown `kaid.audio` keys, preserved across round trips
    pub extra: Map<String, Value>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            profile: StemProfile::Stems4,
            encoder_delay_samples: crate::timing::AAC_PRIMING_SAMPLES_44K,
            sources: Vec::new(),
            presets: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Timeline alignment of the lyric payload
#[derive(Debug, Clone, PartialEq)]
pub struct TimingConfig {
    pub reference: TimingReference,
    pub offset_sec: f32,
    /// Unknown `kaid.timing` keys, preserved across round trips
    pub extra: Map<String, Value>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            reference: TimingReference::AlignedToVocals,
            offset_sec: 0.0,
            extra: Map::new(),
        }
    }
}

/// One singer voice
#[derive(Debug, Clone, PartialEq)]
pub struct Singer {
    pub id: String,
    pub name: String,
    /// Audio track index of this singer's guide vocals
    pub guide_track: u32,
}

/// One timed word within a line, absolute seconds
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

/// One lyric line
#[derive(Debug, Clone, PartialEq)]
pub struct LyricLine {
    pub singer_id: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    /// Backup-vocal lines are carried but not scored
    pub disabled: bool,
    pub words: Vec<Word>,
}

impl LyricLine {
    pub fn duration_sec(&self) -> f64 {
        (self.end_sec - self.start_sec).max(0.0)
    }
}

/// The unified in-memory representation of a stem karaoke file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Song {
    pub audio: AudioConfig,
    pub timing: TimingConfig,
    pub singers: Vec<Singer>,
    pub lines: Vec<LyricLine>,
    pub vocal_pitch: Option<PitchCurve>,
    /// Note onset timestamps in logical seconds, ascending
    pub onsets: Vec<f64>,
    pub itunes: ItunesMetadata,
    /// Media duration from `mvhd`, if the song came from a container
    pub duration_sec: Option<f64>,
    /// Unknown top-level `kaid` keys, preserved across round trips
    pub extra: Map<String, Value>,
}

impl Song {
    /// The encoder delay all wire timestamps are shifted by
    pub fn delay(&self) -> EncoderDelay {
        EncoderDelay::new(self.audio.encoder_delay_samples, DEFAULT_SAMPLE_RATE)
    }

    /// Check the semantic invariants a save requires.
    ///
    /// Lines must not run backwards, words must lie within their line,
    /// line starts must be monotone per singer, two lines of the *same*
    /// singer must not overlap (lines of different singers may), and no
    /// timestamp may exceed the media duration when one is known.
    pub fn validate(&self) -> Result<()> {
        for (index, line) in self.lines.iter().enumerate() {
            if line.end_sec < line.start_sec {
                return Err(Error::NonMonotonicTiming {
                    singer_id: line.singer_id.clone(),
                    line: index,
                });
            }
            for (w, word) in line.words.iter().enumerate() {
                let inside = word.start_sec >= line.start_sec - TIME_EPSILON
                    && word.end_sec <= line.end_sec + TIME_EPSILON
                    && word.start_sec <= word.end_sec + TIME_EPSILON;
                if !inside {
                    return Err(Error::WordOutOfLine { line: index, word: w });
                }
            }
            if let Some(duration) = self.duration_sec {
                if line.end_sec > duration + TIME_EPSILON {
                    return Err(Error::TimestampBeyondDuration {
                        timestamp_sec: line.end_sec,
                        duration_sec: duration,
                    });
                }
            }
        }

        let mut last_per_singer: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();
        for (index, line) in self.lines.iter().enumerate() {
            if let Some(&prev) = last_per_singer.get(line.singer_id.as_str()) {
                let prev_line = &self.lines[prev];
                if line.start_sec < prev_line.start_sec - TIME_EPSILON {
                    return Err(Error::NonMonotonicTiming {
                        singer_id: line.singer_id.clone(),
                        line: index,
                    });
                }
                if line.start_sec < prev_line.end_sec - TIME_EPSILON {
                    return Err(Error::OverlappingLines {
                        singer_id: line.singer_id.clone(),
                        first: prev,
                        second: index,
                    });
                }
            }
            last_per_singer.insert(line.singer_id.as_str(), index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(singer: &str, start: f64, end: f64) -> LyricLine {
        LyricLine {
            singer_id: singer.to_string(),
            start_sec: start,
            end_sec: end,
            text: "la".to_string(),
            disabled: false,
            words: Vec::new(),
        }
    }

    #[test]
    fn test_role_strings_roundtrip() {
        for role in [
            StemRole::Mixdown,
            StemRole::Drums,
            StemRole::Bass,
            StemRole::Other,
            StemRole::Vocals,
            StemRole::Music,
        ] {
            assert_eq!(StemRole::from_str(role.as_str()), role);
        }
        assert_eq!(
            StemRole::from_str("sidechain"),
            StemRole::Custom("sidechain".to_string())
        );
    }

    #[test]
    fn test_profile_serde() {
        let json = serde_json::to_string(&StemProfile::Stems4).unwrap();
        assert_eq!(json, "\"stems-4\"");
        let back: StemProfile = serde_json::from_str("\"stems-9\"").unwrap();
        assert_eq!(back, StemProfile::Other("stems-9".to_string()));
    }

    #[test]
    fn test_validate_accepts_interleaved_singers() {
        let song = Song {
            lines: vec![
                line("A", 0.0, 2.0),
                line("B", 1.0, 3.0), // overlaps A, different singer: fine
                line("A", 2.0, 4.0), // touches previous A line: fine
            ],
            ..Song::default()
        };
        assert!(song.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_same_singer_overlap() {
        let song = Song {
            lines: vec![line("A", 0.0, 2.0), line("A", 1.9, 3.0)],
            ..Song::default()
        };
        match song.validate() {
            Err(Error::OverlappingLines {
                singer_id,
                first,
                second,
            }) => {
                assert_eq!(singer_id, "A");
                assert_eq!((first, second), (0, 1));
            }
            other => panic!("expected OverlappingLines, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_backwards_line() {
        let song = Song {
            lines: vec![line("A", 5.0, 4.0)],
            ..Song::default()
        };
        assert!(matches!(
            song.validate(),
            Err(Error::NonMonotonicTiming { line: 0, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_word_outside_line() {
        let mut bad = line("A", 10.0, 12.0);
        bad.words.push(Word {
            start_sec: 9.0,
            end_sec: 10.5,
            text: "早".to_string(),
        });
        let song = Song {
            lines: vec![bad],
            ..Song::default()
        };
        assert!(matches!(
            song.validate(),
            Err(Error::WordOutOfLine { line: 0, word: 0 })
        ));
    }

    #[test]
    fn test_validate_rejects_timestamp_beyond_duration() {
        let song = Song {
            lines: vec![line("A", 100.0, 200.0)],
            duration_sec: Some(150.0),
            ..Song::default()
        };
        assert!(matches!(
            song.validate(),
            Err(Error::TimestampBeyondDuration { .. })
        ));
    }
}
