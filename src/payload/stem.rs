//! Traktor NI `stem` profile
//!
//! The `moov/udta/stem` box carries raw JSON consumed by the Native
//! Instruments stem ecosystem (Traktor and friends): mastering DSP
//! parameters for the stem-to-mixdown sum and a colour label per stem.
//! The crate ships a fixed default profile; the stem order must match the
//! `kaid` source order with the mixdown excluded.

use crate::error::Result;
use crate::song::{StemRole, StemSource};
use serde::{Deserialize, Serialize};

/// Profile JSON written under `moov/udta/stem`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemManifest {
    pub version: u32,
    pub mastering_dsp: MasteringDsp,
    pub stems: Vec<StemEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteringDsp {
    pub compressor: Compressor,
    pub limiter: Limiter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compressor {
    pub enabled: bool,
    pub ratio: f64,
    pub attack: f64,
    pub release: f64,
    pub threshold: f64,
    pub input_gain: f64,
    pub output_gain: f64,
    pub hp_cutoff: f64,
    pub dry_wet: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limiter {
    pub enabled: bool,
    pub threshold: f64,
    pub ceiling: f64,
    pub release: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemEntry {
    pub color: String,
    pub name: String,
}

impl Default for MasteringDsp {
    fn default() -> Self {
        MasteringDsp {
            compressor: Compressor {
                enabled: false,
                ratio: 3.0,
                attack: 0.001,
                release: 0.3,
                threshold: -8.0,
                input_gain: 0.0,
                output_gain: 0.0,
                hp_cutoff: 20.0,
                dry_wet: 100.0,
            },
            limiter: Limiter {
                enabled: false,
                threshold: 0.0,
                ceiling: -0.3,
                release: 0.05,
            },
        }
    }
}

impl StemManifest {
    /// Build the default profile for a source list. Stems follow the source
    /// order with the mixdown excluded.
    pub fn default_for(sources: &[StemSource]) -> Self {
        let stems = sources
            .iter()
            .filter(|s| s.role != StemRole::Mixdown)
            .map(|s| StemEntry {
                color: role_color(&s.role).to_string(),
                name: role_display(&s.role),
            })
            .collect();
        StemManifest {
            version: 1,
            mastering_dsp: MasteringDsp::default(),
            stems,
        }
    }

    /// Whether the manifest's stem list is consistent with a source list
    /// (count and order, mixdown excluded)
    pub fn matches_sources(&self, sources: &[StemSource]) -> bool {
        let roles: Vec<&StemRole> = sources
            .iter()
            .filter(|s| s.role != StemRole::Mixdown)
            .map(|s| &s.role)
            .collect();
        self.stems.len() == roles.len()
            && self
                .stems
                .iter()
                .zip(roles.iter())
                .all(|(entry, role)| entry.name == role_display(role))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn role_display(role: &StemRole) -> String {
    let s = role.as_str();
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn role_color(role: &StemRole) -> &'static str {
    match role {
        StemRole::Drums => "#FF4C87",
        StemRole::Bass => "#4C9BFF",
        StemRole::Other => "#4CD97B",
        StemRole::Vocals => "#FFD24C",
        StemRole::Music => "#B04CFF",
        _ => "#AAAAAA",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stems4_sources() -> Vec<StemSource> {
        [
            (0, StemRole::Mixdown),
            (1, StemRole::Drums),
            (2, StemRole::Bass),
            (3, StemRole::Other),
            (4, StemRole::Vocals),
        ]
        .into_iter()
        .map(|(track, role)| StemSource {
            track,
            id: format!("t{}", track),
            role,
        })
        .collect()
    }

    #[test]
    fn test_default_excludes_mixdown() {
        let manifest = StemManifest::default_for(&stems4_sources());
        assert_eq!(manifest.stems.len(), 4);
        assert_eq!(manifest.stems[0].name, "Drums");
        assert_eq!(manifest.stems[3].name, "Vocals");
    }

    #[test]
    fn test_matches_sources() {
        let sources = stems4_sources();
        let manifest = StemManifest::default_for(&sources);
        assert!(manifest.matches_sources(&sources));

        let mut shuffled = sources.clone();
        shuffled.swap(1, 4);
        assert!(!manifest.matches_sources(&shuffled));
    }

    #[test]
    fn test_json_roundtrip() {
        let manifest = StemManifest::default_for(&stems4_sources());
        let parsed = StemManifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }
}
