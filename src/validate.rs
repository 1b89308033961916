//! Post-save verification
//!
//! After a save is published the writer re-opens the result and checks that
//! the edit did what it claimed: the file still parses, the karaoke payload
//! round-trips, chunk offsets still point at the same media bytes the source
//! file held, every audio track kept its offset table and the stem profile
//! is consistent with the source list. Any failure triggers the saver's
//! `.bak` restore path.

use crate::boxes::{self, freeform, tables, BoxNode, BoxType};
use crate::error::{Error, Result};
use crate::payload::{self, KaraokeTags, StemManifest};
use crate::song::{Song, StemRole};
use tracing::debug;

/// Chunks sampled for the byte-identity check
const CHUNK_SAMPLES: usize = 16;

/// Line time agreement required, seconds (one millisecond)
const LINE_TIME_TOLERANCE: f64 = 1e-3;

/// Verify a saved file against the pre-save bytes and the song that was
/// written
pub fn verify_saved(original: &[u8], saved: &[u8], song: &Song) -> Result<()> {
    let saved_roots = boxes::parse(saved)?;
    let saved_moov = root_moov(&saved_roots)?;

    verify_payload(saved_moov, song)?;
    verify_stem_box(saved_moov, song)?;

    let original_roots = boxes::parse(original)?;
    let original_moov = root_moov(&original_roots)?;
    verify_chunks(original, saved, original_moov, saved_moov)?;

    debug!("post-save verification passed");
    Ok(())
}

fn root_moov<'t, 'a>(roots: &'t [BoxNode<'a>]) -> Result<&'t BoxNode<'a>> {
    roots
        .iter()
        .find(|n| n.kind == BoxType::MOOV)
        .ok_or_else(|| Error::malformed("moov", 0, "file has no moov box".to_string()))
}

/// The payload must decode and agree with what was written
fn verify_payload(moov: &BoxNode<'_>, song: &Song) -> Result<()> {
    let ilst = moov
        .find(&[BoxType::UDTA, BoxType::META, BoxType::ILST])
        .ok_or_else(|| Error::payload("saved file has no ilst"))?;
    let item = freeform::find_item(ilst, payload::STEMS_NAMESPACE, payload::ITEM_KAID)
        .ok_or_else(|| Error::payload("saved file has no kaid item"))?;
    let tags = KaraokeTags::from_json(item.value_str()?.as_bytes())?;

    if tags.lines.len() != song.lines.len() {
        return Err(Error::payload(format!(
            "saved kaid has {} lines, expected {}",
            tags.lines.len(),
            song.lines.len()
        )));
    }
    if let (Some(written), Some(expected)) = (tags.lines.first(), song.lines.first()) {
        check_line_time("first", written.start, expected.start_sec)?;
    }
    if let (Some(written), Some(expected)) = (tags.lines.last(), song.lines.last()) {
        check_line_time("last", written.end, expected.end_sec)?;
    }
    Ok(())
}

fn check_line_time(which: &str, written: f64, expected: f64) -> Result<()> {
    if (written - expected).abs() > LINE_TIME_TOLERANCE {
        return Err(Error::payload(format!(
            "{} line time drifted: wrote {}, file holds {}",
            which, expected, written
        )));
    }
    Ok(())
}

/// The stem profile must exist and match the source list minus the mixdown
fn verify_stem_box(moov: &BoxNode<'_>, song: &Song) -> Result<()> {
    let stem = moov
        .find(&[BoxType::UDTA, BoxType::STEM])
        .and_then(|n| n.leaf_data())
        .ok_or_else(|| Error::payload("saved file has no stem box"))?;
    let manifest = StemManifest::from_json(stem)?;
    let expected = song
        .audio
        .sources
        .iter()
        .filter(|s| s.role != StemRole::Mixdown)
        .count();
    if manifest.stems.len() != expected {
        return Err(Error::payload(format!(
            "stem box lists {} stems, source list implies {}",
            manifest.stems.len(),
            expected
        )));
    }
    Ok(())
}

/// Media chunks must be byte-identical between source and result
fn verify_chunks(
    original: &[u8],
    saved: &[u8],
    original_moov: &BoxNode<'_>,
    saved_moov: &BoxNode<'_>,
) -> Result<()> {
    let original_tracks = tables::read_tracks(original_moov)?;
    let saved_tracks = tables::read_tracks(saved_moov)?;

    for track in &saved_tracks {
        if track.handler.is_audio() && track.table.chunk_offsets.is_empty() {
            return Err(Error::payload(format!(
                "audio track {} lost its chunk offset table",
                track.track_id
            )));
        }
    }

    // Every (track, chunk) pair with its offset in both files.
    let mut pairs: Vec<(u32, usize, u64, u64)> = Vec::new();
    for saved_track in &saved_tracks {
        let original_track = match original_tracks
            .iter()
            .find(|t| t.track_id == saved_track.track_id)
        {
            Some(track) => track,
            None => continue,
        };
        if original_track.table.chunk_offsets.len() != saved_track.table.chunk_offsets.len() {
            return Err(Error::payload(format!(
                "track {} chunk count changed from {} to {}",
                saved_track.track_id,
                original_track.table.chunk_offsets.len(),
                saved_track.table.chunk_offsets.len()
            )));
        }
        for (chunk, (&old_offset, &new_offset)) in original_track
            .table
            .chunk_offsets
            .iter()
            .zip(saved_track.table.chunk_offsets.iter())
            .enumerate()
        {
            pairs.push((saved_track.track_id, chunk, old_offset, new_offset));
        }
    }

    for &(track, chunk, old_offset, new_offset) in sample_pairs(&pairs, saved.len() as u64) {
        if !chunk_bytes_match(original, old_offset, saved, new_offset) {
            return Err(Error::ChunkOffsetMismatch { track, chunk });
        }
    }
    Ok(())
}

/// Pick up to [`CHUNK_SAMPLES`] pairs with a deterministic LCG so a failed
/// validation reproduces
fn sample_pairs(pairs: &[(u32, usize, u64, u64)], seed: u64) -> Vec<&(u32, usize, u64, u64)> {
    if pairs.len() <= CHUNK_SAMPLES {
        return pairs.iter().collect();
    }
    let mut state = seed | 1;
    let mut picked = Vec::with_capacity(CHUNK_SAMPLES);
    for _ in 0..CHUNK_SAMPLES {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let index = ((state >> 33) as usize) % pairs.len();
        picked.push(&pairs[index]);
    }
    picked
}

/// Compare the first 8 bytes at each offset (shorter near end of file)
fn chunk_bytes_match(original: &[u8], old_offset: u64, saved: &[u8], new_offset: u64) -> bool {
    let old_offset = old_offset as usize;
    let new_offset = new_offset as usize;
    if old_offset > original.len() || new_offset > saved.len() {
        return false;
    }
    let len = 8usize
        .min(original.len() - old_offset)
        .min(saved.len() - new_offset);
    original[old_offset..old_offset + len] == saved[new_offset..new_offset + len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_pairs_is_deterministic_and_bounded() {
        let pairs: Vec<(u32, usize, u64, u64)> =
            (0..100).map(|i| (1, i, i as u64, i as u64)).collect();
        let a = sample_pairs(&pairs, 12345);
        let b = sample_pairs(&pairs, 12345);
        assert_eq!(a.len(), CHUNK_SAMPLES);
        assert_eq!(a, b);

        let few: Vec<(u32, usize, u64, u64)> = pairs[..5].to_vec();
        assert_eq!(sample_pairs(&few, 1).len(), 5);
    }

    #[test]
    fn test_chunk_bytes_match() {
        let original = b"0123456789abcdef";
        let saved = b"XX0123456789abcdef";
        assert!(chunk_bytes_match(original, 0, saved, 2));
        assert!(!chunk_bytes_match(original, 1, saved, 2));
        // offsets past the end never match
        assert!(!chunk_bytes_match(original, 99, saved, 2));
        // short tail comparison near end of file
        assert!(chunk_bytes_match(original, 12, saved, 14));
    }

    #[test]
    fn test_verify_stem_box_counts() {
        use crate::song::StemSource;

        let mut song = Song::default();
        song.audio.sources = vec![
            StemSource {
                track: 0,
                id: "m".to_string(),
                role: StemRole::Mixdown,
            },
            StemSource {
                track: 1,
                id: "v".to_string(),
                role: StemRole::Vocals,
            },
        ];

        let manifest = StemManifest::default_for(&song.audio.sources);
        let stem = BoxNode::leaf(BoxType::STEM, manifest.to_json().unwrap());
        let udta = BoxNode::container(BoxType::UDTA, vec![stem]);
        let moov = BoxNode::container(BoxType::MOOV, vec![udta]);
        assert!(verify_stem_box(&moov, &song).is_ok());

        song.audio.sources.push(StemSource {
            track: 2,
            id: "d".to_string(),
            role: StemRole::Drums,
        });
        assert!(verify_stem_box(&moov, &song).is_err());
    }
}
