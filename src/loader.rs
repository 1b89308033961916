//! Loader façade
//!
//! [`load`] opens a karaoke file and produces the unified [`Song`] value.
//! `.m4a`/`.mp4` containers are the primary path; legacy `.kai` zip archives
//! are supported read-only for migration. Missing payload items are not
//! errors and default to empty, except a missing `kaid` document on a
//! `.stem.m4a` path, which is.

use crate::boxes::{self, freeform, tables, BoxNode, BoxType};
use crate::error::{Error, Result};
use crate::payload::{self, onsets, KaraokeTags, PitchCurve};
use crate::song::Song;
use crate::subtitle::{track, KaraokeVtt};
use crate::Context;
use byteorder::{BigEndian, ByteOrder};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Open a file and decode it into a [`Song`].
///
/// Dispatches on the file extension: `.m4a` / `.mp4` (stem containers),
/// `.kai` (legacy zip, read-only migration). `.cdg` pairs and anything else
/// yield [`Error::UnsupportedFormat`].
pub fn load(ctx: &Context, path: &Path) -> Result<Song> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "m4a" | "mp4" => load_m4a(ctx, path),
        "kai" => load_kai(path),
        "cdg" => Err(Error::unsupported(
            "cdg pairs are not supported".to_string(),
        )),
        other => Err(Error::unsupported(format!(
            "unrecognised extension '{}'",
            other
        ))),
    }
}

/// Whether a path names a stem container (`*.stem.m4a`)
pub(crate) fn is_stem_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_ascii_lowercase().ends_with(".stem.m4a"))
        .unwrap_or(false)
}

fn load_m4a(ctx: &Context, path: &Path) -> Result<Song> {
    let buf = std::fs::read(path)?;
    let roots = if ctx.strict {
        boxes::parse_strict(&buf)?
    } else {
        boxes::parse(&buf)?
    };
    let moov = roots
        .iter()
        .find(|n| n.kind == BoxType::MOOV)
        .ok_or_else(|| Error::malformed("moov", 0, "file has no moov box".to_string()))?;

    let mut song = Song::default();
    if let Some(mvhd) = moov.child(BoxType::MVHD).and_then(|n| n.leaf_data()) {
        song.duration_sec = parse_mvhd_duration(mvhd);
    }

    let mut has_kaid = false;
    if let Some(ilst) = moov.find(&[BoxType::UDTA, BoxType::META, BoxType::ILST]) {
        song.itunes = payload::ItunesMetadata::read_from_ilst(ilst);

        if let Some(item) = freeform::find_item(ilst, payload::STEMS_NAMESPACE, payload::ITEM_KAID)
        {
            let tags = KaraokeTags::from_json(item.value_str()?.as_bytes())?;
            tags.merge_into_song(&mut song);
            has_kaid = true;
        }
        if let Some(item) = freeform::find_item(ilst, payload::STEMS_NAMESPACE, payload::ITEM_VPCH)
        {
            song.vocal_pitch = Some(PitchCurve::decode(&item.value)?);
        }
        if let Some(item) = freeform::find_item(ilst, payload::STEMS_NAMESPACE, payload::ITEM_KONS)
        {
            song.onsets = onsets::decode(&item.value, &song.delay())?;
        }
    }

    if !has_kaid && is_stem_path(path) {
        return Err(Error::MissingKaraokePayload {
            path: path.display().to_string(),
        });
    }

    // Without kaid lines, fall back to the embedded lyric track.
    if song.lines.is_empty() {
        if let Some(vtt) = extract_lyric_track(&buf, moov)? {
            let report = KaraokeVtt::decode(&vtt, &song.delay())?;
            for error in &report.dropped {
                warn!(cue = error.cue, reason = %error.reason, "cue dropped while loading");
            }
            song.lines = report.lines;
        }
    }

    info!(
        path = %path.display(),
        lines = song.lines.len(),
        singers = song.singers.len(),
        "loaded stem container"
    );
    Ok(song)
}

/// Pull the WebVTT document out of the first text track, if any
fn extract_lyric_track(buf: &[u8], moov: &BoxNode<'_>) -> Result<Option<String>> {
    for trak in moov.children().iter().filter(|c| c.kind == BoxType::TRAK) {
        let info = match tables::read_track(trak) {
            Ok(info) => info,
            Err(e) => {
                debug!(error = %e, "skipping unreadable trak");
                continue;
            }
        };
        if info.handler.is_text() {
            return track::extract_vtt(buf, &info);
        }
    }
    Ok(None)
}

fn parse_mvhd_duration(data: &[u8]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    let (timescale, duration) = if data[0] == 1 {
        if data.len() < 32 {
            return None;
        }
        (
            BigEndian::read_u32(&data[20..24]),
            BigEndian::read_u64(&data[24..32]),
        )
    } else {
        if data.len() < 20 {
            return None;
        }
        (
            BigEndian::read_u32(&data[12..16]),
            BigEndian::read_u32(&data[16..20]) as u64,
        )
    };
    if timescale == 0 {
        None
    } else {
        Some(duration as f64 / timescale as f64)
    }
}

/// Legacy `.kai` archive entry holding the karaoke document
const KAI_SONG_ENTRY: &str = "song.json";
/// Optional pitch stream entry
const KAI_PITCH_ENTRY: &str = "pitch.f32";
/// Optional onset stream entry
const KAI_ONSETS_ENTRY: &str = "onsets.f64";

/// Read a legacy `.kai` zip archive. Migration is read-only; saving always
/// targets `.stem.m4a`.
fn load_kai(path: &Path) -> Result<Song> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::unsupported(format!("not a kai archive: {}", e)))?;

    let mut song = Song::default();

    let tags = match read_entry(&mut archive, KAI_SONG_ENTRY)? {
        Some(bytes) => KaraokeTags::from_json(&bytes)?,
        None => {
            return Err(Error::MissingKaraokePayload {
                path: path.display().to_string(),
            })
        }
    };
    tags.merge_into_song(&mut song);

    if let Some(bytes) = read_entry(&mut archive, KAI_PITCH_ENTRY)? {
        song.vocal_pitch = Some(PitchCurve::decode(&bytes)?);
    }
    if let Some(bytes) = read_entry(&mut archive, KAI_ONSETS_ENTRY)? {
        song.onsets = onsets::decode(&bytes, &song.delay())?;
    }

    info!(path = %path.display(), lines = song.lines.len(), "migrated legacy kai archive");
    Ok(song)
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            Ok(Some(bytes))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(Error::payload(format!("kai archive entry {}: {}", name, e))),
    }
}
