//! Writer façade
//!
//! [`save`] performs the minimal structural edit: it reads the existing
//! container, rebuilds only the `moov` box with the new payload items,
//! patches every chunk offset the size change invalidated and splices the
//! new `moov` between the untouched byte ranges of the original file. The
//! result is published atomically (`.tmp` + fsync + rename) and verified;
//! verification failure restores the previous file from a `.bak` sibling.
//!
//! The writer edits, it never creates: muxing a fresh container is the
//! muxer driver's job. Saves of the same path must be serialised by the
//! caller; the crate deliberately owns no path-lock registry so it stays
//! embeddable (hold your own per-path mutex around this call).

use crate::boxes::{self, freeform, offsets, BoxNode, BoxType, FreeformItem};
use crate::error::{Error, Result};
use crate::payload::{self, onsets, KaraokeTags, StemManifest};
use crate::song::Song;
use crate::validate;
use crate::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persist a song into an existing container at `path`.
///
/// Semantic validation runs first; on any semantic error the file is
/// untouched. The save either publishes atomically or fails leaving the
/// previous bytes in place.
pub fn save(ctx: &Context, song: &Song, path: &Path) -> Result<()> {
    if let Err(e) = song.validate() {
        warn!(
            path = %path.display(),
            error = %e,
            semantic = e.is_semantic(),
            "save rejected, file untouched"
        );
        return Err(e);
    }
    let original = std::fs::read(path)?;
    let output = build_output(ctx, song, &original)?;
    publish(song, path, &original, &output)
}

/// Compute the full output byte image without touching the filesystem
fn build_output(ctx: &Context, song: &Song, original: &[u8]) -> Result<Vec<u8>> {
    let spans = boxes::top_level_spans(original)?;
    let (moov_start, moov_end) = spans
        .iter()
        .find(|(kind, _)| *kind == BoxType::MOOV)
        .map(|(_, range)| (range.start as usize, range.end as usize))
        .ok_or_else(|| Error::malformed("moov", 0, "file has no moov box".to_string()))?;

    let moov_slice = &original[moov_start..moov_end];
    let parsed = if ctx.strict {
        boxes::parse_strict(moov_slice)?
    } else {
        boxes::parse(moov_slice)?
    };
    let mut moov = match parsed.into_iter().next() {
        Some(node) if node.kind == BoxType::MOOV => node,
        _ => return Err(Error::malformed("moov", moov_start as u64, "span is not a moov box".to_string())),
    };

    apply_payload(song, &mut moov)?;

    // The minimal edit shifts everything recorded beyond the old moov end.
    let old_size = (moov_end - moov_start) as i64;
    let base_delta = moov.total_size() as i64 - old_size;
    let threshold = moov_end as u64;
    let mut total_delta = base_delta;

    if base_delta != 0 {
        // stco -> co64 upgrades grow moov further; iterate to the fixed
        // point before mutating (bounded growth per table, converges fast).
        for _ in 0..4 {
            let growth = offsets::upgrade_growth(&moov, total_delta, threshold)? as i64;
            if base_delta + growth == total_delta {
                break;
            }
            total_delta = base_delta + growth;
        }
        offsets::shift_chunk_offsets(&mut moov, total_delta, threshold)?;
        debug!(base_delta, total_delta, "rewrote chunk offsets");
    }

    let new_moov = boxes::serialize(std::slice::from_ref(&moov));
    if new_moov.len() as i64 != old_size + total_delta {
        return Err(Error::PostWriteValidationFailed {
            reason: format!(
                "moov size drifted during offset fixup: expected {}, produced {}",
                old_size + total_delta,
                new_moov.len()
            ),
            restored: true,
        });
    }

    let mut out = Vec::with_capacity(original.len() + total_delta.max(0) as usize);
    out.extend_from_slice(&original[..moov_start]);
    out.extend_from_slice(&new_moov);
    out.extend_from_slice(&original[moov_end..]);
    Ok(out)
}

/// Create or replace the karaoke payload inside `moov`
fn apply_payload(song: &Song, moov: &mut BoxNode<'_>) -> Result<()> {
    let delay = song.delay();
    let udta = moov.ensure_child(BoxType::UDTA);
    let meta = udta.ensure_child(BoxType::META);
    if meta.child(BoxType::HDLR).is_none() {
        meta.children_mut()
            .expect("meta parsed as a container")
            .insert(0, mdir_handler());
    }
    let ilst = meta.ensure_child(BoxType::ILST);

    let tags = KaraokeTags::from_song(song);
    let kaid_json = serde_json::to_string(&tags)?;
    freeform::replace_item(
        ilst,
        &FreeformItem::utf8(payload::STEMS_NAMESPACE, payload::ITEM_KAID, &kaid_json),
    );

    match &song.vocal_pitch {
        Some(curve) => freeform::replace_item(
            ilst,
            &FreeformItem::binary(
                payload::STEMS_NAMESPACE,
                payload::ITEM_VPCH,
                curve.encode(),
            ),
        ),
        None => {
            freeform::remove_item(ilst, payload::STEMS_NAMESPACE, payload::ITEM_VPCH);
        }
    }

    if song.onsets.is_empty() {
        freeform::remove_item(ilst, payload::STEMS_NAMESPACE, payload::ITEM_KONS);
    } else {
        freeform::replace_item(
            ilst,
            &FreeformItem::binary(
                payload::STEMS_NAMESPACE,
                payload::ITEM_KONS,
                onsets::encode(&song.onsets, &delay),
            ),
        );
    }

    song.itunes.write_into_ilst(ilst);

    // Keep an existing stem profile when it still matches the source list,
    // otherwise regenerate the default profile in source order.
    let manifest = udta
        .child(BoxType::STEM)
        .and_then(|n| n.leaf_data())
        .and_then(|data| StemManifest::from_json(data).ok())
        .filter(|m| m.matches_sources(&song.audio.sources))
        .unwrap_or_else(|| StemManifest::default_for(&song.audio.sources));
    udta.replace_or_push_child(BoxNode::leaf(BoxType::STEM, manifest.to_json()?));

    Ok(())
}

/// The `mdir`/`appl` handler the iTunes metadata chain requires
fn mdir_handler() -> BoxNode<'static> {
    let mut data = Vec::with_capacity(25);
    data.extend_from_slice(&[0u8; 8]); // version/flags + predefined
    data.extend_from_slice(b"mdir");
    data.extend_from_slice(b"appl");
    data.extend_from_slice(&[0u8; 9]); // reserved + empty name
    BoxNode::leaf(BoxType::HDLR, data)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Atomic publish with post-write verification and `.bak` restore
fn publish(song: &Song, path: &Path, original: &[u8], output: &[u8]) -> Result<()> {
    let tmp = sibling(path, ".tmp");
    let bak = sibling(path, ".bak");

    let write_result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(output)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    if let Err(e) = std::fs::copy(path, &bak) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        let _ = std::fs::remove_file(&bak);
        return Err(e.into());
    }

    match std::fs::read(path)
        .map_err(Error::from)
        .and_then(|saved| validate::verify_saved(original, &saved, song))
    {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            info!(path = %path.display(), bytes = output.len(), "saved stem container");
            Ok(())
        }
        Err(reason) => {
            let restored = std::fs::rename(&bak, path).is_ok();
            warn!(path = %path.display(), %reason, restored, "post-write validation failed");
            Err(Error::PostWriteValidationFailed {
                reason: reason.to_string(),
                restored,
            })
        }
    }
}
