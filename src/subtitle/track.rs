//! `mov_text` lyric track extraction
//!
//! The container carries the karaoke cues as a `mov_text` subtitle track:
//! one sample per cue, each sample a 16-bit big-endian text length followed
//! by UTF-8 cue payload. Empty samples fill the gaps between cues. This
//! module walks the track's sample table and reassembles the WebVTT
//! document the muxer was originally fed.

use super::format_timestamp;
use crate::boxes::TrackInfo;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

/// Rebuild the WebVTT document from a text track's samples.
///
/// Timestamps come from the track's time-to-sample table and are wire time,
/// exactly as the cues were muxed. Returns `None` for a track without any
/// non-empty cue.
pub fn extract_vtt(buf: &[u8], track: &TrackInfo) -> Result<Option<String>> {
    if track.timescale == 0 {
        return Err(Error::malformed("mdhd", 0, "timescale is zero".to_string()));
    }

    let mut out = String::from("WEBVTT\n\n");
    let mut cues = 0usize;

    for index in 0..track.table.sample_count() {
        let size = track.table.sample_sizes.size_of(index) as usize;
        let offset = track
            .table
            .sample_file_offset(index)
            .ok_or_else(|| Error::ChunkOffsetMismatch {
                track: track.track_id,
                chunk: index as usize,
            })? as usize;
        if offset + size > buf.len() {
            return Err(Error::malformed(
                "mdat",
                offset as u64,
                format!("text sample {} extends past end of file", index),
            ));
        }

        let sample = &buf[offset..offset + size];
        if sample.len() < 2 {
            continue;
        }
        let text_len = BigEndian::read_u16(&sample[..2]) as usize;
        if text_len == 0 || 2 + text_len > sample.len() {
            continue;
        }
        let text = String::from_utf8_lossy(&sample[2..2 + text_len]);

        let start = track.table.sample_start_time(index) as f64 / track.timescale as f64;
        let duration = track.table.sample_duration(index) as f64 / track.timescale as f64;
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_timestamp(start),
            format_timestamp(start + duration),
            text
        ));
        cues += 1;
    }

    debug!(track = track.track_id, cues, "extracted lyric track");
    if cues == 0 {
        Ok(None)
    } else {
        Ok(Some(out))
    }
}

/// Encode one `mov_text` cue sample (length-prefixed UTF-8)
pub fn encode_sample(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + text.len());
    let mut len = [0u8; 2];
    BigEndian::write_u16(&mut len, text.len() as u16);
    out.extend_from_slice(&len);
    out.extend_from_slice(text.as_bytes());
    out
}
