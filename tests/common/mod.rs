//! Common test utilities for kaibox integration tests
//!
//! Builds synthetic stem containers byte-by-byte so container tests run
//! hermetically: a faststart layout (`ftyp` + `moov` + `mdat`) with N audio
//! tracks, optional `mov_text` lyric cues and correctly wired
//! `stts`/`stsc`/`stsz`/`stco` tables whose offsets point into the `mdat`.

// Not every test target uses every helper.
#![allow(dead_code)]

use kaibox::boxes::{serialize, BoxNode, BoxType};
use kaibox::subtitle::track::encode_sample;

/// Install a test subscriber once so `RUST_LOG=debug` surfaces crate logs
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Bytes of one audio chunk; the first 8 bytes form a per-chunk signature
pub const CHUNK_SIZE: usize = 16;

/// Media timescale used for the synthetic audio tracks
pub const AUDIO_TIMESCALE: u32 = 44_100;

/// Media timescale used for the synthetic text track
pub const TEXT_TIMESCALE: u32 = 1000;

/// Recognisable contents of one audio chunk
pub fn chunk_bytes(track: usize, chunk: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; CHUNK_SIZE];
    bytes[0] = 0xC0 | track as u8;
    bytes[1] = chunk as u8;
    for (i, b) in bytes.iter_mut().enumerate().skip(2) {
        *b = (0xA0 + track as u8).wrapping_add(i as u8);
    }
    bytes
}

fn full_box_header(version: u8) -> Vec<u8> {
    vec![version, 0, 0, 0]
}

fn mvhd(timescale: u32, duration: u32) -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&[0u8; 8]); // creation/modification time
    data.extend_from_slice(&timescale.to_be_bytes());
    data.extend_from_slice(&duration.to_be_bytes());
    data.extend_from_slice(&[0u8; 80]); // rate, volume, matrix, next track id
    BoxNode::leaf(BoxType::MVHD, data)
}

fn tkhd(track_id: u32) -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&[0u8; 8]);
    data.extend_from_slice(&track_id.to_be_bytes());
    data.extend_from_slice(&[0u8; 68]);
    BoxNode::leaf(BoxType::TKHD, data)
}

fn mdhd(timescale: u32, duration: u32) -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&[0u8; 8]);
    data.extend_from_slice(&timescale.to_be_bytes());
    data.extend_from_slice(&duration.to_be_bytes());
    data.extend_from_slice(&[0u8; 4]); // language + quality
    BoxNode::leaf(BoxType::MDHD, data)
}

fn hdlr(handler: &[u8; 4]) -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(handler);
    data.extend_from_slice(&[0u8; 13]);
    BoxNode::leaf(BoxType::HDLR, data)
}

fn stts(entries: &[(u32, u32)]) -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for &(count, delta) in entries {
        data.extend_from_slice(&count.to_be_bytes());
        data.extend_from_slice(&delta.to_be_bytes());
    }
    BoxNode::leaf(BoxType::STTS, data)
}

fn stsc_one_sample_per_chunk() -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(&1u32.to_be_bytes()); // first chunk
    data.extend_from_slice(&1u32.to_be_bytes()); // samples per chunk
    data.extend_from_slice(&1u32.to_be_bytes()); // description index
    BoxNode::leaf(BoxType::STSC, data)
}

fn stsz(sizes: &[u32]) -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&0u32.to_be_bytes()); // per-sample sizes follow
    data.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    for size in sizes {
        data.extend_from_slice(&size.to_be_bytes());
    }
    BoxNode::leaf(BoxType::STSZ, data)
}

fn stco(offsets: &[u32]) -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&(offsets.len() as u32).to_be_bytes());
    for offset in offsets {
        data.extend_from_slice(&offset.to_be_bytes());
    }
    BoxNode::leaf(BoxType::STCO, data)
}

fn stsd_stub() -> BoxNode<'static> {
    let mut data = full_box_header(0);
    data.extend_from_slice(&0u32.to_be_bytes());
    BoxNode::leaf(BoxType::STSD, data)
}

fn trak(
    track_id: u32,
    handler: &[u8; 4],
    timescale: u32,
    stts_entries: &[(u32, u32)],
    sizes: &[u32],
    offsets: &[u32],
) -> BoxNode<'static> {
    let duration: u32 = stts_entries.iter().map(|&(c, d)| c * d).sum();
    let stbl = BoxNode::container(
        BoxType::STBL,
        vec![
            stsd_stub(),
            stts(stts_entries),
            stsc_one_sample_per_chunk(),
            stsz(sizes),
            stco(offsets),
        ],
    );
    let minf = BoxNode::container(BoxType::MINF, vec![stbl]);
    let mdia = BoxNode::container(
        BoxType::MDIA,
        vec![mdhd(timescale, duration), hdlr(handler), minf],
    );
    BoxNode::container(BoxType::TRAK, vec![tkhd(track_id), mdia])
}

fn ftyp() -> BoxNode<'static> {
    BoxNode::leaf(BoxType::FTYP, b"M4A \x00\x00\x02\x00M4A mp42".to_vec())
}

/// Turn `(wire_start, wire_end, payload)` cues into `mov_text` samples with
/// empty gap samples and matching durations
fn text_samples(cues: &[(f64, f64, String)]) -> (Vec<Vec<u8>>, Vec<(u32, u32)>) {
    let mut samples = Vec::new();
    let mut durations = Vec::new();
    let mut cursor = 0.0f64;
    for (start, end, payload) in cues {
        if *start > cursor + 1e-9 {
            samples.push(encode_sample(""));
            durations.push((1, ((start - cursor) * TEXT_TIMESCALE as f64).round() as u32));
        }
        samples.push(encode_sample(payload));
        durations.push((1, ((end - start) * TEXT_TIMESCALE as f64).round() as u32));
        cursor = *end;
    }
    (samples, durations)
}

/// Build a complete synthetic container.
///
/// `audio_tracks` tracks of `chunks_per_track` one-sample chunks, an
/// optional `mov_text` track carrying `cues` (wire time), and an empty
/// `udta` so the file starts without any karaoke payload.
pub fn build_container(
    audio_tracks: usize,
    chunks_per_track: usize,
    cues: &[(f64, f64, String)],
) -> Vec<u8> {
    let (cue_samples, cue_durations) = text_samples(cues);
    let audio_sizes = vec![CHUNK_SIZE as u32; chunks_per_track];
    let text_sizes: Vec<u32> = cue_samples.iter().map(|s| s.len() as u32).collect();

    let build_moov = |audio_offsets: &[Vec<u32>], text_offsets: &[u32]| -> BoxNode<'static> {
        let mut children = vec![mvhd(600, 600 * 600)];
        for (t, offsets) in audio_offsets.iter().enumerate() {
            children.push(trak(
                t as u32 + 1,
                b"soun",
                AUDIO_TIMESCALE,
                &[(chunks_per_track as u32, AUDIO_TIMESCALE)],
                &audio_sizes,
                offsets,
            ));
        }
        if !text_offsets.is_empty() {
            children.push(trak(
                audio_offsets.len() as u32 + 1,
                b"text",
                TEXT_TIMESCALE,
                &cue_durations,
                &text_sizes,
                text_offsets,
            ));
        }
        children.push(BoxNode::container(BoxType::UDTA, Vec::new()));
        BoxNode::container(BoxType::MOOV, children)
    };

    // First pass with zeroed offsets to measure the moov size.
    let zero_audio = vec![vec![0u32; chunks_per_track]; audio_tracks];
    let zero_text = vec![0u32; cue_samples.len()];
    let measured = build_moov(&zero_audio, &zero_text);
    let mdat_payload_start = (ftyp().total_size() + measured.total_size() + 8) as u32;

    // Lay out mdat: audio chunks in track order, then the text samples.
    let mut cursor = mdat_payload_start;
    let mut mdat = Vec::new();
    let mut audio_offsets = Vec::new();
    for t in 0..audio_tracks {
        let mut offsets = Vec::new();
        for c in 0..chunks_per_track {
            offsets.push(cursor);
            let bytes = chunk_bytes(t, c);
            cursor += bytes.len() as u32;
            mdat.extend_from_slice(&bytes);
        }
        audio_offsets.push(offsets);
    }
    let mut text_offsets = Vec::new();
    for sample in &cue_samples {
        text_offsets.push(cursor);
        cursor += sample.len() as u32;
        mdat.extend_from_slice(sample);
    }

    let moov = build_moov(&audio_offsets, &text_offsets);
    assert_eq!(moov.total_size(), measured.total_size());

    serialize(&[ftyp(), moov, BoxNode::leaf(BoxType::MDAT, mdat)])
}

/// All `stco` entries of every track, in track order
pub fn all_chunk_offsets(bytes: &[u8]) -> Vec<u64> {
    use kaibox::boxes::tables::read_tracks;

    let roots = kaibox::boxes::parse(bytes).expect("fixture parses");
    let moov = roots
        .iter()
        .find(|n| n.kind == BoxType::MOOV)
        .expect("fixture has moov");
    read_tracks(moov)
        .expect("fixture tracks read")
        .iter()
        .flat_map(|t| t.table.chunk_offsets.iter().copied())
        .collect()
}

/// Absolute byte range of the top-level `moov`
pub fn moov_span(bytes: &[u8]) -> std::ops::Range<u64> {
    kaibox::boxes::top_level_spans(bytes)
        .expect("fixture parses")
        .into_iter()
        .find(|(kind, _)| *kind == BoxType::MOOV)
        .map(|(_, range)| range)
        .expect("fixture has moov")
}
