//! Sample table reading
//!
//! Decodes the parts of `trak/mdia/minf/stbl` this crate needs: chunk
//! offsets, sample sizes, the sample-to-chunk map and time-to-sample deltas.
//! Used by the loader to pull subtitle samples out of the media data and by
//! the post-save validator to cross-check chunk offsets against bytes.

use super::offsets::ChunkOffsetTable;
use super::{BoxNode, BoxType};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

/// Handler type of a track (from `hdlr`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Audio,
    Video,
    Text,
    Subtitle,
    Meta,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"soun" => Self::Audio,
            b"vide" => Self::Video,
            b"text" => Self::Text,
            b"sbtl" => Self::Subtitle,
            b"meta" => Self::Meta,
            _ => Self::Unknown(bytes),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }

    /// True for both QuickTime text and MP4 subtitle handlers
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text | Self::Subtitle)
    }
}

/// One `stts` run: `count` consecutive samples sharing a duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SttsEntry {
    pub count: u32,
    pub delta: u32,
}

/// One `stsc` run, `first_chunk` is 1-based as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub description_index: u32,
}

/// Sample sizes, either uniform or per-sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    Uniform { size: u32, count: u32 },
    PerSample(Vec<u32>),
}

impl SampleSizes {
    pub fn count(&self) -> u32 {
        match self {
            Self::Uniform { count, .. } => *count,
            Self::PerSample(sizes) => sizes.len() as u32,
        }
    }

    pub fn size_of(&self, index: u32) -> u32 {
        match self {
            Self::Uniform { size, .. } => *size,
            Self::PerSample(sizes) => sizes.get(index as usize).copied().unwrap_or(0),
        }
    }
}

/// Decoded sample table of one track
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTable {
    pub chunk_offsets: Vec<u64>,
    /// Whether offsets came from a `co64` table
    pub co64: bool,
    pub sample_sizes: SampleSizes,
    pub sample_to_chunk: Vec<StscEntry>,
    pub time_to_sample: Vec<SttsEntry>,
}

impl SampleTable {
    pub fn sample_count(&self) -> u32 {
        self.sample_sizes.count()
    }

    /// Decode start time of a sample in media timescale units
    pub fn sample_start_time(&self, index: u32) -> u64 {
        let mut remaining = index as u64;
        let mut time = 0u64;
        for entry in &self.time_to_sample {
            let run = entry.count as u64;
            if remaining < run {
                return time + remaining * entry.delta as u64;
            }
            time += run * entry.delta as u64;
            remaining -= run;
        }
        time
    }

    /// Duration of a sample in media timescale units
    pub fn sample_duration(&self, index: u32) -> u32 {
        let mut remaining = index as u64;
        for entry in &self.time_to_sample {
            if remaining < entry.count as u64 {
                return entry.delta;
            }
            remaining -= entry.count as u64;
        }
        0
    }

    /// Samples held by a 1-based chunk number, resolved through `stsc`
    fn samples_in_chunk(&self, chunk_number: u32) -> u32 {
        let mut samples = 0;
        for entry in &self.sample_to_chunk {
            if entry.first_chunk > chunk_number {
                break;
            }
            samples = entry.samples_per_chunk;
        }
        samples
    }

    /// Absolute file offset of a sample, or `None` when the table is
    /// internally inconsistent
    pub fn sample_file_offset(&self, index: u32) -> Option<u64> {
        let mut first_sample_of_chunk = 0u64;
        for (chunk_idx, &chunk_offset) in self.chunk_offsets.iter().enumerate() {
            let in_chunk = self.samples_in_chunk(chunk_idx as u32 + 1) as u64;
            if (index as u64) < first_sample_of_chunk + in_chunk {
                let mut offset = chunk_offset;
                for s in first_sample_of_chunk..index as u64 {
                    offset += self.sample_sizes.size_of(s as u32) as u64;
                }
                return Some(offset);
            }
            first_sample_of_chunk += in_chunk;
        }
        None
    }
}

/// Track description assembled from `tkhd`, `mdhd`, `hdlr` and `stbl`
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler: HandlerType,
    /// Media timescale (units per second)
    pub timescale: u32,
    /// Duration in media timescale units
    pub duration: u64,
    pub table: SampleTable,
}

impl TrackInfo {
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }
}

/// Read every track under `moov`
pub fn read_tracks(moov: &BoxNode<'_>) -> Result<Vec<TrackInfo>> {
    moov.children()
        .iter()
        .filter(|c| c.kind == BoxType::TRAK)
        .map(read_track)
        .collect()
}

/// Read one `trak` subtree
pub fn read_track(trak: &BoxNode<'_>) -> Result<TrackInfo> {
    let tkhd = leaf_payload(trak, &[BoxType::TKHD])?;
    let track_id = parse_tkhd_track_id(tkhd)?;

    let mdhd = leaf_payload(trak, &[BoxType::MDIA, BoxType::MDHD])?;
    let (timescale, duration) = parse_mdhd(mdhd)?;

    let hdlr = leaf_payload(trak, &[BoxType::MDIA, BoxType::HDLR])?;
    let handler = parse_hdlr(hdlr)?;

    let stbl = trak
        .find(&[BoxType::MDIA, BoxType::MINF, BoxType::STBL])
        .ok_or_else(|| Error::malformed("trak", 0, "missing stbl".to_string()))?;
    let table = read_sample_table(stbl)?;

    Ok(TrackInfo {
        track_id,
        handler,
        timescale,
        duration,
        table,
    })
}

/// Decode the parts of `stbl` the crate consumes
pub fn read_sample_table(stbl: &BoxNode<'_>) -> Result<SampleTable> {
    let mut chunk_offsets = Vec::new();
    let mut co64 = false;
    let mut sample_sizes = SampleSizes::PerSample(Vec::new());
    let mut sample_to_chunk = Vec::new();
    let mut time_to_sample = Vec::new();

    for child in stbl.children() {
        let data = match child.leaf_data() {
            Some(data) => data,
            None => continue,
        };
        match child.kind {
            BoxType::STCO | BoxType::CO64 => {
                let table = ChunkOffsetTable::decode(child.kind, data)?;
                co64 = table.co64;
                chunk_offsets = table.entries;
            }
            BoxType::STSZ => sample_sizes = parse_stsz(data)?,
            BoxType::STSC => sample_to_chunk = parse_stsc(data)?,
            BoxType::STTS => time_to_sample = parse_stts(data)?,
            _ => {}
        }
    }

    Ok(SampleTable {
        chunk_offsets,
        co64,
        sample_sizes,
        sample_to_chunk,
        time_to_sample,
    })
}

fn leaf_payload<'t>(trak: &'t BoxNode<'_>, path: &[BoxType]) -> Result<&'t [u8]> {
    let node = trak.find(path).ok_or_else(|| {
        Error::malformed(
            "trak",
            0,
            format!("missing {}", path.last().expect("non-empty path")),
        )
    })?;
    node.leaf_data().ok_or_else(|| {
        Error::malformed(
            node.kind.as_display_string(),
            0,
            "expected a leaf box".to_string(),
        )
    })
}

fn parse_tkhd_track_id(data: &[u8]) -> Result<u32> {
    if data.is_empty() {
        return Err(Error::malformed("tkhd", 0, "empty".to_string()));
    }
    let id_at = if data[0] == 1 { 20 } else { 12 };
    if data.len() < id_at + 4 {
        return Err(Error::malformed("tkhd", 0, "too short".to_string()));
    }
    Ok(BigEndian::read_u32(&data[id_at..id_at + 4]))
}

fn parse_mdhd(data: &[u8]) -> Result<(u32, u64)> {
    if data.is_empty() {
        return Err(Error::malformed("mdhd", 0, "empty".to_string()));
    }
    if data[0] == 1 {
        if data.len() < 32 {
            return Err(Error::malformed("mdhd", 0, "too short".to_string()));
        }
        let timescale = BigEndian::read_u32(&data[20..24]);
        let duration = BigEndian::read_u64(&data[24..32]);
        Ok((timescale, duration))
    } else {
        if data.len() < 20 {
            return Err(Error::malformed("mdhd", 0, "too short".to_string()));
        }
        let timescale = BigEndian::read_u32(&data[12..16]);
        let duration = BigEndian::read_u32(&data[16..20]) as u64;
        Ok((timescale, duration))
    }
}

fn parse_hdlr(data: &[u8]) -> Result<HandlerType> {
    if data.len() < 12 {
        return Err(Error::malformed("hdlr", 0, "too short".to_string()));
    }
    Ok(HandlerType::from_bytes([
        data[8], data[9], data[10], data[11],
    ]))
}

fn parse_stsz(data: &[u8]) -> Result<SampleSizes> {
    if data.len() < 12 {
        return Err(Error::malformed("stsz", 0, "too short".to_string()));
    }
    let uniform = BigEndian::read_u32(&data[4..8]);
    let count = BigEndian::read_u32(&data[8..12]);
    if uniform != 0 {
        return Ok(SampleSizes::Uniform {
            size: uniform,
            count,
        });
    }
    if data.len() < 12 + count as usize * 4 {
        return Err(Error::malformed(
            "stsz",
            0,
            format!("declares {} sizes but payload is short", count),
        ));
    }
    let sizes = (0..count as usize)
        .map(|i| BigEndian::read_u32(&data[12 + i * 4..16 + i * 4]))
        .collect();
    Ok(SampleSizes::PerSample(sizes))
}

fn parse_stsc(data: &[u8]) -> Result<Vec<StscEntry>> {
    if data.len() < 8 {
        return Err(Error::malformed("stsc", 0, "too short".to_string()));
    }
    let count = BigEndian::read_u32(&data[4..8]) as usize;
    if data.len() < 8 + count * 12 {
        return Err(Error::malformed(
            "stsc",
            0,
            format!("declares {} entries but payload is short", count),
        ));
    }
    Ok((0..count)
        .map(|i| {
            let at = 8 + i * 12;
            StscEntry {
                first_chunk: BigEndian::read_u32(&data[at..at + 4]),
                samples_per_chunk: BigEndian::read_u32(&data[at + 4..at + 8]),
                description_index: BigEndian::read_u32(&data[at + 8..at + 12]),
            }
        })
        .collect())
}

fn parse_stts(data: &[u8]) -> Result<Vec<SttsEntry>> {
    if data.len() < 8 {
        return Err(Error::malformed("stts", 0, "too short".to_string()));
    }
    let count = BigEndian::read_u32(&data[4..8]) as usize;
    if data.len() < 8 + count * 8 {
        return Err(Error::malformed(
            "stts",
            0,
            format!("declares {} entries but payload is short", count),
        ));
    }
    Ok((0..count)
        .map(|i| {
            let at = 8 + i * 8;
            SttsEntry {
                count: BigEndian::read_u32(&data[at..at + 4]),
                delta: BigEndian::read_u32(&data[at + 4..at + 8]),
            }
        })
        .collect())
}
