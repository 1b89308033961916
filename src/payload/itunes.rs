//! Standard iTunes metadata atoms
//!
//! Reads and writes the plain tag atoms inside `moov/udta/meta/ilst`:
//! `©nam` (title), `©ART` (artist), `©alb` (album), `©day` (year), `©gen`
//! (genre), `trkn` (track number) and `covr` (cover art). Each item atom
//! wraps a single `data` box carrying a type code, a locale and the value.

use crate::boxes::{BoxNode, BoxType};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

const TYPE_UTF8: u32 = 1;
const TYPE_JPEG: u32 = 13;
const TYPE_PNG: u32 = 14;
const TYPE_IMPLICIT: u32 = 0;

const NAM: BoxType = BoxType([0xA9, b'n', b'a', b'm']);
const ART: BoxType = BoxType([0xA9, b'A', b'R', b'T']);
const ALB: BoxType = BoxType([0xA9, b'a', b'l', b'b']);
const DAY: BoxType = BoxType([0xA9, b'd', b'a', b'y']);
const GEN: BoxType = BoxType([0xA9, b'g', b'e', b'n']);
const TRKN: BoxType = BoxType(*b"trkn");
const COVR: BoxType = BoxType(*b"covr");

/// Cover art image format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverFormat {
    Jpeg,
    Png,
}

/// Embedded cover art
#[derive(Debug, Clone, PartialEq)]
pub struct CoverArt {
    pub format: CoverFormat,
    pub data: Vec<u8>,
}

impl CoverArt {
    fn type_code(&self) -> u32 {
        match self.format {
            CoverFormat::Jpeg => TYPE_JPEG,
            CoverFormat::Png => TYPE_PNG,
        }
    }

    /// Detect the format from the type code, sniffing magic bytes when the
    /// writer used the implicit code
    fn from_data(type_code: u32, data: &[u8]) -> Option<Self> {
        let format = match type_code {
            TYPE_JPEG => CoverFormat::Jpeg,
            TYPE_PNG => CoverFormat::Png,
            TYPE_IMPLICIT if data.starts_with(&[0xFF, 0xD8]) => CoverFormat::Jpeg,
            TYPE_IMPLICIT if data.starts_with(b"\x89PNG") => CoverFormat::Png,
            _ => return None,
        };
        Some(CoverArt {
            format,
            data: data.to_vec(),
        })
    }
}

/// Standard iTunes tags of a song
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItunesMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    /// `(track, total)` from `trkn`
    pub track_number: Option<(u16, u16)>,
    pub cover_art: Option<CoverArt>,
}

impl ItunesMetadata {
    /// Decode the known tag atoms from an `ilst` box
    pub fn read_from_ilst(ilst: &BoxNode<'_>) -> Self {
        let mut meta = ItunesMetadata::default();
        for child in ilst.children() {
            let payload = match child.leaf_data() {
                Some(payload) => payload,
                None => continue,
            };
            let (type_code, value) = match parse_data_box(payload) {
                Some(parsed) => parsed,
                None => continue,
            };
            match child.kind {
                NAM => meta.title = utf8_value(type_code, value),
                ART => meta.artist = utf8_value(type_code, value),
                ALB => meta.album = utf8_value(type_code, value),
                DAY => meta.year = utf8_value(type_code, value),
                GEN => meta.genre = utf8_value(type_code, value),
                TRKN => meta.track_number = parse_trkn(value),
                COVR => meta.cover_art = CoverArt::from_data(type_code, value),
                _ => {}
            }
        }
        meta
    }

    /// Write the known tag atoms into an `ilst` box, replacing existing
    /// values and removing atoms whose field is unset
    pub fn write_into_ilst(&self, ilst: &mut BoxNode<'_>) {
        write_text(ilst, NAM, self.title.as_deref());
        write_text(ilst, ART, self.artist.as_deref());
        write_text(ilst, ALB, self.album.as_deref());
        write_text(ilst, DAY, self.year.as_deref());
        write_text(ilst, GEN, self.genre.as_deref());

        match self.track_number {
            Some((track, total)) => {
                let mut value = vec![0u8; 8];
                BigEndian::write_u16(&mut value[2..4], track);
                BigEndian::write_u16(&mut value[4..6], total);
                set_item(ilst, TRKN, TYPE_IMPLICIT, &value);
            }
            None => remove_item(ilst, TRKN),
        }

        match &self.cover_art {
            Some(cover) => set_item(ilst, COVR, cover.type_code(), &cover.data),
            None => remove_item(ilst, COVR),
        }
    }
}

fn utf8_value(type_code: u32, value: &[u8]) -> Option<String> {
    if type_code != TYPE_UTF8 {
        return None;
    }
    String::from_utf8(value.to_vec()).ok()
}

fn parse_trkn(value: &[u8]) -> Option<(u16, u16)> {
    if value.len() < 6 {
        return None;
    }
    Some((
        BigEndian::read_u16(&value[2..4]),
        BigEndian::read_u16(&value[4..6]),
    ))
}

/// Extract `(type_code, value)` from the nested `data` box of an item atom
fn parse_data_box(payload: &[u8]) -> Option<(u32, &[u8])> {
    let mut pos = 0usize;
    while payload.len() - pos >= 16 {
        let size = BigEndian::read_u32(&payload[pos..pos + 4]) as usize;
        if size < 8 || pos + size > payload.len() {
            return None;
        }
        if &payload[pos + 4..pos + 8] == b"data" {
            let type_code = BigEndian::read_u32(&payload[pos + 8..pos + 12]);
            return Some((type_code, &payload[pos + 16..pos + size]));
        }
        pos += size;
    }
    None
}

fn item_payload(type_code: u32, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + value.len());
    out.write_u32::<BigEndian>(16 + value.len() as u32).unwrap();
    out.extend_from_slice(b"data");
    out.write_u32::<BigEndian>(type_code).unwrap();
    out.write_u32::<BigEndian>(0).unwrap(); // locale
    out.extend_from_slice(value);
    out
}

fn set_item(ilst: &mut BoxNode<'_>, kind: BoxType, type_code: u32, value: &[u8]) {
    ilst.replace_or_push_child(BoxNode::leaf(kind, item_payload(type_code, value)));
}

fn remove_item(ilst: &mut BoxNode<'_>, kind: BoxType) {
    if let Some(children) = ilst.children_mut() {
        children.retain(|c| c.kind != kind);
    }
}

fn write_text(ilst: &mut BoxNode<'_>, kind: BoxType, value: Option<&str>) {
    match value {
        Some(text) => set_item(ilst, kind, TYPE_UTF8, text.as_bytes()),
        None => remove_item(ilst, kind),
    }
}
