//! Box tree parser
//!
//! Walks an ISO BMFF byte buffer recursively into a [`BoxNode`] tree. A box
//! header is a 4-byte big-endian size and a 4-byte type tag; size 1 switches
//! to an 8-byte extended size and size 0 extends the box to the end of the
//! enclosing range. Known container types recurse, everything else becomes an
//! opaque leaf borrowing its payload from the source buffer.

use super::{BoxNode, BoxPayload, BoxType};
use crate::error::{Error, Result};
use std::borrow::Cow;
use std::ops::Range;

/// Parse a buffer into its sequence of top-level boxes
pub fn parse(buf: &[u8]) -> Result<Vec<BoxNode<'_>>> {
    parse_boxes(buf, 0, false)
}

/// Parse, failing with [`Error::UnknownContainer`] on unrecognised box types
pub fn parse_strict(buf: &[u8]) -> Result<Vec<BoxNode<'_>>> {
    parse_boxes(buf, 0, true)
}

/// Parse a buffer expected to hold exactly one box (e.g. a `moov` slice)
pub fn parse_one(buf: &[u8]) -> Result<BoxNode<'_>> {
    let mut nodes = parse_boxes(buf, 0, false)?;
    match nodes.len() {
        1 => Ok(nodes.remove(0)),
        n => Err(Error::malformed(
            "",
            0,
            format!("expected exactly one box, found {}", n),
        )),
    }
}

/// Header fields of one box, without descending into it
struct RawHeader {
    kind: BoxType,
    header_size: usize,
    total_size: u64,
}

fn read_header(buf: &[u8], pos: usize, base: u64) -> Result<RawHeader> {
    let remaining = buf.len() - pos;
    if remaining < 8 {
        return Err(Error::TruncatedBox {
            offset: base + pos as u64,
            remaining,
        });
    }

    let size32 = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
    let kind = BoxType::from_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);

    let (header_size, total_size) = match size32 {
        0 => (8, remaining as u64),
        1 => {
            if remaining < 16 {
                return Err(Error::TruncatedBox {
                    offset: base + pos as u64,
                    remaining,
                });
            }
            let mut big = [0u8; 8];
            big.copy_from_slice(&buf[pos + 8..pos + 16]);
            let total = u64::from_be_bytes(big);
            if total < 16 {
                return Err(Error::malformed(
                    kind.as_display_string(),
                    base + pos as u64,
                    "extended size smaller than its header".to_string(),
                ));
            }
            (16, total)
        }
        n if (n as u64) < 8 => {
            return Err(Error::malformed(
                kind.as_display_string(),
                base + pos as u64,
                format!("declared size {} smaller than header", n),
            ));
        }
        n => (8, n as u64),
    };

    if total_size > remaining as u64 {
        return Err(Error::malformed(
            kind.as_display_string(),
            base + pos as u64,
            format!(
                "declared size {} exceeds {} remaining bytes",
                total_size, remaining
            ),
        ));
    }

    Ok(RawHeader {
        kind,
        header_size,
        total_size,
    })
}

fn parse_boxes<'a>(buf: &'a [u8], base: u64, strict: bool) -> Result<Vec<BoxNode<'a>>> {
    let mut nodes = Vec::new();
    let mut pos = 0usize;

    while pos < buf.len() {
        let header = read_header(buf, pos, base)?;
        let payload = &buf[pos + header.header_size..pos + header.total_size as usize];

        let node = if header.kind.is_container() {
            let preamble_len = if header.kind.has_version_preamble() {
                if payload.len() < 4 {
                    return Err(Error::malformed(
                        header.kind.as_display_string(),
                        base + pos as u64,
                        "full box too short for version/flags".to_string(),
                    ));
                }
                4
            } else {
                0
            };
            let child_base = base + pos as u64 + header.header_size as u64 + preamble_len as u64;
            let children = parse_boxes(&payload[preamble_len..], child_base, strict)?;
            BoxNode {
                kind: header.kind,
                payload: BoxPayload::Container {
                    preamble: Cow::Borrowed(&payload[..preamble_len]),
                    children,
                },
            }
        } else {
            if strict && !is_known_leaf(header.kind) {
                return Err(Error::UnknownContainer {
                    kind: header.kind.as_display_string(),
                    offset: base + pos as u64,
                });
            }
            BoxNode::leaf_borrowed(header.kind, payload)
        };

        nodes.push(node);
        pos += header.total_size as usize;
    }

    Ok(nodes)
}

/// Scan the top-level box headers of a file buffer without recursing,
/// returning each box type with its absolute byte range
pub fn top_level_spans(buf: &[u8]) -> Result<Vec<(BoxType, Range<u64>)>> {
    let mut spans = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        let header = read_header(buf, pos, 0)?;
        spans.push((header.kind, pos as u64..pos as u64 + header.total_size));
        pos += header.total_size as usize;
    }
    Ok(spans)
}

/// Leaf types accepted in strict mode. iTunes item atoms start with 0xA9.
fn is_known_leaf(kind: BoxType) -> bool {
    if kind.0[0] == 0xA9 {
        return true;
    }
    matches!(
        &kind.0,
        b"ftyp"
            | b"mdat"
            | b"free"
            | b"skip"
            | b"wide"
            | b"mvhd"
            | b"tkhd"
            | b"edts"
            | b"elst"
            | b"mdhd"
            | b"hdlr"
            | b"smhd"
            | b"vmhd"
            | b"nmhd"
            | b"gmhd"
            | b"dinf"
            | b"dref"
            | b"stsd"
            | b"stts"
            | b"ctts"
            | b"stsc"
            | b"stsz"
            | b"stz2"
            | b"stco"
            | b"co64"
            | b"stss"
            | b"sgpd"
            | b"sbgp"
            | b"sdtp"
            | b"mean"
            | b"name"
            | b"data"
            | b"stem"
            | b"trkn"
            | b"covr"
            | b"disk"
            | b"cpil"
            | b"pgap"
            | b"tmpo"
            | b"chpl"
    )
}
