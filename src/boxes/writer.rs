//! Box tree writer
//!
//! Serialises a (possibly edited) [`BoxNode`] tree back to bytes. Leaves are
//! emitted from their stored payloads, so any leaf the caller did not touch
//! comes out bit-identical. Sizes are recomputed bottom-up; the 16-byte
//! extended header form is used only when a box exceeds `u32::MAX`.

use super::{BoxNode, BoxPayload};
use byteorder::{BigEndian, WriteBytesExt};

/// Serialise a sequence of sibling boxes
pub fn serialize(nodes: &[BoxNode<'_>]) -> Vec<u8> {
    let capacity: u64 = nodes.iter().map(|n| n.total_size()).sum();
    let mut out = Vec::with_capacity(capacity as usize);
    for node in nodes {
        write_box(node, &mut out);
    }
    out
}

/// Serialise a single box, appending to `out`
pub fn write_box(node: &BoxNode<'_>, out: &mut Vec<u8>) {
    let content = node.content_size();
    if content + 8 > u32::MAX as u64 {
        out.write_u32::<BigEndian>(1).unwrap();
        out.extend_from_slice(&node.kind.0);
        out.write_u64::<BigEndian>(content + 16).unwrap();
    } else {
        out.write_u32::<BigEndian>((content + 8) as u32).unwrap();
        out.extend_from_slice(&node.kind.0);
    }

    match &node.payload {
        BoxPayload::Leaf(data) => out.extend_from_slice(data),
        BoxPayload::Container { preamble, children } => {
            out.extend_from_slice(preamble);
            for child in children {
                write_box(child, out);
            }
        }
    }
}
