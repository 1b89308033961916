//! Chunk-offset table rewriter
//!
//! Any edit that changes the size of `moov` shifts every media chunk that
//! follows it, so the absolute file offsets recorded in `stco`/`co64` tables
//! must be patched by the same delta. Entries below the threshold (chunks
//! addressed before the old end of `moov`, which is unusual but legal) are
//! left untouched.
//!
//! If a shifted `stco` entry would exceed `u32::MAX` the table is upgraded to
//! `co64` in place; the resulting growth feeds back into the caller's delta
//! computation (see [`upgrade_growth`]).

use super::{BoxNode, BoxType};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Decoded form of one `stco` or `co64` table
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOffsetTable {
    /// 64-bit (`co64`) or 32-bit (`stco`) entries
    pub co64: bool,
    /// Version and flags, carried through unchanged
    pub version_flags: [u8; 4],
    pub entries: Vec<u64>,
}

impl ChunkOffsetTable {
    /// Decode from a `stco`/`co64` leaf payload
    pub fn decode(kind: BoxType, data: &[u8]) -> Result<Self> {
        let co64 = match kind {
            BoxType::STCO => false,
            BoxType::CO64 => true,
            other => {
                return Err(Error::malformed(
                    other.as_display_string(),
                    0,
                    "not a chunk offset table".to_string(),
                ))
            }
        };
        if data.len() < 8 {
            return Err(Error::malformed(
                kind.as_display_string(),
                0,
                "table shorter than its fixed header".to_string(),
            ));
        }
        let count = BigEndian::read_u32(&data[4..8]) as usize;
        let entry_size = if co64 { 8 } else { 4 };
        if data.len() < 8 + count * entry_size {
            return Err(Error::malformed(
                kind.as_display_string(),
                0,
                format!("table declares {} entries but payload is short", count),
            ));
        }
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let at = 8 + i * entry_size;
            let value = if co64 {
                BigEndian::read_u64(&data[at..at + 8])
            } else {
                BigEndian::read_u32(&data[at..at + 4]) as u64
            };
            entries.push(value);
        }
        let mut version_flags = [0u8; 4];
        version_flags.copy_from_slice(&data[..4]);
        Ok(ChunkOffsetTable {
            co64,
            version_flags,
            entries,
        })
    }

    /// Encode back into a leaf payload
    pub fn encode(&self) -> Vec<u8> {
        let entry_size = if self.co64 { 8 } else { 4 };
        let mut out = Vec::with_capacity(8 + self.entries.len() * entry_size);
        out.extend_from_slice(&self.version_flags);
        out.write_u32::<BigEndian>(self.entries.len() as u32).unwrap();
        for &entry in &self.entries {
            if self.co64 {
                out.write_u64::<BigEndian>(entry).unwrap();
            } else {
                out.write_u32::<BigEndian>(entry as u32).unwrap();
            }
        }
        out
    }

    /// Box type this table serialises as
    pub fn kind(&self) -> BoxType {
        if self.co64 {
            BoxType::CO64
        } else {
            BoxType::STCO
        }
    }
}

/// Compute the extra bytes `moov` would grow by from `stco` → `co64`
/// upgrades were the given shift applied, without mutating the tree.
///
/// The caller folds this growth back into its delta and calls again until
/// the value is stable; one extra iteration suffices in practice because the
/// growth per table is bounded by its entry count.
pub fn upgrade_growth(moov: &BoxNode<'_>, delta: i64, threshold: u64) -> Result<u64> {
    let mut growth = 0u64;
    for trak in moov.children().iter().filter(|c| c.kind == BoxType::TRAK) {
        let stbl = match trak.find(&[BoxType::MDIA, BoxType::MINF, BoxType::STBL]) {
            Some(stbl) => stbl,
            None => continue,
        };
        for child in stbl.children() {
            if child.kind != BoxType::STCO {
                continue;
            }
            let data = child.leaf_data().unwrap_or(&[]);
            let table = ChunkOffsetTable::decode(child.kind, data)?;
            let overflows = table
                .entries
                .iter()
                .filter(|&&o| o >= threshold)
                .any(|&o| matches!(shifted(o, delta), Ok(v) if v > u32::MAX as u64));
            if overflows {
                growth += 4 * table.entries.len() as u64;
            }
        }
    }
    Ok(growth)
}

/// Apply a signed byte delta to every chunk offset `>= threshold` in all
/// `stco`/`co64` tables under `moov`, upgrading overflowing `stco` tables
/// to `co64`.
pub fn shift_chunk_offsets(moov: &mut BoxNode<'_>, delta: i64, threshold: u64) -> Result<()> {
    let traks = match moov.children_mut() {
        Some(children) => children,
        None => return Ok(()),
    };
    for trak in traks.iter_mut().filter(|c| c.kind == BoxType::TRAK) {
        let stbl = match trak.find_mut(&[BoxType::MDIA, BoxType::MINF, BoxType::STBL]) {
            Some(stbl) => stbl,
            None => continue,
        };
        let children = match stbl.children_mut() {
            Some(children) => children,
            None => continue,
        };
        for child in children.iter_mut() {
            if child.kind != BoxType::STCO && child.kind != BoxType::CO64 {
                continue;
            }
            let data = child.leaf_data().unwrap_or(&[]);
            let mut table = ChunkOffsetTable::decode(child.kind, data)?;
            let mut needs_co64 = table.co64;
            for entry in table.entries.iter_mut() {
                if *entry >= threshold {
                    *entry = shifted(*entry, delta)?;
                }
                if !needs_co64 && *entry > u32::MAX as u64 {
                    needs_co64 = true;
                }
            }
            table.co64 = needs_co64;
            *child = BoxNode::leaf(table.kind(), table.encode());
        }
    }
    Ok(())
}

fn shifted(offset: u64, delta: i64) -> Result<u64> {
    let value = offset as i128 + delta as i128;
    if value < 0 {
        return Err(Error::malformed(
            "stco",
            0,
            format!("offset {} would shift below zero ({})", offset, delta),
        ));
    }
    Ok(value as u64)
}
