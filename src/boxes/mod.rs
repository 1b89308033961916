//! ISO BMFF box tree handling
//!
//! This module provides the box (atom) tree that every container operation
//! in this crate works on: parsing a byte buffer into a navigable tree,
//! serialising an edited tree back to bytes, rewriting chunk-offset tables,
//! and the iTunes-style freeform metadata codec.
//!
//! The tree is a value tree: container nodes own their children, leaf nodes
//! hold their payload as a copy-on-write slice of the source buffer. Edits
//! are expressed as subtree replacement, which keeps size recomputation a
//! straightforward bottom-up pass.

pub mod freeform;
pub mod offsets;
pub mod parser;
pub mod tables;
pub mod writer;

pub use freeform::FreeformItem;
pub use parser::{parse, parse_strict, top_level_spans};
pub use tables::{HandlerType, SampleTable, TrackInfo};
pub use writer::serialize;

use std::borrow::Cow;
use std::fmt;

/// Four-character box type code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const FREE: Self = Self(*b"free");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const EDTS: Self = Self(*b"edts");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const SMHD: Self = Self(*b"smhd");
    pub const NMHD: Self = Self(*b"nmhd");
    pub const GMHD: Self = Self(*b"gmhd");
    pub const DINF: Self = Self(*b"dinf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const STSS: Self = Self(*b"stss");
    pub const UDTA: Self = Self(*b"udta");
    pub const META: Self = Self(*b"meta");
    pub const ILST: Self = Self(*b"ilst");
    pub const MEAN: Self = Self(*b"mean");
    pub const NAME: Self = Self(*b"name");
    pub const DATA: Self = Self(*b"data");
    pub const STEM: Self = Self(*b"stem");
    /// iTunes freeform metadata item
    pub const FREEFORM: Self = Self(*b"----");

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Render the code, replacing non-printable bytes
    pub fn as_display_string(&self) -> String {
        self.0
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect()
    }

    /// True for box types whose payload is a sequence of child boxes
    pub fn is_container(&self) -> bool {
        matches!(
            *self,
            Self::MOOV
                | Self::TRAK
                | Self::MDIA
                | Self::MINF
                | Self::STBL
                | Self::UDTA
                | Self::ILST
                | Self::META
                | Self::FREEFORM
        )
    }

    /// True for full-box containers carrying a version/flags preamble before
    /// their children (`meta` is the only one this schema touches)
    pub fn has_version_preamble(&self) -> bool {
        *self == Self::META
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display_string())
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxType({})", self.as_display_string())
    }
}

/// Payload of a box: raw bytes for leaves, child boxes for containers
#[derive(Debug, Clone, PartialEq)]
pub enum BoxPayload<'a> {
    Leaf(Cow<'a, [u8]>),
    Container {
        /// Version/flags bytes preceding the children (`meta` only, else empty)
        preamble: Cow<'a, [u8]>,
        children: Vec<BoxNode<'a>>,
    },
}

/// One node of the box tree
#[derive(Debug, Clone, PartialEq)]
pub struct BoxNode<'a> {
    pub kind: BoxType,
    pub payload: BoxPayload<'a>,
}

impl<'a> BoxNode<'a> {
    /// Create a leaf owning its payload bytes
    pub fn leaf(kind: BoxType, data: Vec<u8>) -> BoxNode<'static> {
        BoxNode {
            kind,
            payload: BoxPayload::Leaf(Cow::Owned(data)),
        }
    }

    /// Create a leaf borrowing its payload from the source buffer
    pub fn leaf_borrowed(kind: BoxType, data: &'a [u8]) -> BoxNode<'a> {
        BoxNode {
            kind,
            payload: BoxPayload::Leaf(Cow::Borrowed(data)),
        }
    }

    /// Create a container node; a zeroed version/flags preamble is added for
    /// full-box containers
    pub fn container(kind: BoxType, children: Vec<BoxNode<'a>>) -> BoxNode<'a> {
        let preamble: Cow<'a, [u8]> = if kind.has_version_preamble() {
            Cow::Owned(vec![0u8; 4])
        } else {
            Cow::Owned(Vec::new())
        };
        BoxNode {
            kind,
            payload: BoxPayload::Container { preamble, children },
        }
    }

    /// Payload size in bytes, excluding this box's own header
    pub fn content_size(&self) -> u64 {
        match &self.payload {
            BoxPayload::Leaf(data) => data.len() as u64,
            BoxPayload::Container { preamble, children } => {
                preamble.len() as u64
                    + children.iter().map(|c| c.total_size()).sum::<u64>()
            }
        }
    }

    /// Header size this box serialises with (8, or 16 for the extended form)
    pub fn header_size(&self) -> u64 {
        if self.content_size() + 8 > u32::MAX as u64 {
            16
        } else {
            8
        }
    }

    /// Total serialised size including the header
    pub fn total_size(&self) -> u64 {
        let content = self.content_size();
        content + if content + 8 > u32::MAX as u64 { 16 } else { 8 }
    }

    /// Leaf payload bytes, if this is a leaf
    pub fn leaf_data(&self) -> Option<&[u8]> {
        match &self.payload {
            BoxPayload::Leaf(data) => Some(data),
            BoxPayload::Container { .. } => None,
        }
    }

    /// Child boxes, empty for leaves
    pub fn children(&self) -> &[BoxNode<'a>] {
        match &self.payload {
            BoxPayload::Container { children, .. } => children,
            BoxPayload::Leaf(_) => &[],
        }
    }

    /// Mutable child boxes, `None` for leaves
    pub fn children_mut(&mut self) -> Option<&mut Vec<BoxNode<'a>>> {
        match &mut self.payload {
            BoxPayload::Container { children, .. } => Some(children),
            BoxPayload::Leaf(_) => None,
        }
    }

    /// First direct child of the given type
    pub fn child(&self, kind: BoxType) -> Option<&BoxNode<'a>> {
        self.children().iter().find(|c| c.kind == kind)
    }

    /// First direct child of the given type, mutably
    pub fn child_mut(&mut self, kind: BoxType) -> Option<&mut BoxNode<'a>> {
        self.children_mut()?.iter_mut().find(|c| c.kind == kind)
    }

    /// Descend a path of box types, e.g. `[UDTA, META, ILST]`
    pub fn find(&self, path: &[BoxType]) -> Option<&BoxNode<'a>> {
        let mut node = self;
        for kind in path {
            node = node.child(*kind)?;
        }
        Some(node)
    }

    /// Descend a path of box types, mutably
    pub fn find_mut(&mut self, path: &[BoxType]) -> Option<&mut BoxNode<'a>> {
        let mut node = self;
        for kind in path {
            node = node.child_mut(*kind)?;
        }
        Some(node)
    }

    /// Get the direct child container of the given type, appending an empty
    /// one if absent. Panics on leaves; callers only use this on containers.
    pub fn ensure_child(&mut self, kind: BoxType) -> &mut BoxNode<'a> {
        let children = self
            .children_mut()
            .expect("ensure_child called on a leaf box");
        if let Some(idx) = children.iter().position(|c| c.kind == kind) {
            &mut children[idx]
        } else {
            children.push(BoxNode::container(kind, Vec::new()));
            children.last_mut().unwrap()
        }
    }

    /// Replace the first child of the node's type, or append it
    pub fn replace_or_push_child(&mut self, node: BoxNode<'a>) {
        let children = self
            .children_mut()
            .expect("replace_or_push_child called on a leaf box");
        if let Some(idx) = children.iter().position(|c| c.kind == node.kind) {
            children[idx] = node;
        } else {
            children.push(node);
        }
    }

    /// Convert into a tree that owns all of its bytes
    pub fn into_owned(self) -> BoxNode<'static> {
        match self.payload {
            BoxPayload::Leaf(data) => BoxNode {
                kind: self.kind,
                payload: BoxPayload::Leaf(Cow::Owned(data.into_owned())),
            },
            BoxPayload::Container { preamble, children } => BoxNode {
                kind: self.kind,
                payload: BoxPayload::Container {
                    preamble: Cow::Owned(preamble.into_owned()),
                    children: children.into_iter().map(|c| c.into_owned()).collect(),
                },
            },
        }
    }
}
