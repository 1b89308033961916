//! Karaoke payload schema
//!
//! Typed representations of the application metadata layered into the
//! container: the `kaid` JSON document, the `vpch` pitch stream, the `kons`
//! onset stream, the Traktor-compatible `stem` profile and the standard
//! iTunes tag atoms. The container carriage (freeform `----` items, the
//! `udta/stem` box) lives in [`crate::boxes`]; this module owns the byte
//! formats and their conversions to and from [`crate::song::Song`].

pub mod itunes;
pub mod kaid;
pub mod onsets;
pub mod pitch;
pub mod stem;

pub use itunes::{CoverArt, CoverFormat, ItunesMetadata};
pub use kaid::KaraokeTags;
pub use pitch::PitchCurve;
pub use stem::StemManifest;

/// Reverse-DNS namespace of all freeform items this crate owns
pub const STEMS_NAMESPACE: &str = "com.stems";

/// Freeform item name of the karaoke JSON document
pub const ITEM_KAID: &str = "kaid";

/// Freeform item name of the vocal pitch stream
pub const ITEM_VPCH: &str = "vpch";

/// Freeform item name of the onset stream
pub const ITEM_KONS: &str = "kons";
