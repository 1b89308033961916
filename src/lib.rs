//! kaibox - a stem-karaoke M4A container engine written in Rust
//!
//! kaibox reads and writes multi-track `.stem.m4a` karaoke containers: it
//! parses the ISO BMFF box tree, decodes the karaoke payload (lyric lines
//! with per-word timing, vocal pitch, note onsets, stem role mapping) and
//! performs minimal in-place structural edits of `moov` while keeping the
//! `stco`/`co64` chunk-offset tables byte-consistent, so edited files stay
//! playable by Traktor, Mixxx, VLC and this crate alike.
//!
//! # Architecture
//!
//! kaibox is organized into several key modules:
//!
//! - `boxes`: ISO BMFF box tree (parsing, serialisation, offset rewriting,
//!   freeform metadata items, sample tables)
//! - `payload`: karaoke payload schema (`kaid` JSON, `vpch` pitch stream,
//!   `kons` onsets, Traktor `stem` profile, iTunes tags)
//! - `subtitle`: karaoke WebVTT codec and `mov_text` track extraction
//! - `timing`: encoder-delay compensation
//! - `song`: the unified in-memory `Song` value and its semantic invariants
//! - `loader` / `saver`: the load/save façades
//! - `muxer`: driver for the external audio encoder subprocess
//! - `validate`: post-save verification
//!
//! # Concurrency
//!
//! Load and save are blocking calls with no internal parallelism. Concurrent
//! saves of *different* files share no mutable state; saves of the *same*
//! path must be serialised by the caller (hold a per-path mutex around
//! [`saver::save`]). A save either publishes atomically or leaves the
//! on-disk file untouched.

pub mod boxes;
pub mod error;
pub mod loader;
pub mod muxer;
pub mod payload;
pub mod saver;
pub mod song;
pub mod subtitle;
pub mod timing;
pub mod validate;

pub use error::{Error, Result};
pub use loader::load;
pub use muxer::{mux, MuxRequest, ProgressEvent};
pub use saver::save;
pub use song::Song;

use std::path::PathBuf;

/// kaibox version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming the scratch root
pub const ENV_CACHE_DIR: &str = "KAI_CACHE_DIR";

/// Environment variable naming the external encoder binary
pub const ENV_ENCODER_BIN: &str = "KAI_ENCODER_BIN";

/// Explicit context threaded through façade calls.
///
/// There is no module-level state in this crate; everything an operation
/// needs beyond its inputs lives here.
#[derive(Debug, Clone)]
pub struct Context {
    /// Root for per-job scratch directories (`<cache_dir>/tmp/<uuid>/`)
    pub cache_dir: PathBuf,
    /// External audio encoder binary, resolved via `PATH` when relative
    pub encoder_bin: PathBuf,
    /// Fail parsing on unrecognised box types
    pub strict: bool,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            cache_dir: std::env::temp_dir().join("kaibox"),
            encoder_bin: PathBuf::from("kai-encoder"),
            strict: false,
        }
    }
}

impl Context {
    /// Build a context from `KAI_CACHE_DIR` and `KAI_ENCODER_BIN`, falling
    /// back to the documented defaults
    pub fn from_env() -> Self {
        let mut ctx = Context::default();
        if let Some(dir) = std::env::var_os(ENV_CACHE_DIR) {
            ctx.cache_dir = PathBuf::from(dir);
        }
        if let Some(bin) = std::env::var_os(ENV_ENCODER_BIN) {
            ctx.encoder_bin = PathBuf::from(bin);
        }
        ctx
    }

    /// A fresh scratch directory path under the cache root (not yet created)
    pub fn scratch_dir(&self) -> PathBuf {
        self.cache_dir
            .join("tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}
