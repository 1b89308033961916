//! External encoder driver
//!
//! Creating a stem container from per-stem WAV files is the one job this
//! crate delegates: the external audio encoder (named by `KAI_ENCODER_BIN`)
//! muxes N AAC tracks plus the `mov_text` lyric track into a faststart
//! container, and [`create`] then hands the result to the writer façade for
//! the karaoke payload injection.
//!
//! The encoder subprocess speaks a line protocol on stdout: `PROGRESS:{json}`
//! events (`{stage, percent, message?}`) while running and one final
//! `RESULT:{json}` (`{success, ...}`) before exit. Everything else is logged.
//! The job is a small state machine, `Spawned -> Running -> (Succeeded |
//! Failed | Cancelled)`; cancellation is only possible while the subprocess
//! runs, by signalling the child and discarding the scratch directory.

use crate::error::{Error, Result};
use crate::song::{Song, StemProfile, StemRole};
use crate::Context;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// One stem audio input, WAV on disk
#[derive(Debug, Clone)]
pub struct StemInput {
    pub path: PathBuf,
    pub role: StemRole,
}

/// Everything the external encoder needs for one mux
#[derive(Debug, Clone)]
pub struct MuxRequest {
    pub profile: StemProfile,
    /// Mixdown first, then the profile's stem order
    pub stems: Vec<StemInput>,
    /// WebVTT lyric file to embed as the `mov_text` track
    pub subtitle: Option<PathBuf>,
    /// iTunes metadata key/value pairs passed through to the encoder
    pub metadata: Vec<(String, String)>,
}

impl MuxRequest {
    /// Check the stem list against the profile's fixed order
    pub fn validate(&self) -> Result<()> {
        if self.stems.is_empty() {
            return Err(Error::payload("mux request has no stems"));
        }
        if self.stems[0].role != StemRole::Mixdown {
            return Err(Error::payload("first stem must be the mixdown"));
        }
        if let Some(expected) = self.profile.track_count() {
            if self.stems.len() != expected {
                return Err(Error::payload(format!(
                    "profile {} requires {} audio tracks, request has {}",
                    self.profile,
                    expected,
                    self.stems.len()
                )));
            }
        }
        let last = &self.stems[self.stems.len() - 1].role;
        let expected_last = match self.profile {
            StemProfile::Stems4 => Some(StemRole::Vocals),
            StemProfile::Stems2 => Some(StemRole::Music),
            StemProfile::Other(_) => None,
        };
        if let Some(expected_last) = expected_last {
            if *last != expected_last {
                return Err(Error::payload(format!(
                    "profile {} requires the last stem to be {}, found {}",
                    self.profile, expected_last, last
                )));
            }
        }
        Ok(())
    }
}

/// One `PROGRESS:` event from the encoder
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub percent: f32,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultMessage {
    success: bool,
}

/// Lifecycle of one encoder subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeState {
    Spawned,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Scratch directory under the cache root, removed on drop whether the job
/// succeeded or not
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(ctx: &Context) -> Result<Self> {
        let path = ctx.scratch_dir();
        std::fs::create_dir_all(&path)?;
        Ok(ScratchDir { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch dir");
        }
    }
}

/// Mux a container and ignore progress
pub fn mux(ctx: &Context, request: &MuxRequest, out_path: &Path) -> Result<()> {
    mux_with_progress(ctx, request, out_path, |_| {}, &AtomicBool::new(false))
}

/// Mux a container, reporting progress and honouring a cancellation flag.
///
/// On any failure the target path is left nonexistent and the scratch
/// directory is removed. Cancellation kills the child, awaits its exit and
/// returns [`Error::CancelledDuringEncode`].
pub fn mux_with_progress(
    ctx: &Context,
    request: &MuxRequest,
    out_path: &Path,
    mut on_progress: impl FnMut(ProgressEvent),
    cancel: &AtomicBool,
) -> Result<()> {
    request.validate()?;
    let scratch = ScratchDir::create(ctx)?;
    let staged = scratch.path().join("out.stem.m4a");

    let mut command = Command::new(&ctx.encoder_bin);
    command
        .arg("--out")
        .arg(&staged)
        .arg("--profile")
        .arg(request.profile.as_str());
    for stem in &request.stems {
        command
            .arg("--stem")
            .arg(&stem.path)
            .arg("--role")
            .arg(stem.role.as_str());
    }
    if let Some(subtitle) = &request.subtitle {
        command.arg("--subtitle").arg(subtitle);
    }
    for (key, value) in &request.metadata {
        command.arg("--meta").arg(format!("{}={}", key, value));
    }
    command
        .current_dir(scratch.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut state = EncodeState::Spawned;
    let mut child = command.spawn().map_err(|e| {
        Error::ExternalEncoderFailed {
            stderr: format!("failed to spawn {}: {}", ctx.encoder_bin.display(), e),
        }
    })?;
    debug!(?state, pid = child.id(), encoder = %ctx.encoder_bin.display(), "encoder spawned");

    let stdout = child
        .stdout
        .take()
        .expect("stdout was requested as a pipe");
    let mut stderr = child
        .stderr
        .take()
        .expect("stderr was requested as a pipe");
    let stderr_drain = std::thread::spawn(move || {
        let mut text = String::new();
        let _ = stderr.read_to_string(&mut text);
        text
    });

    let mut result: Option<ResultMessage> = None;
    for line in BufReader::new(stdout).lines() {
        if cancel.load(Ordering::Relaxed) {
            let _ = child.kill();
            let _ = child.wait();
            state = EncodeState::Cancelled;
            debug!(?state, "encode cancelled by caller");
            return Err(Error::CancelledDuringEncode);
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Io(e));
            }
        };
        if let Some(json) = line.strip_prefix("PROGRESS:") {
            state = EncodeState::Running;
            match serde_json::from_str::<ProgressEvent>(json) {
                Ok(event) => {
                    debug!(?state, stage = %event.stage, percent = event.percent, "encoder progress");
                    on_progress(event);
                }
                Err(e) => warn!(error = %e, "unparseable progress line"),
            }
        } else if let Some(json) = line.strip_prefix("RESULT:") {
            result = serde_json::from_str(json).ok();
        } else if !line.is_empty() {
            debug!(line = %line, "encoder output");
        }
    }

    let status = child.wait()?;
    let stderr_text = stderr_drain.join().unwrap_or_default();

    if cancel.load(Ordering::Relaxed) {
        state = EncodeState::Cancelled;
        debug!(?state, "encode cancelled by caller");
        return Err(Error::CancelledDuringEncode);
    }

    let succeeded = status.success() && result.map(|r| r.success).unwrap_or(false);
    if !succeeded {
        state = EncodeState::Failed;
        debug!(?state, code = status.code(), "encoder failed");
        return Err(Error::ExternalEncoderFailed {
            stderr: stderr_text,
        });
    }
    state = EncodeState::Succeeded;
    debug!(?state, "encoder finished");

    // Publish from scratch; fall back to copy for cross-device targets.
    if std::fs::rename(&staged, out_path).is_err() {
        std::fs::copy(&staged, out_path)?;
    }
    info!(path = %out_path.display(), "muxed stem container");
    Ok(())
}

/// The full create flow: mux the container, then inject the karaoke payload
/// through the writer façade
pub fn create(ctx: &Context, song: &Song, request: &MuxRequest, out_path: &Path) -> Result<()> {
    mux(ctx, request, out_path)?;
    crate::saver::save(ctx, song, out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stem(role: StemRole) -> StemInput {
        StemInput {
            path: PathBuf::from(format!("{}.wav", role)),
            role,
        }
    }

    fn stems4_request() -> MuxRequest {
        MuxRequest {
            profile: StemProfile::Stems4,
            stems: vec![
                stem(StemRole::Mixdown),
                stem(StemRole::Drums),
                stem(StemRole::Bass),
                stem(StemRole::Other),
                stem(StemRole::Vocals),
            ],
            subtitle: None,
            metadata: Vec::new(),
        }
    }

    #[test]
    fn test_valid_stems4_request() {
        assert!(stems4_request().validate().is_ok());
    }

    #[test]
    fn test_mixdown_must_come_first() {
        let mut request = stems4_request();
        request.stems.swap(0, 1);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_stems4_requires_vocals_last() {
        let mut request = stems4_request();
        request.stems.swap(3, 4);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_stems2_track_count() {
        let request = MuxRequest {
            profile: StemProfile::Stems2,
            stems: vec![stem(StemRole::Mixdown), stem(StemRole::Vocals)],
            subtitle: None,
            metadata: Vec::new(),
        };
        // stems-2 needs three tracks (mixdown, vocals, music)
        assert!(request.validate().is_err());

        let request = MuxRequest {
            profile: StemProfile::Stems2,
            stems: vec![
                stem(StemRole::Mixdown),
                stem(StemRole::Vocals),
                stem(StemRole::Music),
            ],
            subtitle: None,
            metadata: Vec::new(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_progress_event_parsing() {
        let event: ProgressEvent =
            serde_json::from_str(r#"{"stage":"encode","percent":42.5,"message":"drums"}"#)
                .unwrap();
        assert_eq!(event.stage, "encode");
        assert_eq!(event.message.as_deref(), Some("drums"));

        let bare: ProgressEvent =
            serde_json::from_str(r#"{"stage":"mux","percent":99.0}"#).unwrap();
        assert_eq!(bare.message, None);
    }
}
