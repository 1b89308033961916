//! External encoder driver tests
//!
//! These tests stand in a tiny shell script for the real audio encoder: it
//! speaks the same `PROGRESS:`/`RESULT:` line protocol and copies a prepared
//! container to the requested output path. This exercises the subprocess
//! plumbing, the failure contract (no target file, no scratch leftovers)
//! and the create flow end to end without a real encoder.

#![cfg(unix)]

mod common;

use common::build_container;
use kaibox::muxer::{self, MuxRequest, StemInput};
use kaibox::song::{Singer, Song, StemProfile, StemRole, StemSource};
use kaibox::{loader, Context, Error};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// A fake encoder that copies `src` to the `--out` argument and reports
/// success over the line protocol
fn fake_encoder(dir: &Path, src: &Path) -> PathBuf {
    let body = format!(
        "#!/bin/sh\n\
         out=\"\"\n\
         prev=\"\"\n\
         for a in \"$@\"; do\n\
         \x20\x20if [ \"$prev\" = \"--out\" ]; then out=\"$a\"; fi\n\
         \x20\x20prev=\"$a\"\n\
         done\n\
         echo 'PROGRESS:{{\"stage\":\"encode\",\"percent\":40.0,\"message\":\"drums\"}}'\n\
         echo 'PROGRESS:{{\"stage\":\"mux\",\"percent\":90.0}}'\n\
         echo 'some incidental logging'\n\
         cp '{}' \"$out\"\n\
         echo 'RESULT:{{\"success\":true}}'\n",
        src.display()
    );
    write_script(dir, "fake-encoder", &body)
}

fn stems4_request(dir: &Path) -> MuxRequest {
    let roles = [
        StemRole::Mixdown,
        StemRole::Drums,
        StemRole::Bass,
        StemRole::Other,
        StemRole::Vocals,
    ];
    MuxRequest {
        profile: StemProfile::Stems4,
        stems: roles
            .into_iter()
            .map(|role| StemInput {
                path: dir.join(format!("{}.wav", role)),
                role,
            })
            .collect(),
        subtitle: None,
        metadata: vec![("title".to_string(), "Night Drive".to_string())],
    }
}

fn stems4_song() -> Song {
    let mut song = Song::default();
    song.audio.sources = [
        StemRole::Mixdown,
        StemRole::Drums,
        StemRole::Bass,
        StemRole::Other,
        StemRole::Vocals,
    ]
    .into_iter()
    .enumerate()
    .map(|(track, role)| StemSource {
        track: track as u32,
        id: format!("track-{}", track),
        role,
    })
    .collect();
    song.singers.push(Singer {
        id: "A".to_string(),
        name: "Lead".to_string(),
        guide_track: 4,
    });
    song
}

fn scratch_is_empty(ctx: &Context) -> bool {
    match std::fs::read_dir(ctx.cache_dir.join("tmp")) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true, // never created
    }
}

#[test]
fn test_mux_reports_progress_and_produces_output() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let container = dir.path().join("prepared.m4a");
    std::fs::write(&container, build_container(5, 4, &[])).unwrap();

    let ctx = Context {
        cache_dir: dir.path().join("cache"),
        encoder_bin: fake_encoder(dir.path(), &container),
        strict: false,
    };

    let out = dir.path().join("muxed.stem.m4a");
    let mut stages = Vec::new();
    muxer::mux_with_progress(
        &ctx,
        &stems4_request(dir.path()),
        &out,
        |event| stages.push(event.stage),
        &AtomicBool::new(false),
    )
    .expect("mux");

    assert_eq!(stages, vec!["encode".to_string(), "mux".to_string()]);
    assert!(out.exists());
    assert!(scratch_is_empty(&ctx));
}

#[test]
fn test_create_muxes_then_injects_payload() {
    let dir = tempfile::tempdir().unwrap();
    let container = dir.path().join("prepared.m4a");
    std::fs::write(&container, build_container(5, 4, &[])).unwrap();

    let ctx = Context {
        cache_dir: dir.path().join("cache"),
        encoder_bin: fake_encoder(dir.path(), &container),
        strict: false,
    };

    let out = dir.path().join("created.stem.m4a");
    muxer::create(&ctx, &stems4_song(), &stems4_request(dir.path()), &out).expect("create");

    let loaded = loader::load(&ctx, &out).expect("created file loads");
    assert_eq!(loaded.audio.sources.len(), 5);
    assert_eq!(loaded.singers.len(), 1);
}

#[test]
fn test_encoder_failure_leaves_no_target_and_no_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "failing-encoder",
        "#!/bin/sh\n\
         echo 'PROGRESS:{\"stage\":\"encode\",\"percent\":10.0}'\n\
         echo 'ran out of disk' >&2\n\
         exit 3\n",
    );
    let ctx = Context {
        cache_dir: dir.path().join("cache"),
        encoder_bin: script,
        strict: false,
    };

    let out = dir.path().join("never.stem.m4a");
    match muxer::mux(&ctx, &stems4_request(dir.path()), &out) {
        Err(Error::ExternalEncoderFailed { stderr }) => {
            assert!(stderr.contains("ran out of disk"));
        }
        other => panic!("expected ExternalEncoderFailed, got {:?}", other),
    }
    assert!(!out.exists());
    assert!(scratch_is_empty(&ctx));
}

#[test]
fn test_result_success_false_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "lying-encoder",
        "#!/bin/sh\n\
         echo 'RESULT:{\"success\":false}'\n\
         exit 0\n",
    );
    let ctx = Context {
        cache_dir: dir.path().join("cache"),
        encoder_bin: script,
        strict: false,
    };

    let out = dir.path().join("never.stem.m4a");
    assert!(matches!(
        muxer::mux(&ctx, &stems4_request(dir.path()), &out),
        Err(Error::ExternalEncoderFailed { .. })
    ));
    assert!(!out.exists());
}

#[test]
fn test_cancellation_kills_the_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "slow-encoder",
        "#!/bin/sh\n\
         echo 'PROGRESS:{\"stage\":\"encode\",\"percent\":1.0}'\n\
         sleep 30\n\
         echo 'RESULT:{\"success\":true}'\n",
    );
    let ctx = Context {
        cache_dir: dir.path().join("cache"),
        encoder_bin: script,
        strict: false,
    };

    let out = dir.path().join("never.stem.m4a");
    let cancelled = AtomicBool::new(true);
    let started = std::time::Instant::now();
    assert!(matches!(
        muxer::mux_with_progress(&ctx, &stems4_request(dir.path()), &out, |_| {}, &cancelled),
        Err(Error::CancelledDuringEncode)
    ));
    assert!(started.elapsed().as_secs() < 25, "cancel must not wait for the child");
    assert!(!out.exists());
    assert!(scratch_is_empty(&ctx));
}

#[test]
fn test_missing_encoder_binary() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context {
        cache_dir: dir.path().join("cache"),
        encoder_bin: dir.path().join("does-not-exist"),
        strict: false,
    };
    assert!(matches!(
        muxer::mux(&ctx, &stems4_request(dir.path()), &dir.path().join("out.m4a")),
        Err(Error::ExternalEncoderFailed { .. })
    ));
}
