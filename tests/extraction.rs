//! Frame extraction against real media.
//!
//! Media tests require fixture files from `tests/fixtures/generate_fixtures.sh`
//! and return early when they are missing. The scripted `ffmpeg` tests always
//! run on unix.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use reelatlas::{FrameExtractor, ProcessExtractor, render_tile};

fn sample_video_path() -> &'static str {
    "tests/fixtures/sample_video.mp4"
}

fn sample_portrait_path() -> &'static str {
    "tests/fixtures/sample_portrait.mp4"
}

fn sample_short_path() -> &'static str {
    "tests/fixtures/sample_short.mp4"
}

fn sample_audio_only_path() -> &'static str {
    "tests/fixtures/sample_audio_only.mp4"
}

fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .is_ok_and(|output| output.status.success())
}

fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
    let image = image::load_from_memory(bytes).expect("extracted frame should decode");
    (image.width(), image.height())
}

#[test]
fn process_extractor_produces_square_tile() {
    let path = sample_video_path();
    if !Path::new(path).exists() || !ffmpeg_available() {
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let extractor = ProcessExtractor::new("ffmpeg", scratch.path())
        .with_timeout(Duration::from_secs(30));
    let frame = extractor
        .extract(Path::new(path), Duration::from_secs(5), 128)
        .expect("frame at 5s");

    assert_eq!(decoded_dimensions(frame.bytes()), (128, 128));
    assert_eq!(
        std::fs::read_dir(scratch.path()).unwrap().count(),
        0,
        "scratch file removed"
    );
}

#[test]
fn process_extractor_handles_portrait_input() {
    let path = sample_portrait_path();
    if !Path::new(path).exists() || !ffmpeg_available() {
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let extractor = ProcessExtractor::new("ffmpeg", scratch.path());
    let frame = extractor
        .extract(Path::new(path), Duration::from_secs(5), 64)
        .expect("frame at 5s");

    assert_eq!(decoded_dimensions(frame.bytes()), (64, 64));
}

#[test]
fn process_extractor_past_end_fails() {
    let path = sample_short_path();
    if !Path::new(path).exists() || !ffmpeg_available() {
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let extractor = ProcessExtractor::new("ffmpeg", scratch.path());
    let result = extractor.extract(Path::new(path), Duration::from_secs(15), 64);

    assert!(result.is_err());
    assert_eq!(render_tile(&result, 64), reelatlas::error_tile(64));
}

#[test]
fn process_extractor_parallel_calls_do_not_collide() {
    let path = sample_video_path();
    if !Path::new(path).exists() || !ffmpeg_available() {
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let extractor = ProcessExtractor::new("ffmpeg", scratch.path());
    std::thread::scope(|scope| {
        let handles: Vec<_> = [5u64, 10, 15]
            .into_iter()
            .map(|seconds| {
                let extractor = &extractor;
                scope.spawn(move || {
                    extractor.extract(Path::new(path), Duration::from_secs(seconds), 32)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
    });
}

/// Stand-in `ffmpeg` executables, so the process extractor's plumbing is
/// exercised without real media.
#[cfg(unix)]
mod scripted_ffmpeg {
    use std::fs;
    use std::io::Cursor;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use image::{DynamicImage, ImageFormat, RgbImage};
    use reelatlas::{ExtractionFailure, FrameExtractor, ProcessExtractor};

    // Writing an executable while another test thread forks can fail the
    // exec with ETXTBSY.
    static SCRIPTS: Mutex<()> = Mutex::new(());

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ffmpeg");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn png(size: u32) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(size, size))
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn frame_is_read_back_and_scratch_file_removed() {
        let _guard = SCRIPTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let frame = png(16);
        let source = bin.path().join("frame.png");
        fs::write(&source, &frame).unwrap();
        let ffmpeg = write_script(
            bin.path(),
            &format!("for last; do :; done\ncp \"{}\" \"$last\"", source.display()),
        );

        let extractor =
            ProcessExtractor::new(&ffmpeg, scratch.path()).with_timeout(Duration::from_secs(20));
        let result = extractor.extract(Path::new("clip.mp4"), Duration::from_secs(5), 16);

        assert_eq!(result.unwrap().bytes(), &frame[..]);
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn verbose_stderr_fails_fast() {
        let _guard = SCRIPTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(
            bin.path(),
            "head -c 300000 /dev/zero | tr '\\0' x >&2\necho 'moov atom not found' >&2\nexit 1",
        );

        let extractor =
            ProcessExtractor::new(&ffmpeg, scratch.path()).with_timeout(Duration::from_secs(20));
        let started = Instant::now();
        let result = extractor.extract(Path::new("clip.mp4"), Duration::from_secs(5), 16);

        assert!(started.elapsed() < Duration::from_secs(10));
        match result {
            Err(ExtractionFailure::Decode(message)) => {
                assert!(message.contains("moov atom not found"));
                assert!(message.len() < 4096);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn clean_exit_without_output_is_a_failure() {
        let _guard = SCRIPTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(bin.path(), "exit 0");

        let extractor = ProcessExtractor::new(&ffmpeg, scratch.path());
        let result = extractor.extract(Path::new("clip.mp4"), Duration::from_secs(15), 16);

        assert!(matches!(result, Err(ExtractionFailure::Decode(_))));
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}

#[cfg(feature = "libav")]
mod libav {
    use super::*;
    use reelatlas::{ExtractionFailure, LibavExtractor};

    #[test]
    fn produces_square_tile() {
        let path = sample_video_path();
        if !Path::new(path).exists() {
            return;
        }

        let frame = LibavExtractor::new()
            .extract(Path::new(path), Duration::from_secs(5), 256)
            .expect("frame at 5s");
        assert_eq!(decoded_dimensions(frame.bytes()), (256, 256));
    }

    #[test]
    fn handles_portrait_input() {
        let path = sample_portrait_path();
        if !Path::new(path).exists() {
            return;
        }

        let frame = LibavExtractor::new()
            .extract(Path::new(path), Duration::from_secs(10), 96)
            .expect("frame at 10s");
        assert_eq!(decoded_dimensions(frame.bytes()), (96, 96));
    }

    #[test]
    fn timepoint_past_end_is_reported() {
        let path = sample_short_path();
        if !Path::new(path).exists() {
            return;
        }

        let result = LibavExtractor::new().extract(Path::new(path), Duration::from_secs(15), 64);
        assert!(
            matches!(result, Err(ExtractionFailure::BeyondEnd { .. })),
            "unexpected result: {result:?}"
        );
    }

    #[test]
    fn audio_only_file_fails_cleanly() {
        let path = sample_audio_only_path();
        if !Path::new(path).exists() {
            return;
        }

        let result = LibavExtractor::new().extract(Path::new(path), Duration::from_secs(1), 64);
        assert!(matches!(result, Err(ExtractionFailure::Decode(_))));
    }

    #[test]
    fn missing_file_fails_cleanly() {
        let result = LibavExtractor::new().extract(
            Path::new("tests/fixtures/does_not_exist.mp4"),
            Duration::from_secs(5),
            64,
        );
        assert!(matches!(result, Err(ExtractionFailure::Decode(_))));
    }
}
