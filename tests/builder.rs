//! Atlas build integration tests.
//!
//! These use an in-memory extractor that paints each tile a known colour,
//! so tile placement can be checked without real video files.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reelatlas::{
    AtlasBuilder, AtlasError, AtlasOptions, ExtractionFailure, FrameBuffer, FrameExtractor, FrameResult,
    OperationType, ProgressCallback, ProgressInfo, SiteLayout, StalenessPolicy, VideoAsset,
    list_layout_videos,
};
use tempfile::TempDir;

const ERROR_BACKGROUND: [u8; 3] = [0x37, 0x41, 0x51];
const TOLERANCE: u8 = 12;

#[derive(Default)]
struct PaletteExtractor {
    calls: AtomicUsize,
    colors: HashMap<String, [u8; 3]>,
    failing: Vec<String>,
    slow_at: Option<(Duration, Duration)>,
    panic_on: Option<String>,
}

impl PaletteExtractor {
    fn new(colors: &[(&str, [u8; 3])]) -> Self {
        Self {
            colors: colors
                .iter()
                .map(|(name, color)| (name.to_string(), *color))
                .collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Base colour with the green channel shifted by the timepoint.
fn tile_color(base: [u8; 3], timepoint: Duration) -> [u8; 3] {
    [base[0], base[1] + timepoint.as_secs() as u8 * 8, base[2]]
}

fn png(tile_size: u32, color: [u8; 3]) -> FrameBuffer {
    let image = RgbImage::from_pixel(tile_size, tile_size, Rgb(color));
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    FrameBuffer::new(bytes.into_inner())
}

impl FrameExtractor for PaletteExtractor {
    fn extract(&self, video: &Path, timepoint: Duration, tile_size: u32) -> FrameResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = video.file_name().unwrap().to_str().unwrap().to_string();

        if self.panic_on.as_deref() == Some(name.as_str()) {
            panic!("extractor exploded on {name}");
        }
        if let Some((at, delay)) = self.slow_at {
            if at == timepoint {
                std::thread::sleep(delay);
            }
        }
        if self.failing.contains(&name) {
            return Err(ExtractionFailure::Decode(format!("{name} is unreadable")));
        }

        let base = self.colors.get(&name).copied().unwrap_or([128, 0, 128]);
        Ok(png(tile_size, tile_color(base, timepoint)))
    }
}

struct Site {
    _root: TempDir,
    layout: SiteLayout,
}

fn site_with_videos(names: &[&str]) -> Site {
    let root = tempfile::tempdir().unwrap();
    let layout = SiteLayout::new(root.path().join("static"), root.path().join("build"));
    let videos = layout.static_dir.join("videos");
    fs::create_dir_all(&videos).unwrap();
    for name in names {
        fs::write(videos.join(name), format!("not really {name}")).unwrap();
    }
    Site {
        _root: root,
        layout,
    }
}

fn videos(site: &Site) -> Vec<VideoAsset> {
    list_layout_videos(&site.layout).unwrap()
}

fn load_atlas(builder: &AtlasBuilder) -> RgbImage {
    image::open(builder.atlas_path()).unwrap().into_rgb8()
}

fn assert_close(atlas: &RgbImage, x: u32, y: u32, expected: [u8; 3]) {
    let actual = atlas.get_pixel(x, y).0;
    let close = actual
        .iter()
        .zip(expected)
        .all(|(a, e)| a.abs_diff(e) <= TOLERANCE);
    assert!(close, "pixel ({x}, {y}) is {actual:?}, expected ~{expected:?}");
}

#[tokio::test]
async fn single_video_produces_three_tiles() {
    let site = site_with_videos(&["clip.mp4"]);
    let extractor = Arc::new(PaletteExtractor::new(&[("clip.mp4", [200, 20, 20])]));
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new())
        .with_extractor(extractor.clone());

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();

    assert!(descriptor.has_atlas);
    assert_eq!(descriptor.atlas_url, "/build/thumbnails/atlas.jpg");
    assert_eq!(descriptor.thumbnail_count, 3);
    assert_eq!(descriptor.tile_size, 256);
    assert_eq!(extractor.calls(), 3);

    let atlas = load_atlas(&builder);
    assert_eq!(atlas.dimensions(), (768, 256));
    for (index, seconds) in [5u64, 10, 15].into_iter().enumerate() {
        let expected = tile_color([200, 20, 20], Duration::from_secs(seconds));
        assert_close(&atlas, index as u32 * 256 + 128, 128, expected);
    }

    let metadata = builder.read_metadata().unwrap().unwrap();
    assert_eq!(metadata.videos, vec!["clip.mp4".to_string()]);
    assert_eq!(metadata.timepoints, vec![5.0, 10.0, 15.0]);
    assert_eq!(metadata.tile_count, 3);
    assert_eq!(metadata.jpeg_quality, 80);
}

#[tokio::test]
async fn descriptor_serializes_in_camel_case() {
    let site = site_with_videos(&["clip.mp4"]);
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new())
        .with_extractor(Arc::new(PaletteExtractor::default()));

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();
    let json = serde_json::to_value(&descriptor).unwrap();

    assert_eq!(json["hasAtlas"], true);
    assert_eq!(json["atlasUrl"], "/build/thumbnails/atlas.jpg");
    assert_eq!(json["thumbnailCount"], 3);
    assert_eq!(json["tileSize"], 256);
}

#[tokio::test]
async fn existing_atlas_is_served_without_extraction() {
    let site = site_with_videos(&["a.mp4", "b.mp4"]);
    let extractor = Arc::new(PaletteExtractor::default());
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new().with_tile_size(32))
        .with_extractor(extractor.clone());

    builder.ensure_atlas(&videos(&site)).await.unwrap();
    assert_eq!(extractor.calls(), 6);
    let first = fs::read(builder.atlas_path()).unwrap();

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();
    assert_eq!(extractor.calls(), 6);
    assert!(descriptor.has_atlas);
    assert_eq!(descriptor.thumbnail_count, 6);
    assert_eq!(fs::read(builder.atlas_path()).unwrap(), first);
}

#[tokio::test]
async fn failed_video_keeps_neighbours_in_place() {
    let site = site_with_videos(&["a.mp4", "b.mp4", "c.mp4"]);
    let mut extractor = PaletteExtractor::new(&[("a.mp4", [220, 10, 10]), ("c.mp4", [10, 10, 220])]);
    extractor.failing.push("b.mp4".to_string());
    let extractor = Arc::new(extractor);
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new().with_tile_size(64))
        .with_extractor(extractor.clone());

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();
    assert_eq!(descriptor.thumbnail_count, 9);
    assert_eq!(extractor.calls(), 9);

    let atlas = load_atlas(&builder);
    assert_eq!(atlas.dimensions(), (9 * 64, 64));

    let timepoints = [5u64, 10, 15];
    for (t, seconds) in timepoints.into_iter().enumerate() {
        let timepoint = Duration::from_secs(seconds);
        let a = t as u32;
        let b = 3 + t as u32;
        let c = 6 + t as u32;
        assert_close(&atlas, a * 64 + 32, 32, tile_color([220, 10, 10], timepoint));
        // Corner of the error tile, clear of the marker.
        assert_close(&atlas, b * 64 + 8, 8, ERROR_BACKGROUND);
        assert_close(&atlas, c * 64 + 32, 32, tile_color([10, 10, 220], timepoint));
    }
}

#[tokio::test]
async fn no_videos_builds_nothing() {
    let site = site_with_videos(&[]);
    let extractor = Arc::new(PaletteExtractor::default());
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new())
        .with_extractor(extractor.clone());

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();

    assert!(!descriptor.has_atlas);
    assert_eq!(descriptor.thumbnail_count, 0);
    assert_eq!(extractor.calls(), 0);
    assert!(!builder.atlas_path().exists());
    assert!(!builder.metadata_path().exists());
}

#[tokio::test]
async fn empty_timepoint_set_builds_nothing() {
    let site = site_with_videos(&["clip.mp4"]);
    let extractor = Arc::new(PaletteExtractor::default());
    let options = AtlasOptions::new().with_timepoints(std::iter::empty());
    let builder = AtlasBuilder::from_layout(&site.layout, options).with_extractor(extractor.clone());

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();

    assert!(!descriptor.has_atlas);
    assert_eq!(descriptor.thumbnail_count, 0);
    assert_eq!(extractor.calls(), 0);
    assert!(!builder.atlas_path().exists());
}

#[tokio::test]
async fn composite_failure_reaches_caller_and_writes_nothing() {
    // 86 videos × 3 timepoints × 256 px is wider than a JPEG can be.
    let names: Vec<String> = (0..86).map(|index| format!("clip_{index:03}.mp4")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let site = site_with_videos(&names);
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new())
        .with_extractor(Arc::new(PaletteExtractor::default()));

    let result = builder.ensure_atlas(&videos(&site)).await;

    assert!(
        matches!(result, Err(AtlasError::AtlasTooWide { width: 66_048, .. })),
        "unexpected result: {result:?}"
    );
    assert!(!builder.atlas_path().exists());
    assert!(!builder.metadata_path().exists());
    let atlas_dir = builder.atlas_path().parent().unwrap();
    if atlas_dir.exists() {
        let leftovers: Vec<_> = fs::read_dir(atlas_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }
}

#[tokio::test]
async fn slow_extraction_becomes_error_tile() {
    let site = site_with_videos(&["clip.mp4"]);
    let mut extractor = PaletteExtractor::new(&[("clip.mp4", [200, 20, 20])]);
    extractor.slow_at = Some((Duration::from_secs(10), Duration::from_millis(600)));
    let options = AtlasOptions::new()
        .with_tile_size(64)
        .with_extraction_timeout(Duration::from_millis(100));
    let builder =
        AtlasBuilder::from_layout(&site.layout, options).with_extractor(Arc::new(extractor));

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();
    assert_eq!(descriptor.thumbnail_count, 3);

    let atlas = load_atlas(&builder);
    assert_close(
        &atlas,
        32,
        32,
        tile_color([200, 20, 20], Duration::from_secs(5)),
    );
    assert_close(&atlas, 64 + 8, 8, ERROR_BACKGROUND);
    assert_close(
        &atlas,
        128 + 32,
        32,
        tile_color([200, 20, 20], Duration::from_secs(15)),
    );
}

#[tokio::test]
async fn panicking_extractor_becomes_error_tile() {
    let site = site_with_videos(&["bad.mp4", "good.mp4"]);
    let mut extractor = PaletteExtractor::new(&[("good.mp4", [20, 20, 200])]);
    extractor.panic_on = Some("bad.mp4".to_string());
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new().with_tile_size(64))
        .with_extractor(Arc::new(extractor));

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();
    assert_eq!(descriptor.thumbnail_count, 6);

    let atlas = load_atlas(&builder);
    for index in 0..3 {
        assert_close(&atlas, index * 64 + 8, 8, ERROR_BACKGROUND);
    }
    assert_close(
        &atlas,
        3 * 64 + 32,
        32,
        tile_color([20, 20, 200], Duration::from_secs(5)),
    );
}

#[tokio::test]
async fn presence_only_ignores_new_videos() {
    let site = site_with_videos(&["a.mp4"]);
    let extractor = Arc::new(PaletteExtractor::default());
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new().with_tile_size(16))
        .with_extractor(extractor.clone());

    builder.ensure_atlas(&videos(&site)).await.unwrap();
    fs::write(site.layout.static_dir.join("videos/b.mp4"), "new").unwrap();

    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();
    assert_eq!(extractor.calls(), 3);
    assert_eq!(descriptor.thumbnail_count, 6);
    assert_eq!(load_atlas(&builder).width(), 3 * 16);
}

#[tokio::test]
async fn fingerprint_policy_rebuilds_on_change() {
    let site = site_with_videos(&["a.mp4"]);
    let extractor = Arc::new(PaletteExtractor::default());
    let options = AtlasOptions::new()
        .with_tile_size(16)
        .with_staleness(StalenessPolicy::Fingerprint);
    let builder =
        AtlasBuilder::from_layout(&site.layout, options).with_extractor(extractor.clone());

    builder.ensure_atlas(&videos(&site)).await.unwrap();
    builder.ensure_atlas(&videos(&site)).await.unwrap();
    assert_eq!(extractor.calls(), 3);

    fs::write(site.layout.static_dir.join("videos/b.mp4"), "new").unwrap();
    let descriptor = builder.ensure_atlas(&videos(&site)).await.unwrap();

    assert_eq!(extractor.calls(), 9);
    assert_eq!(descriptor.thumbnail_count, 6);
    assert_eq!(load_atlas(&builder).width(), 6 * 16);
    let metadata = builder.read_metadata().unwrap().unwrap();
    assert_eq!(metadata.fingerprint, builder.fingerprint(&videos(&site)));
}

#[tokio::test]
async fn rebuild_replaces_existing_atlas() {
    let site = site_with_videos(&["a.mp4"]);
    let extractor = Arc::new(PaletteExtractor::default());
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new().with_tile_size(16))
        .with_extractor(extractor.clone());

    builder.ensure_atlas(&videos(&site)).await.unwrap();
    builder.rebuild(&videos(&site)).await.unwrap();
    assert_eq!(extractor.calls(), 6);

    // Only the atlas and its sidecar remain; no staging files.
    let entries = fs::read_dir(site.layout.atlas_dir()).unwrap().count();
    assert_eq!(entries, 2);
}

#[tokio::test]
async fn rebuild_with_no_videos_removes_atlas() {
    let site = site_with_videos(&["a.mp4"]);
    let builder = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new().with_tile_size(16))
        .with_extractor(Arc::new(PaletteExtractor::default()));

    builder.ensure_atlas(&videos(&site)).await.unwrap();
    let descriptor = builder.rebuild(&[]).await.unwrap();

    assert!(!descriptor.has_atlas);
    assert!(!builder.atlas_path().exists());
    assert!(!builder.metadata_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_requests_share_one_build() {
    let site = site_with_videos(&["a.mp4", "b.mp4"]);
    let extractor = Arc::new(PaletteExtractor::default());
    let first = AtlasBuilder::from_layout(&site.layout, AtlasOptions::new().with_tile_size(16))
        .with_extractor(extractor.clone());
    let second = first.clone();
    let listing = videos(&site);

    let (a, b) = tokio::join!(first.ensure_atlas(&listing), second.ensure_atlas(&listing));

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(extractor.calls(), 6);
}

struct Recording(Mutex<Vec<ProgressInfo>>);

impl ProgressCallback for Recording {
    fn on_progress(&self, info: &ProgressInfo) {
        self.0.lock().unwrap().push(info.clone());
    }
}

#[tokio::test]
async fn progress_reports_every_tile() {
    let site = site_with_videos(&["a.mp4", "b.mp4"]);
    let mut extractor = PaletteExtractor::default();
    extractor.failing.push("b.mp4".to_string());
    let recording = Arc::new(Recording(Mutex::new(Vec::new())));
    let options = AtlasOptions::new()
        .with_tile_size(16)
        .with_timepoints([1, 2])
        .with_progress(recording.clone());
    let builder =
        AtlasBuilder::from_layout(&site.layout, options).with_extractor(Arc::new(extractor));

    builder.ensure_atlas(&videos(&site)).await.unwrap();

    let events = recording.0.lock().unwrap();
    assert_eq!(events.len(), 5);
    let tiles: Vec<(String, u64, bool)> = events[..4]
        .iter()
        .map(|info| {
            (
                info.video.clone().unwrap(),
                info.timepoint.unwrap().as_secs(),
                info.extracted,
            )
        })
        .collect();
    assert_eq!(
        tiles,
        vec![
            ("a.mp4".to_string(), 1, true),
            ("a.mp4".to_string(), 2, true),
            ("b.mp4".to_string(), 1, false),
            ("b.mp4".to_string(), 2, false),
        ]
    );
    assert_eq!(events[4].operation, OperationType::Compositing);
    assert_eq!(events[4].total, Some(4));
}
