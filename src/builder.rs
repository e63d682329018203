//! Atlas build orchestration.
//!
//! [`AtlasBuilder`] decides whether an atlas must be built, walks every
//! `(video, timepoint)` pair in listing order, and persists the composited
//! atlas together with a JSON sidecar describing how to address it.
//!
//! Extraction runs on Tokio's blocking pool, one pair at a time, each under
//! a timeout. A pair that fails, times out or panics yields an error tile in
//! its slot; the build always covers the full work set. Only compositing,
//! encoding and writing can fail a build.
//!
//! Concurrent builds of the same atlas path are serialized by a per-path
//! build permit. A caller that waited for the permit re-checks the atlas and
//! returns without building when another caller already produced it.
//!
//! # Example
//!
//! ```no_run
//! use reelatlas::{AtlasBuilder, AtlasError, AtlasOptions, SiteLayout, list_layout_videos};
//!
//! # async fn example() -> Result<(), AtlasError> {
//! let layout = SiteLayout::new("static", "build");
//! let builder = AtlasBuilder::from_layout(&layout, AtlasOptions::new());
//! let videos = list_layout_videos(&layout)?;
//! let descriptor = builder.ensure_atlas(&videos).await?;
//! println!("{} tiles at {}", descriptor.thumbnail_count, descriptor.atlas_url);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::atlas::{AtlasLayout, composite};
use crate::configuration::{AtlasOptions, ExtractorBackend, SiteLayout, StalenessPolicy};
use crate::error::AtlasError;
use crate::extract::{ExtractionFailure, FrameExtractor, ProcessExtractor};
use crate::library::VideoAsset;
use crate::progress::ProgressTracker;
use crate::tile::{error_tile, render_tile};

/// What a client needs to address into the atlas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasDescriptor {
    /// Whether the atlas file exists.
    pub has_atlas: bool,
    /// Public URL of the atlas image.
    pub atlas_url: String,
    /// `videos × timepoints`, whether or not every extraction succeeded.
    pub thumbnail_count: usize,
    /// Edge length of one tile, in pixels.
    pub tile_size: u32,
}

/// Sidecar metadata persisted next to the atlas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasMetadata {
    /// Edge length of one tile, in pixels.
    pub tile_size: u32,
    /// Number of tiles in the atlas.
    pub tile_count: usize,
    /// Sampling timepoints in seconds, in tile order.
    pub timepoints: Vec<f64>,
    /// Video file names in tile order.
    pub videos: Vec<String>,
    /// Digest of the listing the atlas was built from.
    pub fingerprint: String,
    /// JPEG quality the atlas was encoded with.
    pub jpeg_quality: u8,
    /// When the atlas was written.
    pub created_at: DateTime<Utc>,
}

impl AtlasMetadata {
    /// The layout the atlas was built with.
    pub fn layout(&self) -> AtlasLayout {
        AtlasLayout::new(self.tile_size, self.videos.len(), self.timepoints.len())
    }
}

type BuildPermit = Arc<tokio::sync::Mutex<()>>;

fn build_permit(atlas_path: &Path) -> BuildPermit {
    static PERMITS: OnceLock<Mutex<HashMap<PathBuf, BuildPermit>>> = OnceLock::new();
    let mut permits = PERMITS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    permits
        .entry(permit_key(atlas_path))
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

/// Normalize `atlas_path` so every spelling of one file maps to one permit.
///
/// The parent directory is canonicalized when it exists; otherwise the
/// lexically absolute path is used.
fn permit_key(atlas_path: &Path) -> PathBuf {
    let absolute = std::path::absolute(atlas_path).unwrap_or_else(|_| atlas_path.to_path_buf());
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name())
        && let Ok(dir) = fs::canonicalize(parent)
    {
        return dir.join(name);
    }
    absolute
}

fn default_extractor(options: &AtlasOptions) -> Arc<dyn FrameExtractor> {
    match &options.backend {
        #[cfg(feature = "libav")]
        ExtractorBackend::Libav => Arc::new(crate::extract::LibavExtractor::new()),
        ExtractorBackend::Process { ffmpeg } => Arc::new(
            ProcessExtractor::new(ffmpeg.clone(), options.scratch_dir())
                .with_timeout(options.extraction_timeout),
        ),
    }
}

/// Builds and describes the atlas at one output path.
#[derive(Clone)]
pub struct AtlasBuilder {
    atlas_path: PathBuf,
    atlas_url: String,
    options: AtlasOptions,
    extractor: Arc<dyn FrameExtractor>,
}

impl Debug for AtlasBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AtlasBuilder")
            .field("atlas_path", &self.atlas_path)
            .field("atlas_url", &self.atlas_url)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AtlasBuilder {
    /// Create a builder writing to `atlas_path`, served at `atlas_url`.
    ///
    /// The frame extractor is chosen from the options' backend.
    pub fn new<P: Into<PathBuf>, U: Into<String>>(
        atlas_path: P,
        atlas_url: U,
        options: AtlasOptions,
    ) -> Self {
        let extractor = default_extractor(&options);
        Self {
            atlas_path: atlas_path.into(),
            atlas_url: atlas_url.into(),
            options,
            extractor,
        }
    }

    /// Create a builder for the atlas of a [`SiteLayout`].
    pub fn from_layout(layout: &SiteLayout, options: AtlasOptions) -> Self {
        Self::new(layout.atlas_path(), layout.atlas_url(), options)
    }

    /// Replace the frame extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn FrameExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Path of the atlas image.
    pub fn atlas_path(&self) -> &Path {
        &self.atlas_path
    }

    /// Path of the sidecar metadata.
    pub fn metadata_path(&self) -> PathBuf {
        self.atlas_path.with_extension("json")
    }

    /// The build options.
    pub fn options(&self) -> &AtlasOptions {
        &self.options
    }

    /// Layout an atlas of `videos` would have.
    pub fn layout(&self, videos: &[VideoAsset]) -> AtlasLayout {
        AtlasLayout::new(
            self.options.tile_size,
            videos.len(),
            self.options.timepoints.len(),
        )
    }

    /// Describe the atlas for `videos` without building anything.
    pub fn describe(&self, videos: &[VideoAsset]) -> AtlasDescriptor {
        AtlasDescriptor {
            has_atlas: self.atlas_path.is_file(),
            atlas_url: self.atlas_url.clone(),
            thumbnail_count: self.layout(videos).tile_count(),
            tile_size: self.options.tile_size,
        }
    }

    /// Make sure an atlas for `videos` exists, building it if needed.
    ///
    /// With no tiles to draw (no videos or no timepoints) nothing is built
    /// or written. Otherwise the atlas is built when the staleness policy
    /// says the current file is unusable.
    ///
    /// # Errors
    ///
    /// Returns an error only when compositing, encoding or writing the
    /// atlas fails. Individual extraction failures become error tiles.
    pub async fn ensure_atlas(&self, videos: &[VideoAsset]) -> Result<AtlasDescriptor, AtlasError> {
        if self.layout(videos).tile_count() == 0 {
            log::debug!("No tiles to draw; skipping atlas build");
            return Ok(self.describe(videos));
        }
        if self.is_current(videos) {
            log::debug!("Atlas at {} is current", self.atlas_path.display());
            return Ok(self.describe(videos));
        }

        let permit = build_permit(&self.atlas_path);
        let _guard = permit.lock().await;

        if self.is_current(videos) {
            log::debug!(
                "Atlas at {} was built while waiting",
                self.atlas_path.display()
            );
            return Ok(self.describe(videos));
        }

        self.build(videos).await?;
        Ok(self.describe(videos))
    }

    /// Build a fresh atlas, replacing the current one.
    ///
    /// With no tiles to draw the atlas and its sidecar are removed and
    /// nothing is built.
    ///
    /// # Errors
    ///
    /// Same as [`ensure_atlas`](Self::ensure_atlas), plus failures to
    /// remove the old files.
    pub async fn rebuild(&self, videos: &[VideoAsset]) -> Result<AtlasDescriptor, AtlasError> {
        let permit = build_permit(&self.atlas_path);
        let _guard = permit.lock().await;

        if self.layout(videos).tile_count() == 0 {
            remove_if_present(&self.atlas_path)?;
            remove_if_present(&self.metadata_path())?;
            return Ok(self.describe(videos));
        }

        self.build(videos).await?;
        Ok(self.describe(videos))
    }

    /// Read the sidecar metadata, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar exists but cannot be read or parsed.
    pub fn read_metadata(&self) -> Result<Option<AtlasMetadata>, AtlasError> {
        let path = self.metadata_path();
        if !path.is_file() {
            return Ok(None);
        }
        let contents = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    /// Digest of everything that determines the atlas contents.
    pub fn fingerprint(&self, videos: &[VideoAsset]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.options.tile_size.to_le_bytes());
        for timepoint in &self.options.timepoints {
            hasher.update(timepoint.as_millis().to_le_bytes());
        }
        for video in videos {
            hasher.update(video.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(video.size.to_le_bytes());
            hasher.update(video.last_modified.timestamp_millis().to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn is_current(&self, videos: &[VideoAsset]) -> bool {
        if !self.atlas_path.is_file() {
            return false;
        }
        match self.options.staleness {
            StalenessPolicy::PresenceOnly => true,
            StalenessPolicy::Fingerprint => match self.read_metadata() {
                Ok(Some(metadata)) => metadata.fingerprint == self.fingerprint(videos),
                Ok(None) => false,
                Err(error) => {
                    log::warn!("Ignoring unreadable atlas metadata: {error}");
                    false
                }
            },
        }
    }

    async fn build(&self, videos: &[VideoAsset]) -> Result<(), AtlasError> {
        let layout = self.layout(videos);
        let tile_size = self.options.tile_size;
        log::info!(
            "Building atlas of {} tile(s) for {} video(s) at {}",
            layout.tile_count(),
            videos.len(),
            self.atlas_path.display()
        );

        let mut tracker =
            ProgressTracker::new(self.options.progress.clone(), layout.tile_count() as u64);
        let mut tiles = Vec::with_capacity(layout.tile_count());
        let mut failures = 0usize;

        for video in videos {
            for &timepoint in &self.options.timepoints {
                let (tile, failure) = self.extract_tile(&video.path, timepoint).await;
                if let Some(failure) = &failure {
                    failures += 1;
                    log::warn!(
                        "Using error tile for {} @ {:?}: {failure}",
                        video.name,
                        timepoint
                    );
                }
                tracker.tile_done(&video.name, timepoint, failure.is_none());
                tiles.push(tile);
            }
        }

        tracker.compositing();
        let quality = self.options.jpeg_quality;
        let encoded = tokio::task::spawn_blocking(move || composite(tile_size, &tiles, quality))
            .await
            .map_err(|error| AtlasError::TaskFailed(error.to_string()))??;

        let metadata = AtlasMetadata {
            tile_size,
            tile_count: layout.tile_count(),
            timepoints: self
                .options
                .timepoints
                .iter()
                .map(Duration::as_secs_f64)
                .collect(),
            videos: videos.iter().map(|video| video.name.clone()).collect(),
            fingerprint: self.fingerprint(videos),
            jpeg_quality: quality,
            created_at: Utc::now(),
        };
        let sidecar = serde_json::to_vec_pretty(&metadata)?;

        let atlas_path = self.atlas_path.clone();
        let metadata_path = self.metadata_path();
        tokio::task::spawn_blocking(move || {
            write_atomic(&atlas_path, &encoded)?;
            write_atomic(&metadata_path, &sidecar)
        })
        .await
        .map_err(|error| AtlasError::TaskFailed(error.to_string()))??;

        log::info!(
            "Wrote atlas {} ({} error tile(s))",
            self.atlas_path.display(),
            failures
        );
        Ok(())
    }

    /// Extract and render one tile on the blocking pool.
    ///
    /// Never fails: timeouts and panics are turned into error tiles.
    async fn extract_tile(
        &self,
        video: &Path,
        timepoint: Duration,
    ) -> (RgbImage, Option<ExtractionFailure>) {
        let extractor = self.extractor.clone();
        let video = video.to_path_buf();
        let tile_size = self.options.tile_size;
        let limit = self.options.extraction_timeout;

        let task = tokio::task::spawn_blocking(move || {
            let result = extractor.extract(&video, timepoint, tile_size);
            let failure = result.as_ref().err().cloned();
            (render_tile(&result, tile_size), failure)
        });

        let failure = match tokio::time::timeout(limit, task).await {
            Ok(Ok(rendered)) => return rendered,
            Ok(Err(join_error)) => ExtractionFailure::Aborted(join_error.to_string()),
            Err(_) => ExtractionFailure::TimedOut(limit),
        };
        (error_tile(tile_size), Some(failure))
    }
}

/// Write `contents` to `path` through a temporary file in the same
/// directory, so readers see either the old file or the new one.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AtlasError> {
    let write_error = |source| AtlasError::AtlasWrite {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_error)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".reelatlas-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_error)?;
    staged.write_all(contents).map_err(write_error)?;
    staged.as_file().sync_all().map_err(write_error)?;
    staged
        .persist(path)
        .map_err(|error| write_error(error.error))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), AtlasError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(AtlasError::AtlasWrite {
            path: path.to_path_buf(),
            source,
        }),
    }
}
