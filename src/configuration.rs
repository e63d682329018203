//! Build configuration.
//!
//! [`AtlasOptions`] is a builder that threads tile geometry, sampling
//! timepoints, encoder quality, timeouts and progress reporting through an
//! atlas build. [`SiteLayout`] names the directories and URL roots of the
//! site; the output root is injected here instead of being switched by a
//! process-wide build flag.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use reelatlas::{AtlasOptions, SiteLayout, StalenessPolicy};
//!
//! let layout = SiteLayout::new("static", "build");
//! let options = AtlasOptions::new()
//!     .with_tile_size(256)
//!     .with_timepoints([5, 10, 15])
//!     .with_extraction_timeout(Duration::from_secs(20))
//!     .with_staleness(StalenessPolicy::Fingerprint);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::progress::{NoOpProgress, ProgressCallback};

/// Edge length of one atlas tile, in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Seconds into every video at which a frame is sampled, in atlas order.
///
/// The cardinality of this set fixes the atlas layout: video `v` owns tiles
/// `v * 3 .. v * 3 + 3`.
pub const DEFAULT_TIMEPOINTS: [u64; 3] = [5, 10, 15];

/// JPEG quality of the encoded atlas.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Upper bound on a single frame extraction before it is treated as failed.
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// File name of the atlas inside the thumbnails directory.
pub const ATLAS_FILE_NAME: &str = "atlas.jpg";

/// File name of the atlas sidecar metadata.
pub const ATLAS_METADATA_FILE_NAME: &str = "atlas.json";

/// Which frame extractor an [`AtlasBuilder`](crate::AtlasBuilder) uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorBackend {
    /// Decode in-process through the FFmpeg libraries.
    #[cfg(feature = "libav")]
    Libav,
    /// Run an `ffmpeg` executable per frame, staging output in a scratch file.
    Process {
        /// Executable to run (`ffmpeg` on `PATH` by default).
        ffmpeg: PathBuf,
    },
}

impl Default for ExtractorBackend {
    #[cfg(feature = "libav")]
    fn default() -> Self {
        ExtractorBackend::Libav
    }

    #[cfg(not(feature = "libav"))]
    fn default() -> Self {
        ExtractorBackend::Process {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

/// When an existing atlas file is considered good enough to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalenessPolicy {
    /// Any existing atlas is served as-is. Changes to the video set are not
    /// picked up until the atlas file is deleted.
    #[default]
    PresenceOnly,
    /// Rebuild when the sidecar fingerprint does not match the current
    /// listing (or the sidecar is missing).
    Fingerprint,
}

/// Configuration for atlas builds.
#[derive(Clone)]
pub struct AtlasOptions {
    pub(crate) tile_size: u32,
    pub(crate) timepoints: Vec<Duration>,
    pub(crate) jpeg_quality: u8,
    pub(crate) extraction_timeout: Duration,
    pub(crate) backend: ExtractorBackend,
    pub(crate) scratch_dir: Option<PathBuf>,
    pub(crate) staleness: StalenessPolicy,
    pub(crate) progress: Arc<dyn ProgressCallback>,
}

impl Debug for AtlasOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AtlasOptions")
            .field("tile_size", &self.tile_size)
            .field("timepoints", &self.timepoints)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("extraction_timeout", &self.extraction_timeout)
            .field("backend", &self.backend)
            .field("scratch_dir", &self.scratch_dir)
            .field("staleness", &self.staleness)
            .finish_non_exhaustive()
    }
}

impl Default for AtlasOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AtlasOptions {
    /// Create options with the default tile size, timepoints and quality.
    pub fn new() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            timepoints: DEFAULT_TIMEPOINTS
                .iter()
                .map(|&seconds| Duration::from_secs(seconds))
                .collect(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            backend: ExtractorBackend::default(),
            scratch_dir: None,
            staleness: StalenessPolicy::default(),
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Set the tile edge length in pixels. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    /// Set the ordered sampling timepoints, in whole seconds.
    #[must_use]
    pub fn with_timepoints<I>(mut self, seconds: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        self.timepoints = seconds.into_iter().map(Duration::from_secs).collect();
        self
    }

    /// Set the JPEG quality (1–100) of the encoded atlas.
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set how long one extraction may take before an error tile is used.
    #[must_use]
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    /// Choose the frame extractor.
    #[must_use]
    pub fn with_backend(mut self, backend: ExtractorBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Directory for per-extraction scratch files. Defaults to the system
    /// temporary directory.
    #[must_use]
    pub fn with_scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Choose when an existing atlas is rebuilt.
    #[must_use]
    pub fn with_staleness(mut self, policy: StalenessPolicy) -> Self {
        self.staleness = policy;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Tile edge length in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Sampling timepoints in atlas order.
    pub fn timepoints(&self) -> &[Duration] {
        &self.timepoints
    }

    pub(crate) fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Directory and URL layout of the site.
///
/// Source media lives under the static directory; generated artifacts go
/// under the output root, which callers choose explicitly (for example
/// `build/` while pre-rendering and `static/` when serving live).
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct SiteLayout {
    /// Directory holding `videos/` and `gallery_thumbs/`.
    pub static_dir: PathBuf,
    /// Directory generated artifacts are written to.
    pub output_root: PathBuf,
    /// URL path under which the output root is served, without a trailing
    /// slash.
    pub served_root: String,
}

impl SiteLayout {
    /// Create a layout with the default served root (`/build`).
    pub fn new<S: Into<PathBuf>, O: Into<PathBuf>>(static_dir: S, output_root: O) -> Self {
        Self {
            static_dir: static_dir.into(),
            output_root: output_root.into(),
            served_root: "/build".to_string(),
        }
    }

    /// Set the URL path the output root is served under.
    pub fn with_served_root<S: Into<String>>(mut self, served_root: S) -> Self {
        let served_root = served_root.into();
        self.served_root = served_root.trim_end_matches('/').to_string();
        self
    }

    /// Candidate video directories, in order of preference.
    pub fn video_dir_candidates(&self) -> [PathBuf; 2] {
        [
            self.static_dir.join("videos"),
            self.output_root.join("videos"),
        ]
    }

    /// The first existing video directory, if any.
    ///
    /// Listing and atlas builds both go through this so they always agree
    /// on which directory defines the tile order.
    pub fn resolve_video_dir(&self) -> Option<PathBuf> {
        self.video_dir_candidates()
            .into_iter()
            .find(|candidate| candidate.is_dir())
    }

    /// Directory of uploaded gallery thumbnails.
    pub fn gallery_dir(&self) -> PathBuf {
        self.static_dir.join("gallery_thumbs")
    }

    /// Directory the atlas and its sidecar are written to.
    pub fn atlas_dir(&self) -> PathBuf {
        self.output_root.join("thumbnails")
    }

    /// Full path of the atlas image.
    pub fn atlas_path(&self) -> PathBuf {
        self.atlas_dir().join(ATLAS_FILE_NAME)
    }

    /// Public URL of the atlas image.
    pub fn atlas_url(&self) -> String {
        format!("{}/thumbnails/{ATLAS_FILE_NAME}", self.served_root)
    }

    /// URL prefix of gallery thumbnails in manifests.
    pub fn gallery_url_root(&self) -> String {
        format!("{}/gallery_thumbs", self.served_root)
    }

    /// Where the build-time gallery manifest is written.
    pub fn manifest_path(&self) -> PathBuf {
        self.output_root.join("api").join("gallery_thumbs")
    }
}

impl Default for SiteLayout {
    fn default() -> Self {
        Self::new(Path::new("static"), Path::new("build"))
    }
}
