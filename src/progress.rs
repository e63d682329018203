//! Progress reporting for atlas builds.
//!
//! An atlas build is a long, strictly sequential walk over every
//! (video, timepoint) pair. [`ProgressCallback`] lets callers observe that
//! walk; the CLI uses it to drive a progress bar.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use reelatlas::{AtlasOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("[{:?}] {pct:.1}% complete", info.operation);
//!         }
//!     }
//! }
//!
//! let options = AtlasOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

/// The stage of an atlas build currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Extracting and rendering one tile.
    TileExtraction,
    /// Compositing and encoding the finished atlas.
    Compositing,
}

/// A snapshot of build progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// How many tiles have been produced so far.
    pub current: u64,
    /// Total tiles expected.
    pub total: Option<u64>,
    /// Completion percentage (0.0 – 100.0), if `total` is known.
    pub percentage: Option<f32>,
    /// Wall-clock time elapsed since the build started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// File name of the video the last tile was sampled from.
    pub video: Option<String>,
    /// Timepoint the last tile was sampled at.
    pub timepoint: Option<Duration>,
    /// Whether the last tile holds a real frame (`false` for error tiles).
    pub extracted: bool,
}

/// Trait for receiving progress updates during a build.
///
/// Callbacks observe but cannot halt the build.
pub trait ProgressCallback: Send + Sync {
    /// Called after every tile and once before compositing.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all progress notifications. Default when no callback is set.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Tracks timing for one build and emits callbacks.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    total: u64,
    current: u64,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>, total: u64) -> Self {
        Self {
            callback,
            total,
            current: 0,
            start_time: Instant::now(),
        }
    }

    /// Record one finished tile.
    pub(crate) fn tile_done(&mut self, video: &str, timepoint: Duration, extracted: bool) {
        self.current += 1;
        self.report(
            OperationType::TileExtraction,
            Some(video.to_string()),
            Some(timepoint),
            extracted,
        );
    }

    /// Announce the composite stage.
    pub(crate) fn compositing(&self) {
        self.report(OperationType::Compositing, None, None, true);
    }

    fn report(
        &self,
        operation: OperationType,
        video: Option<String>,
        timepoint: Option<Duration>,
        extracted: bool,
    ) {
        let elapsed = self.start_time.elapsed();

        let percentage = (self.total > 0).then(|| (self.current as f32 / self.total as f32) * 100.0);

        let estimated_remaining = if self.current > 0 {
            let remaining = self.total.saturating_sub(self.current);
            let per_item = elapsed / self.current as u32;
            Some(per_item * remaining as u32)
        } else {
            None
        };

        let info = ProgressInfo {
            operation,
            current: self.current,
            total: Some(self.total),
            percentage,
            elapsed,
            estimated_remaining,
            video,
            timepoint,
            extracted,
        };

        self.callback.on_progress(&info);
    }
}
