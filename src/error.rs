//! Error types for the `reelatlas` crate.
//!
//! [`AtlasError`] is returned by every fallible operation that can fail a
//! whole request: listing, compositing, persisting, manifest writing and
//! uploads. Per-tile extraction problems are deliberately *not* errors; they
//! travel as [`ExtractionFailure`](crate::ExtractionFailure) values and end
//! up as error tiles.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use thiserror::Error;

/// The unified error type for `reelatlas` operations.
///
/// Variants that can abort an atlas build name the stage that failed so the
/// caller can log it and retry by re-invoking the build.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AtlasError {
    /// A media file could not be opened for decoding.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to the extractor.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// The tile size is unusable (zero).
    #[error("Invalid tile size: {0}")]
    InvalidTileSize(u32),

    /// The compositor was asked to build an atlas with no tiles.
    #[error("Cannot composite an atlas with zero tiles")]
    EmptyAtlas,

    /// The atlas would exceed the maximum width of the output format.
    #[error("Atlas width {width}px exceeds the {max}px limit of the output format")]
    AtlasTooWide {
        /// Width the atlas would need.
        width: u64,
        /// Largest width the encoder accepts.
        max: u64,
    },

    /// A tile handed to the compositor does not have the atlas tile size.
    #[error("Tile {index} is {width}x{height}, expected {tile_size}x{tile_size}")]
    TileSizeMismatch {
        /// Index of the offending tile.
        index: usize,
        /// Actual tile width.
        width: u32,
        /// Actual tile height.
        height: u32,
        /// Expected edge length.
        tile_size: u32,
    },

    /// Encoding the composited canvas failed.
    #[error("Failed to encode atlas: {0}")]
    AtlasEncode(String),

    /// Persisting the atlas (or its sidecar metadata) failed.
    #[error("Failed to write atlas to {path}: {source}")]
    AtlasWrite {
        /// Final destination of the write.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: IoError,
    },

    /// A blocking build task panicked or was aborted.
    #[error("Build task failed: {0}")]
    TaskFailed(String),

    /// A gallery upload request was malformed.
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// JSON serialization or parsing failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[cfg(feature = "libav")]
impl From<ffmpeg_next::Error> for AtlasError {
    fn from(error: ffmpeg_next::Error) -> Self {
        AtlasError::FfmpegError(error.to_string())
    }
}
