//! # reelatlas
//!
//! Pre-render sprite atlases of sampled video frames, and gallery manifests,
//! for static media sites.
//!
//! `reelatlas` samples a few frames from every video in a directory, crops
//! them to squares, and packs them into a single-row JPEG atlas that a
//! client can address by index. Extraction is powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate, or by an
//! `ffmpeg` executable.
//!
//! ## Quick Start
//!
//! ### Build the Atlas
//!
//! ```no_run
//! use reelatlas::{AtlasBuilder, AtlasOptions, SiteLayout, list_layout_videos};
//!
//! # async fn example() -> Result<(), reelatlas::AtlasError> {
//! let layout = SiteLayout::new("static", "build");
//! let videos = list_layout_videos(&layout)?;
//! let builder = AtlasBuilder::from_layout(&layout, AtlasOptions::new());
//! let descriptor = builder.ensure_atlas(&videos).await?;
//! assert_eq!(descriptor.thumbnail_count, videos.len() * 3);
//! # Ok(())
//! # }
//! ```
//!
//! ### Address a Tile
//!
//! ```
//! use reelatlas::AtlasLayout;
//!
//! // Second video, third timepoint.
//! let layout = AtlasLayout::new(256, 10, 3);
//! let index = layout.index_of(1, 2).unwrap();
//! assert_eq!(layout.offset(index), Some((5 * 256, 0)));
//! ```
//!
//! ### Write the Gallery Manifest
//!
//! ```no_run
//! use reelatlas::{IMAGE_EXTENSIONS, SiteLayout, build_manifest, write_manifest};
//!
//! let layout = SiteLayout::default();
//! let manifest = build_manifest(
//!     &layout.gallery_dir(),
//!     IMAGE_EXTENSIONS,
//!     &layout.gallery_url_root(),
//! )?;
//! write_manifest(&manifest, &layout.manifest_path())?;
//! # Ok::<(), reelatlas::AtlasError>(())
//! ```
//!
//! ## Features
//!
//! - **Deterministic tiles**: videos in lexical order × fixed timepoints,
//!   tile `i = video × timepoints + timepoint`
//! - **Error tiles**: a video that cannot be decoded gets a visible "ERROR"
//!   tile in its slots instead of failing the build
//! - **Atomic output**: the atlas and its `atlas.json` sidecar are replaced
//!   whole or not at all
//! - **Staleness policies**: presence-only (default) or listing fingerprint
//! - **Serialized builds**: concurrent requests for one atlas share a build
//! - **Progress callbacks** for long builds
//! - **Gallery manifests** and **thumbnail uploads**
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `libav` | In-process extraction through FFmpeg's libraries (default) |
//! | `server` | axum HTTP endpoints for the atlas, listing, manifest and uploads |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! With the `libav` feature, FFmpeg development libraries must be installed.
//! Without it, an `ffmpeg` executable is run per frame instead.

pub mod atlas;
pub mod builder;
pub mod configuration;
#[cfg(feature = "libav")]
mod conversion;
pub mod error;
pub mod extract;
#[cfg(feature = "libav")]
pub mod ffmpeg;
pub mod library;
pub mod manifest;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;
pub mod tile;
pub mod upload;

pub use atlas::{AtlasLayout, TileAddress, composite};
pub use builder::{AtlasBuilder, AtlasDescriptor, AtlasMetadata};
pub use configuration::{
    AtlasOptions, ExtractorBackend, SiteLayout, StalenessPolicy, DEFAULT_TILE_SIZE,
    DEFAULT_TIMEPOINTS,
};
pub use error::AtlasError;
#[cfg(feature = "libav")]
pub use extract::LibavExtractor;
pub use extract::{
    ExtractionFailure, FrameBuffer, FrameExtractor, FrameResult, ProcessExtractor, center_square,
};
#[cfg(feature = "libav")]
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use library::{
    IMAGE_EXTENSIONS, VIDEO_EXTENSIONS, VideoAsset, display_name, list_layout_videos, list_videos,
};
pub use manifest::{
    GalleryManifest, ManifestItem, build_manifest, encode_uri_component, write_manifest,
};
pub use progress::{OperationType, ProgressCallback, ProgressInfo};
#[cfg(feature = "server")]
pub use server::{AppState, router};
pub use tile::{error_tile, render_tile};
pub use upload::{StoredThumbnail, ThumbnailStore, UploadRequest};
