//! Atlas layout and compositing.
//!
//! An atlas is a single row of equally-sized square tiles. Tile `i` belongs
//! to video `i / timepoints` at timepoint `i % timepoints` and sits at
//! pixel offset `(i × tile_size, 0)`. Consumers address tiles with
//! [`AtlasLayout`]; the image itself is produced once per build by
//! [`composite`].
//!
//! # Example
//!
//! ```
//! use reelatlas::AtlasLayout;
//!
//! let layout = AtlasLayout::new(256, 4, 3);
//! assert_eq!(layout.width(), 256 * 12);
//! assert_eq!(layout.index_of(2, 1), Some(7));
//! assert_eq!(layout.offset(7), Some((1792, 0)));
//! ```

use std::io::Cursor;

use image::{GenericImage, Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;

/// Canvas fill behind the tiles (`#f3f4f6`).
pub const CANVAS_BACKGROUND: Rgb<u8> = Rgb([0xf3, 0xf4, 0xf6]);

/// Largest width or height a baseline JPEG can encode.
pub const MAX_JPEG_DIMENSION: u64 = 65_535;

/// Geometry of a single-row atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasLayout {
    /// Edge length of one tile, in pixels.
    pub tile_size: u32,
    /// Number of videos in the atlas.
    pub video_count: usize,
    /// Number of timepoints sampled per video.
    pub timepoint_count: usize,
}

/// Where one tile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileAddress {
    /// Index of the video in listing order.
    pub video: usize,
    /// Index of the timepoint in sampling order.
    pub timepoint: usize,
}

impl AtlasLayout {
    /// Describe an atlas of `video_count × timepoint_count` tiles.
    pub fn new(tile_size: u32, video_count: usize, timepoint_count: usize) -> Self {
        Self {
            tile_size,
            video_count,
            timepoint_count,
        }
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> usize {
        self.video_count * self.timepoint_count
    }

    /// Width of the atlas image in pixels.
    pub fn width(&self) -> u64 {
        self.tile_size as u64 * self.tile_count() as u64
    }

    /// Height of the atlas image in pixels.
    pub fn height(&self) -> u32 {
        self.tile_size
    }

    /// Tile index of `(video, timepoint)`, or `None` when out of range.
    pub fn index_of(&self, video: usize, timepoint: usize) -> Option<usize> {
        (video < self.video_count && timepoint < self.timepoint_count)
            .then(|| video * self.timepoint_count + timepoint)
    }

    /// Inverse of [`index_of`](Self::index_of).
    pub fn locate(&self, index: usize) -> Option<TileAddress> {
        (index < self.tile_count()).then(|| TileAddress {
            video: index / self.timepoint_count,
            timepoint: index % self.timepoint_count,
        })
    }

    /// Pixel offset `(x, y)` of tile `index`.
    pub fn offset(&self, index: usize) -> Option<(u64, u32)> {
        (index < self.tile_count()).then(|| (index as u64 * self.tile_size as u64, 0))
    }
}

/// Composite `tiles` into a single-row atlas and encode it as JPEG.
///
/// Tile `i` is placed at `x = i × tile_size`, strictly in slice order.
///
/// # Errors
///
/// - [`AtlasError::InvalidTileSize`] if `tile_size` is zero.
/// - [`AtlasError::EmptyAtlas`] if `tiles` is empty.
/// - [`AtlasError::AtlasTooWide`] if the atlas would exceed
///   [`MAX_JPEG_DIMENSION`].
/// - [`AtlasError::TileSizeMismatch`] if any tile is not
///   `tile_size × tile_size`.
/// - [`AtlasError::AtlasEncode`] if JPEG encoding fails.
pub fn composite(tile_size: u32, tiles: &[RgbImage], quality: u8) -> Result<Vec<u8>, AtlasError> {
    if tile_size == 0 {
        return Err(AtlasError::InvalidTileSize(tile_size));
    }
    if tiles.is_empty() {
        return Err(AtlasError::EmptyAtlas);
    }

    let width = tile_size as u64 * tiles.len() as u64;
    if width > MAX_JPEG_DIMENSION || tile_size as u64 > MAX_JPEG_DIMENSION {
        return Err(AtlasError::AtlasTooWide {
            width,
            max: MAX_JPEG_DIMENSION,
        });
    }

    if let Some((index, tile)) = tiles
        .iter()
        .enumerate()
        .find(|(_, tile)| tile.dimensions() != (tile_size, tile_size))
    {
        return Err(AtlasError::TileSizeMismatch {
            index,
            width: tile.width(),
            height: tile.height(),
            tile_size,
        });
    }

    log::debug!(
        "Compositing {} tile(s) into a {width}x{tile_size} atlas",
        tiles.len()
    );

    let mut canvas = RgbImage::from_pixel(width as u32, tile_size, CANVAS_BACKGROUND);
    for (index, tile) in tiles.iter().enumerate() {
        canvas
            .copy_from(tile, index as u32 * tile_size, 0)
            .map_err(|error| AtlasError::AtlasEncode(error.to_string()))?;
    }

    let mut encoded = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut encoded, quality)
        .encode_image(&canvas)
        .map_err(|error| AtlasError::AtlasEncode(error.to_string()))?;

    Ok(encoded.into_inner())
}
