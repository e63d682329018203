//! Tile rendering.
//!
//! Turns one extraction outcome into exactly one `tile_size × tile_size`
//! RGB tile. A failed extraction, or a frame that cannot be decoded, becomes
//! an error tile: a dark square with a centered "ERROR" marker, so a broken
//! video is visible in the atlas without shifting any neighbouring tile.

use image::{DynamicImage, Rgb, RgbImage, imageops::FilterType};

use crate::extract::FrameResult;

/// Background of an error tile (`#374151`).
pub const ERROR_BACKGROUND: Rgb<u8> = Rgb([0x37, 0x41, 0x51]);

/// Colour of the "ERROR" marker (`#9ca3af`).
pub const ERROR_TEXT: Rgb<u8> = Rgb([0x9c, 0xa3, 0xaf]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_SPACING: u32 = 1;

// 5x7 glyphs, one byte per row, low five bits, MSB on the left.
const GLYPH_E: [u8; 7] = [
    0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111,
];
const GLYPH_R: [u8; 7] = [
    0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
];
const GLYPH_O: [u8; 7] = [
    0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
];

const ERROR_MARKER: [&[u8; 7]; 5] = [&GLYPH_E, &GLYPH_R, &GLYPH_R, &GLYPH_O, &GLYPH_R];

/// Render the tile for one extraction outcome.
///
/// The result is always exactly `tile_size × tile_size`. Frames whose
/// decoded size differs are resized to fit.
pub fn render_tile(result: &FrameResult, tile_size: u32) -> RgbImage {
    let frame = match result {
        Ok(frame) => frame,
        Err(failure) => {
            log::debug!("Rendering error tile: {failure}");
            return error_tile(tile_size);
        }
    };

    let decoded = match image::load_from_memory(frame.bytes()) {
        Ok(decoded) => decoded,
        Err(error) => {
            log::warn!("Extracted frame could not be decoded: {error}");
            return error_tile(tile_size);
        }
    };

    if decoded.width() == tile_size && decoded.height() == tile_size {
        decoded.into_rgb8()
    } else {
        log::debug!(
            "Resizing {}x{} frame to {tile_size}x{tile_size}",
            decoded.width(),
            decoded.height()
        );
        resize_to_tile(decoded, tile_size)
    }
}

fn resize_to_tile(decoded: DynamicImage, tile_size: u32) -> RgbImage {
    decoded
        .resize_exact(tile_size, tile_size, FilterType::Triangle)
        .into_rgb8()
}

/// A placeholder tile with a centered "ERROR" marker.
///
/// The marker is about 14 px tall on a 256 px tile and scales with the tile
/// size. On tiles too small to fit it, the marker is clipped.
pub fn error_tile(tile_size: u32) -> RgbImage {
    let mut tile = RgbImage::from_pixel(tile_size, tile_size, ERROR_BACKGROUND);

    let scale = (tile_size / 128).max(1);
    let glyph_count = ERROR_MARKER.len() as u32;
    let text_width = (glyph_count * GLYPH_WIDTH + (glyph_count - 1) * GLYPH_SPACING) * scale;
    let text_height = GLYPH_HEIGHT * scale;
    let origin_x = tile_size.saturating_sub(text_width) / 2;
    let origin_y = tile_size.saturating_sub(text_height) / 2;

    for (position, glyph) in ERROR_MARKER.iter().enumerate() {
        let glyph_x = origin_x + position as u32 * (GLYPH_WIDTH + GLYPH_SPACING) * scale;
        for (row, bits) in glyph.iter().enumerate() {
            for column in 0..GLYPH_WIDTH {
                if *bits & (1u8 << (GLYPH_WIDTH - 1 - column)) == 0 {
                    continue;
                }
                let x = glyph_x + column * scale;
                let y = origin_y + row as u32 * scale;
                fill_block(&mut tile, x, y, scale, ERROR_TEXT);
            }
        }
    }

    tile
}

fn fill_block(tile: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    for dy in 0..size {
        for dx in 0..size {
            let (px, py) = (x + dx, y + dy);
            if px < tile.width() && py < tile.height() {
                tile.put_pixel(px, py, color);
            }
        }
    }
}
