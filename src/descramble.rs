//! Tile descrambling for hot-link-protected page images.
//!
//! One site serves its page images with the tiles of a fixed grid shuffled
//! by an integer offset, and relies on its reader script to reassemble them
//! in the browser. [`descramble`] reverses that shuffle on the fetched
//! bytes so the caller sees the image as drawn.
//!
//! The grid divides the image into pieces of at most 200px per side, with
//! at least a 5×5 split. For every tile except the last row and column,
//! the shuffled source index on an axis is `(max - idx + offset) mod max`
//! where `max` is the highest tile index on that axis — the modulus is the
//! index, not the tile count, and the final row/column is never permuted.
//! That asymmetry is inherited from the site's own scheme and must match
//! it exactly.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use tracing::warn;

const PIECE_SIZE: u32 = 200;
const MIN_SPLIT_COUNT: u32 = 5;
const JPEG_QUALITY: u8 = 90;

/// Decode `bytes`, reverse the tile shuffle, and re-encode as JPEG.
///
/// Fails closed: bytes that do not decode (or re-encode) are returned
/// unchanged, so a still-scrambled image renders rather than nothing.
#[must_use]
pub fn descramble(bytes: &[u8], offset: i64) -> Vec<u8> {
    let decoded = match image::load_from_memory(bytes) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            warn!(error = %e, "scrambled image did not decode; passing bytes through");
            return bytes.to_vec();
        }
    };

    let restored = descramble_tiles(&decoded, offset);
    let rgb = DynamicImage::ImageRgba8(restored).to_rgb8();

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    match rgb.write_with_encoder(encoder) {
        Ok(()) => out,
        Err(e) => {
            warn!(error = %e, "descrambled image did not encode; passing bytes through");
            bytes.to_vec()
        }
    }
}

/// Reverse the tile shuffle on a decoded image.
///
/// Pure transform over pixel data; exact, no re-encoding loss.
#[must_use]
pub fn descramble_tiles(img: &RgbaImage, offset: i64) -> RgbaImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let piece_width = PIECE_SIZE.min(width.div_ceil(MIN_SPLIT_COUNT));
    let piece_height = PIECE_SIZE.min(height.div_ceil(MIN_SPLIT_COUNT));
    let x_max = width.div_ceil(piece_width) - 1;
    let y_max = height.div_ceil(piece_height) - 1;

    let mut out = RgbaImage::new(width, height);
    for y in 0..=y_max {
        for x in 0..=x_max {
            let x_dst = piece_width * x;
            let y_dst = piece_height * y;
            let w = piece_width.min(width - x_dst);
            let h = piece_height.min(height - y_dst);

            let x_src = piece_width * source_index(x, x_max, offset);
            let y_src = piece_height * source_index(y, y_max, offset);

            for dy in 0..h {
                for dx in 0..w {
                    let pixel = img.get_pixel(x_src + dx, y_src + dy);
                    out.put_pixel(x_dst + dx, y_dst + dy, *pixel);
                }
            }
        }
    }
    out
}

/// Shuffled source index for destination index `idx` on an axis whose
/// highest index is `max`. The final tile stays in place.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn source_index(idx: u32, max: u32, offset: i64) -> u32 {
    if idx == max || max == 0 {
        idx
    } else {
        (i64::from(max) - i64::from(idx) + offset).rem_euclid(i64::from(max)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Apply the site's forward shuffle: the tile drawn at `dst` is stored
    /// at its permuted `src` slot.
    fn scramble_tiles(img: &RgbaImage, offset: i64) -> RgbaImage {
        let (width, height) = img.dimensions();
        let piece_width = PIECE_SIZE.min(width.div_ceil(MIN_SPLIT_COUNT));
        let piece_height = PIECE_SIZE.min(height.div_ceil(MIN_SPLIT_COUNT));
        let x_max = width.div_ceil(piece_width) - 1;
        let y_max = height.div_ceil(piece_height) - 1;

        let mut out = RgbaImage::new(width, height);
        for y in 0..=y_max {
            for x in 0..=x_max {
                let x_dst = piece_width * x;
                let y_dst = piece_height * y;
                let w = piece_width.min(width - x_dst);
                let h = piece_height.min(height - y_dst);

                let x_src = piece_width * source_index(x, x_max, offset);
                let y_src = piece_height * source_index(y, y_max, offset);

                for dy in 0..h {
                    for dx in 0..w {
                        let pixel = img.get_pixel(x_dst + dx, y_dst + dy);
                        out.put_pixel(x_src + dx, y_src + dy, *pixel);
                    }
                }
            }
        }
        out
    }

    /// Deterministic test pattern with a unique color per pixel position.
    fn pattern(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([
                (x % 251) as u8,
                (y % 241) as u8,
                ((x + y) % 239) as u8,
                255,
            ])
        })
    }

    #[test]
    fn round_trips_exactly() {
        for (width, height, offset) in [(10, 10, 1), (97, 53, 3), (1000, 1413, 7), (200, 200, 0)] {
            let original = pattern(width, height);
            let scrambled = scramble_tiles(&original, offset);
            let restored = descramble_tiles(&scrambled, offset);
            assert_eq!(
                restored.as_raw(),
                original.as_raw(),
                "round trip failed for {width}x{height} offset {offset}"
            );
        }
    }

    #[test]
    fn scramble_moves_non_edge_tiles() {
        let original = pattern(100, 100);
        let scrambled = scramble_tiles(&original, 1);
        assert_ne!(scrambled.as_raw(), original.as_raw());
    }

    #[test]
    fn final_row_and_column_are_invariant() {
        // 97x53 with a 5-split gives 20x11 pieces and ragged edge tiles.
        let original = pattern(97, 53);
        let scrambled = scramble_tiles(&original, 4);

        let piece_width = PIECE_SIZE.min(97u32.div_ceil(MIN_SPLIT_COUNT));
        let piece_height = PIECE_SIZE.min(53u32.div_ceil(MIN_SPLIT_COUNT));
        let x_edge = (97u32.div_ceil(piece_width) - 1) * piece_width;
        let y_edge = (53u32.div_ceil(piece_height) - 1) * piece_height;

        for x in x_edge..97 {
            for y in 0..53 {
                assert_eq!(scrambled.get_pixel(x, y), original.get_pixel(x, y));
            }
        }
        for y in y_edge..53 {
            for x in 0..97 {
                assert_eq!(scrambled.get_pixel(x, y), original.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn source_index_uses_max_as_modulus() {
        // 5 tiles per axis: indices 0..=4, modulus 4.
        assert_eq!(source_index(0, 4, 1), 1);
        assert_eq!(source_index(1, 4, 1), 0);
        assert_eq!(source_index(2, 4, 1), 3);
        assert_eq!(source_index(3, 4, 1), 2);
        // The final index never moves.
        assert_eq!(source_index(4, 4, 1), 4);
    }

    #[test]
    fn single_tile_axis_is_identity() {
        assert_eq!(source_index(0, 0, 9), 0);
    }

    #[test]
    fn undecodable_bytes_pass_through() {
        let garbage = b"definitely not an image".to_vec();
        assert_eq!(descramble(&garbage, 3), garbage);
    }

    #[test]
    fn decodable_bytes_come_back_as_jpeg_with_same_dimensions() {
        let original = pattern(60, 40);
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(original)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let out = descramble(&png, 2);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 60);
        assert_eq!(decoded.height(), 40);
        assert_eq!(
            image::guess_format(&out).unwrap(),
            image::ImageFormat::Jpeg
        );
    }
}
