//! # Template Raster Decoding
//!
//! Streaming decode of the server-rendered template image (PNG) into a
//! packed, panel-native pixel buffer. This is the only place compressed
//! image bytes are touched.
//!
//! ## Supported source formats
//!
//! The server renders templates in exactly one compressed raster format
//! (PNG); within it, three pixel layouts are accepted and normalized to the
//! panel's native depth:
//!
//! - **1-bit grayscale**: already panel-shaped; copied verbatim for 1 bpp
//!   targets (1 = white), expanded to full/empty nibbles for 4 bpp targets
//! - **8-bit grayscale**: high nibble per pixel for 4 bpp targets, simple
//!   mid-point threshold for 1 bpp targets
//! - **24-bit RGB**: unweighted channel average to grayscale, then as above
//!
//! ## Memory behavior
//!
//! The decoder writes scanline by scanline into a caller-supplied buffer and
//! never resizes it. A source whose decoded dimensions disagree with the
//! buffer's allocated dimensions is a hard [`DecodeError::DimensionMismatch`],
//! never a silent truncation. The only allocation is one scanline of
//! grayscale scratch. No state survives between calls.
//!
//! Every failure is recoverable: the caller discards the half-written buffer
//! and either retries next cycle or falls back to text-only rendering.

use crate::panel::PixelDepth;
use thiserror::Error;

/// The 8-byte PNG stream signature, checked before any decode work.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Errors from a template decode attempt. All are recoverable; none leave
/// decoder state behind.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The byte stream is not PNG at all (wrong magic)
    #[error("not a PNG stream")]
    InvalidFormat,

    /// The stream is PNG but damaged or truncated
    #[error("malformed PNG: {0}")]
    Malformed(#[from] png::DecodingError),

    /// Decoded dimensions disagree with the destination buffer
    #[error("image is {got_w}x{got_h} but buffer was allocated for {want_w}x{want_h}")]
    DimensionMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    /// A pixel layout outside the three supported ones
    #[error("unsupported pixel format {color:?}/{depth:?}")]
    UnsupportedFormat {
        color: png::ColorType,
        depth: png::BitDepth,
    },

    /// Interlaced sources are not streamable scanline-by-scanline
    #[error("interlaced PNG not supported")]
    Interlaced,

    /// Destination buffer is smaller than width x height at the target depth
    #[error("destination buffer is {got} bytes, needs {need}")]
    BufferTooSmall { got: usize, need: usize },
}

/// What a successful decode produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedInfo {
    pub width: u32,
    pub height: u32,
    /// Scanlines written; always equals `height` on success
    pub scanlines: u32,
}

/// Accepted source pixel layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SourceFormat {
    Mono1,
    Gray8,
    Rgb8,
}

/// Decode `compressed` into `dest`, converting to `target_depth`.
///
/// `dest` must hold exactly `dest_width x dest_height` pixels packed at the
/// target depth; it is written scanline by scanline and never resized. On
/// error the buffer contents are unspecified and must be discarded.
pub fn decode(
    compressed: &[u8],
    dest: &mut [u8],
    dest_width: u32,
    dest_height: u32,
    target_depth: PixelDepth,
) -> Result<DecodedInfo, DecodeError> {
    // Fail fast on anything that is not PNG, before the decoder allocates.
    if compressed.len() < PNG_SIGNATURE.len() || compressed[..8] != PNG_SIGNATURE {
        return Err(DecodeError::InvalidFormat);
    }

    let decoder = png::Decoder::new(compressed);
    let mut reader = decoder.read_info()?;

    let (width, height, color_type, bit_depth, interlaced) = {
        let info = reader.info();
        (
            info.width,
            info.height,
            info.color_type,
            info.bit_depth,
            info.interlaced,
        )
    };

    if interlaced {
        return Err(DecodeError::Interlaced);
    }

    let format = match (color_type, bit_depth) {
        (png::ColorType::Grayscale, png::BitDepth::One) => SourceFormat::Mono1,
        (png::ColorType::Grayscale, png::BitDepth::Eight) => SourceFormat::Gray8,
        (png::ColorType::Rgb, png::BitDepth::Eight) => SourceFormat::Rgb8,
        (color, depth) => return Err(DecodeError::UnsupportedFormat { color, depth }),
    };

    if width != dest_width || height != dest_height {
        return Err(DecodeError::DimensionMismatch {
            got_w: width,
            got_h: height,
            want_w: dest_width,
            want_h: dest_height,
        });
    }

    let bytes_per_row = target_depth.bytes_per_row(dest_width);
    let need = bytes_per_row * dest_height as usize;
    if dest.len() < need {
        return Err(DecodeError::BufferTooSmall {
            got: dest.len(),
            need,
        });
    }

    // One scanline of grayscale scratch; the only allocation in here.
    let mut luma = vec![0u8; width as usize];
    let mut scanlines: u32 = 0;

    while let Some(row) = reader.next_row()? {
        let out = &mut dest[scanlines as usize * bytes_per_row..][..bytes_per_row];

        if format == SourceFormat::Mono1 && target_depth == PixelDepth::Mono {
            // Identical packing and polarity (1 = white): verbatim copy.
            out.copy_from_slice(&row.data()[..bytes_per_row]);
        } else {
            expand_luma(format, row.data(), &mut luma);
            pack_row(&luma, out, target_depth);
        }
        scanlines += 1;
    }

    Ok(DecodedInfo {
        width,
        height,
        scanlines,
    })
}

/// Expand one source scanline to 8-bit luminance, one byte per pixel.
fn expand_luma(format: SourceFormat, row: &[u8], luma: &mut [u8]) {
    match format {
        SourceFormat::Mono1 => {
            for (x, out) in luma.iter_mut().enumerate() {
                let bit = row[x / 8] & (0x80 >> (x % 8));
                *out = if bit != 0 { 0xFF } else { 0x00 };
            }
        }
        SourceFormat::Gray8 => luma.copy_from_slice(&row[..luma.len()]),
        SourceFormat::Rgb8 => {
            for (x, out) in luma.iter_mut().enumerate() {
                let p = &row[x * 3..x * 3 + 3];
                // Unweighted channel average
                *out = ((p[0] as u16 + p[1] as u16 + p[2] as u16) / 3) as u8;
            }
        }
    }
}

/// Pack one luminance scanline into the panel-native layout.
fn pack_row(luma: &[u8], out: &mut [u8], depth: PixelDepth) {
    match depth {
        PixelDepth::Mono => {
            // Start all white, clear bits for dark pixels.
            out.fill(0xFF);
            for (x, &l) in luma.iter().enumerate() {
                if l < 0x80 {
                    out[x / 8] &= !(0x80 >> (x % 8));
                }
            }
        }
        PixelDepth::Gray4 => {
            out.fill(0x00);
            for (x, &l) in luma.iter().enumerate() {
                // High nibble of the source level is the output level.
                if x % 2 == 0 {
                    out[x / 2] |= l & 0xF0;
                } else {
                    out[x / 2] |= l >> 4;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a PNG in-memory with the given layout and raw packed rows.
    fn encode_png(
        width: u32,
        height: u32,
        color: png::ColorType,
        depth: png::BitDepth,
        data: &[u8],
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, width, height);
            encoder.set_color(color);
            encoder.set_depth(depth);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        bytes
    }

    #[test]
    fn one_bit_source_copies_verbatim_to_mono() {
        let rows = [0b1010_0001u8, 0b0110_0000, 0b1111_1111, 0b0000_0000];
        let png = encode_png(
            16,
            2,
            png::ColorType::Grayscale,
            png::BitDepth::One,
            &rows,
        );

        let mut dest = vec![0u8; 4];
        let info = decode(&png, &mut dest, 16, 2, PixelDepth::Mono).unwrap();
        assert_eq!(info.scanlines, 2);
        assert_eq!(dest, rows);
    }

    #[test]
    fn one_bit_source_expands_to_nibbles_for_gray4() {
        // Two pixels: white then black
        let png = encode_png(
            2,
            1,
            png::ColorType::Grayscale,
            png::BitDepth::One,
            &[0b1000_0000],
        );

        let mut dest = vec![0u8; 1];
        decode(&png, &mut dest, 2, 1, PixelDepth::Gray4).unwrap();
        assert_eq!(dest, [0xF0]);
    }

    #[test]
    fn gray8_source_keeps_high_nibble_for_gray4() {
        let png = encode_png(
            4,
            1,
            png::ColorType::Grayscale,
            png::BitDepth::Eight,
            &[0x00, 0x7F, 0x80, 0xFF],
        );

        let mut dest = vec![0u8; 2];
        decode(&png, &mut dest, 4, 1, PixelDepth::Gray4).unwrap();
        assert_eq!(dest, [0x07, 0x8F]);
    }

    #[test]
    fn gray8_source_thresholds_for_mono() {
        let png = encode_png(
            4,
            1,
            png::ColorType::Grayscale,
            png::BitDepth::Eight,
            &[0x00, 0x7F, 0x80, 0xFF],
        );

        let mut dest = vec![0u8; 1];
        decode(&png, &mut dest, 4, 1, PixelDepth::Mono).unwrap();
        // First two pixels dark, last two light, then white padding bits
        assert_eq!(dest, [0b0011_1111]);
    }

    #[test]
    fn rgb_source_averages_channels() {
        let png = encode_png(
            2,
            1,
            png::ColorType::Rgb,
            png::BitDepth::Eight,
            &[10, 20, 30, 250, 250, 250],
        );

        let mut dest = vec![0u8; 1];
        decode(&png, &mut dest, 2, 1, PixelDepth::Gray4).unwrap();
        // avg(10,20,30)=20 -> nibble 0x1; avg(250)=250 -> nibble 0xF
        assert_eq!(dest, [0x1F]);
    }

    #[test]
    fn wrong_magic_fails_fast() {
        let mut dest = vec![0u8; 8];
        let err = decode(b"GIF89a junk", &mut dest, 8, 8, PixelDepth::Mono).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFormat));
    }

    #[test]
    fn dimension_mismatch_is_not_truncated() {
        let png = encode_png(
            4,
            1,
            png::ColorType::Grayscale,
            png::BitDepth::Eight,
            &[0, 0, 0, 0],
        );

        let mut dest = vec![0u8; 100];
        let err = decode(&png, &mut dest, 8, 8, PixelDepth::Mono).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::DimensionMismatch {
                got_w: 4,
                got_h: 1,
                want_w: 8,
                want_h: 8,
            }
        ));
    }

    #[test]
    fn sixteen_bit_gray_is_unsupported() {
        let png = encode_png(
            1,
            1,
            png::ColorType::Grayscale,
            png::BitDepth::Sixteen,
            &[0x12, 0x34],
        );

        let mut dest = vec![0u8; 1];
        let err = decode(&png, &mut dest, 1, 1, PixelDepth::Mono).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat { .. }));
    }

    #[test]
    fn undersized_destination_is_rejected() {
        let png = encode_png(
            8,
            2,
            png::ColorType::Grayscale,
            png::BitDepth::One,
            &[0xFF, 0x00],
        );

        let mut dest = vec![0u8; 1];
        let err = decode(&png, &mut dest, 8, 2, PixelDepth::Mono).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BufferTooSmall { got: 1, need: 2 }
        ));
    }
}
