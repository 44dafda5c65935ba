//! PNG decode and re-encode: defilter/deinterlace via the `png` crate,
//! then re-frame the raw samples for a PDF image
//! XObject, splitting out alpha as a separate `/SMask` stream and palettes
//! as a separate lookup-table stream.

use std::fmt;
use std::io::Cursor;
use std::io::Write as _;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::{ColorSpaceKind, EncodedImage};

#[derive(Debug)]
pub enum PngError {
    Decode(png::DecodingError),
    UnsupportedColorType,
}
impl fmt::Display for PngError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "PNG decode error: {}", e),
            Self::UnsupportedColorType => write!(f, "unsupported PNG color type"),
        }
    }
}
impl std::error::Error for PngError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::UnsupportedColorType => None,
        }
    }
}
impl From<png::DecodingError> for PngError {
    fn from(value: png::DecodingError) -> Self { Self::Decode(value) }
}

pub fn encode_png(bytes: &[u8]) -> Result<EncodedImage, PngError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;

    let mut raw = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut raw)?;
    raw.truncate(frame.buffer_size());

    let width = frame.width;
    let height = frame.height;
    let bit_depth = bit_depth_bits(frame.bit_depth);
    let interlaced = reader.info().interlaced;

    let (base_components, has_alpha, color_space) = match frame.color_type {
        png::ColorType::Grayscale => (1u8, false, ColorSpaceKind::DeviceGray),
        png::ColorType::GrayscaleAlpha => (1u8, true, ColorSpaceKind::DeviceGray),
        png::ColorType::Rgb => (3u8, false, ColorSpaceKind::DeviceRgb),
        png::ColorType::Rgba => (3u8, true, ColorSpaceKind::DeviceRgb),
        png::ColorType::Indexed => (1u8, false, ColorSpaceKind::Indexed),
        _ => return Err(PngError::UnsupportedColorType),
    };

    let (color_samples, split_alpha) = if has_alpha {
        split_interleaved_alpha(&raw, base_components, bit_depth)
    } else {
        (raw, None)
    };

    let palette = if matches!(frame.color_type, png::ColorType::Indexed) {
        Some(reader.info().palette.as_deref().unwrap_or(&[]).to_vec())
    } else {
        None
    };

    let trns_alpha = if matches!(frame.color_type, png::ColorType::Indexed) {
        reader
            .info()
            .trns
            .as_deref()
            .map(|trns| expand_indexed_alpha(&color_samples, width, bit_depth, trns))
    } else {
        None
    };

    let alpha_samples = split_alpha.or(trns_alpha);

    let color_stream = encode_samples(&color_samples, width, base_components, bit_depth, interlaced);
    let alpha_stream = alpha_samples.map(|alpha| encode_samples(&alpha, width, 1, 8, interlaced));

    Ok(super::raster(
        width,
        height,
        color_stream,
        color_space,
        bit_depth,
        base_components,
        interlaced,
        palette,
        alpha_stream,
    ))
}

fn bit_depth_bits(depth: png::BitDepth) -> u8 {
    match depth {
        png::BitDepth::One => 1,
        png::BitDepth::Two => 2,
        png::BitDepth::Four => 4,
        png::BitDepth::Eight => 8,
        png::BitDepth::Sixteen => 16,
    }
}

/// Splits interleaved colour+alpha samples (only ever 8 or 16 bit per
/// PNG's own rules) into a colour-only buffer and an alpha buffer in the
/// same bit depth.
fn split_interleaved_alpha(data: &[u8], color_components: u8, bit_depth: u8) -> (Vec<u8>, Option<Vec<u8>>) {
    let bytes_per_sample = (bit_depth / 8).max(1) as usize;
    let total_components = color_components as usize + 1;
    let pixel_stride = total_components * bytes_per_sample;
    let color_stride = color_components as usize * bytes_per_sample;

    let mut color = Vec::with_capacity(data.len());
    let mut alpha = Vec::with_capacity(data.len() / total_components.max(1));

    for pixel in data.chunks_exact(pixel_stride) {
        color.extend_from_slice(&pixel[..color_stride]);
        alpha.extend_from_slice(&pixel[color_stride..]);
    }
    (color, Some(alpha))
}

/// Maps each palette index sample to its tRNS alpha byte (255 when the
/// palette entry has no explicit alpha), producing an 8-bit gray buffer.
fn expand_indexed_alpha(indices: &[u8], width: u32, bit_depth: u8, trns: &[u8]) -> Vec<u8> {
    let row_bytes = ((width as usize * bit_depth as usize) + 7) / 8;
    let mut alpha = Vec::with_capacity(indices.len().max(1) / row_bytes.max(1) * width as usize);
    for row in indices.chunks(row_bytes) {
        for x in 0..width as usize {
            let index = read_packed_sample(row, x, bit_depth);
            alpha.push(trns.get(index as usize).copied().unwrap_or(255));
        }
    }
    alpha
}

fn read_packed_sample(row: &[u8], x: usize, bit_depth: u8) -> u8 {
    match bit_depth {
        8 => row.get(x).copied().unwrap_or(0),
        1 | 2 | 4 => {
            let per_byte = 8 / bit_depth as usize;
            let byte = row.get(x / per_byte).copied().unwrap_or(0);
            let shift = 8 - bit_depth as usize * (x % per_byte + 1);
            (byte >> shift) & ((1 << bit_depth) - 1)
        }
        _ => 0,
    }
}

/// Applies the PNG "Up" predictor row-by-row (filter type 2, matching PDF
/// `/Predictor 12`) and DEFLATE-compresses the result. Interlaced sources
/// skip the predictor: the decoded buffer is already post-Adam7-deinterlace
/// and row adjacency no longer lines up with anything meaningful to
/// predict from.
fn encode_samples(data: &[u8], width: u32, components: u8, bit_depth: u8, interlaced: bool) -> Vec<u8> {
    let row_bytes = ((width as usize * components as usize * bit_depth as usize) + 7) / 8;
    let mut filtered = Vec::with_capacity(data.len() + data.len() / row_bytes.max(1) + 1);

    if interlaced || row_bytes == 0 {
        filtered.extend_from_slice(data);
    } else {
        let mut prior = vec![0u8; row_bytes];
        for row in data.chunks(row_bytes) {
            filtered.push(2); // PNG filter type "Up"
            for (i, &byte) in row.iter().enumerate() {
                filtered.push(byte.wrapping_sub(prior[i]));
            }
            prior[..row.len()].copy_from_slice(row);
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&filtered).expect("in-memory zlib write cannot fail");
    encoder.finish().expect("in-memory zlib finish cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_filter_then_deflate_produces_nonempty_stream() {
        let data = vec![10, 20, 30, 12, 22, 33];
        let compressed = encode_samples(&data, 3, 1, 8, false);
        assert!(!compressed.is_empty());
    }

    #[test]
    fn packed_sample_reads_nibbles_in_order() {
        let row = [0b1010_0101u8];
        assert_eq!(read_packed_sample(&row, 0, 4), 0b1010);
        assert_eq!(read_packed_sample(&row, 1, 4), 0b0101);
    }

    #[test]
    fn indexed_alpha_falls_back_to_opaque_for_entries_without_trns() {
        let indices = vec![0u8, 1, 2];
        let trns = [0u8, 128]; // only indices 0 and 1 have explicit alpha
        let alpha = expand_indexed_alpha(&indices, 3, 8, &trns);
        assert_eq!(alpha, vec![0, 128, 255]);
    }
}
