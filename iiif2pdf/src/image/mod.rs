//! Image codec adapters: JPEG passthrough and PNG decode + re-encode,
//! each producing ready-to-write PDF image XObjects.

mod png_codec;

use std::fmt;

use crate::jpeg::{self, Channels};
use crate::pdfvalue::PdfValue;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    Jpeg,
    Png,
    Unsupported,
}
impl PixelFormat {
    pub fn from_media_type(media_type: &str) -> Self {
        let media_type = media_type.split(';').next().unwrap_or(media_type).trim();
        match media_type {
            "image/jpeg" | "image/jpg" => Self::Jpeg,
            "image/png" => Self::Png,
            _ => Self::Unsupported,
        }
    }

    pub fn from_extension(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            Self::Jpeg
        } else if lower.ends_with(".png") {
            Self::Png
        } else {
            Self::Unsupported
        }
    }
}

#[derive(Debug)]
pub enum ImageError {
    UnsupportedFormat,
    Jpeg(jpeg::Error),
    Png(png_codec::PngError),
}
impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFormat => write!(f, "unsupported image format"),
            Self::Jpeg(e) => write!(f, "JPEG error: {}", e),
            Self::Png(e) => write!(f, "PNG error: {}", e),
        }
    }
}
impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnsupportedFormat => None,
            Self::Jpeg(e) => Some(e),
            Self::Png(e) => Some(e),
        }
    }
}
impl From<jpeg::Error> for ImageError {
    fn from(value: jpeg::Error) -> Self { Self::Jpeg(value) }
}
impl From<png_codec::PngError> for ImageError {
    fn from(value: png_codec::PngError) -> Self { Self::Png(value) }
}

/// One PDF object (a dictionary, plus stream bytes when it is a stream
/// object) produced by encoding an image.
pub struct ImagePdfObject {
    pub dict: PdfValue,
    pub stream: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ColorSpaceSpec {
    DeviceGray,
    DeviceRgb,
    Indexed,
}

enum ImageKind {
    Jpeg {
        bytes: Vec<u8>,
        bit_depth: u8,
        channels: Channels,
    },
    Raster {
        /// Already predictor-filtered and DEFLATE-compressed.
        color_stream: Vec<u8>,
        color_space: ColorSpaceSpec,
        bit_depth: u8,
        components: u8,
        interlaced: bool,
        /// Raw (uncompressed) RGB triples, present only for `Indexed`.
        palette: Option<Vec<u8>>,
        /// Already predictor-filtered and DEFLATE-compressed 8-bit gray.
        alpha_stream: Option<Vec<u8>>,
    },
}

/// An image, decoded and re-framed as PDF objects but not yet assigned
/// object numbers. The generator allocates a contiguous block of IDs
/// (`object_count()` of them) and calls `into_objects` to materialize the
/// final dictionaries with cross-references resolved.
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    kind: ImageKind,
}

impl EncodedImage {
    /// How many PDF objects this image needs: 1 (plain image), 2 (image +
    /// palette, or image + soft mask), or 3 (image + palette + soft mask).
    pub fn object_count(&self) -> usize {
        match &self.kind {
            ImageKind::Jpeg { .. } => 1,
            ImageKind::Raster { palette, alpha_stream, .. } => {
                1 + palette.is_some() as usize + alpha_stream.is_some() as usize
            }
        }
    }

    /// Builds the final objects given a contiguous block of object IDs,
    /// `ids[0]` for the main image XObject and any remaining entries (in
    /// palette-then-smask order) for its dependents. `ids.len()` must equal
    /// `object_count()`.
    pub fn into_objects(self, ids: &[u64]) -> Vec<ImagePdfObject> {
        assert_eq!(ids.len(), self.object_count());
        match self.kind {
            ImageKind::Jpeg { bytes, bit_depth, channels } => {
                let (color_space, decode_array) = match channels {
                    Channels::Gray => ("DeviceGray", None),
                    Channels::Rgb => ("DeviceRGB", None),
                    Channels::Cmyk => ("DeviceCMYK", Some(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0])),
                    Channels::Other(_) => ("DeviceGray", None),
                };
                let mut entries = vec![
                    ("Type".to_owned(), PdfValue::name("XObject")),
                    ("Subtype".to_owned(), PdfValue::name("Image")),
                    ("Width".to_owned(), PdfValue::Integer(self.width as i64)),
                    ("Height".to_owned(), PdfValue::Integer(self.height as i64)),
                    ("ColorSpace".to_owned(), PdfValue::name(color_space)),
                    ("BitsPerComponent".to_owned(), PdfValue::Integer(bit_depth as i64)),
                    ("Filter".to_owned(), PdfValue::name("DCTDecode")),
                ];
                if let Some(decode) = decode_array {
                    entries.push((
                        "Decode".to_owned(),
                        PdfValue::Array(decode.into_iter().map(PdfValue::Real).collect()),
                    ));
                }
                vec![ImagePdfObject { dict: PdfValue::Dictionary(entries), stream: Some(bytes) }]
            }
            ImageKind::Raster { color_stream, color_space, bit_depth, components, interlaced, palette, alpha_stream } => {
                let mut next_id = 1;
                let palette_id = palette.as_ref().map(|_| {
                    let id = ids[next_id];
                    next_id += 1;
                    id
                });
                let smask_id = alpha_stream.as_ref().map(|_| ids[next_id]);

                let mut main_entries = vec![
                    ("Type".to_owned(), PdfValue::name("XObject")),
                    ("Subtype".to_owned(), PdfValue::name("Image")),
                    ("Width".to_owned(), PdfValue::Integer(self.width as i64)),
                    ("Height".to_owned(), PdfValue::Integer(self.height as i64)),
                    ("BitsPerComponent".to_owned(), PdfValue::Integer(bit_depth as i64)),
                    ("Filter".to_owned(), PdfValue::name("FlateDecode")),
                ];
                main_entries.push(("ColorSpace".to_owned(), match color_space {
                    ColorSpaceSpec::DeviceGray => PdfValue::name("DeviceGray"),
                    ColorSpaceSpec::DeviceRgb => PdfValue::name("DeviceRGB"),
                    ColorSpaceSpec::Indexed => {
                        let hival = palette.as_ref().map(|p| (p.len() / 3).saturating_sub(1)).unwrap_or(0);
                        PdfValue::Array(vec![
                            PdfValue::name("Indexed"),
                            PdfValue::name("DeviceRGB"),
                            PdfValue::Integer(hival as i64),
                            PdfValue::reference(palette_id.expect("indexed image always carries a palette")),
                        ])
                    }
                }));
                if !interlaced {
                    main_entries.push((
                        "DecodeParms".to_owned(),
                        PdfValue::dict([
                            ("Predictor", PdfValue::Integer(12)),
                            ("Colors", PdfValue::Integer(components as i64)),
                            ("BitsPerComponent", PdfValue::Integer(bit_depth as i64)),
                            ("Columns", PdfValue::Integer(self.width as i64)),
                        ]),
                    ));
                }
                if let Some(smask_id) = smask_id {
                    main_entries.push(("SMask".to_owned(), PdfValue::reference(smask_id)));
                }

                let mut objects = vec![ImagePdfObject { dict: PdfValue::Dictionary(main_entries), stream: Some(color_stream) }];
                if let Some(palette) = palette {
                    objects.push(ImagePdfObject {
                        dict: PdfValue::dict([("Length", PdfValue::Integer(palette.len() as i64))]),
                        stream: Some(palette),
                    });
                }
                if let Some(alpha_stream) = alpha_stream {
                    let mut smask_entries = vec![
                        ("Type".to_owned(), PdfValue::name("XObject")),
                        ("Subtype".to_owned(), PdfValue::name("Image")),
                        ("Width".to_owned(), PdfValue::Integer(self.width as i64)),
                        ("Height".to_owned(), PdfValue::Integer(self.height as i64)),
                        ("ColorSpace".to_owned(), PdfValue::name("DeviceGray")),
                        ("BitsPerComponent".to_owned(), PdfValue::Integer(8)),
                        ("Filter".to_owned(), PdfValue::name("FlateDecode")),
                    ];
                    if !interlaced {
                        smask_entries.push((
                            "DecodeParms".to_owned(),
                            PdfValue::dict([
                                ("Predictor", PdfValue::Integer(12)),
                                ("Colors", PdfValue::Integer(1)),
                                ("BitsPerComponent", PdfValue::Integer(8)),
                                ("Columns", PdfValue::Integer(self.width as i64)),
                            ]),
                        ));
                    }
                    objects.push(ImagePdfObject { dict: PdfValue::Dictionary(smask_entries), stream: Some(alpha_stream) });
                }
                objects
            }
        }
    }
}

pub fn encode(format: PixelFormat, bytes: &[u8]) -> Result<EncodedImage, ImageError> {
    match format {
        PixelFormat::Jpeg => encode_jpeg(bytes),
        PixelFormat::Png => Ok(png_codec::encode_png(bytes)?),
        PixelFormat::Unsupported => Err(ImageError::UnsupportedFormat),
    }
}

fn encode_jpeg(bytes: &[u8]) -> Result<EncodedImage, ImageError> {
    let info = jpeg::JpegInfo::parse(std::io::Cursor::new(bytes))?;
    Ok(EncodedImage {
        width: info.width as u32,
        height: info.height as u32,
        kind: ImageKind::Jpeg { bytes: bytes.to_vec(), bit_depth: info.bit_depth, channels: info.channels },
    })
}

pub(crate) fn raster(
    width: u32,
    height: u32,
    color_stream: Vec<u8>,
    color_space: ColorSpaceKind,
    bit_depth: u8,
    components: u8,
    interlaced: bool,
    palette: Option<Vec<u8>>,
    alpha_stream: Option<Vec<u8>>,
) -> EncodedImage {
    let color_space = match color_space {
        ColorSpaceKind::DeviceGray => ColorSpaceSpec::DeviceGray,
        ColorSpaceKind::DeviceRgb => ColorSpaceSpec::DeviceRgb,
        ColorSpaceKind::Indexed => ColorSpaceSpec::Indexed,
    };
    EncodedImage {
        width,
        height,
        kind: ImageKind::Raster { color_stream, color_space, bit_depth, components, interlaced, palette, alpha_stream },
    }
}

/// Public mirror of the private `ColorSpaceSpec` so `png_codec` (a sibling
/// module, not a dependent crate) can select a color space without
/// reaching into this module's private enum directly.
pub(crate) enum ColorSpaceKind {
    DeviceGray,
    DeviceRgb,
    Indexed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_media_type() {
        assert_eq!(PixelFormat::from_media_type("image/jpeg"), PixelFormat::Jpeg);
        assert_eq!(PixelFormat::from_media_type("image/png; charset=binary"), PixelFormat::Png);
        assert_eq!(PixelFormat::from_media_type("image/tiff"), PixelFormat::Unsupported);
    }

    #[test]
    fn jpeg_object_count_is_one() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xC0];
        let sof: Vec<u8> = {
            let mut v = vec![8u8, 0, 4, 0, 4, 3];
            for id in 1..=3u8 {
                v.extend_from_slice(&[id, 0x11, 0]);
            }
            v
        };
        let len = (sof.len() + 2) as u16;
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(&sof);

        let encoded = encode(PixelFormat::Jpeg, &bytes).unwrap();
        assert_eq!(encoded.object_count(), 1);
        let objects = encoded.into_objects(&[10]);
        assert_eq!(objects.len(), 1);
    }
}
