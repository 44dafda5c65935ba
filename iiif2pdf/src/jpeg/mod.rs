//! Parsing just enough of the JFIF/JPEG marker stream to recover the
//! dimensions, bit depth and channel count needed to emit a passthrough
//! `/DCTDecode` image XObject.

use std::fmt;
use std::io::{self, Read};

use from_to_repr::from_to_other;

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum Channels {
    Gray = 1,
    Rgb = 3,
    Cmyk = 4,
    Other(u8),
}
impl Channels {
    pub fn count(self) -> u8 {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
            Self::Other(count) => count,
        }
    }

    pub fn from_count(count: u8) -> Option<Self> {
        match Self::from(count) {
            Self::Other(_) => None,
            channels => Some(channels),
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    NotAJpeg { start_byte: u8 },
    NoStartOfFrame,
    SofTooShort { min_expected: usize, obtained: usize },
    UnsupportedChannelCount { obtained: u8 },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::NotAJpeg { start_byte } => write!(f, "not a JPEG (starting byte 0x{:02X})", start_byte),
            Self::NoStartOfFrame => write!(f, "no start-of-frame marker found"),
            Self::SofTooShort { min_expected, obtained } =>
                write!(f, "start-of-frame too short: expected at least {} bytes, got {}", min_expected, obtained),
            Self::UnsupportedChannelCount { obtained } => write!(f, "unsupported channel count {}", obtained),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self { Self::Io(value) }
}

/// The dimensions and colour model recovered from a JPEG's start-of-frame
/// marker. The original bytes are untouched; this is metadata only.
#[derive(Clone, Copy, Debug)]
pub struct JpegInfo {
    pub width: u16,
    pub height: u16,
    pub bit_depth: u8,
    pub channels: Channels,
}

const SOF_MARKERS: [u8; 12] = [
    0xC0, 0xC1, 0xC2, 0xC3, 0xC5, 0xC6, 0xC7, 0xC9, 0xCA, 0xCB, 0xCD, 0xCE,
];

impl JpegInfo {
    /// Scans the marker stream until a start-of-frame marker is found,
    /// ignoring everything else (APPn, COM, quantization/Huffman tables).
    pub fn parse<R: Read>(mut reader: R) -> Result<Self, Error> {
        let mut magic = [0u8; 2];
        reader.read_exact(&mut magic)?;
        if magic != [0xFF, 0xD8] {
            return Err(Error::NotAJpeg { start_byte: magic[0] });
        }

        loop {
            let mut marker = [0u8; 2];
            reader.read_exact(&mut marker)?;
            if marker[0] != 0xFF {
                return Err(Error::NoStartOfFrame);
            }
            let kind = marker[1];

            if kind == 0x01 || (0xD0..=0xD9).contains(&kind) {
                // standalone markers carry no length field
                if kind == 0xD9 {
                    return Err(Error::NoStartOfFrame);
                }
                continue;
            }

            let mut len_buf = [0u8; 2];
            reader.read_exact(&mut len_buf)?;
            let segment_len = u16::from_be_bytes(len_buf) as usize;
            if segment_len < 2 {
                return Err(Error::SofTooShort { min_expected: 2, obtained: segment_len });
            }
            let mut data = vec![0u8; segment_len - 2];
            reader.read_exact(&mut data)?;

            if SOF_MARKERS.contains(&kind) {
                if data.len() < 6 {
                    return Err(Error::SofTooShort { min_expected: 6, obtained: data.len() });
                }
                let bit_depth = data[0];
                let height = u16::from_be_bytes([data[1], data[2]]);
                let width = u16::from_be_bytes([data[3], data[4]]);
                let component_count = data[6..].chunks(3).count() as u8;
                let channels = Channels::from_count(component_count)
                    .ok_or(Error::UnsupportedChannelCount { obtained: component_count })?;
                return Ok(JpegInfo { width, height, bit_depth, channels });
            }

            if kind == 0xDA {
                return Err(Error::NoStartOfFrame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_jpeg_rgb(width: u16, height: u16) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8];
        // SOF0, length = 2 + 1 + 2 + 2 + 1 + 3*3 = 17
        bytes.extend_from_slice(&[0xFF, 0xC0]);
        let mut sof = vec![8u8];
        sof.extend_from_slice(&height.to_be_bytes());
        sof.extend_from_slice(&width.to_be_bytes());
        sof.push(3);
        for id in 1..=3u8 {
            sof.extend_from_slice(&[id, 0x11, 0]);
        }
        let len = (sof.len() + 2) as u16;
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(&sof);
        bytes
    }

    #[test]
    fn parses_dimensions_and_channels() {
        let bytes = minimal_jpeg_rgb(290, 400);
        let info = JpegInfo::parse(Cursor::new(bytes)).unwrap();
        assert_eq!(info.width, 290);
        assert_eq!(info.height, 400);
        assert_eq!(info.bit_depth, 8);
        assert_eq!(info.channels, Channels::Rgb);
        assert_eq!(info.channels.count(), 3);
    }

    #[test]
    fn rejects_non_jpeg() {
        let err = JpegInfo::parse(Cursor::new(vec![0x00, 0x01])).unwrap_err();
        assert!(matches!(err, Error::NotAJpeg { .. }));
    }
}
