//! Shared OCR model: hOCR and ALTO both parse down to this page/line/span
//! tree, scaled into the canvas's native pixel space.

pub mod alto;
pub mod hocr;

use std::fmt;

/// One run of text (a word, an inter-word gap, or a hyphenation mark) on a
/// line, in canvas pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct OcrSpan {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub style: Option<String>,
    /// An inter-word whitespace run synthesised by the parser, not present
    /// in the source markup. Its width is finalised once the following
    /// word's x coordinate is known.
    pub is_extra: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OcrLine {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub spans: Vec<OcrSpan>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OcrPage {
    pub width: f64,
    pub height: f64,
    pub lines: Vec<OcrLine>,
}

#[derive(Debug)]
pub enum OcrError {
    NoPage,
    BadXml(quick_xml::Error),
}
impl fmt::Display for OcrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPage => write!(f, "no recognised page element in OCR document"),
            Self::BadXml(e) => write!(f, "malformed OCR XML: {}", e),
        }
    }
}
impl std::error::Error for OcrError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoPage => None,
            Self::BadXml(e) => Some(e),
        }
    }
}
impl From<quick_xml::Error> for OcrError {
    fn from(value: quick_xml::Error) -> Self { Self::BadXml(value) }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OcrFormat {
    Hocr,
    Alto,
}
impl OcrFormat {
    /// Sniffs by the presence of an `<alto` open tag, per the format's own
    /// recognition rule; hOCR carries no comparably reliable top-level tag.
    pub fn sniff(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        if text.contains("<alto") {
            Self::Alto
        } else {
            Self::Hocr
        }
    }
}

/// Backpatches the width of a trailing "extra" whitespace span once the
/// following word's x coordinate is known, and appends a line break to the
/// final span of each line unless it ends in a soft hyphen or explicit
/// hyphenation mark.
pub(crate) fn finalize_pending_extra(line: &mut OcrLine, pending_extra: Option<usize>, next_x: f64) {
    if let Some(index) = pending_extra {
        if let Some(span) = line.spans.get_mut(index) {
            span.width = (next_x - span.x).max(0.0);
        }
    }
}

pub(crate) fn terminate_line(line: &mut OcrLine, ends_with_hyphen: bool) {
    if let Some(last) = line.spans.last_mut() {
        if !ends_with_hyphen && !last.text.ends_with('\u{00AD}') {
            last.text.push('\n');
        }
    }
}

pub fn parse(bytes: &[u8], reference_width: f64, reference_height: f64) -> Result<OcrPage, OcrError> {
    match OcrFormat::sniff(bytes) {
        OcrFormat::Hocr => hocr::parse(bytes, reference_width, reference_height),
        OcrFormat::Alto => alto::parse(bytes, reference_width, reference_height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_alto_by_tag() {
        assert_eq!(OcrFormat::sniff(b"<?xml version=\"1.0\"?><alto xmlns=\"x\"></alto>"), OcrFormat::Alto);
    }

    #[test]
    fn sniffs_hocr_by_absence_of_alto_tag() {
        assert_eq!(OcrFormat::sniff(b"<html><body><div class=\"ocr_page\"></div></body></html>"), OcrFormat::Hocr);
    }
}
