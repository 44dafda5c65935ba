//! hOCR parsing: `ocr_page` → `ocr_carea|ocrx_block` → `ocr_par` →
//! `ocr_line|ocrx_line` → `ocrx_word`, all scaled by a single, X-derived
//! factor applied uniformly to X and Y (a deliberate hOCR-specific
//! quirk — ALTO scales its two axes independently instead).

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{OcrError, OcrLine, OcrPage, OcrSpan};

struct Bbox { x1: f64, y1: f64, x2: f64, y2: f64 }

fn parse_bbox(title: &str) -> Option<Bbox> {
    let idx = title.find("bbox")?;
    let mut nums = title[idx + 4..].split_whitespace().take(4).filter_map(|s| s.trim_end_matches(';').parse::<f64>().ok());
    Some(Bbox { x1: nums.next()?, y1: nums.next()?, x2: nums.next()?, y2: nums.next()? })
}

fn attr_value(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find(|a| a.key.as_ref() == name.as_bytes())
        .map(|a| a.unescape_value().unwrap_or_default().into_owned())
}

fn has_class(class_attr: &str, needle: &str) -> bool {
    class_attr.split_whitespace().any(|c| c == needle)
}

pub fn parse(bytes: &[u8], reference_width: f64, reference_height: f64) -> Result<OcrPage, OcrError> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut page: Option<OcrPage> = None;
    let mut scale_x = 1.0f64;
    let mut scale_y = 1.0f64;

    let mut current_line: Option<OcrLine> = None;
    let mut in_word = false;
    let mut word_bbox: Option<Bbox> = None;
    let mut word_style: Option<String> = None;
    let mut word_text = String::new();

    // hOCR elements are all `<span>`/`<div>` with a `class` attribute, so the
    // tag name alone never distinguishes a line from a word or anything
    // else (a line is commonly `<span class="ocr_line">`, closed by a plain
    // `</span>` indistinguishable by name from a word's closing tag). We
    // instead track nesting depth and remember the depth at which the
    // current line/word was opened, closing each when the matching `End`
    // brings the depth back down to that level — the same "key off the
    // element that actually opened it" approach `alto.rs` uses via its
    // distinct `TextLine`/`String` element names.
    let mut depth: usize = 0;
    let mut line_open_depth: Option<usize> = None;
    let mut word_open_depth: Option<usize> = None;

    fn open_word(e: &quick_xml::events::BytesStart, in_word: &mut bool, word_bbox: &mut Option<Bbox>, word_style: &mut Option<String>, word_text: &mut String) {
        *in_word = true;
        *word_bbox = parse_bbox(&attr_value(e, "title").unwrap_or_default());
        *word_style = attr_value(e, "style");
        word_text.clear();
    }

    fn close_word(current_line: &mut Option<OcrLine>, word_bbox: &mut Option<Bbox>, word_style: &mut Option<String>, word_text: &str, scale_x: f64, scale_y: f64) {
        if let (Some(line), Some(bbox)) = (current_line.as_mut(), word_bbox.take()) {
            let x = bbox.x1 * scale_x;
            let width = (bbox.x2 - bbox.x1) * scale_x;
            if let Some(prev) = line.spans.last() {
                let gap = x - (prev.x + prev.width);
                if gap > 0.01 && !prev.is_extra {
                    line.spans.push(OcrSpan {
                        x: prev.x + prev.width,
                        y: prev.y,
                        width: gap,
                        height: prev.height,
                        text: " ".to_owned(),
                        style: None,
                        is_extra: true,
                    });
                }
            }
            line.spans.push(OcrSpan {
                x,
                y: bbox.y1 * scale_y,
                width,
                height: (bbox.y2 - bbox.y1) * scale_y,
                text: word_text.to_owned(),
                style: word_style.take(),
                is_extra: false,
            });
        }
    }

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                let class = attr_value(&e, "class").unwrap_or_default();
                let title = attr_value(&e, "title").unwrap_or_default();
                let this_depth = depth;
                depth += 1;

                if page.is_none() && has_class(&class, "ocr_page") {
                    let bbox = parse_bbox(&title).unwrap_or(Bbox { x1: 0.0, y1: 0.0, x2: reference_width, y2: reference_height });
                    let page_width = (bbox.x2 - bbox.x1).max(1.0);
                    let page_height = (bbox.y2 - bbox.y1).max(1.0);
                    scale_x = reference_width / page_width;
                    let candidate_scale_y = reference_height / page_height;
                    if (scale_x * page_height - reference_height).abs() > 0.5 {
                        tracing::warn!(
                            scale_x, scale_y = candidate_scale_y,
                            "hOCR page bbox X/Y scale mismatch exceeds half a pixel; applying uniform X-derived scale"
                        );
                    }
                    scale_y = scale_x;
                    page = Some(OcrPage { width: reference_width, height: reference_height, lines: Vec::new() });
                } else if has_class(&class, "ocr_line") || has_class(&class, "ocrx_line") {
                    line_open_depth = Some(this_depth);
                    let bbox = parse_bbox(&title);
                    current_line = Some(OcrLine {
                        x: bbox.as_ref().map(|b| b.x1 * scale_x).unwrap_or(0.0),
                        y: bbox.as_ref().map(|b| b.y1 * scale_y).unwrap_or(0.0),
                        width: bbox.as_ref().map(|b| (b.x2 - b.x1) * scale_x).unwrap_or(0.0),
                        height: bbox.as_ref().map(|b| (b.y2 - b.y1) * scale_y).unwrap_or(0.0),
                        spans: Vec::new(),
                    });
                } else if has_class(&class, "ocrx_word") {
                    word_open_depth = Some(this_depth);
                    open_word(&e, &mut in_word, &mut word_bbox, &mut word_style, &mut word_text);
                }
            }
            Event::Empty(e) => {
                let class = attr_value(&e, "class").unwrap_or_default();
                if has_class(&class, "ocrx_word") {
                    open_word(&e, &mut in_word, &mut word_bbox, &mut word_style, &mut word_text);
                    in_word = false;
                    close_word(&mut current_line, &mut word_bbox, &mut word_style, &word_text, scale_x, scale_y);
                }
            }
            Event::Text(t) => {
                if in_word {
                    word_text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if word_open_depth == Some(depth) {
                    word_open_depth = None;
                    in_word = false;
                    close_word(&mut current_line, &mut word_bbox, &mut word_style, &word_text, scale_x, scale_y);
                } else if line_open_depth == Some(depth) {
                    line_open_depth = None;
                    if let Some(mut line) = current_line.take() {
                        super::terminate_line(&mut line, false);
                        if let Some(page) = page.as_mut() {
                            page.lines.push(line);
                        }
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    page.ok_or(OcrError::NoPage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_bbox_by_uniform_x_derived_factor() {
        let doc = br#"<html><body>
            <div class="ocr_page" title="bbox 0 0 580 800">
                <span class="ocr_line" title="bbox 30 40 200 70">
                    <span class="ocrx_word" title="bbox 30 40 200 70">hello</span>
                </span>
            </div>
        </body></html>"#;
        let page = parse(doc, 290.0, 400.0).unwrap();
        assert_eq!(page.lines.len(), 1);
        let line = &page.lines[0];
        assert!((line.x - 15.0).abs() < 1e-9);
        assert!((line.y - 20.0).abs() < 1e-9);
        assert!((line.width - 85.0).abs() < 1e-9);
        assert!((line.height - 15.0).abs() < 1e-9);
    }

    #[test]
    fn missing_page_element_is_an_error() {
        let err = parse(b"<html><body>no ocr here</body></html>", 100.0, 100.0).unwrap_err();
        assert!(matches!(err, OcrError::NoPage));
    }
}
