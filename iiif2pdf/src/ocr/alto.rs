//! ALTO parsing: `MeasurementUnit`, `Page@WIDTH/HEIGHT`, `TextStyle`
//! entries, and `TextLine` → `String`/`SP`/`HYP`. Unlike hOCR, X and Y are
//! scaled independently — a deliberate divergence, not an oversight.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{OcrError, OcrLine, OcrPage, OcrSpan};

fn attr(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find(|a| a.key.as_ref() == name.as_bytes())
        .map(|a| a.unescape_value().unwrap_or_default().into_owned())
}

fn attr_f64(e: &quick_xml::events::BytesStart, name: &str) -> Option<f64> {
    attr(e, name).and_then(|v| v.parse().ok())
}

fn local_name(name: quick_xml::name::QName) -> String {
    String::from_utf8_lossy(name.as_ref()).to_ascii_lowercase()
}

pub fn parse(bytes: &[u8], reference_width: f64, reference_height: f64) -> Result<OcrPage, OcrError> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut measurement_unit = "pixel".to_owned();
    let mut styles: HashMap<String, String> = HashMap::new();
    let mut page_dims: Option<(f64, f64)> = None;
    let mut found_page = false;

    let mut page = OcrPage { width: reference_width, height: reference_height, lines: Vec::new() };
    let mut current_line: Option<OcrLine> = None;
    let mut pending_extra: Option<usize> = None;
    let mut line_ends_with_hyphen = false;
    let mut capture_text: Option<String> = None; // accumulates <MeasurementUnit>text</MeasurementUnit>

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let local = local_name(e.name());
                match local.as_str() {
                    "measurementunit" => capture_text = Some(String::new()),
                    "page" => {
                        found_page = true;
                        if let (Some(w), Some(h)) = (attr_f64(&e, "WIDTH"), attr_f64(&e, "HEIGHT")) {
                            page_dims = Some((w, h));
                        }
                    }
                    "textstyle" => {
                        if let Some(id) = attr(&e, "ID") {
                            let mut parts = Vec::new();
                            if let Some(family) = attr(&e, "FONTFAMILY") {
                                parts.push(format!("font-family:{}", family));
                            }
                            if let Some(size) = attr(&e, "FONTSIZE") {
                                parts.push(format!("font-size:{}pt", size));
                            }
                            if let Some(style) = attr(&e, "FONTSTYLE") {
                                parts.push(format!("font-style:{}", style.to_ascii_lowercase()));
                            }
                            styles.insert(id, parts.join(";"));
                        }
                    }
                    "textline" => {
                        current_line = Some(OcrLine {
                            x: attr_f64(&e, "HPOS").unwrap_or(0.0),
                            y: attr_f64(&e, "VPOS").unwrap_or(0.0),
                            width: attr_f64(&e, "WIDTH").unwrap_or(0.0),
                            height: attr_f64(&e, "HEIGHT").unwrap_or(0.0),
                            spans: Vec::new(),
                        });
                        pending_extra = None;
                        line_ends_with_hyphen = false;
                    }
                    "string" => {
                        if let Some(line) = current_line.as_mut() {
                            let x = attr_f64(&e, "HPOS").unwrap_or(0.0);
                            super::finalize_pending_extra(line, pending_extra.take(), x);
                            let style = attr(&e, "STYLEREFS").and_then(|refs| {
                                refs.split_whitespace().next().and_then(|id| styles.get(id).cloned())
                            });
                            line.spans.push(OcrSpan {
                                x,
                                y: attr_f64(&e, "VPOS").unwrap_or(0.0),
                                width: attr_f64(&e, "WIDTH").unwrap_or(0.0),
                                height: attr_f64(&e, "HEIGHT").unwrap_or(0.0),
                                text: attr(&e, "CONTENT").unwrap_or_default(),
                                style,
                                is_extra: false,
                            });
                        }
                    }
                    "sp" => {
                        if let Some(line) = current_line.as_mut() {
                            let x = attr_f64(&e, "HPOS").unwrap_or_else(|| {
                                line.spans.last().map(|s| s.x + s.width).unwrap_or(0.0)
                            });
                            let y = line.spans.last().map(|s| s.y).unwrap_or(line.y);
                            let height = line.spans.last().map(|s| s.height).unwrap_or(line.height);
                            match attr_f64(&e, "WIDTH") {
                                Some(width) => {
                                    line.spans.push(OcrSpan { x, y, width, height, text: " ".to_owned(), style: None, is_extra: true });
                                }
                                None => {
                                    line.spans.push(OcrSpan { x, y, width: 0.0, height, text: " ".to_owned(), style: None, is_extra: true });
                                    pending_extra = Some(line.spans.len() - 1);
                                }
                            }
                        }
                    }
                    "hyp" => {
                        if let Some(line) = current_line.as_mut() {
                            let content = attr(&e, "CONTENT").unwrap_or_else(|| "-".to_owned());
                            let (x, y, height) = line.spans.last().map(|s| (s.x + s.width, s.y, s.height)).unwrap_or((line.x, line.y, line.height));
                            line.spans.push(OcrSpan { x, y, width: 0.0, height, text: content, style: None, is_extra: false });
                            line_ends_with_hyphen = true;
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some(acc) = capture_text.as_mut() {
                    acc.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Event::End(e) => {
                let local = local_name(e.name());
                match local.as_str() {
                    "measurementunit" => {
                        if let Some(acc) = capture_text.take() {
                            measurement_unit = acc.trim().to_ascii_lowercase();
                        }
                    }
                    "textline" => {
                        if let Some(mut line) = current_line.take() {
                            super::terminate_line(&mut line, line_ends_with_hyphen);
                            page.lines.push(line);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if !found_page && page.lines.is_empty() {
        return Err(OcrError::NoPage);
    }

    let (page_width, page_height) = page_dims.unwrap_or_else(|| {
        let mut max_x = 0.0f64;
        let mut max_y = 0.0f64;
        for line in &page.lines {
            for span in &line.spans {
                max_x = max_x.max(span.x + span.width);
                max_y = max_y.max(span.y + span.height);
            }
        }
        (max_x.max(1.0), max_y.max(1.0))
    });

    let (scale_x, scale_y) = if measurement_unit == "pixel" {
        (1.0, 1.0)
    } else {
        (reference_width / page_width.max(1.0), reference_height / page_height.max(1.0))
    };

    if (scale_x - 1.0).abs() > f64::EPSILON || (scale_y - 1.0).abs() > f64::EPSILON {
        rescale(&mut page, scale_x, scale_y);
    }
    page.width = reference_width;
    page.height = reference_height;

    Ok(page)
}

fn rescale(page: &mut OcrPage, scale_x: f64, scale_y: f64) {
    for line in &mut page.lines {
        line.x *= scale_x;
        line.y *= scale_y;
        line.width *= scale_x;
        line.height *= scale_y;
        for span in &mut line.spans {
            span.x *= scale_x;
            span.y *= scale_y;
            span.width *= scale_x;
            span.height *= scale_y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_independent_x_and_y_scale_for_non_pixel_units() {
        let doc = br#"<alto>
            <Description><MeasurementUnit>mm10</MeasurementUnit></Description>
            <Layout><Page WIDTH="580" HEIGHT="900">
                <PrintSpace><TextBlock>
                    <TextLine HPOS="30" VPOS="40" WIDTH="170" HEIGHT="30">
                        <String HPOS="30" VPOS="40" WIDTH="170" HEIGHT="30" CONTENT="hello"/>
                    </TextLine>
                </TextBlock></PrintSpace>
            </Page></Layout>
        </alto>"#;
        let page = parse(doc, 290.0, 400.0).unwrap();
        let line = &page.lines[0];
        assert!((line.x - 15.0).abs() < 1e-9); // scale_x = 290/580 = 0.5
        assert!((line.y - (40.0 * 400.0 / 900.0)).abs() < 1e-9);
    }

    #[test]
    fn pixel_unit_is_not_rescaled() {
        let doc = br#"<alto>
            <Description><MeasurementUnit>pixel</MeasurementUnit></Description>
            <Layout><Page WIDTH="290" HEIGHT="400">
                <PrintSpace><TextBlock>
                    <TextLine HPOS="30" VPOS="40" WIDTH="170" HEIGHT="30">
                        <String HPOS="30" VPOS="40" WIDTH="170" HEIGHT="30" CONTENT="hello"/>
                    </TextLine>
                </TextBlock></PrintSpace>
            </Page></Layout>
        </alto>"#;
        let page = parse(doc, 290.0, 400.0).unwrap();
        assert_eq!(page.lines[0].x, 30.0);
    }

    #[test]
    fn hyphenation_mark_suppresses_trailing_newline() {
        let doc = br#"<alto>
            <Layout><Page WIDTH="100" HEIGHT="100">
                <PrintSpace><TextBlock>
                    <TextLine HPOS="0" VPOS="0" WIDTH="100" HEIGHT="20">
                        <String HPOS="0" VPOS="0" WIDTH="40" HEIGHT="20" CONTENT="hy"/>
                        <HYP CONTENT="-"/>
                    </TextLine>
                </TextBlock></PrintSpace>
            </Page></Layout>
        </alto>"#;
        let page = parse(doc, 100.0, 100.0).unwrap();
        let last = page.lines[0].spans.last().unwrap();
        assert_eq!(last.text, "-");
        assert!(!last.text.ends_with('\n'));
    }
}
