//! Hidden-text content-stream operators: renders an [`OcrPage`] as
//! invisible, selectable `Tj` runs positioned under the painted image.

use std::io::Write as _;

use crate::ocr::OcrPage;
use crate::pdfvalue::{encode_hex, to_utf16be};

/// Nominal text-space advance per glyph, used only in the `Tz` horizontal-
/// scale formula (spec.md §4.8.2) — independent of the embedded font's own
/// declared metrics, since render mode 3 makes visual glyph shape moot.
const CHAR_WIDTH: f64 = 2.0;

/// Builds the `BT … ET` operator blocks for every line of `ocr`, scaled
/// into PDF user space by `unit_scale = 72 / ppi` and flipped into the
/// page's bottom-left-origin coordinate system using `canvas_height_px`.
pub fn render(ocr: &OcrPage, canvas_height_px: f64, unit_scale: f64, font_name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for line in &ocr.lines {
        render_line(&mut out, line, canvas_height_px, unit_scale, font_name);
    }
    out
}

fn render_line(
    out: &mut Vec<u8>,
    line: &crate::ocr::OcrLine,
    canvas_height_px: f64,
    unit_scale: f64,
    font_name: &str,
) {
    if line.spans.iter().all(|s| s.is_extra || s.width <= 0.0) {
        return;
    }
    let font_size = line.height * unit_scale * 0.75;
    if font_size <= 0.0 {
        return;
    }

    let x_pos = line.x * unit_scale;
    let y_pos = (canvas_height_px - line.y - 0.75 * line.height) * unit_scale;

    writeln!(out, "BT").unwrap();
    writeln!(out, "3 Tr").unwrap();
    writeln!(out, "/{} {:.4} Tf", font_name, font_size).unwrap();
    writeln!(out, "1 0 0 1 {:.4} {:.4} Tm", x_pos, y_pos).unwrap();

    let mut cursor_x = x_pos;
    let mut cursor_y = y_pos;
    for span in &line.spans {
        if span.is_extra || span.width <= 0.0 {
            continue;
        }
        let target_x = span.x * unit_scale;
        let target_y = (canvas_height_px - span.y - 0.75 * line.height) * unit_scale;
        let dx = target_x - cursor_x;
        let dy = target_y - cursor_y;
        writeln!(out, "{:.4} {:.4} Td", dx, dy).unwrap();
        cursor_x = target_x;
        cursor_y = target_y;

        let num_chars = span.text.chars().count().max(1) as f64;
        let word_len = (span.width * span.width + span.height * span.height).sqrt() * unit_scale;
        let tz = CHAR_WIDTH * 100.0 * word_len / (font_size * num_chars);
        writeln!(out, "{:.4} Tz", tz).unwrap();

        let mut text = span.text.clone();
        text.push(' ');
        let hex = encode_hex(&to_utf16be(&text));
        writeln!(out, "[<{}>] TJ", hex).unwrap();
    }

    writeln!(out, "ET").unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrLine, OcrSpan};

    fn word(x: f64, width: f64, text: &str) -> OcrSpan {
        OcrSpan { x, y: 40.0, width, height: 30.0, text: text.to_owned(), style: None, is_extra: false }
    }

    #[test]
    fn renders_bt_et_block_with_positioned_word() {
        let ocr = OcrPage {
            width: 290.0,
            height: 400.0,
            lines: vec![OcrLine { x: 30.0, y: 40.0, width: 170.0, height: 30.0, spans: vec![word(30.0, 170.0, "hello\n")] }],
        };
        let ops = String::from_utf8(render(&ocr, 400.0, 72.0 / 300.0, "f-0-0")).unwrap();
        assert!(ops.starts_with("BT\n3 Tr\n"));
        assert!(ops.contains("TJ"));
        assert!(ops.trim_end().ends_with("ET"));
    }

    #[test]
    fn zero_width_single_word_line_is_omitted() {
        let ocr = OcrPage {
            width: 100.0,
            height: 100.0,
            lines: vec![OcrLine { x: 0.0, y: 0.0, width: 0.0, height: 10.0, spans: vec![word(0.0, 0.0, "x")] }],
        };
        let ops = render(&ocr, 100.0, 1.0, "f-0-0");
        assert!(ops.is_empty());
    }
}
