//! The PDF value model and its canonical serialization.

use std::fmt::Write as _;

/// An object number. Generation is always 0 for objects emitted by this
/// crate.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjRef(pub u64);

/// A PDF value: integer, real, boolean, null, name,
/// literal string, hex string, byte array, date, dictionary, array,
/// reference.
#[derive(Clone, Debug)]
pub enum PdfValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Null,
    Name(String),
    /// A textual string. The serializer decides between a literal `(...)`
    /// form and a UTF-16BE hex form depending on its content.
    TextString(String),
    /// Raw bytes to be written verbatim as a `<HEX>` string.
    HexBytes(Vec<u8>),
    /// A UTC date/time, serialized as `(D:YYYYMMDDHHMMSSZ)`.
    Date(DateUtc),
    /// An ordered key -> value map. Order is insertion order, not sorted.
    Dictionary(Vec<(String, PdfValue)>),
    Array(Vec<PdfValue>),
    Reference(ObjRef),
}

/// A minimal UTC timestamp, since this crate has no calendar-math
/// dependency beyond what emitting a PDF date requires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DateUtc {
    pub year: u32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl PdfValue {
    pub fn dict(entries: impl IntoIterator<Item = (&'static str, PdfValue)>) -> Self {
        PdfValue::Dictionary(entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect())
    }

    pub fn name(s: impl Into<String>) -> Self {
        PdfValue::Name(s.into())
    }

    pub fn reference(id: u64) -> Self {
        PdfValue::Reference(ObjRef(id))
    }

    /// Serializes this value in canonical PDF syntax, with `indent` levels
    /// of 2-space nesting already applied to the surrounding context.
    pub fn write(&self, out: &mut Vec<u8>, indent: usize) {
        match self {
            PdfValue::Integer(n) => { write!(PdfWriteAdapter(out), "{}", n).unwrap(); },
            PdfValue::Real(r) => write_real(out, *r),
            PdfValue::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
            PdfValue::Null => out.extend_from_slice(b"null"),
            PdfValue::Name(name) => write_name(out, name),
            PdfValue::TextString(s) => write_text_string(out, s),
            PdfValue::HexBytes(bytes) => write_hex_string(out, bytes),
            PdfValue::Date(date) => write_date(out, date),
            PdfValue::Dictionary(entries) => write_dictionary(out, entries, indent),
            PdfValue::Array(items) => write_array(out, items, indent),
            PdfValue::Reference(ObjRef(id)) => { write!(PdfWriteAdapter(out), "{} 0 R", id).unwrap(); },
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out, 0);
        out
    }
}

/// Adapts `Vec<u8>` to `std::fmt::Write` for `write!`.
struct PdfWriteAdapter<'a>(&'a mut Vec<u8>);
impl std::fmt::Write for PdfWriteAdapter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

fn write_real(out: &mut Vec<u8>, value: f64) {
    // Reals are rounded to 1e-6 and written without redundant trailing zeros.
    let rounded = (value * 1_000_000.0).round() / 1_000_000.0;
    let mut s = format!("{:.6}", rounded);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s.is_empty() || s == "-0" {
        s = "0".to_owned();
    }
    out.extend_from_slice(s.as_bytes());
}

const NAME_BYTES_TO_ESCAPE: [u8; 17] = [
    0x00, 0x09, 0x0A, 0x0C, 0x0D, 0x20,
    b'#',
    b'%', b'(', b')', b'/', b'<', b'>', b'[', b']', b'{', b'}',
];

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for &b in name.as_bytes() {
        if NAME_BYTES_TO_ESCAPE.contains(&b) {
            write!(PdfWriteAdapter(out), "#{:02X}", b).unwrap();
        } else {
            out.push(b);
        }
    }
}

/// Whether `s` is representable as a balanced ASCII literal string: every
/// byte is ASCII, and parentheses nest correctly.
fn is_ascii_balanced(s: &str) -> bool {
    if !s.is_ascii() {
        return false;
    }
    let mut depth: i32 = 0;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => { chars.next(); },
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            },
            _ => {},
        }
    }
    depth == 0
}

fn write_text_string(out: &mut Vec<u8>, s: &str) {
    if is_ascii_balanced(s) {
        out.push(b'(');
        for c in s.chars() {
            match c {
                '(' | ')' | '\\' => { out.push(b'\\'); out.push(c as u8); },
                _ => out.push(c as u8),
            }
        }
        out.push(b')');
    } else {
        let mut words = Vec::with_capacity(1 + s.encode_utf16().count());
        words.push(0xFEFFu16);
        words.extend(s.encode_utf16());
        let mut bytes = Vec::with_capacity(words.len() * 2);
        for word in words {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        write_hex_string(out, &bytes);
    }
}

fn write_hex_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'<');
    for &b in bytes {
        write!(PdfWriteAdapter(out), "{:02X}", b).unwrap();
    }
    out.push(b'>');
}

fn write_date(out: &mut Vec<u8>, date: &DateUtc) {
    write!(
        PdfWriteAdapter(out),
        "(D:{:04}{:02}{:02}{:02}{:02}{:02}Z)",
        date.year, date.month, date.day, date.hour, date.minute, date.second,
    ).unwrap();
}

fn write_dictionary(out: &mut Vec<u8>, entries: &[(String, PdfValue)], indent: usize) {
    out.extend_from_slice(b"<<");
    if !entries.is_empty() {
        out.push(b'\n');
        for (key, value) in entries {
            for _ in 0..(indent + 1) {
                out.extend_from_slice(b"  ");
            }
            write_name(out, key);
            out.push(b' ');
            value.write(out, indent + 1);
            out.push(b'\n');
        }
        for _ in 0..indent {
            out.extend_from_slice(b"  ");
        }
    }
    out.extend_from_slice(b">>");
}

fn write_array(out: &mut Vec<u8>, items: &[PdfValue], indent: usize) {
    out.push(b'[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        item.write(out, indent);
    }
    out.push(b']');
}

/// Decodes a PDF literal string's escape sequences (without the enclosing
/// parentheses). Exists primarily to pin down the escaping rules this
/// crate relies on when later stripping or transplanting literal strings
/// from spliced cover pages.
pub fn decode_literal_string(body: &[u8]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < body.len() {
        let b = body[i];
        if b == b'\\' && i + 1 < body.len() {
            let next = body[i + 1];
            match next {
                b'n' => { out.push('\n'); i += 2; },
                b'r' => { out.push('\r'); i += 2; },
                b't' => { out.push('\t'); i += 2; },
                b'b' => { out.push('\u{0008}'); i += 2; },
                b'f' => { out.push('\u{000C}'); i += 2; },
                b'(' => { out.push('('); i += 2; },
                b')' => { out.push(')'); i += 2; },
                b'\\' => { out.push('\\'); i += 2; },
                b'\n' => { i += 2; },
                b'0'..=b'7' => {
                    let mut value: u32 = 0;
                    let mut count = 0;
                    i += 1;
                    while count < 3 && i < body.len() && (b'0'..=b'7').contains(&body[i]) {
                        value = value * 8 + (body[i] - b'0') as u32;
                        i += 1;
                        count += 1;
                    }
                    out.push(char::from_u32(value & 0xFF).unwrap_or('\u{FFFD}'));
                },
                _ => { out.push(next as char); i += 2; },
            }
        } else {
            out.push(b as char);
            i += 1;
        }
    }
    out
}

/// Encodes a hex string's bytes as an uppercase `<HEX>` literal (without
/// the angle brackets), the inverse of parsing a hex string.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        write!(s, "{:02X}", b).unwrap();
    }
    s
}

/// Parses an uppercase or lowercase hex string's digits back into bytes.
/// Odd-length input is padded with an implicit trailing 0 per the PDF spec.
pub fn decode_hex(hex: &str) -> Vec<u8> {
    let digits: Vec<u8> = hex.bytes().filter(|b| b.is_ascii_hexdigit()).collect();
    let mut out = Vec::with_capacity(digits.len().div_ceil(2));
    let mut iter = digits.chunks(2);
    while let Some(chunk) = iter.next() {
        let hi = hex_digit_value(chunk[0]);
        let lo = if chunk.len() == 2 { hex_digit_value(chunk[1]) } else { 0 };
        out.push((hi << 4) | lo);
    }
    out
}

fn hex_digit_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

/// Encodes a Rust string as UTF-16BE bytes with a leading BOM.
pub fn to_utf16be(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + s.len() * 2);
    bytes.extend_from_slice(&[0xFE, 0xFF]);
    for word in s.encode_utf16() {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes
}

/// Decodes UTF-16BE bytes (with or without a leading BOM) back to a Rust
/// string.
pub fn decode_utf16be(bytes: &[u8]) -> String {
    let bytes = if bytes.starts_with(&[0xFE, 0xFF]) { &bytes[2..] } else { bytes };
    let words: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_string_parses_octal_and_escape_sequences() {
        // `(One (\0433)\)\n\r)` sans outer parens.
        let body = br"One (\0433)\)\n\r";
        let decoded = decode_literal_string(body);
        assert_eq!(decoded, "One (#3))\n\r");
    }

    #[test]
    fn hex_round_trips_with_parsing() {
        let original = vec![0u8, 1, 2, 250, 251, 255];
        let hex = encode_hex(&original);
        let parsed = decode_hex(&hex);
        assert_eq!(parsed, original);
    }

    #[test]
    fn utf16be_round_trips() {
        for s in ["hello", "Täst Tütle", "日本語", ""] {
            let encoded = to_utf16be(s);
            assert_eq!(decode_utf16be(&encoded), s);
        }
    }

    #[test]
    fn ascii_text_serializes_as_literal_string() {
        let value = PdfValue::TextString("hello (world)".to_owned());
        let bytes = value.to_bytes();
        assert_eq!(bytes, b"(hello \\(world\\))");
    }

    #[test]
    fn unicode_text_serializes_as_utf16_hex_string() {
        let value = PdfValue::TextString("Täst Tütle".to_owned());
        let bytes = value.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("<FEFF0054006400E4"));
    }

    #[test]
    fn reference_serializes_with_generation_zero() {
        let value = PdfValue::reference(42);
        assert_eq!(value.to_bytes(), b"42 0 R");
    }

    #[test]
    fn dictionary_indents_two_spaces_per_level() {
        let value = PdfValue::dict([
            ("Type", PdfValue::name("Catalog")),
            ("Pages", PdfValue::reference(2)),
        ]);
        let text = String::from_utf8(value.to_bytes()).unwrap();
        assert_eq!(text, "<<\n  /Type /Catalog\n  /Pages 2 0 R\n>>");
    }
}
