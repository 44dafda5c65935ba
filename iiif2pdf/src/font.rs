//! Embedded glyphless Type0 font: a single blank glyph shared by every
//! code point via a custom `CIDToGIDMap`, with an identity
//! `ToUnicode` CMap so selected text still copies out as the source text.

use std::io::Write as _;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::pdfvalue::PdfValue;

/// A minimal single-glyph TrueType program (sfnt header, table directory,
/// and `cmap`/`glyf`/`head`/`hhea`/`hmtx`/`loca`/`maxp` tables, the glyph
/// outline itself empty). ~260 bytes; PDF viewers only need it to resolve
/// as a valid `/FontFile2`, never to render a visible mark.
pub const GLYPHLESS_TTF: &[u8] = &[
    0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x63, 0x6D, 0x61, 0x70,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7C, 0x00, 0x00, 0x00, 0x18, 0x67, 0x6C, 0x79, 0x66,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x94, 0x00, 0x00, 0x00, 0x00, 0x68, 0x65, 0x61, 0x64,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x94, 0x00, 0x00, 0x00, 0x38, 0x68, 0x68, 0x65, 0x61,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xCC, 0x00, 0x00, 0x00, 0x28, 0x68, 0x6D, 0x74, 0x78,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF4, 0x00, 0x00, 0x00, 0x04, 0x6C, 0x6F, 0x63, 0x61,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF8, 0x00, 0x00, 0x00, 0x04, 0x6D, 0x61, 0x78, 0x70,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFC, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01,
    0x00, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0C, 0x00, 0x06, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x5F, 0x0F, 0x3C, 0xF5, 0x00, 0x00, 0x03, 0xE8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xE8, 0x03, 0xE8,
    0x00, 0x00, 0x00, 0x08, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
    0x03, 0xE8, 0x00, 0x00, 0x00, 0x00, 0x03, 0xE8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x01, 0x00, 0x00, 0x03, 0xE8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x50, 0x00,
    0x00, 0x02, 0x00, 0x00,
];

/// Object numbers for the six objects an embedded hidden-text font needs:
/// the `Type0` composite font, its `CIDFontType2` descendant, the
/// `FontDescriptor`, the embedded `FontFile2` stream, the `CIDToGIDMap`
/// stream, and the `ToUnicode` CMap stream.
#[derive(Clone, Copy, Debug)]
pub struct FontIds {
    pub type0_id: u64,
    pub descendant_id: u64,
    pub descriptor_id: u64,
    pub file_id: u64,
    pub cid_to_gid_id: u64,
    pub to_unicode_id: u64,
}
impl FontIds {
    pub const COUNT: usize = 6;
}

/// Resource-dictionary name under which the content stream references this
/// font (`/f-0-0 <size> Tf`, per spec.md §4.8.2).
pub const RESOURCE_NAME: &str = "f-0-0";

/// Nominal glyph advance width in glyph-space units (1000 per em), used
/// only to keep `/DW` consistent with the font program's own `hmtx` entry.
const DEFAULT_WIDTH: i64 = 1000;

pub struct FontObject {
    pub id: u64,
    pub dict: PdfValue,
    pub stream: Option<Vec<u8>>,
}

/// Builds the six PDF objects for the embedded hidden-text font.
pub fn build(ids: FontIds) -> Vec<FontObject> {
    let ttf_compressed = deflate(GLYPHLESS_TTF);
    let cid_to_gid = cid_to_gid_map_stream();
    let to_unicode = to_unicode_cmap_stream();

    vec![
        FontObject {
            id: ids.type0_id,
            dict: PdfValue::dict([
                ("Type", PdfValue::name("Font")),
                ("Subtype", PdfValue::name("Type0")),
                ("BaseFont", PdfValue::name("GlyphlessCID")),
                ("Encoding", PdfValue::name("Identity-H")),
                ("DescendantFonts", PdfValue::Array(vec![PdfValue::reference(ids.descendant_id)])),
                ("ToUnicode", PdfValue::reference(ids.to_unicode_id)),
            ]),
            stream: None,
        },
        FontObject {
            id: ids.descendant_id,
            dict: PdfValue::dict([
                ("Type", PdfValue::name("Font")),
                ("Subtype", PdfValue::name("CIDFontType2")),
                ("BaseFont", PdfValue::name("GlyphlessCID")),
                ("CIDSystemInfo", PdfValue::dict([
                    ("Registry", PdfValue::TextString("Adobe".to_owned())),
                    ("Ordering", PdfValue::TextString("Identity".to_owned())),
                    ("Supplement", PdfValue::Integer(0)),
                ])),
                ("FontDescriptor", PdfValue::reference(ids.descriptor_id)),
                ("DW", PdfValue::Integer(DEFAULT_WIDTH)),
                ("CIDToGIDMap", PdfValue::reference(ids.cid_to_gid_id)),
            ]),
            stream: None,
        },
        FontObject {
            id: ids.descriptor_id,
            dict: PdfValue::dict([
                ("Type", PdfValue::name("FontDescriptor")),
                ("FontName", PdfValue::name("GlyphlessCID")),
                ("Flags", PdfValue::Integer(4)),
                ("FontBBox", PdfValue::Array(vec![
                    PdfValue::Integer(0), PdfValue::Integer(0),
                    PdfValue::Integer(1000), PdfValue::Integer(1000),
                ])),
                ("ItalicAngle", PdfValue::Integer(0)),
                ("Ascent", PdfValue::Integer(1000)),
                ("Descent", PdfValue::Integer(0)),
                ("CapHeight", PdfValue::Integer(1000)),
                ("StemV", PdfValue::Integer(80)),
                ("FontFile2", PdfValue::reference(ids.file_id)),
            ]),
            stream: None,
        },
        FontObject {
            id: ids.file_id,
            dict: PdfValue::dict([
                ("Length1", PdfValue::Integer(GLYPHLESS_TTF.len() as i64)),
                ("Filter", PdfValue::name("FlateDecode")),
            ]),
            stream: Some(ttf_compressed),
        },
        FontObject {
            id: ids.cid_to_gid_id,
            dict: PdfValue::dict([("Filter", PdfValue::name("FlateDecode"))]),
            stream: Some(cid_to_gid),
        },
        FontObject {
            id: ids.to_unicode_id,
            dict: PdfValue::dict([("Filter", PdfValue::name("FlateDecode"))]),
            stream: Some(to_unicode),
        },
    ]
}

/// Every one of the 65536 possible CIDs mapped to GID 0 (the font's only,
/// blank glyph): a 2-byte-per-CID table of zeroes, which DEFLATEs to almost
/// nothing.
fn cid_to_gid_map_stream() -> Vec<u8> {
    let raw = vec![0u8; 65536 * 2];
    deflate(&raw)
}

/// An identity bfrange covering the whole BMP: code `0000` maps to Unicode
/// `0000`, code `0001` to `0001`, and so on, so CIDs double as Unicode
/// scalar values directly (the font's own `Encoding` is `Identity-H`).
fn to_unicode_cmap_stream() -> Vec<u8> {
    const CMAP: &str = concat!(
        "/CIDInit /ProcSet findresource begin\n",
        "12 dict begin\n",
        "begincmap\n",
        "/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n",
        "/CMapName /Adobe-Identity-UCS def\n",
        "/CMapType 2 def\n",
        "1 begincodespacerange\n",
        "<0000> <FFFF>\n",
        "endcodespacerange\n",
        "1 beginbfrange\n",
        "<0000> <FFFF> <0000>\n",
        "endbfrange\n",
        "endcmap\n",
        "CMapName currentdict /CMap defineresource pop\n",
        "end\n",
        "end\n",
    );
    deflate(CMAP.as_bytes())
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory zlib write cannot fail");
    encoder.finish().expect("in-memory zlib finish cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ids() -> FontIds {
        FontIds { type0_id: 10, descendant_id: 11, descriptor_id: 12, file_id: 13, cid_to_gid_id: 14, to_unicode_id: 15 }
    }

    #[test]
    fn builds_exactly_six_objects() {
        let objects = build(sample_ids());
        assert_eq!(objects.len(), FontIds::COUNT);
    }

    #[test]
    fn cid_to_gid_map_covers_every_code_point() {
        let mut encoder = flate2::read::ZlibDecoder::new(std::io::Cursor::new(cid_to_gid_map_stream()));
        use std::io::Read;
        let mut raw = Vec::new();
        encoder.read_to_end(&mut raw).unwrap();
        assert_eq!(raw.len(), 65536 * 2);
        assert!(raw.iter().all(|&b| b == 0));
    }

    #[test]
    fn type0_font_references_descendant_and_to_unicode() {
        let objects = build(sample_ids());
        let type0 = &objects[0];
        let bytes = type0.dict.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("/DescendantFonts"));
        assert!(text.contains("11 0 R"));
        assert!(text.contains("15 0 R"));
    }
}
