//! Cover-page splicer: transplants every page of an external,
//! cooperating-renderer PDF (parsed via [`iiif2pdf_cover`]) into this
//! crate's own object graph, renumbering references and
//! redirecting `/Parent` to our pages root.

use std::collections::{BTreeSet, HashMap};

use iiif2pdf_cover::{CoverPdf, Dictionary, Object, ObjectId};

use crate::pdfvalue::PdfValue;

pub struct TransplantedObject {
    pub id: u64,
    pub dict: PdfValue,
    pub stream: Option<Vec<u8>>,
}

pub struct SplicedCover {
    pub objects: Vec<TransplantedObject>,
    /// New object IDs for the cover's pages, in reading order.
    pub page_ids: Vec<u64>,
}

/// Computes the full transitive closure of every cover page (so shared
/// resources are only copied once), allocates each a fresh object number
/// starting at `first_new_id`, and rewrites every reference and the pages'
/// `/Parent` pointers. Returns the spliced objects plus the next free id.
pub fn splice(cover: &CoverPdf, pages_root_id: u64, first_new_id: u64) -> (SplicedCover, u64) {
    let mut copied: BTreeSet<ObjectId> = BTreeSet::new();
    let mut order: Vec<ObjectId> = Vec::new();
    for &page_id in cover.page_ids() {
        for id in cover.transitive_closure(page_id, &copied) {
            if copied.insert(id) {
                order.push(id);
            }
        }
    }

    let mut remap: HashMap<ObjectId, u64> = HashMap::new();
    let mut next_id = first_new_id;
    for &id in &order {
        remap.insert(id, next_id);
        next_id += 1;
    }

    let page_id_set: BTreeSet<ObjectId> = cover.page_ids().iter().copied().collect();
    let mut objects = Vec::with_capacity(order.len());
    for old_id in &order {
        let obj = cover.get_object(*old_id).expect("closure only contains resolvable objects");
        let (mut dict, stream) = split_object(obj, &remap);
        if page_id_set.contains(old_id) {
            set_parent(&mut dict, pages_root_id);
        }
        objects.push(TransplantedObject { id: remap[old_id], dict, stream });
    }

    let page_ids = cover.page_ids().iter().map(|id| remap[id]).collect();
    (SplicedCover { objects, page_ids }, next_id)
}

fn split_object(obj: &Object, remap: &HashMap<ObjectId, u64>) -> (PdfValue, Option<Vec<u8>>) {
    match obj {
        Object::Stream(stream) => (convert_dict(&stream.dict, remap), Some(stream.content.clone())),
        Object::Dictionary(dict) => (convert_dict(dict, remap), None),
        other => (convert(other, remap), None),
    }
}

/// Structure-tree keys stripped from every transplanted object (spec.md
/// §4.8/§8 scenario 6, extended per SPEC_FULL.md §4 to `MarkInfo`): leaving
/// a dangling `/MarkInfo /Marked true` without the structure tree it refers
/// to would claim a tagged PDF this crate no longer produces.
const STRIPPED_KEYS: [&str; 3] = ["StructParents", "StructParent", "MarkInfo"];

fn convert_dict(dict: &Dictionary, remap: &HashMap<ObjectId, u64>) -> PdfValue {
    let mut entries = Vec::with_capacity(dict.len());
    for (key, value) in dict.iter() {
        let key = String::from_utf8_lossy(key).into_owned();
        if STRIPPED_KEYS.contains(&key.as_str()) {
            continue;
        }
        entries.push((key, convert(value, remap)));
    }
    PdfValue::Dictionary(entries)
}

fn set_parent(dict: &mut PdfValue, pages_root_id: u64) {
    let PdfValue::Dictionary(entries) = dict else { return };
    entries.retain(|(k, _)| k != "Parent");
    entries.push(("Parent".to_owned(), PdfValue::reference(pages_root_id)));
}

fn convert(obj: &Object, remap: &HashMap<ObjectId, u64>) -> PdfValue {
    match obj {
        Object::Null => PdfValue::Null,
        Object::Boolean(b) => PdfValue::Boolean(*b),
        Object::Integer(i) => PdfValue::Integer(*i),
        Object::Real(r) => PdfValue::Real(*r as f64),
        Object::Name(name) => PdfValue::Name(String::from_utf8_lossy(name).into_owned()),
        Object::String(bytes, _format) => PdfValue::HexBytes(bytes.clone()),
        Object::Array(items) => PdfValue::Array(items.iter().map(|i| convert(i, remap)).collect()),
        Object::Dictionary(dict) => convert_dict(dict, remap),
        Object::Stream(stream) => convert_dict(&stream.dict, remap),
        Object::Reference(id) => match remap.get(id) {
            Some(new_id) => PdfValue::reference(*new_id),
            // Outside the closure we computed; cannot happen for a
            // cooperating renderer's self-contained page graph.
            None => PdfValue::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_two_page_pdf() -> Vec<u8> {
        let body = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 300] /StructParents 0 >>\nendobj\n\
4 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 300] >>\nendobj\n\
trailer\n<< /Size 5 /Root 1 0 R >>\n%%EOF\n";
        body.to_vec()
    }

    #[test]
    fn renumbers_pages_and_redirects_parent() {
        let cover = CoverPdf::load_bytes(&minimal_two_page_pdf()).unwrap();
        let (spliced, next_id) = splice(&cover, /* pages_root_id */ 2, /* first_new_id */ 100);
        assert_eq!(spliced.page_ids.len(), 2);
        assert!(next_id > 100);

        for page_id in &spliced.page_ids {
            let page = spliced.objects.iter().find(|o| o.id == *page_id).unwrap();
            let text = String::from_utf8(page.dict.to_bytes()).unwrap();
            assert!(text.contains("/Parent 2 0 R"));
            assert!(!text.contains("StructParents"));
        }
    }

    #[test]
    fn new_ids_start_at_first_new_id() {
        let cover = CoverPdf::load_bytes(&minimal_two_page_pdf()).unwrap();
        let (spliced, _) = splice(&cover, 2, 50);
        assert!(spliced.objects.iter().all(|o| o.id >= 50));
    }
}
