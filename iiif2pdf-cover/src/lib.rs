//! Loading and inspecting a cover-page PDF produced by a cooperating renderer.
//!
//! This crate is the low-level PDF parser used exclusively for cover-page
//! splicing: given the bytes of a complete PDF document, it locates the
//! cross-reference section(s) (following `/Prev` chains) and the page tree,
//! and hands back `lopdf`'s own object graph so the caller can transplant
//! pages into a document of its own.
//!
//! Only classic xref tables are supported, matching the contract that the
//! input is produced by a cooperating cover-page renderer, not arbitrary
//! PDFs found in the wild.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

pub use lopdf::{Dictionary, Object, ObjectId};

/// Failure locating or reading a cover-page PDF's structure.
#[derive(Debug)]
pub enum CoverError {
    /// The bytes could not be parsed as a PDF at all (bad xref, truncated
    /// file, unsupported cross-reference stream instead of a classic table).
    Parse(lopdf::Error),

    /// The document has no catalog, or the catalog has no page tree.
    NoPages,

    /// A page object referenced by the page tree could not be resolved.
    DanglingPageRef(ObjectId),
}
impl fmt::Display for CoverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "failed to parse cover PDF: {}", e),
            Self::NoPages => write!(f, "cover PDF has no page tree"),
            Self::DanglingPageRef(id) => write!(f, "cover PDF page {:?} does not resolve", id),
        }
    }
}
impl std::error::Error for CoverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::NoPages => None,
            Self::DanglingPageRef(_) => None,
        }
    }
}
impl From<lopdf::Error> for CoverError {
    fn from(value: lopdf::Error) -> Self { Self::Parse(value) }
}

/// A cover-page PDF, loaded and ready to have its pages inspected or
/// transplanted.
pub struct CoverPdf {
    document: lopdf::Document,
    page_ids: Vec<ObjectId>,
}
impl CoverPdf {
    /// Parses a cover-page PDF from an in-memory byte buffer.
    pub fn load_bytes(bytes: &[u8]) -> Result<Self, CoverError> {
        let document = lopdf::Document::load_mem(bytes)?;
        Self::from_document(document)
    }

    /// Parses a cover-page PDF from a file path.
    pub fn load_path<P: AsRef<Path>>(path: P) -> Result<Self, CoverError> {
        let document = lopdf::Document::load(path)?;
        Self::from_document(document)
    }

    fn from_document(document: lopdf::Document) -> Result<Self, CoverError> {
        let page_ids: Vec<ObjectId> = document.page_iter().collect();
        if page_ids.is_empty() {
            return Err(CoverError::NoPages);
        }
        Ok(Self { document, page_ids })
    }

    /// The page object IDs, in document (reading) order.
    pub fn page_ids(&self) -> &[ObjectId] {
        &self.page_ids
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Fetches an object by ID.
    pub fn get_object(&self, id: ObjectId) -> Result<&Object, CoverError> {
        self.document
            .get_object(id)
            .map_err(|_| CoverError::DanglingPageRef(id))
    }

    /// The page dictionary for page `index` (0-based, in reading order).
    pub fn page_dictionary(&self, index: usize) -> Result<&Dictionary, CoverError> {
        let id = self.page_ids.get(index).copied().ok_or(CoverError::NoPages)?;
        self.get_object(id).and_then(|obj| {
            obj.as_dict().map_err(|_| CoverError::DanglingPageRef(id))
        })
    }

    /// `/MediaBox` of a page, resolving through `/Parent` if the page itself
    /// does not carry one (as the PDF spec permits for inheritable
    /// attributes).
    pub fn media_box(&self, index: usize) -> Option<[f64; 4]> {
        let id = *self.page_ids.get(index)?;
        let mut current = id;
        loop {
            let dict = self.get_object(current).ok()?.as_dict().ok()?;
            if let Ok(array) = dict.get(b"MediaBox").and_then(|o| o.as_array()) {
                if array.len() == 4 {
                    let mut out = [0f64; 4];
                    for (i, elem) in array.iter().enumerate() {
                        out[i] = match elem {
                            Object::Integer(n) => *n as f64,
                            Object::Real(r) => *r as f64,
                            _ => return None,
                        };
                    }
                    return Some(out);
                }
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent_id)) => current = *parent_id,
                _ => return None,
            }
        }
    }

    /// Every object reachable from `root` by following references, not
    /// including objects already in `exclude`. Used to find the full set of
    /// objects a page transplant needs to copy.
    pub fn transitive_closure(&self, root: ObjectId, exclude: &BTreeSet<ObjectId>) -> Vec<ObjectId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if exclude.contains(&id) || !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let Ok(obj) = self.document.get_object(id) {
                collect_references(obj, &mut stack);
            }
        }
        order
    }
}

fn collect_references(obj: &Object, out: &mut Vec<ObjectId>) {
    match obj {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        },
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter() {
                collect_references(value, out);
            }
        },
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter() {
                collect_references(value, out);
            }
        },
        _ => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pdf() -> Vec<u8> {
        // A hand-rolled single-page PDF with a classic xref table, just
        // enough for lopdf to parse.
        let body = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 300] >>\nendobj\n\
trailer\n<< /Size 4 /Root 1 0 R >>\n%%EOF\n";
        body.to_vec()
    }

    #[test]
    fn loads_page_count_and_media_box() {
        let pdf = CoverPdf::load_bytes(&minimal_pdf()).expect("should parse");
        assert_eq!(pdf.page_count(), 1);
        let media_box = pdf.media_box(0).expect("media box");
        assert_eq!(media_box, [0.0, 0.0, 200.0, 300.0]);
    }

    #[test]
    fn closure_excludes_already_copied_objects() {
        let pdf = CoverPdf::load_bytes(&minimal_pdf()).expect("should parse");
        let page_id = pdf.page_ids()[0];
        let mut exclude = BTreeSet::new();
        exclude.insert((2, 0));
        let closure = pdf.transitive_closure(page_id, &exclude);
        assert!(closure.contains(&page_id));
        assert!(!closure.contains(&(2, 0)));
    }
}
