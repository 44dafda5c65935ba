//! PDF generator: orchestrates the object graph — catalog,
//! pages, outline, hidden-text font, sRGB output intent, cover-page splice,
//! and per-page content streams — and flushes it to a [`ByteSink`] as it
//! goes, keeping resident memory bounded to the current page.

use std::collections::HashMap;
use std::fmt;
use std::io::Write as _;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use rand::RngCore;
use tokio::io::AsyncWrite;

use crate::font::{self, FontIds};
use crate::icc::{self, IccIds};
use crate::iiif::OutlineItem;
use crate::image::EncodedImage;
use crate::ocr::OcrPage;
use crate::pdfvalue::PdfValue;
use crate::splice;
use crate::textlayer;
use crate::writer::{ByteSink, WriterError};

#[derive(Debug)]
pub enum GeneratorError {
    Writer(WriterError),
    Cover(iiif2pdf_cover::CoverError),
    WrongState(&'static str),
}
impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Writer(e) => write!(f, "{}", e),
            Self::Cover(e) => write!(f, "{}", e),
            Self::WrongState(expected) => write!(f, "generator is not in the {} state", expected),
        }
    }
}
impl std::error::Error for GeneratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Writer(e) => Some(e),
            Self::Cover(e) => Some(e),
            Self::WrongState(_) => None,
        }
    }
}
impl From<WriterError> for GeneratorError {
    fn from(value: WriterError) -> Self { Self::Writer(value) }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    New,
    Setup,
    Pages,
    Ended,
}
impl State {
    fn name(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Setup => "setup",
            Self::Pages => "pages",
            Self::Ended => "ended",
        }
    }
}

/// What `setup()` needs to build the catalog, pages root, and (optionally)
/// an outline tree, an embedded hidden-text font, and an sRGB output
/// intent.
pub struct SetupOptions {
    pub title: Option<String>,
    pub author: Option<String>,
    pub outline: Vec<OutlineItem>,
    pub embed_hidden_text_font: bool,
    pub embed_srgb_output_intent: bool,
}

/// What `begin_pages()` needs to reserve object numbers for a canvas before
/// any of its images have been fetched: the number of image placements
/// (known from the manifest alone), its pixel dimensions, and its PPI.
#[derive(Clone, Copy, Debug)]
pub struct CanvasPlan {
    pub placements_len: usize,
    pub width: u32,
    pub height: u32,
    pub ppi: f64,
}

/// The object numbers `begin_pages()` reserved for one canvas: one for its
/// content stream, one for its page dictionary, and one per image
/// placement (the placement's *primary* slot — multi-object images get
/// additional ids allocated on demand when rendered).
#[derive(Clone, Debug)]
pub struct PageReservation {
    pub canvas_index: usize,
    pub content_id: u64,
    pub page_id: u64,
    pub image_ids: Vec<u64>,
    pub width: u32,
    pub height: u32,
    pub ppi: f64,
}

/// One placement to paint (or skip) on a page, aligned index-for-index
/// with `PageReservation::image_ids`.
pub struct PlacementRender {
    /// `None` if the placement's fetch failed, or it lost a Choice
    /// selection to a sibling alternative — its reserved id is left
    /// unused and becomes a legitimate xref free-list entry.
    pub image: Option<EncodedImage>,
    pub rect: (f64, f64, f64, f64),
}

struct PendingObject {
    id: u64,
    dict: PdfValue,
    stream: Option<Vec<u8>>,
}

struct OutlineNode {
    id: u64,
    parent: u64,
    prev: Option<u64>,
    next: Option<u64>,
    first_child: Option<u64>,
    last_child: Option<u64>,
    descendant_count: usize,
    label: String,
    start_canvas_index: Option<usize>,
    start_rect: Option<(f64, f64, f64, f64)>,
}

pub struct Generator<W> {
    sink: ByteSink<W>,
    state: State,
    next_id: u64,
    offsets: Vec<Option<u64>>,
    in_use: Vec<bool>,
    pending: Vec<PendingObject>,

    catalog_id: u64,
    pages_root_id: u64,
    info_id: u64,
    title: Option<String>,
    author: Option<String>,

    font_ids: Option<FontIds>,
    outlines_root_id: Option<u64>,
    outline_root_ids: Vec<u64>,
    outline_nodes: Vec<OutlineNode>,

    cover_page_ids: Vec<u64>,
}

impl<W: AsyncWrite + Unpin + Send> Generator<W> {
    pub fn new(inner: W) -> Self {
        Self {
            sink: ByteSink::new(inner),
            state: State::New,
            next_id: 1,
            offsets: vec![None], // index 0 reserved for the free-list head
            in_use: vec![false],
            pending: Vec::new(),
            catalog_id: 0,
            pages_root_id: 0,
            info_id: 0,
            title: None,
            author: None,
            font_ids: None,
            outlines_root_id: None,
            outline_root_ids: Vec::new(),
            outline_nodes: Vec::new(),
            cover_page_ids: Vec::new(),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.sink.bytes_written()
    }

    fn require_state(&self, expected: State) -> Result<(), GeneratorError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GeneratorError::WrongState(expected.name()))
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ensure_capacity(&mut self, id: u64) {
        let idx = id as usize;
        if self.offsets.len() <= idx {
            self.offsets.resize(idx + 1, None);
            self.in_use.resize(idx + 1, false);
        }
    }

    /// Writes the catalog, root pages dictionary (`/Kids` deferred),
    /// outline tree, hidden-text font, and sRGB output intent — all
    /// constructed and queued, not yet flushed to the sink. The actual
    /// flush happens on the first `begin_pages()` call, once `/Kids` and
    /// outline destinations can be finalised.
    pub async fn setup(&mut self, opts: SetupOptions) -> Result<(), GeneratorError> {
        self.require_state(State::New)?;
        self.write_header().await?;

        self.catalog_id = self.alloc_id();
        self.pages_root_id = self.alloc_id();
        self.info_id = self.alloc_id();
        self.title = opts.title;
        self.author = opts.author;

        if opts.embed_hidden_text_font {
            let ids = FontIds {
                type0_id: self.alloc_id(),
                descendant_id: self.alloc_id(),
                descriptor_id: self.alloc_id(),
                file_id: self.alloc_id(),
                cid_to_gid_id: self.alloc_id(),
                to_unicode_id: self.alloc_id(),
            };
            for obj in font::build(ids) {
                self.pending.push(PendingObject { id: obj.id, dict: obj.dict, stream: obj.stream });
            }
            self.font_ids = Some(ids);
        }

        let icc_intent_id = if opts.embed_srgb_output_intent {
            let ids = IccIds { intent_id: self.alloc_id(), profile_id: self.alloc_id() };
            for obj in icc::build(ids) {
                self.pending.push(PendingObject { id: obj.id, dict: obj.dict, stream: obj.stream });
            }
            Some(ids.intent_id)
        } else {
            None
        };

        if !opts.outline.is_empty() {
            let outlines_root_id = self.alloc_id();
            let root_ids = self.build_outline_nodes(&opts.outline, outlines_root_id);
            let count = root_ids.len() as i64;
            self.pending.push(PendingObject {
                id: outlines_root_id,
                dict: PdfValue::dict([
                    ("Type", PdfValue::name("Outlines")),
                    ("First", PdfValue::reference(*root_ids.first().expect("non-empty outline"))),
                    ("Last", PdfValue::reference(*root_ids.last().expect("non-empty outline"))),
                    ("Count", PdfValue::Integer(count)),
                ]),
                stream: None,
            });
            self.outlines_root_id = Some(outlines_root_id);
            self.outline_root_ids = root_ids;
        }

        let mut catalog_entries = vec![
            ("Type".to_owned(), PdfValue::name("Catalog")),
            ("Pages".to_owned(), PdfValue::reference(self.pages_root_id)),
        ];
        if let Some(outlines_id) = self.outlines_root_id {
            catalog_entries.push(("Outlines".to_owned(), PdfValue::reference(outlines_id)));
            catalog_entries.push(("PageMode".to_owned(), PdfValue::name("UseOutlines")));
        } else {
            catalog_entries.push(("PageMode".to_owned(), PdfValue::name("UseThumbs")));
        }
        if let Some(intent_id) = icc_intent_id {
            catalog_entries.push(("OutputIntents".to_owned(), PdfValue::Array(vec![PdfValue::reference(intent_id)])));
        }
        self.pending.push(PendingObject { id: self.catalog_id, dict: PdfValue::Dictionary(catalog_entries), stream: None });

        let mut info_entries = Vec::new();
        if let Some(title) = &self.title {
            info_entries.push(("Title".to_owned(), PdfValue::TextString(title.clone())));
        }
        if let Some(author) = &self.author {
            info_entries.push(("Author".to_owned(), PdfValue::TextString(author.clone())));
        }
        info_entries.push(("Producer".to_owned(), PdfValue::TextString("iiif2pdf".to_owned())));
        self.pending.push(PendingObject { id: self.info_id, dict: PdfValue::Dictionary(info_entries), stream: None });

        self.state = State::Setup;
        Ok(())
    }

    /// Allocates node ids for an outline subtree (siblings linked via
    /// `/Prev`/`/Next`, their shared `parent` set to `parent_id`), and
    /// records them for finalisation once page destinations are known.
    /// Returns the top-level ids of `items`, in order.
    fn build_outline_nodes(&mut self, items: &[OutlineItem], parent_id: u64) -> Vec<u64> {
        let mut ids = Vec::with_capacity(items.len());
        let mut descendant_counts = Vec::with_capacity(items.len());
        for item in items {
            let id = self.alloc_id();
            let child_ids = self.build_outline_nodes(&item.children, id);
            let descendants = child_ids.len()
                + child_ids
                    .iter()
                    .filter_map(|cid| self.outline_nodes.iter().find(|n| n.id == *cid))
                    .map(|n| n.descendant_count)
                    .sum::<usize>();
            self.outline_nodes.push(OutlineNode {
                id,
                parent: parent_id,
                prev: None,
                next: None,
                first_child: child_ids.first().copied(),
                last_child: child_ids.last().copied(),
                descendant_count: descendants,
                label: item.label.clone(),
                start_canvas_index: item.start_canvas_index,
                start_rect: item.start_rect,
            });
            ids.push(id);
            descendant_counts.push(descendants);
        }
        for i in 0..ids.len() {
            let prev = if i > 0 { Some(ids[i - 1]) } else { None };
            let next = ids.get(i + 1).copied();
            if let Some(node) = self.outline_nodes.iter_mut().find(|n| n.id == ids[i]) {
                node.prev = prev;
                node.next = next;
            }
        }
        ids
    }

    /// Valid only in SETUP. Parses `bytes` as a cover-page PDF, transplants
    /// every page (and everything each page transitively references) into
    /// this document's own object graph, and records the new page ids for
    /// `/Kids`. Returns the number of pages spliced in.
    pub async fn insert_cover_pages(&mut self, bytes: &[u8]) -> Result<usize, GeneratorError> {
        self.require_state(State::Setup)?;
        let cover = iiif2pdf_cover::CoverPdf::load_bytes(bytes).map_err(GeneratorError::Cover)?;
        let (spliced, next_id) = splice::splice(&cover, self.pages_root_id, self.next_id);
        self.next_id = next_id;
        let page_count = spliced.page_ids.len();
        self.cover_page_ids.extend(spliced.page_ids);
        for obj in spliced.objects {
            self.pending.push(PendingObject { id: obj.id, dict: obj.dict, stream: obj.stream });
        }
        Ok(page_count)
    }

    /// Reserves object numbers for every canvas page (`content + page +
    /// one id per placement`), finalises `/Kids` on the pages root,
    /// resolves outline destinations to real page references, and flushes
    /// every object queued since `setup()`. Must be called exactly once,
    /// even with an empty `plans` (spec.md §8: zero surviving canvases
    /// still yields a valid, possibly cover-pages-only, PDF).
    pub async fn begin_pages(&mut self, plans: &[CanvasPlan]) -> Result<Vec<PageReservation>, GeneratorError> {
        self.require_state(State::Setup)?;

        let mut reservations = Vec::with_capacity(plans.len());
        let mut page_id_by_canvas = Vec::with_capacity(plans.len());
        for (canvas_index, plan) in plans.iter().enumerate() {
            let content_id = self.alloc_id();
            let page_id = self.alloc_id();
            let image_ids: Vec<u64> = (0..plan.placements_len).map(|_| self.alloc_id()).collect();
            page_id_by_canvas.push(page_id);
            reservations.push(PageReservation {
                canvas_index,
                content_id,
                page_id,
                image_ids,
                width: plan.width,
                height: plan.height,
                ppi: plan.ppi,
            });
        }

        let mut kids = Vec::with_capacity(self.cover_page_ids.len() + reservations.len());
        kids.extend(self.cover_page_ids.iter().map(|&id| PdfValue::reference(id)));
        kids.extend(reservations.iter().map(|r| PdfValue::reference(r.page_id)));
        let kids_count = kids.len() as i64;

        self.pending.push(PendingObject {
            id: self.pages_root_id,
            dict: PdfValue::dict([
                ("Type", PdfValue::name("Pages")),
                ("Kids", PdfValue::Array(kids)),
                ("Count", PdfValue::Integer(kids_count)),
            ]),
            stream: None,
        });

        let nodes = std::mem::take(&mut self.outline_nodes);
        for node in &nodes {
            self.pending.push(outline_node_to_pending(node, &page_id_by_canvas, plans));
        }

        self.flush_pending().await?;
        self.state = State::Pages;
        Ok(reservations)
    }

    /// Renders one canvas page: paints each placement's image (skipping
    /// any whose `image` is `None`), appends the hidden-text operators if
    /// `ocr` is present, compresses and flushes the content stream, page
    /// dictionary, and image object(s).
    pub async fn render_page(
        &mut self,
        reservation: &PageReservation,
        placements: Vec<PlacementRender>,
        ocr: Option<&OcrPage>,
    ) -> Result<(), GeneratorError> {
        self.require_state(State::Pages)?;
        assert_eq!(placements.len(), reservation.image_ids.len(), "placement count must match reserved image ids");

        let unit_scale = 72.0 / reservation.ppi;
        let page_width = unit_scale * reservation.width as f64;
        let page_height = unit_scale * reservation.height as f64;

        let mut content = Vec::new();
        let mut xobject_entries = Vec::new();

        for (i, placement) in placements.into_iter().enumerate() {
            let Some(image) = placement.image else { continue };
            let reserved_id = reservation.image_ids[i];
            let extra = image.object_count().saturating_sub(1);
            let mut ids = Vec::with_capacity(image.object_count());
            ids.push(reserved_id);
            for _ in 0..extra {
                ids.push(self.alloc_id());
            }

            let (x, y, w, h) = placement.rect;
            let tx = x * unit_scale;
            let ty = (reservation.height as f64 - y - h) * unit_scale;
            let sx = w * unit_scale;
            let sy = h * unit_scale;
            let resource_name = format!("Im{}", i);

            writeln!(content, "q").unwrap();
            writeln!(content, "{:.4} 0 0 {:.4} {:.4} {:.4} cm", sx, sy, tx, ty).unwrap();
            writeln!(content, "/{} Do", resource_name).unwrap();
            writeln!(content, "Q").unwrap();
            xobject_entries.push((resource_name, reserved_id));

            for (id, obj) in ids.iter().zip(image.into_objects(&ids)) {
                self.pending.push(PendingObject { id: *id, dict: obj.dict, stream: obj.stream });
            }
        }

        if let (Some(ocr), Some(_)) = (ocr, self.font_ids) {
            content.extend(textlayer::render(ocr, reservation.height as f64, unit_scale, font::RESOURCE_NAME));
        }

        let compressed = deflate(&content);

        let mut resources_entries = Vec::new();
        if let Some(font_ids) = self.font_ids {
            resources_entries.push((
                "Font".to_owned(),
                PdfValue::dict([(font::RESOURCE_NAME, PdfValue::reference(font_ids.type0_id))]),
            ));
        }
        if !xobject_entries.is_empty() {
            resources_entries.push((
                "XObject".to_owned(),
                PdfValue::Dictionary(xobject_entries.into_iter().map(|(name, id)| (name, PdfValue::reference(id))).collect()),
            ));
        }

        self.pending.push(PendingObject {
            id: reservation.content_id,
            dict: PdfValue::dict([("Filter", PdfValue::name("FlateDecode"))]),
            stream: Some(compressed),
        });
        self.pending.push(PendingObject {
            id: reservation.page_id,
            dict: PdfValue::Dictionary(vec![
                ("Type".to_owned(), PdfValue::name("Page")),
                ("Parent".to_owned(), PdfValue::reference(self.pages_root_id)),
                (
                    "MediaBox".to_owned(),
                    PdfValue::Array(vec![
                        PdfValue::Integer(0),
                        PdfValue::Integer(0),
                        PdfValue::Real(page_width),
                        PdfValue::Real(page_height),
                    ]),
                ),
                ("Resources".to_owned(), PdfValue::Dictionary(resources_entries)),
                ("Contents".to_owned(), PdfValue::reference(reservation.content_id)),
            ]),
            stream: None,
        });

        self.flush_pending().await?;
        self.sink.wait_for_drain().await?;
        Ok(())
    }

    /// Writes the cross-reference table (with unused reserved ids chained
    /// into the free list) and the trailer, then closes the writer.
    pub async fn end(&mut self) -> Result<(), GeneratorError> {
        self.require_state(State::Pages)?;

        let xref_offset = self.sink.bytes_written();
        let size = self.offsets.len() as u64;

        let free_indices: Vec<u64> = (1..size).filter(|&i| !self.in_use[i as usize]).collect();
        let mut next_free: HashMap<u64, u64> = HashMap::new();
        let mut prev = 0u64;
        for &idx in &free_indices {
            next_free.insert(prev, idx);
            prev = idx;
        }
        next_free.insert(prev, 0);

        let mut xref = Vec::new();
        xref.extend_from_slice(b"xref\n");
        xref.extend_from_slice(format!("0 {}\n", size).as_bytes());
        for id in 0..size {
            if id != 0 && self.in_use[id as usize] {
                let offset = self.offsets[id as usize].unwrap_or(0);
                xref.extend_from_slice(xref_line(offset, 0, true).as_bytes());
            } else {
                let next = next_free.get(&id).copied().unwrap_or(0);
                xref.extend_from_slice(xref_line(next, 65535, false).as_bytes());
            }
        }

        let mut id_bytes_1 = [0u8; 32];
        let mut id_bytes_2 = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut id_bytes_1);
        rand::thread_rng().fill_bytes(&mut id_bytes_2);

        let trailer_dict = PdfValue::dict([
            ("Size", PdfValue::Integer(size as i64)),
            ("Root", PdfValue::reference(self.catalog_id)),
            ("Info", PdfValue::reference(self.info_id)),
            (
                "ID",
                PdfValue::Array(vec![PdfValue::HexBytes(id_bytes_1.to_vec()), PdfValue::HexBytes(id_bytes_2.to_vec())]),
            ),
        ]);

        let mut trailer = Vec::new();
        trailer.extend_from_slice(b"trailer\n");
        trailer.extend_from_slice(&trailer_dict.to_bytes());
        trailer.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        self.sink.write(&xref).await?;
        self.sink.write(&trailer).await?;
        self.sink.close().await?;
        self.state = State::Ended;
        Ok(())
    }

    async fn write_header(&mut self) -> Result<(), GeneratorError> {
        self.sink.write(b"%PDF-1.5\n%\xE2\xE3\xCF\xD3\n").await?;
        Ok(())
    }

    async fn flush_pending(&mut self) -> Result<(), GeneratorError> {
        let pending = std::mem::take(&mut self.pending);
        for obj in pending {
            self.ensure_capacity(obj.id);
            let offset = self.sink.bytes_written();
            let bytes = serialize_object(obj.id, obj.dict, obj.stream);
            self.sink.write(&bytes).await?;
            self.offsets[obj.id as usize] = Some(offset);
            self.in_use[obj.id as usize] = true;
        }
        Ok(())
    }
}

fn xref_line(offset: u64, generation: u16, in_use: bool) -> String {
    format!("{:010} {:05} {} \n", offset, generation, if in_use { "n" } else { "f" })
}

fn serialize_object(id: u64, dict: PdfValue, stream: Option<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("{} 0 obj\n", id).as_bytes());
    let dict = match &stream {
        Some(bytes) => with_length(dict, bytes.len()),
        None => dict,
    };
    out.extend_from_slice(&dict.to_bytes());
    out.push(b'\n');
    if let Some(bytes) = stream {
        out.extend_from_slice(b"stream\n");
        out.extend_from_slice(&bytes);
        out.extend_from_slice(b"\nendstream\n");
    }
    out.extend_from_slice(b"endobj\n");
    out
}

fn with_length(dict: PdfValue, len: usize) -> PdfValue {
    let PdfValue::Dictionary(mut entries) = dict else { return dict };
    entries.retain(|(k, _)| k != "Length");
    entries.push(("Length".to_owned(), PdfValue::Integer(len as i64)));
    PdfValue::Dictionary(entries)
}

fn outline_node_to_pending(node: &OutlineNode, page_id_by_canvas: &[u64], plans: &[CanvasPlan]) -> PendingObject {
    let mut entries = vec![
        ("Title".to_owned(), PdfValue::TextString(node.label.clone())),
        ("Parent".to_owned(), PdfValue::reference(node.parent)),
    ];
    if let Some(prev) = node.prev {
        entries.push(("Prev".to_owned(), PdfValue::reference(prev)));
    }
    if let Some(next) = node.next {
        entries.push(("Next".to_owned(), PdfValue::reference(next)));
    }
    if let Some(first) = node.first_child {
        entries.push(("First".to_owned(), PdfValue::reference(first)));
    }
    if let Some(last) = node.last_child {
        entries.push(("Last".to_owned(), PdfValue::reference(last)));
    }
    if node.descendant_count > 0 {
        entries.push(("Count".to_owned(), PdfValue::Integer(node.descendant_count as i64)));
    }
    if let Some(canvas_index) = node.start_canvas_index {
        if let Some(&page_id) = page_id_by_canvas.get(canvas_index) {
            let dest = match node.start_rect {
                Some((x, y, w, h)) => {
                    let plan = &plans[canvas_index];
                    let s = 72.0 / plan.ppi;
                    let page_h = plan.height as f64;
                    PdfValue::Array(vec![
                        PdfValue::reference(page_id),
                        PdfValue::name("FitR"),
                        PdfValue::Real(x * s),
                        PdfValue::Real((page_h - y - h) * s),
                        PdfValue::Real((x + w) * s),
                        PdfValue::Real((page_h - y) * s),
                    ])
                }
                None => PdfValue::Array(vec![
                    PdfValue::reference(page_id),
                    PdfValue::name("XYZ"),
                    PdfValue::Null,
                    PdfValue::Null,
                    PdfValue::Null,
                ]),
            };
            entries.push(("Dest".to_owned(), dest));
        }
    }
    PendingObject { id: node.id, dict: PdfValue::Dictionary(entries), stream: None }
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory zlib write cannot fail");
    encoder.finish().expect("in-memory zlib finish cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelFormat;

    fn minimal_jpeg() -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xC0];
        let mut sof = vec![8u8, 0, 4, 0, 4, 1];
        sof.extend_from_slice(&[1, 0x11, 0]);
        let len = (sof.len() + 2) as u16;
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(&sof);
        bytes
    }

    #[tokio::test]
    async fn two_page_pdf_has_kids_length_two_and_xref_offsets_match() {
        let mut buf = Vec::new();
        let mut gen = Generator::new(&mut buf);
        gen.setup(SetupOptions {
            title: None,
            author: None,
            outline: Vec::new(),
            embed_hidden_text_font: false,
            embed_srgb_output_intent: false,
        })
        .await
        .unwrap();

        let plans = vec![
            CanvasPlan { placements_len: 1, width: 290, height: 400, ppi: 300.0 },
            CanvasPlan { placements_len: 1, width: 290, height: 400, ppi: 300.0 },
        ];
        let reservations = gen.begin_pages(&plans).await.unwrap();
        assert_eq!(reservations.len(), 2);

        for reservation in &reservations {
            let image = crate::image::encode(PixelFormat::Jpeg, &minimal_jpeg()).unwrap();
            let placements = vec![PlacementRender { image: Some(image), rect: (0.0, 0.0, 290.0, 400.0) }];
            gen.render_page(reservation, placements, None).await.unwrap();
        }
        gen.end().await.unwrap();

        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains("/Kids [") || text.contains("/Kids\n"));

        for id in [reservations[0].page_id, reservations[1].page_id, reservations[0].content_id] {
            let marker = format!("{} 0 obj", id);
            let offset = gen.offsets[id as usize].expect("object offset recorded") as usize;
            assert!(buf[offset..].starts_with(marker.as_bytes()));
        }
    }

    #[tokio::test]
    async fn zero_canvas_manifest_still_produces_valid_pdf() {
        let mut buf = Vec::new();
        let mut gen = Generator::new(&mut buf);
        gen.setup(SetupOptions {
            title: None,
            author: None,
            outline: Vec::new(),
            embed_hidden_text_font: false,
            embed_srgb_output_intent: false,
        })
        .await
        .unwrap();
        let reservations = gen.begin_pages(&[]).await.unwrap();
        assert!(reservations.is_empty());
        gen.end().await.unwrap();
        assert!(buf.starts_with(b"%PDF-1.5"));
        assert!(buf.ends_with(b"%%EOF\n"));
    }
}
