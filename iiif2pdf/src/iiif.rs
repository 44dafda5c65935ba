//! IIIF model adapter: normalises a v2 or v3 Presentation manifest and
//! resolves canvases, image placements, OCR references,
//! physical-dimensions PPI, and the outline tree.

use std::collections::HashSet;

use serde_json::Value;

use crate::image::PixelFormat;

#[derive(Clone, Debug)]
pub struct ChoiceMeta {
    pub enabled: bool,
    pub is_default: bool,
}

#[derive(Clone, Debug)]
pub struct ImageService {
    pub id: String,
    pub supports_size_by_wh: bool,
    pub sizes: Vec<(u32, u32)>,
    pub max_width: u32,
    /// Raw `profile` string, kept around only so the pipeline's size
    /// selection (spec.md §4.9.1) can tell a level-1 service (which only
    /// ever answers `full`) from a level-2/v3 one (which answers `max`).
    pub profile: String,
}

#[derive(Clone, Debug)]
pub struct ImagePlacement {
    pub resource_id: String,
    pub rect: (f64, f64, f64, f64),
    pub native_size: Option<(u32, u32)>,
    pub format: PixelFormat,
    pub service: Option<ImageService>,
    pub choice: Option<ChoiceMeta>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OcrKind {
    Hocr,
    Alto,
}

#[derive(Clone, Debug)]
pub struct OcrReference {
    pub url: String,
    pub kind: OcrKind,
}

#[derive(Clone, Debug)]
pub struct Canvas {
    pub index: usize,
    pub id: String,
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub placements: Vec<ImagePlacement>,
    pub ocr: Option<OcrReference>,
    pub ppi: f64,
}

#[derive(Clone, Debug)]
pub struct OutlineItem {
    pub label: String,
    pub children: Vec<OutlineItem>,
    /// The canvas index this item jumps to, if any survived filtering.
    pub start_canvas_index: Option<usize>,
    pub start_rect: Option<(f64, f64, f64, f64)>,
}

pub struct Manifest {
    root: Value,
}

const DEFAULT_PPI: f64 = 300.0;

impl Manifest {
    pub fn from_json(value: Value) -> Self {
        Self { root: normalize(value) }
    }

    pub fn label(&self) -> Option<String> {
        label_string(self.root.get("label"))
    }

    /// Enumerates canvases in declared order, applying `filter` (given the
    /// ordinal index) to decide which survive.
    pub fn canvases(&self, filter: impl Fn(usize) -> bool) -> Vec<Canvas> {
        let items = self.root.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut canvases = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if item.get("type").and_then(Value::as_str) != Some("Canvas") {
                continue;
            }
            if !filter(index) {
                continue;
            }
            canvases.push(build_canvas(index, item));
        }
        canvases
    }

    pub fn outline(&self, surviving: &HashSet<usize>, canvas_id_to_index: &dyn Fn(&str) -> Option<usize>) -> Vec<OutlineItem> {
        let structures = self.root.get("structures").and_then(Value::as_array).cloned().unwrap_or_default();
        if structures.is_empty() {
            return Vec::new();
        }

        let top = structures.iter().find(|s| {
            s.get("behavior").map(|b| behavior_contains(b, "top")).unwrap_or(false)
        });
        let roots: Vec<&Value> = match top {
            Some(t) => vec![t],
            None => structures.iter().collect(),
        };

        let mut visited = HashSet::new();
        roots.into_iter()
            .filter_map(|range| build_outline_item(range, surviving, canvas_id_to_index, &mut visited))
            .collect()
    }
}

fn behavior_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s == needle,
        Value::Array(items) => items.iter().any(|v| v.as_str() == Some(needle)),
        _ => false,
    }
}

fn label_string(label: Option<&Value>) -> Option<String> {
    let label = label?;
    if let Some(s) = label.as_str() {
        return Some(s.to_owned());
    }
    // v3 language map: {"none": ["text"], "en": ["text"]}
    let map = label.as_object()?;
    for values in map.values() {
        if let Some(first) = values.as_array().and_then(|a| a.first()).and_then(Value::as_str) {
            return Some(first.to_owned());
        }
    }
    None
}

/// Upgrades a v2 manifest (`sequences[0].canvases`, `images`) into the v3
/// shape (`items`, painting annotations) this adapter otherwise consumes
/// directly; a manifest already in v3 shape passes through untouched.
fn normalize(mut root: Value) -> Value {
    let is_v3 = root.get("items").is_some();
    if is_v3 {
        return root;
    }

    let canvases_v2 = root
        .get("sequences")
        .and_then(Value::as_array)
        .and_then(|seqs| seqs.first())
        .and_then(|seq| seq.get("canvases"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut items_v3 = Vec::with_capacity(canvases_v2.len());
    for canvas in canvases_v2 {
        items_v3.push(upgrade_canvas_v2(canvas));
    }

    if let Value::Object(map) = &mut root {
        map.insert("items".to_owned(), Value::Array(items_v3));
    }
    root
}

fn upgrade_canvas_v2(canvas: Value) -> Value {
    let id = canvas.get("@id").and_then(Value::as_str).unwrap_or_default().to_owned();
    let width = canvas.get("width").cloned().unwrap_or(Value::Null);
    let height = canvas.get("height").cloned().unwrap_or(Value::Null);
    let label = canvas.get("label").cloned().unwrap_or(Value::Null);

    let v2_images = canvas.get("images").and_then(Value::as_array).cloned().unwrap_or_default();
    let annotations: Vec<Value> = v2_images.into_iter().map(upgrade_annotation_v2).collect();

    let see_also = canvas.get("seeAlso").cloned().unwrap_or(Value::Null);
    let rendering = canvas.get("rendering").cloned().unwrap_or(Value::Null);

    serde_json::json!({
        "id": id,
        "type": "Canvas",
        "label": label,
        "width": width,
        "height": height,
        "seeAlso": see_also,
        "rendering": rendering,
        "items": [{
            "id": format!("{id}/annopage"),
            "type": "AnnotationPage",
            "items": annotations,
        }],
    })
}

fn upgrade_annotation_v2(image_annotation: Value) -> Value {
    let resource = image_annotation.get("resource").cloned().unwrap_or(Value::Null);
    serde_json::json!({
        "type": "Annotation",
        "motivation": "painting",
        "body": resource,
    })
}

fn build_canvas(index: usize, canvas: &Value) -> Canvas {
    let id = canvas.get("id").or_else(|| canvas.get("@id")).and_then(Value::as_str).unwrap_or_default().to_owned();
    let width = canvas.get("width").and_then(Value::as_u64).unwrap_or(0) as u32;
    let height = canvas.get("height").and_then(Value::as_u64).unwrap_or(0) as u32;
    let label = label_string(canvas.get("label"));

    let mut placements = Vec::new();
    if let Some(annotation_pages) = canvas.get("items").and_then(Value::as_array) {
        for page in annotation_pages {
            if let Some(annotations) = page.get("items").and_then(Value::as_array) {
                for annotation in annotations {
                    if annotation.get("motivation").and_then(Value::as_str) != Some("painting") {
                        continue;
                    }
                    placements.extend(placements_from_annotation(annotation, width, height));
                }
            }
        }
    }

    let ocr = resolve_ocr_reference(canvas);
    let ppi = resolve_ppi(canvas);

    Canvas { index, id, label, width, height, placements, ocr, ppi }
}

fn placements_from_annotation(annotation: &Value, canvas_width: u32, canvas_height: u32) -> Vec<ImagePlacement> {
    let Some(body) = annotation.get("body") else { return Vec::new() };

    let rect = (0.0, 0.0, canvas_width as f64, canvas_height as f64);

    if body.get("type").and_then(Value::as_str) == Some("Choice") {
        let items = body.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        let default_id = body.get("default").and_then(Value::as_str).map(str::to_owned);
        return items
            .iter()
            .map(|item| {
                let is_default = item.get("id").and_then(Value::as_str) == default_id.as_deref();
                placement_from_body(item, rect, Some(ChoiceMeta { enabled: true, is_default }))
            })
            .collect();
    }

    vec![placement_from_body(body, rect, None)]
}

fn placement_from_body(body: &Value, rect: (f64, f64, f64, f64), choice: Option<ChoiceMeta>) -> ImagePlacement {
    let resource_id = body.get("id").or_else(|| body.get("@id")).and_then(Value::as_str).unwrap_or_default().to_owned();
    let media_type = body.get("format").and_then(Value::as_str).unwrap_or_default();
    let format = if !media_type.is_empty() {
        PixelFormat::from_media_type(media_type)
    } else {
        PixelFormat::from_extension(&resource_id)
    };
    let native_size = match (body.get("width").and_then(Value::as_u64), body.get("height").and_then(Value::as_u64)) {
        (Some(w), Some(h)) => Some((w as u32, h as u32)),
        _ => None,
    };
    let service = body.get("service").and_then(parse_service);

    ImagePlacement { resource_id, rect, native_size, format, service, choice }
}

fn parse_service(service: &Value) -> Option<ImageService> {
    let service = service.as_array().and_then(|a| a.first()).unwrap_or(service);
    let id = service.get("id").or_else(|| service.get("@id")).and_then(Value::as_str)?.to_owned();
    let profile = service.get("profile").and_then(Value::as_str).unwrap_or_default();
    let supports_size_by_wh = profile.contains("level2") || profile.ends_with("2")
        || service.get("profile").map(|p| p.as_array().map(|a| a.iter().any(|v| v.as_str() == Some("sizeByWh"))).unwrap_or(false)).unwrap_or(false);
    let sizes = service
        .get("sizes")
        .and_then(Value::as_array)
        .map(|sizes| {
            sizes
                .iter()
                .filter_map(|s| Some((s.get("width")?.as_u64()? as u32, s.get("height")?.as_u64()? as u32)))
                .collect()
        })
        .unwrap_or_default();
    let max_width = service
        .get("width")
        .and_then(Value::as_u64)
        .or_else(|| sizes.iter().map(|(w, _)| *w as u64).max())
        .unwrap_or(0) as u32;

    Some(ImageService { id, supports_size_by_wh, sizes, max_width, profile: profile.to_owned() })
}

fn resolve_ocr_reference(canvas: &Value) -> Option<OcrReference> {
    let mut candidates = Vec::new();
    if let Some(see_also) = canvas.get("seeAlso") {
        collect_resource_list(see_also, &mut candidates);
    }
    if let Some(rendering) = canvas.get("rendering") {
        collect_resource_list(rendering, &mut candidates);
    }

    candidates.into_iter().find_map(|resource| {
        let url = resource.get("id").or_else(|| resource.get("@id")).and_then(Value::as_str)?.to_owned();
        let format = resource.get("format").and_then(Value::as_str).unwrap_or_default();
        let profile = resource.get("profile").and_then(Value::as_str).unwrap_or_default();
        let kind = sniff_ocr_kind(format, profile)?;
        Some(OcrReference { url, kind })
    })
}

fn collect_resource_list(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => out.extend(items.iter().cloned()),
        Value::Object(_) => out.push(value.clone()),
        _ => {}
    }
}

fn sniff_ocr_kind(format: &str, profile: &str) -> Option<OcrKind> {
    let haystack = format!("{format} {profile}").to_ascii_lowercase();
    if haystack.contains("alto") {
        Some(OcrKind::Alto)
    } else if haystack.contains("hocr") || haystack.contains("html") {
        Some(OcrKind::Hocr)
    } else {
        None
    }
}

/// `1/s`, `25.4/s`, `2.54/s` for `in`/`mm`/`cm`, default 300 PPI if no
/// physical-dimensions service is declared.
fn resolve_ppi(canvas: &Value) -> f64 {
    let Some(services) = canvas.get("service").or_else(|| canvas.get("services")) else { return DEFAULT_PPI };
    let services: Vec<&Value> = match services {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    for service in services {
        let profile = service.get("profile").and_then(Value::as_str).unwrap_or_default();
        if !profile.contains("physical-dimensions") {
            continue;
        }
        let Some(scale_factor) = service.get("physicalScale").and_then(Value::as_f64) else { continue };
        if scale_factor <= 0.0 {
            continue;
        }
        let unit = service.get("physicalUnits").and_then(Value::as_str).unwrap_or("in");
        let numerator = match unit {
            "in" => 1.0,
            "mm" => 25.4,
            "cm" => 2.54,
            _ => continue,
        };
        return numerator / scale_factor;
    }
    DEFAULT_PPI
}

fn build_outline_item(
    range: &Value,
    surviving: &HashSet<usize>,
    canvas_id_to_index: &dyn Fn(&str) -> Option<usize>,
    visited: &mut HashSet<String>,
) -> Option<OutlineItem> {
    let id = range.get("id").or_else(|| range.get("@id")).and_then(Value::as_str).unwrap_or_default().to_owned();
    if !id.is_empty() && !visited.insert(id.clone()) {
        return None;
    }

    let label = label_string(range.get("label")).unwrap_or_default();

    let children: Vec<OutlineItem> = range
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|i| i.get("type").and_then(Value::as_str) == Some("Range"))
                .filter_map(|child| build_outline_item(child, surviving, canvas_id_to_index, visited))
                .collect()
        })
        .unwrap_or_default();

    let (start_index, start_rect) = resolve_range_start(range, surviving, canvas_id_to_index);

    if start_index.is_none() && children.is_empty() {
        return None;
    }

    Some(OutlineItem { label, children, start_canvas_index: start_index, start_rect })
}

fn resolve_range_start(
    range: &Value,
    surviving: &HashSet<usize>,
    canvas_id_to_index: &dyn Fn(&str) -> Option<usize>,
) -> (Option<usize>, Option<(f64, f64, f64, f64)>) {
    if let Some(start) = range.get("start") {
        if let Some(resolved) = resolve_start_target(start, surviving, canvas_id_to_index) {
            return resolved;
        }
    }

    // fall back to the ordinally-first contained canvas that survives the filter
    if let Some(items) = range.get("items").and_then(Value::as_array) {
        for item in items {
            if item.get("type").and_then(Value::as_str) == Some("Canvas") {
                if let Some(resolved) = resolve_start_target(item, surviving, canvas_id_to_index) {
                    return resolved;
                }
            }
        }
    }
    (None, None)
}

fn resolve_start_target(
    value: &Value,
    surviving: &HashSet<usize>,
    canvas_id_to_index: &dyn Fn(&str) -> Option<usize>,
) -> Option<(Option<usize>, Option<(f64, f64, f64, f64)>)> {
    let canvas_ref = value.get("source").and_then(Value::as_str)
        .or_else(|| value.get("id").and_then(Value::as_str))
        .or_else(|| value.as_str())?;
    let bare_id = canvas_ref.split('#').next().unwrap_or(canvas_ref);
    let index = canvas_id_to_index(bare_id)?;
    if !surviving.contains(&index) {
        return None;
    }
    let rect = value.get("selector").and_then(parse_fragment_selector);
    Some((Some(index), rect))
}

fn parse_fragment_selector(selector: &Value) -> Option<(f64, f64, f64, f64)> {
    let value = selector.get("value").and_then(Value::as_str)?;
    let coords = value.strip_prefix("xywh=")?;
    let mut parts = coords.split(',').filter_map(|s| s.parse::<f64>().ok());
    Some((parts.next()?, parts.next()?, parts.next()?, parts.next()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_v2_canvas_into_v3_shape() {
        let v2 = serde_json::json!({
            "@context": "http://iiif.io/api/presentation/2/context.json",
            "sequences": [{
                "canvases": [{
                    "@id": "https://example.org/canvas/1",
                    "width": 290,
                    "height": 400,
                    "images": [{
                        "resource": { "@id": "https://example.org/full.jpg", "format": "image/jpeg" },
                    }],
                }],
            }],
        });
        let manifest = Manifest::from_json(v2);
        let canvases = manifest.canvases(|_| true);
        assert_eq!(canvases.len(), 1);
        assert_eq!(canvases[0].width, 290);
        assert_eq!(canvases[0].placements.len(), 1);
        assert_eq!(canvases[0].placements[0].format, PixelFormat::Jpeg);
    }

    #[test]
    fn resolves_choice_placements_with_default_flag() {
        let v3 = serde_json::json!({
            "items": [{
                "id": "c1", "type": "Canvas", "width": 100, "height": 100,
                "items": [{
                    "type": "AnnotationPage",
                    "items": [{
                        "type": "Annotation", "motivation": "painting",
                        "body": {
                            "type": "Choice",
                            "default": "b",
                            "items": [
                                { "id": "a", "type": "Image", "format": "image/jpeg" },
                                { "id": "b", "type": "Image", "format": "image/png" },
                            ],
                        },
                    }],
                }],
            }],
        });
        let manifest = Manifest::from_json(v3);
        let canvases = manifest.canvases(|_| true);
        assert_eq!(canvases[0].placements.len(), 2);
        let default = canvases[0].placements.iter().find(|p| p.resource_id == "b").unwrap();
        assert!(default.choice.as_ref().unwrap().is_default);
    }

    #[test]
    fn ppi_defaults_to_300_without_physical_dimensions_service() {
        let canvas = serde_json::json!({ "id": "c", "type": "Canvas", "width": 1, "height": 1 });
        assert_eq!(resolve_ppi(&canvas), 300.0);
    }
}
