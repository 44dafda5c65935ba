//! Conversion pipeline: the top-level driver that turns a IIIF manifest
//! into a streamed PDF by wiring the fetch coordinator, IIIF model
//! adapter, image codecs, OCR parsing and the PDF generator together.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ManifestError, PartialFailure, PipelineError};
use crate::fetch::{FetchCoordinator, FetchOptions};
use crate::generator::{CanvasPlan, Generator, PlacementRender, SetupOptions};
use crate::iiif::{Canvas, ImagePlacement, ImageService, Manifest, OutlineItem};
use crate::image::{self, PixelFormat};
use crate::ocr::{self, OcrPage};

/// Where the manifest comes from: a URL the fetch coordinator resolves, or
/// a document the caller already parsed (e.g. from a local file).
pub enum ManifestSource {
    Url(String),
    Parsed(Value),
}

/// Where the cover-page bytes come from: either the caller supplies them
/// directly, or the pipeline posts a JSON
/// description to a cover-page-rendering endpoint and reads back the PDF.
pub enum CoverPageSource {
    Bytes(Vec<u8>),
    Endpoint { url: String, description: Value },
}

pub type CanvasFilter = Arc<dyn Fn(usize) -> bool + Send + Sync>;

/// Per-call conversion options; anything not set here falls
/// back to the crate-level defaults a caller's `Config` supplies.
pub struct ConvertOptions {
    pub ppi_override: Option<f64>,
    pub language: Option<String>,
    pub canvas_filter: CanvasFilter,
    /// `(0, 1]`; the scale factor passed to the IIIF Image API size
    /// selection, independent of the PDF page's own
    /// physical dimensions.
    pub scale_factor: f64,
    pub concurrency: usize,
    pub cover_page: Option<CoverPageSource>,
    pub cancellation: CancellationToken,
    pub fetch_options: FetchOptions,
    pub embed_hidden_text_font: bool,
    pub embed_srgb_output_intent: bool,
    pub title: Option<String>,
    pub author: Option<String>,
}
impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            ppi_override: None,
            language: None,
            canvas_filter: Arc::new(|_| true),
            scale_factor: 1.0,
            concurrency: 4,
            cover_page: None,
            cancellation: CancellationToken::new(),
            fetch_options: FetchOptions::default(),
            embed_hidden_text_font: true,
            embed_srgb_output_intent: true,
            title: None,
            author: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageCode {
    GenerateCoverPage,
    GeneratePages,
    Finishing,
}

/// Progress callback contract: reported at least once per
/// completed page, and again on each drain event during finalisation.
#[derive(Clone, Debug)]
pub struct Progress {
    pub message_code: Option<MessageCode>,
    pub total_pages: usize,
    pub pages_written: usize,
    pub bytes_pushed: u64,
    pub bytes_written: u64,
    pub estimated_file_size: Option<u64>,
    pub write_speed: f64,
    pub remaining_duration: Option<Duration>,
}

/// Notification callback contract: non-fatal, per-item events.
#[derive(Clone, Debug)]
pub enum Notification {
    ImageDownloadFailure { canvas_index: usize, cause: String },
    OcrDownloadFailure { canvas_index: usize, cause: String },
}

/// The result of a successful (possibly partially-failed) conversion.
#[derive(Debug, Default)]
pub struct ConversionReport {
    pub pages_written: usize,
    pub cover_pages_written: usize,
    pub failures: Vec<PartialFailure>,
}

struct CanvasFetchResult {
    canvas_index: usize,
    images: Vec<Option<(PixelFormat, Vec<u8>)>>,
    ocr: Option<OcrPage>,
}

/// Runs the full conversion: fetches the manifest, resolves canvases,
/// fans out per-canvas fetches under `options.concurrency`, and streams
/// the assembled PDF to `sink` page by page in declared canvas order.
pub async fn convert<W, P, N>(
    manifest_source: ManifestSource,
    sink: W,
    options: ConvertOptions,
    mut progress: P,
    mut notify: N,
) -> Result<ConversionReport, PipelineError>
where
    W: AsyncWrite + Unpin + Send,
    P: FnMut(Progress) + Send,
    N: FnMut(Notification) + Send,
{
    let coordinator = Arc::new(FetchCoordinator::new(options.fetch_options.clone(), options.cancellation.clone()));

    let manifest_value = match manifest_source {
        ManifestSource::Parsed(v) => v,
        ManifestSource::Url(url) => {
            let body = coordinator
                .fetch_manifest(&url)
                .await
                .map_err(ManifestError::Unreachable)?;
            serde_json::from_slice(&body.bytes)
                .map_err(|e| ManifestError::Malformed(e.to_string()))?
        }
    };
    let manifest = Manifest::from_json(manifest_value);

    let canvases = manifest.canvases(|i| (options.canvas_filter)(i));
    let surviving: HashSet<usize> = canvases.iter().map(|c| c.index).collect();
    let canvas_index_of_id: std::collections::HashMap<String, usize> =
        canvases.iter().map(|c| (c.id.clone(), c.index)).collect();
    let outline = manifest.outline(&surviving, &|id: &str| canvas_index_of_id.get(id).copied());
    let outline = renumber_outline(outline, &canvases);

    let mut generator = Generator::new(sink);
    generator.setup(SetupOptions {
        title: options.title.clone().or_else(|| manifest.label()),
        author: options.author.clone(),
        outline,
        embed_hidden_text_font: options.embed_hidden_text_font,
        embed_srgb_output_intent: options.embed_srgb_output_intent,
    }).await?;

    let mut report = ConversionReport::default();

    if let Some(cover) = options.cover_page {
        progress(Progress {
            message_code: Some(MessageCode::GenerateCoverPage),
            total_pages: canvases.len(),
            pages_written: 0,
            bytes_pushed: 0,
            bytes_written: generator.bytes_written(),
            estimated_file_size: None,
            write_speed: 0.0,
            remaining_duration: None,
        });
        let bytes = match cover {
            CoverPageSource::Bytes(bytes) => bytes,
            CoverPageSource::Endpoint { url, description } => {
                coordinator
                    .post_json(&url, &description)
                    .await
                    .map_err(crate::error::CoverSpliceError::Fetch)?
                    .bytes
            }
        };
        report.cover_pages_written = generator.insert_cover_pages(&bytes).await?;
    }

    if options.cancellation.is_cancelled() {
        // `begin_pages` has not run yet, so no canvas page ids have been
        // promised in `/Kids`; an empty plan keeps the cover-pages-only
        // document (if any) structurally valid.
        generator.begin_pages(&[]).await?;
        generator.end().await?;
        return Err(PipelineError::Cancelled);
    }

    let plans: Vec<CanvasPlan> = canvases
        .iter()
        .map(|c| CanvasPlan {
            placements_len: render_groups(&c.placements).len(),
            width: c.width,
            height: c.height,
            ppi: options.ppi_override.unwrap_or(c.ppi),
        })
        .collect();
    let reservations = generator.begin_pages(&plans).await?;

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = Vec::with_capacity(canvases.len());
    for canvas in &canvases {
        let coordinator = coordinator.clone();
        let semaphore = semaphore.clone();
        let cancellation = options.cancellation.clone();
        let scale_factor = options.scale_factor;
        let canvas = canvas.clone();
        tasks.push(Some(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            fetch_canvas(&coordinator, &canvas, scale_factor, &cancellation).await
        })));
    }

    let started = Instant::now();
    let total_pages = canvases.len() + report.cover_pages_written;
    for position in 0..reservations.len() {
        let reservation = &reservations[position];

        if options.cancellation.is_cancelled() {
            // `/Kids` already names every reservation from `begin_pages`;
            // abort the outstanding fetches but still emit a blank page for
            // each one not yet rendered so every reference stays resolvable.
            for task in tasks[position..].iter_mut().filter_map(|t| t.take()) {
                task.abort();
            }
            for remaining in &reservations[position..] {
                let blanks: Vec<PlacementRender> = remaining
                    .image_ids
                    .iter()
                    .map(|_| PlacementRender { image: None, rect: (0.0, 0.0, 0.0, 0.0) })
                    .collect();
                generator.render_page(remaining, blanks, None).await?;
            }
            generator.end().await?;
            return Err(PipelineError::Cancelled);
        }

        let task = tasks[position].take().expect("task taken at most once per position");
        let result = task.await.unwrap_or_else(|_| CanvasFetchResult {
            canvas_index: reservation.canvas_index,
            images: vec![None; reservation.image_ids.len()],
            ocr: None,
        });

        for failure in failures_from_result(&result) {
            match &failure {
                PartialFailure::ImageFetch { canvas_index, cause } => {
                    notify(Notification::ImageDownloadFailure { canvas_index: *canvas_index, cause: cause.clone() });
                }
                PartialFailure::OcrFetch { canvas_index, cause } | PartialFailure::OcrParse { canvas_index, cause } => {
                    notify(Notification::OcrDownloadFailure { canvas_index: *canvas_index, cause: cause.clone() });
                }
                _ => {}
            }
            report.failures.push(failure);
        }

        let placements: Vec<PlacementRender> = result
            .images
            .into_iter()
            .zip(render_groups(&canvases[position].placements))
            .map(|(fetched, group)| {
                let rect = group.first().map(|p| p.rect).unwrap_or((0.0, 0.0, 0.0, 0.0));
                let image = fetched.and_then(|(format, bytes)| match image::encode(format, &bytes) {
                    Ok(image) => Some(image),
                    Err(_) => None,
                });
                PlacementRender { image, rect }
            })
            .collect();

        generator.render_page(reservation, placements, result.ocr.as_ref()).await?;
        report.pages_written += 1;

        let elapsed = started.elapsed().as_secs_f64().max(1e-6);
        let bytes_written = generator.bytes_written();
        progress(Progress {
            message_code: Some(MessageCode::GeneratePages),
            total_pages,
            pages_written: report.pages_written + report.cover_pages_written,
            bytes_pushed: bytes_written,
            bytes_written,
            estimated_file_size: None,
            write_speed: bytes_written as f64 / elapsed,
            remaining_duration: None,
        });
    }

    progress(Progress {
        message_code: Some(MessageCode::Finishing),
        total_pages,
        pages_written: report.pages_written + report.cover_pages_written,
        bytes_pushed: generator.bytes_written(),
        bytes_written: generator.bytes_written(),
        estimated_file_size: None,
        write_speed: 0.0,
        remaining_duration: None,
    });
    generator.end().await?;

    Ok(report)
}

/// Estimates the total output size without writing any PDF bytes, by
/// reusing the fetch coordinator's `HEAD`-based content-length lookups
/// over every placement and OCR reference that would otherwise be
/// fetched in full.
pub async fn estimate(
    manifest_source: ManifestSource,
    options: &ConvertOptions,
) -> Result<u64, PipelineError> {
    let coordinator = FetchCoordinator::new(options.fetch_options.clone(), options.cancellation.clone());

    let manifest_value = match manifest_source {
        ManifestSource::Parsed(v) => v,
        ManifestSource::Url(url) => {
            let body = coordinator
                .fetch_manifest(&url)
                .await
                .map_err(ManifestError::Unreachable)?;
            serde_json::from_slice(&body.bytes)
                .map_err(|e| ManifestError::Malformed(e.to_string()))?
        }
    };
    let manifest = Manifest::from_json(manifest_value);
    let canvases = manifest.canvases(|i| (options.canvas_filter)(i));

    let mut total = 0u64;
    for canvas in &canvases {
        for group in render_groups(&canvas.placements) {
            let Some(placement) = group.first() else { continue };
            let url = resolve_image_url(placement, options.scale_factor);
            if let Ok(Some(len)) = coordinator.fetch_content_length(&url).await {
                total += len;
            }
        }
        if let Some(ocr) = &canvas.ocr {
            if let Ok(Some(len)) = coordinator.fetch_content_length(&ocr.url).await {
                total += len;
            }
        }
    }
    Ok(total)
}

async fn fetch_canvas(
    coordinator: &FetchCoordinator,
    canvas: &Canvas,
    scale_factor: f64,
    cancellation: &CancellationToken,
) -> CanvasFetchResult {
    let mut images = Vec::new();
    for group in render_groups(&canvas.placements) {
        if cancellation.is_cancelled() {
            images.push(None);
            continue;
        }
        let Some(placement) = group.first() else {
            images.push(None);
            continue;
        };
        if placement.format == PixelFormat::Unsupported {
            images.push(None);
            continue;
        }
        let url = resolve_image_url(placement, scale_factor);
        match coordinator.fetch(&url).await {
            Ok(body) => images.push(Some((placement.format, body.bytes))),
            Err(e) => {
                warn!(canvas = canvas.index, url, "image fetch failed: {}", e);
                images.push(None);
            }
        }
    }

    let ocr = match &canvas.ocr {
        None => None,
        Some(reference) => match coordinator.fetch(&reference.url).await {
            Ok(body) => match ocr::parse(&body.bytes, canvas.width as f64, canvas.height as f64) {
                Ok(page) => Some(page),
                Err(e) => {
                    warn!(canvas = canvas.index, "OCR parse failed: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!(canvas = canvas.index, "OCR fetch failed: {}", e);
                None
            }
        },
    };

    CanvasFetchResult { canvas_index: canvas.index, images, ocr }
}

fn failures_from_result(result: &CanvasFetchResult) -> Vec<PartialFailure> {
    result
        .images
        .iter()
        .enumerate()
        .filter(|(_, img)| img.is_none())
        .map(|(i, _)| PartialFailure::ImageFetch {
            canvas_index: result.canvas_index,
            cause: format!("placement {} could not be fetched or was unsupported", i),
        })
        .collect()
}

/// Groups placements that paint the *same* logical spot on the canvas:
/// plain placements are their own singleton group; consecutive
/// `Choice`-tagged placements (emitted together by one annotation, per
/// `iiif::placements_from_annotation`) form one group from which exactly
/// one image is rendered.
fn render_groups(placements: &[ImagePlacement]) -> Vec<Vec<ImagePlacement>> {
    let mut groups: Vec<Vec<ImagePlacement>> = Vec::new();
    for placement in placements {
        if placement.choice.is_some() {
            if let Some(last) = groups.last_mut() {
                if last.first().map(|p| p.choice.is_some()).unwrap_or(false) {
                    last.push(placement.clone());
                    continue;
                }
            }
            groups.push(vec![placement.clone()]);
        } else {
            groups.push(vec![placement.clone()]);
        }
    }
    for group in &mut groups {
        if group.len() > 1 {
            let selected = select_choice(group);
            *group = vec![selected];
        }
    }
    groups
}

fn select_choice(group: &[ImagePlacement]) -> ImagePlacement {
    group
        .iter()
        .find(|p| p.choice.as_ref().map(|c| c.is_default).unwrap_or(false))
        .or_else(|| group.iter().find(|p| p.choice.as_ref().map(|c| c.enabled).unwrap_or(false)))
        .or_else(|| group.first())
        .expect("group is never empty")
        .clone()
}

/// IIIF Image API size selection: picks a request width
/// from the service's declared capabilities and combines it with the
/// service id into a `{id}/full/{w},/0/default.jpg` URL. Falls back to the
/// placement's bare resource id when there is no image service at all.
fn resolve_image_url(placement: &ImagePlacement, scale_factor: f64) -> String {
    match &placement.service {
        Some(service) => {
            let size_segment = select_size_segment(service, scale_factor);
            let id = service.id.trim_end_matches('/');
            format!("{}/full/{}/0/default.jpg", id, size_segment)
        }
        None => placement.resource_id.clone(),
    }
}

fn select_size_segment(service: &ImageService, scale_factor: f64) -> String {
    let desired = (scale_factor * service.max_width as f64).floor() as u32;

    if service.supports_size_by_wh && desired > 0 {
        return format!("{},", desired);
    }
    if !service.sizes.is_empty() && desired > 0 {
        if let Some((w, _)) = service.sizes.iter().filter(|(w, _)| *w <= desired).max_by_key(|(w, _)| *w) {
            return format!("{},", w);
        }
        if let Some((w, _)) = service.sizes.iter().min_by_key(|(w, _)| *w) {
            return format!("{},", w);
        }
    }
    if is_level2_or_v3(&service.profile) {
        "max".to_owned()
    } else {
        "full".to_owned()
    }
}

fn is_level2_or_v3(profile: &str) -> bool {
    profile.contains("level2") || profile.contains("/image/3") || profile.trim_end_matches('/').ends_with("/3")
}

/// Rewrites each `OutlineItem`'s `start_canvas_index` (an index into the
/// *filtered* `canvases` slice's declared order) to itself — the
/// generator consumes outline destinations purely by that ordinal, so no
/// actual remapping is needed once `Manifest::outline` has already
/// resolved against the surviving set. Kept as an explicit pass so this
/// assumption is visible and has one place to change if outline
/// resolution ever needs per-canvas adjustment.
fn renumber_outline(items: Vec<OutlineItem>, canvases: &[Canvas]) -> Vec<OutlineItem> {
    let position_of: std::collections::HashMap<usize, usize> =
        canvases.iter().enumerate().map(|(pos, c)| (c.index, pos)).collect();
    items
        .into_iter()
        .map(|item| OutlineItem {
            label: item.label,
            start_canvas_index: item.start_canvas_index.and_then(|idx| position_of.get(&idx).copied()),
            start_rect: item.start_rect,
            children: renumber_outline(item.children, canvases),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(resource_id: &str, choice: Option<crate::iiif::ChoiceMeta>) -> ImagePlacement {
        ImagePlacement {
            resource_id: resource_id.to_owned(),
            rect: (0.0, 0.0, 100.0, 100.0),
            native_size: None,
            format: PixelFormat::Jpeg,
            service: None,
            choice,
        }
    }

    #[test]
    fn render_groups_keeps_plain_placements_separate() {
        let placements = vec![placement("a", None), placement("b", None)];
        let groups = render_groups(&placements);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn render_groups_collapses_choice_run_to_default() {
        let placements = vec![
            placement("a", Some(crate::iiif::ChoiceMeta { enabled: true, is_default: false })),
            placement("b", Some(crate::iiif::ChoiceMeta { enabled: true, is_default: true })),
        ];
        let groups = render_groups(&placements);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[0][0].resource_id, "b");
    }

    #[test]
    fn size_segment_uses_sizes_list_when_no_size_by_wh() {
        let service = ImageService {
            id: "https://example.org/image/1".to_owned(),
            supports_size_by_wh: false,
            sizes: vec![(100, 140), (200, 280), (400, 560)],
            max_width: 400,
            profile: "level1".to_owned(),
        };
        assert_eq!(select_size_segment(&service, 0.5), "200,");
    }

    #[test]
    fn size_segment_falls_back_to_full_for_level1_without_sizes() {
        let service = ImageService {
            id: "https://example.org/image/1".to_owned(),
            supports_size_by_wh: false,
            sizes: vec![],
            max_width: 0,
            profile: "level1".to_owned(),
        };
        assert_eq!(select_size_segment(&service, 1.0), "full");
    }

    #[test]
    fn size_segment_falls_back_to_max_for_level2() {
        let service = ImageService {
            id: "https://example.org/image/1".to_owned(),
            supports_size_by_wh: false,
            sizes: vec![],
            max_width: 0,
            profile: "level2".to_owned(),
        };
        assert_eq!(select_size_segment(&service, 1.0), "max");
    }
}
