//! Geometric normalization: find the document on the page and crop to it.
//!
//! Measurements run on a copy scaled down to `working_height`; the chosen
//! region is mapped back and applied to the full-resolution page. A region
//! is only applied when its coverage of the page lies strictly inside the
//! configured band: tiny regions are detection fragments, near-full regions
//! mean the page is already flat and cropping would only shave margins.

use crate::collaborators::TextDetection;
use crate::config::{CropEvidence, Heuristics, PipelineConfig};
use crate::error::{Degradation, PageError, Staged};
use crate::geometry::{Point, Quad, Rect};
use crate::pipeline::extract::RasterPage;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::geometry::{approximate_polygon_dp, arc_length, contour_area};
use imageproc::morphology;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const STAGE: &str = "crop";

/// Outlines smaller than this fraction of the page are ignored outright.
const MIN_OUTLINE_FRACTION: f64 = 0.01;

/// Where a crop region came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Contour,
    TextBlocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CropShape {
    Rect(Rect),
    Quad(Quad),
}

impl CropShape {
    pub fn area(&self) -> f32 {
        match self {
            CropShape::Rect(r) => r.area(),
            CropShape::Quad(q) => q.area(),
        }
    }

    fn scale(&self, factor: f32) -> CropShape {
        match self {
            CropShape::Rect(r) => CropShape::Rect(r.scale(factor)),
            CropShape::Quad(q) => CropShape::Quad(q.scale(factor)),
        }
    }
}

/// A candidate region, in working-scale coordinates, with its page coverage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRegion {
    pub shape: CropShape,
    pub coverage: f32,
    pub source: EvidenceSource,
}

/// Output of the crop stage.
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    pub page: RasterPage,
    /// The applied region; `None` when the page was left uncropped.
    pub crop: Option<CropRegion>,
}

impl NormalizedPage {
    pub fn cropped(&self) -> bool {
        self.crop.is_some()
    }
}

/// Crop `page` to its document region when one is found and passes the
/// coverage band, then apply the optional contrast adjustment.
///
/// Detection problems degrade to the unchanged page. `Err` only when the
/// blocking task itself dies.
pub async fn normalize(
    page: RasterPage,
    detection: &TextDetection,
    config: &PipelineConfig,
) -> Result<Staged<NormalizedPage>, PageError> {
    let number = page.number();
    let blocks: Vec<Rect> = detection.blocks.iter().filter_map(|b| b.bounds()).collect();
    let evidence = config.crop_evidence;
    let heuristics = config.heuristics.clone();

    tokio::task::spawn_blocking(move || normalize_blocking(page, &blocks, evidence, &heuristics))
        .await
        .map_err(|e| PageError::Internal {
            page: number,
            detail: format!("crop task panicked: {e}"),
        })
}

fn normalize_blocking(
    page: RasterPage,
    blocks: &[Rect],
    evidence: CropEvidence,
    h: &Heuristics,
) -> Staged<NormalizedPage> {
    let RasterPage { index, image } = page;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Staged::degraded(
            NormalizedPage {
                page: RasterPage::new(index, image),
                crop: None,
            },
            Degradation::detection(STAGE, "empty page"),
        );
    }

    let scale = working_scale(height, h.working_height);
    let work_w = ((width as f32 * scale).round() as u32).max(1);
    let work_h = ((height as f32 * scale).round() as u32).max(1);
    let page_area = work_w as f32 * work_h as f32;
    let work_blocks: Vec<Rect> = blocks.iter().map(|r| r.scale(scale)).collect();

    let contour_candidate = || -> Option<CropRegion> {
        let small = if scale < 1.0 {
            image.resize_exact(work_w, work_h, FilterType::Triangle)
        } else {
            image.clone()
        };
        let shape = sheet_outline(&small.to_luma8(), h)?;
        Some(region(shape, page_area, EvidenceSource::Contour))
    };
    let blocks_candidate = || -> Option<CropRegion> {
        let rect = text_cluster(&work_blocks, work_h as f32, h.block_gap_fraction)?;
        Some(region(CropShape::Rect(rect), page_area, EvidenceSource::TextBlocks))
    };

    let chosen = match evidence {
        CropEvidence::Contour => accept(contour_candidate(), h),
        CropEvidence::TextBlocks => accept(blocks_candidate(), h),
        CropEvidence::Auto => match contour_candidate() {
            // The sheet already fills the frame: a flat scan, never cut into it.
            Some(outline) if outline.coverage >= h.max_coverage => {
                debug!(
                    "Sheet outline covers {:.3} of the page, leaving it uncropped",
                    outline.coverage
                );
                None
            }
            Some(outline) if h.accepts_coverage(outline.coverage) => Some(outline),
            _ => accept(blocks_candidate(), h),
        },
    };

    let Some(region) = chosen else {
        return Staged::Done(NormalizedPage {
            page: RasterPage::new(index, enhance(image, h.contrast)),
            crop: None,
        });
    };

    let full_shape = region.shape.scale(1.0 / scale);
    match apply_crop(&image, &full_shape, h.crop_padding_px) {
        Some(cropped) => {
            debug!(
                "Page {}: cropped {}x{} → {}x{} ({:?}, coverage {:.2})",
                index + 1,
                width,
                height,
                cropped.width(),
                cropped.height(),
                region.source,
                region.coverage
            );
            Staged::Done(NormalizedPage {
                page: RasterPage::new(index, enhance(cropped, h.contrast)),
                crop: Some(region),
            })
        }
        None => {
            warn!("Page {}: crop transform failed, keeping page", index + 1);
            Staged::degraded(
                NormalizedPage {
                    page: RasterPage::new(index, enhance(image, h.contrast)),
                    crop: None,
                },
                Degradation::detection(STAGE, "perspective transform failed"),
            )
        }
    }
}

/// Scale factor that brings `height` down to `working_height`; never upscales.
pub fn working_scale(height: u32, working_height: u32) -> f32 {
    if height > working_height {
        working_height as f32 / height as f32
    } else {
        1.0
    }
}

fn region(shape: CropShape, page_area: f32, source: EvidenceSource) -> CropRegion {
    CropRegion {
        shape,
        coverage: shape.area() / page_area,
        source,
    }
}

fn accept(candidate: Option<CropRegion>, h: &Heuristics) -> Option<CropRegion> {
    let c = candidate?;
    if h.accepts_coverage(c.coverage) {
        Some(c)
    } else {
        debug!(
            "Rejected {:?} region at coverage {:.3} (band {}–{})",
            c.source, c.coverage, h.min_coverage, h.max_coverage
        );
        None
    }
}

/// Largest external outline after edge detection and closing, reduced to a
/// quadrilateral when it simplifies to four corners.
pub fn sheet_outline(gray: &GrayImage, h: &Heuristics) -> Option<CropShape> {
    let blurred = gaussian_blur_f32(gray, h.blur_sigma.max(0.1));
    let edges = canny(&blurred, h.canny_low, h.canny_high);
    let closed = morphology::close(&edges, Norm::LInf, h.close_radius);

    let min_area = MIN_OUTLINE_FRACTION * gray.width() as f64 * gray.height() as f64;
    let contours = find_contours::<u32>(&closed);
    let (best, _) = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 4)
        .map(|c| (c, contour_area(&c.points).abs()))
        .filter(|(_, area)| *area >= min_area)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    let perimeter = arc_length(&best.points, true);
    let polygon = approximate_polygon_dp(&best.points, h.polygon_epsilon_fraction * perimeter, true);
    if polygon.len() == 4 {
        let corners = [0, 1, 2, 3].map(|i| Point::new(polygon[i].x as f32, polygon[i].y as f32));
        if let Some(quad) = Quad::from_unordered(corners) {
            return Some(CropShape::Quad(quad));
        }
    }

    let points: Vec<Point> = best
        .points
        .iter()
        .map(|p| Point::new(p.x as f32, p.y as f32))
        .collect();
    Rect::bounding(&points).map(CropShape::Rect)
}

/// Cluster text blocks top to bottom and return the bounds of the cluster
/// with the most block area.
///
/// A block joins the current cluster when the gap between the cluster's
/// bottom and the block's top is at most `gap_fraction × page_height`.
pub fn text_cluster(blocks: &[Rect], page_height: f32, gap_fraction: f32) -> Option<Rect> {
    let mut sorted: Vec<Rect> = blocks.iter().copied().filter(|r| r.area() > 0.0).collect();
    sorted.sort_by(|a, b| a.y0.partial_cmp(&b.y0).unwrap_or(std::cmp::Ordering::Equal));

    let max_gap = gap_fraction * page_height;
    let mut clusters: Vec<(Rect, f32)> = Vec::new();
    for block in sorted {
        match clusters.last_mut() {
            Some((bounds, area)) if block.y0 - bounds.y1 <= max_gap => {
                *bounds = bounds.union(&block);
                *area += block.area();
            }
            _ => clusters.push((block, block.area())),
        }
    }

    clusters
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(bounds, _)| bounds)
}

/// Apply a full-resolution crop shape. `None` when the result would be empty
/// or the perspective transform is degenerate.
pub fn apply_crop(img: &DynamicImage, shape: &CropShape, padding: u32) -> Option<DynamicImage> {
    let (w, h) = (img.width() as f32, img.height() as f32);
    match shape {
        CropShape::Rect(rect) => {
            let (x, y, cw, ch) = rect.pad(padding as f32).clamp(w, h).to_pixel_window();
            if cw == 0 || ch == 0 {
                return None;
            }
            Some(img.crop_imm(x, y, cw, ch))
        }
        CropShape::Quad(quad) => warp_quad(&img.to_rgb8(), quad).map(DynamicImage::ImageRgb8),
    }
}

/// Perspective-warp a quadrilateral onto an upright rectangle sized from its
/// own edge lengths.
pub fn warp_quad(img: &RgbImage, quad: &Quad) -> Option<RgbImage> {
    let (tw, th) = quad.target_size();
    let from = quad.corners.map(|p| (p.x, p.y));
    let to = [
        (0.0, 0.0),
        (tw as f32, 0.0),
        (tw as f32, th as f32),
        (0.0, th as f32),
    ];
    let projection = Projection::from_control_points(from, to)?;
    let mut out = RgbImage::new(tw, th);
    warp_into(img, &projection, Interpolation::Bilinear, Rgb([255, 255, 255]), &mut out);
    Some(out)
}

fn enhance(img: DynamicImage, contrast: f32) -> DynamicImage {
    if contrast == 0.0 {
        img
    } else {
        img.adjust_contrast(contrast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn sheet_on_dark(w: u32, h: u32, sheet: (u32, u32, u32, u32)) -> GrayImage {
        let (x0, y0, x1, y1) = sheet;
        GrayImage::from_fn(w, h, |x, y| {
            if x >= x0 && x < x1 && y >= y0 && y < y1 {
                Luma([235])
            } else {
                Luma([25])
            }
        })
    }

    #[test]
    fn working_scale_only_downscales() {
        assert_eq!(working_scale(400, 800), 1.0);
        assert_eq!(working_scale(1600, 800), 0.5);
    }

    #[test]
    fn clusters_drop_distant_object() {
        let blocks = [
            Rect::new(100.0, 100.0, 700.0, 140.0),
            Rect::new(100.0, 150.0, 700.0, 400.0),
            // stray card far below the letter
            Rect::new(50.0, 900.0, 150.0, 960.0),
        ];
        let cluster = text_cluster(&blocks, 1000.0, 0.08).unwrap();
        assert_eq!(cluster, Rect::new(100.0, 100.0, 700.0, 400.0));
        assert!(text_cluster(&[], 1000.0, 0.08).is_none());
    }

    #[test]
    fn sheet_outline_finds_quad() {
        let gray = sheet_on_dark(200, 300, (40, 50, 160, 250));
        let shape = sheet_outline(&gray, &Heuristics::default()).expect("sheet found");
        let coverage = shape.area() / (200.0 * 300.0);
        assert!((coverage - 0.4).abs() < 0.05, "coverage {coverage}");
    }

    #[test]
    fn blank_page_has_no_outline() {
        let gray = GrayImage::from_pixel(120, 160, Luma([240]));
        assert!(sheet_outline(&gray, &Heuristics::default()).is_none());
    }

    #[test]
    fn rect_crop_pads_and_clamps() {
        let img = DynamicImage::new_rgb8(100, 80);
        let out = apply_crop(&img, &CropShape::Rect(Rect::new(10.0, 10.0, 50.0, 50.0)), 20).unwrap();
        assert_eq!((out.width(), out.height()), (70, 70));
    }

    #[test]
    fn quad_warp_uses_edge_lengths() {
        let img = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let quad = Quad {
            corners: [
                Point::new(10.0, 10.0),
                Point::new(70.0, 10.0),
                Point::new(70.0, 50.0),
                Point::new(10.0, 50.0),
            ],
        };
        let out = warp_quad(&img, &quad).unwrap();
        assert_eq!(out.dimensions(), (60, 40));
    }

    #[test]
    fn band_rejects_fragments_and_full_pages() {
        let h = Heuristics::default();
        let make = |coverage| CropRegion {
            shape: CropShape::Rect(Rect::new(0.0, 0.0, 1.0, 1.0)),
            coverage,
            source: EvidenceSource::TextBlocks,
        };
        assert!(accept(Some(make(0.03)), &h).is_none());
        assert!(accept(Some(make(0.95)), &h).is_none());
        assert!(accept(Some(make(0.5)), &h).is_some());
    }

    #[test]
    fn auto_leaves_flat_scan_alone_despite_text_blocks() {
        // Sheet fills 92% of the frame; the printed block alone would be 30%.
        let gray = sheet_on_dark(500, 500, (10, 10, 490, 490));
        let page = RasterPage::new(0, DynamicImage::ImageLuma8(gray));
        let blocks = [Rect::new(100.0, 100.0, 400.0, 350.0)];
        let (normalized, reason) =
            normalize_blocking(page, &blocks, CropEvidence::Auto, &Heuristics::default()).into_parts();
        assert!(reason.is_none());
        assert!(!normalized.cropped());
        assert_eq!((normalized.page.image.width(), normalized.page.image.height()), (500, 500));
    }

    #[test]
    fn auto_falls_back_to_text_blocks_without_outline() {
        let blank = GrayImage::from_pixel(500, 500, Luma([240]));
        let page = RasterPage::new(0, DynamicImage::ImageLuma8(blank));
        let blocks = [Rect::new(100.0, 100.0, 400.0, 350.0)];
        let (normalized, _) =
            normalize_blocking(page, &blocks, CropEvidence::Auto, &Heuristics::default()).into_parts();
        let region = normalized.crop.expect("text blocks crop");
        assert_eq!(region.source, EvidenceSource::TextBlocks);
        assert_eq!((normalized.page.image.width(), normalized.page.image.height()), (340, 290));
    }

    #[test]
    fn auto_falls_back_to_text_blocks_below_band() {
        // 60×60 card: an outline, but a fragment of the 500×500 frame.
        let gray = sheet_on_dark(500, 500, (20, 400, 80, 460));
        let page = RasterPage::new(0, DynamicImage::ImageLuma8(gray));
        let blocks = [Rect::new(100.0, 100.0, 400.0, 350.0)];
        let (normalized, _) =
            normalize_blocking(page, &blocks, CropEvidence::Auto, &Heuristics::default()).into_parts();
        let region = normalized.crop.expect("text blocks crop");
        assert_eq!(region.source, EvidenceSource::TextBlocks);
    }

    #[tokio::test]
    async fn contour_crop_applied_at_full_resolution() {
        let gray = sheet_on_dark(400, 1600, (80, 200, 320, 1400));
        let page = RasterPage::new(0, DynamicImage::ImageLuma8(gray));
        let config = PipelineConfig::builder()
            .crop_evidence(CropEvidence::Contour)
            .build()
            .unwrap();
        let staged = normalize(page, &TextDetection::empty(), &config).await.unwrap();
        let (normalized, reason) = staged.into_parts();
        assert!(reason.is_none());
        assert!(normalized.cropped());
        let (w, h) = (normalized.page.image.width(), normalized.page.image.height());
        // quad warp lands near 240x1200; a padded box fallback adds up to 40px
        assert!((230..=290).contains(&w), "width {w}");
        assert!((1180..=1250).contains(&h), "height {h}");
    }
}
