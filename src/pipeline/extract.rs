//! Page extraction: decoded bytes → ordered raster pages.
//!
//! ## Why spawn_blocking?
//!
//! Image decoding and pdfium rendering are CPU-bound, and pdfium keeps
//! thread-local state that must not be touched from async worker threads.
//! Both run on Tokio's blocking pool.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Pages are rendered at `dpi` so text size is predictable for recognition,
//! but an A0 poster at 200 DPI would still be 6,600 × 9,400 px.
//! `max_rendered_pixels` bounds the longest edge regardless of physical size.

use crate::config::PipelineConfig;
use crate::error::{DocNormError, PageError};
use crate::pipeline::input::{ContentKind, LoadedInput};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One page of a submission as a bitmap.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// 0-based position in the submission.
    pub index: usize,
    pub image: DynamicImage,
}

impl RasterPage {
    pub fn new(index: usize, image: DynamicImage) -> Self {
        Self { index, image }
    }

    /// 1-based page number used in file names and logs.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Rendering parameters for [`PdfRasterizer`].
#[derive(Debug, Clone, Copy)]
pub struct RasterOptions {
    pub dpi: u32,
    pub max_pixels: u32,
}

/// Renders every page of a PDF held in memory.
///
/// Called from a blocking thread. The outer error is for documents that
/// cannot be opened at all; each inner entry is one page, in order, and may
/// fail on its own.
pub trait PdfRasterizer: Send + Sync {
    fn rasterize(
        &self,
        name: &str,
        bytes: &[u8],
        options: RasterOptions,
    ) -> Result<Vec<Result<DynamicImage, String>>, DocNormError>;
}

/// [`PdfRasterizer`] over the pdfium library.
///
/// Binds to `PDFIUM_LIB_PATH` (the library file or the folder holding it)
/// when set, otherwise to the system library.
#[derive(Debug, Default, Clone)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self {
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, DocNormError> {
        let bindings = match &self.library_path {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| DocNormError::PdfiumBindingFailed(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PdfRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        name: &str,
        bytes: &[u8],
        options: RasterOptions,
    ) -> Result<Vec<Result<DynamicImage, String>>, DocNormError> {
        let pdfium = self.bind()?;

        let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                DocNormError::PasswordRequired {
                    name: name.to_string(),
                }
            } else {
                DocNormError::Decode {
                    name: name.to_string(),
                    detail: err_str,
                }
            }
        })?;

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.dpi as f32 / 72.0)
            .set_maximum_width(options.max_pixels as i32)
            .set_maximum_height(options.max_pixels as i32);

        let mut results = Vec::with_capacity(pages.len() as usize);
        for page in pages.iter() {
            let rendered = page
                .render_with_config(&render_config)
                .map(|bitmap| bitmap.as_image())
                .map_err(|e| format!("{:?}", e));
            results.push(rendered);
        }
        Ok(results)
    }
}

/// Extract every page of a loaded submission.
///
/// Returns `Err` only for decode-class failures (unreadable bytes, no pages
/// at all); a single PDF page that fails to render becomes a `PageError`
/// entry in its slot.
pub async fn extract_pages(
    input: LoadedInput,
    name: &str,
    config: &PipelineConfig,
    rasterizer: Arc<dyn PdfRasterizer>,
) -> Result<Vec<Result<RasterPage, PageError>>, DocNormError> {
    let owned_name = name.to_string();
    let options = RasterOptions {
        dpi: config.dpi,
        max_pixels: config.max_rendered_pixels,
    };

    let pages = tokio::task::spawn_blocking(move || match input.kind {
        ContentKind::Image => {
            decode_image(&owned_name, &input.bytes).map(|img| vec![Ok(RasterPage::new(0, img))])
        }
        ContentKind::Pdf => rasterizer
            .rasterize(&owned_name, &input.bytes, options)
            .map(|pages| {
                pages
                    .into_iter()
                    .enumerate()
                    .map(|(index, page)| {
                        page.map(|img| RasterPage::new(index, img))
                            .map_err(|detail| PageError::RenderFailed {
                                page: index + 1,
                                detail,
                            })
                    })
                    .collect()
            }),
    })
    .await
    .map_err(|e| DocNormError::Internal(format!("Extract task panicked: {}", e)))??;

    if pages.iter().all(|p| p.is_err()) {
        if let Some(Err(first)) = pages.first() {
            warn!("No page of '{}' could be rendered: {}", name, first);
        }
        return Err(DocNormError::NoPages {
            name: name.to_string(),
        });
    }

    for page in pages.iter().flatten() {
        debug!(
            "Extracted page {} → {}x{} px",
            page.number(),
            page.image.width(),
            page.image.height()
        );
    }
    Ok(pages)
}

/// Decode an image and apply its EXIF orientation so the pixel buffer
/// matches what a viewer shows.
pub fn decode_image(name: &str, bytes: &[u8]) -> Result<DynamicImage, DocNormError> {
    let img = image::load_from_memory(bytes).map_err(|e| DocNormError::Decode {
        name: name.to_string(),
        detail: e.to_string(),
    })?;
    let orientation = read_exif_orientation(bytes);
    if orientation != 1 {
        debug!("Applying EXIF orientation {}", orientation);
    }
    Ok(apply_exif_orientation(img, orientation))
}

/// Read EXIF tag 0x0112 (Orientation). Returns 1 (normal) when absent.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation value.
///
/// 1 = normal, 2 = mirrored, 3 = 180°, 4 = flipped vertically,
/// 5 = transposed, 6 = 90° CW, 7 = transversed, 8 = 270° CW.
pub fn apply_exif_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct FailingSecondPage;

    impl PdfRasterizer for FailingSecondPage {
        fn rasterize(
            &self,
            _name: &str,
            _bytes: &[u8],
            _options: RasterOptions,
        ) -> Result<Vec<Result<DynamicImage, String>>, DocNormError> {
            Ok(vec![
                Ok(DynamicImage::new_rgb8(4, 4)),
                Err("bad content stream".into()),
            ])
        }
    }

    struct NothingRenders;

    impl PdfRasterizer for NothingRenders {
        fn rasterize(
            &self,
            _name: &str,
            _bytes: &[u8],
            _options: RasterOptions,
        ) -> Result<Vec<Result<DynamicImage, String>>, DocNormError> {
            Ok(vec![])
        }
    }

    fn marker_image() -> DynamicImage {
        let mut img = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn exif_six_rotates_clockwise() {
        let out = apply_exif_orientation(marker_image(), 6).to_rgb8();
        assert_eq!(out.dimensions(), (2, 4));
        // top-left moves to top-right under a clockwise quarter turn
        assert_eq!(out.get_pixel(1, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn exif_five_transposes() {
        let out = apply_exif_orientation(marker_image(), 5).to_rgb8();
        assert_eq!(out.dimensions(), (2, 4));
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn missing_exif_is_normal() {
        assert_eq!(read_exif_orientation(b"not an image"), 1);
    }

    #[test]
    fn corrupt_image_is_decode_error() {
        let err = decode_image("x.jpg", &[0xFF, 0xD8, 0xFF, 0x00]).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[tokio::test]
    async fn single_page_render_failure_is_isolated() {
        let input = LoadedInput {
            bytes: b"%PDF-1.7".to_vec(),
            kind: ContentKind::Pdf,
        };
        let pages = extract_pages(input, "a.pdf", &PipelineConfig::default(), Arc::new(FailingSecondPage))
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].is_ok());
        assert!(matches!(pages[1], Err(PageError::RenderFailed { page: 2, .. })));
    }

    #[tokio::test]
    async fn zero_pages_is_fatal() {
        let input = LoadedInput {
            bytes: b"%PDF-1.7".to_vec(),
            kind: ContentKind::Pdf,
        };
        let err = extract_pages(input, "a.pdf", &PipelineConfig::default(), Arc::new(NothingRenders))
            .await
            .unwrap_err();
        assert!(matches!(err, DocNormError::NoPages { .. }));
    }
}
