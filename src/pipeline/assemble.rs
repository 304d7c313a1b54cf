//! Artifact assembly: normalized page → single-page archival PDF + remote path.
//!
//! Each page is stored on its own so a misclassified page can be refiled
//! without touching its siblings. The PDF embeds the page as one JPEG image
//! XObject (DCTDecode, no re-compression) sized so that the page prints at
//! the pipeline's working DPI.

use crate::config::PipelineConfig;
use crate::error::PageError;
use crate::naming::{
    normalize_label, sanitize_file_name, sanitize_name, sanitize_segment, FALLBACK_DOC_TYPE,
};
use crate::pipeline::classify::ClassificationResult;
use crate::pipeline::encode;
use crate::pipeline::extract::RasterPage;
use chrono::NaiveDate;
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use tracing::debug;

/// Where the artifacts of one submission are filed.
#[derive(Debug, Clone)]
pub struct FilingContext {
    /// Root folder, e.g. `Clients`.
    pub root: String,
    /// Client namespace, e.g. the sender's phone number.
    pub namespace: String,
    pub date: NaiveDate,
}

impl FilingContext {
    pub fn new(root: &str, namespace: &str, date: NaiveDate) -> Self {
        Self {
            root: sanitize_segment(root.trim_matches('/'), "Clients"),
            namespace: sanitize_segment(namespace, "unknown"),
            date,
        }
    }

    /// `/<root>/<namespace>/<person>`
    pub fn person_folder(&self, person: &str) -> String {
        format!("/{}/{}/{}", self.root, self.namespace, person)
    }

    /// `<date>_<doc_type>_page<N>.pdf`
    pub fn page_file_name(&self, doc_type: &str, page_number: usize) -> String {
        format!(
            "{}_{}_page{}.pdf",
            self.date.format("%Y-%m-%d"),
            doc_type,
            page_number
        )
    }

    /// `/<root>/<namespace>/<person>/originals/<date>_<file>`
    pub fn original_path(&self, person: &str, file_name: &str) -> String {
        format!(
            "{}/originals/{}_{}",
            self.person_folder(person),
            self.date.format("%Y-%m-%d"),
            sanitize_file_name(file_name)
        )
    }
}

/// A page ready for upload.
#[derive(Debug, Clone)]
pub struct PageArtifact {
    pub pdf: Vec<u8>,
    pub file_name: String,
    pub remote_folder: String,
    pub remote_path: String,
    /// Sanitized person folder name.
    pub person: String,
    pub doc_type: String,
    pub classification: ClassificationResult,
    pub width: u32,
    pub height: u32,
}

/// Folder-safe person name for a classification.
pub fn person_for(classification: &ClassificationResult) -> String {
    sanitize_name(&classification.person_name)
}

/// File-name-safe document type for a classification.
pub fn doc_type_for(classification: &ClassificationResult) -> String {
    let label = normalize_label(&classification.doc_type);
    if label.is_empty() {
        FALLBACK_DOC_TYPE.to_string()
    } else {
        label
    }
}

/// Encode the page and derive its remote location.
pub async fn assemble(
    page: RasterPage,
    classification: ClassificationResult,
    filing: &FilingContext,
    config: &PipelineConfig,
) -> Result<PageArtifact, PageError> {
    let number = page.number();
    let (width, height) = (page.image.width(), page.image.height());
    let quality = config.heuristics.jpeg_quality;
    let dpi = config.dpi;

    let pdf = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
        let jpeg = encode::jpeg_bytes(&page.image, quality).map_err(|e| e.to_string())?;
        image_pdf(&jpeg, width, height, dpi)
    })
    .await
    .map_err(|e| PageError::Internal {
        page: number,
        detail: format!("encode task panicked: {e}"),
    })?
    .map_err(|detail| PageError::EncodeFailed {
        page: number,
        detail,
    })?;

    let person = person_for(&classification);
    let doc_type = doc_type_for(&classification);
    let remote_folder = filing.person_folder(&person);
    let file_name = filing.page_file_name(&doc_type, number);
    let remote_path = format!("{remote_folder}/{file_name}");
    debug!("Page {}: {} bytes PDF → {}", number, pdf.len(), remote_path);

    Ok(PageArtifact {
        pdf,
        file_name,
        remote_folder,
        remote_path,
        person,
        doc_type,
        classification,
        width,
        height,
    })
}

/// Build a one-page PDF around a baseline JPEG of `width × height` pixels.
///
/// The page measures `pixels × 72 / dpi` points in each direction.
pub fn image_pdf(jpeg: &[u8], width: u32, height: u32, dpi: u32) -> Result<Vec<u8>, String> {
    if width == 0 || height == 0 {
        return Err("empty page".to_string());
    }
    let scale = 72.0 / dpi.max(1) as f32;
    let (w_pt, h_pt) = (width as f32 * scale, height as f32 * scale);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
                "Filter" => "DCTDecode",
            },
            jpeg.to_vec(),
        )
        .with_compression(false),
    );

    let content = format!("q {w_pt:.3} 0 0 {h_pt:.3} 0 0 cm /Im0 Do Q");
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

    let media_box = vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(w_pt.into()),
        Object::Real(h_pt.into()),
    ];
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(|e| e.to_string())?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::ClassificationSource;
    use image::DynamicImage;

    fn filing() -> FilingContext {
        FilingContext::new("Clients", "972501234567", NaiveDate::from_ymd_opt(2024, 5, 17).unwrap())
    }

    fn classified(doc_type: &str, person: &str) -> ClassificationResult {
        ClassificationResult {
            doc_type: doc_type.into(),
            person_name: person.into(),
            source: ClassificationSource::Text,
        }
    }

    #[test]
    fn remote_paths() {
        let f = filing();
        assert_eq!(
            f.person_folder("Ivan Petrov"),
            "/Clients/972501234567/Ivan Petrov"
        );
        assert_eq!(f.page_file_name("Passport", 2), "2024-05-17_Passport_page2.pdf");
        assert_eq!(
            f.original_path("Client", "IMG 001.jpg"),
            "/Clients/972501234567/Client/originals/2024-05-17_IMG_001.jpg"
        );
    }

    #[test]
    fn unsafe_namespace_and_root_are_cleaned() {
        let f = FilingContext::new("/Archive/", "../../x", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(f.person_folder("A"), "/Archive/_.._x/A");
    }

    #[test]
    fn pdf_has_one_page_sized_from_dpi() {
        let img = DynamicImage::new_rgb8(400, 200);
        let jpeg = encode::jpeg_bytes(&img, 80).unwrap();
        let pdf = image_pdf(&jpeg, 400, 200, 200).unwrap();
        assert!(pdf.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&pdf).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.get(&1).unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let width = media_box[2].as_float().unwrap();
        assert!((width - 144.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn assemble_uses_sanitized_names() {
        let page = RasterPage::new(1, DynamicImage::new_rgb8(20, 30));
        let artifact = assemble(
            page,
            classified("Bank_Statement", "Dana <Cohen>"),
            &filing(),
            &PipelineConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(
            artifact.remote_path,
            "/Clients/972501234567/Dana Cohen/2024-05-17_Bank_Statement_page2.pdf"
        );
        assert_eq!((artifact.width, artifact.height), (20, 30));
    }

    #[tokio::test]
    async fn empty_person_falls_back_to_client() {
        let page = RasterPage::new(0, DynamicImage::new_rgb8(5, 5));
        let artifact = assemble(page, classified("Other", ""), &filing(), &PipelineConfig::default())
            .await
            .unwrap();
        assert_eq!(artifact.person, "Client");
        assert!(artifact.remote_path.contains("/Client/"));
    }
}
