//! Submission-level orchestration.
//!
//! [`Pipeline::process`] walks the pages of one submission in document
//! order: orient → normalize → classify → assemble → upload. A page that
//! fails is recorded and the next one starts; only decode-class errors end
//! the submission early.

use crate::collaborators::Collaborators;
use crate::config::PipelineConfig;
use crate::error::{DocNormError, PageError};
use crate::output::{OriginalUpload, PageOutcome, PageSuccess, PipelineResult};
use crate::pipeline::assemble::{self, FilingContext, PageArtifact};
use crate::pipeline::extract::{self, PdfRasterizer, PdfiumRasterizer, RasterPage};
use crate::pipeline::input::{self, Submission};
use crate::pipeline::orient::OrientedPage;
use crate::pipeline::{classify, normalize, orient};
use crate::naming::FALLBACK_PERSON;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A configured pipeline bound to its collaborators.
///
/// Cheap to share behind an `Arc`; nothing in it is mutated while
/// processing, so one instance can serve many submissions at once.
pub struct Pipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    rasterizer: Arc<dyn PdfRasterizer>,
}

/// The untouched source file, waiting to be filed under its holder.
struct PendingOriginal {
    bytes: Option<Vec<u8>>,
    record: Option<OriginalUpload>,
}

impl Pipeline {
    /// Build a pipeline that rasterises PDFs with pdfium.
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            rasterizer: Arc::new(PdfiumRasterizer::new()),
        }
    }

    /// Replace the PDF rasteriser.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Process one submission.
    ///
    /// # Returns
    /// `Ok(PipelineResult)` once the submission decoded, even if every page
    /// failed later on (check [`PipelineResult::failed_pages`]).
    ///
    /// # Errors
    /// Input errors (missing file, failed download) and decode-class errors
    /// (unsupported content, undecodable bytes, no pages).
    pub async fn process(&self, submission: &Submission) -> Result<PipelineResult, DocNormError> {
        let start = Instant::now();
        info!(
            "Processing '{}' for namespace '{}'",
            submission.file_name, submission.namespace
        );

        let loaded = input::load(submission, self.config.download_timeout_secs).await?;
        let mut original = PendingOriginal {
            bytes: Some(loaded.bytes.clone()),
            record: None,
        };

        let pages = extract::extract_pages(
            loaded,
            &submission.file_name,
            &self.config,
            Arc::clone(&self.rasterizer),
        )
        .await?;
        let total = pages.len();
        info!("'{}' has {} page(s)", submission.file_name, total);

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_submission_start(&submission.file_name, total);
        }

        let filing = FilingContext::new(
            &self.config.remote_root,
            &submission.namespace,
            submission.submitted_on,
        );

        let mut outcomes = Vec::with_capacity(total);
        for (index, page) in pages.into_iter().enumerate() {
            let number = index + 1;
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_page_start(&submission.file_name, number, total);
            }

            let result = match page {
                Ok(page) => {
                    self.process_page(page, &filing, &submission.file_name, &mut original)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(success) => {
                    info!(
                        "Page {}/{}: {} / {} → {}",
                        number, total, success.doc_type, success.person, success.remote_path
                    );
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_page_complete(&submission.file_name, number, total, &success.remote_path);
                    }
                    outcomes.push(PageOutcome::Success(success));
                }
                Err(e) => {
                    warn!("Page {}/{} failed: {}", number, total, e);
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_page_error(&submission.file_name, number, total, &e.to_string());
                    }
                    outcomes.push(PageOutcome::from_error(number, e));
                }
            }
        }

        if let Some(bytes) = original.bytes.take() {
            original.record = Some(
                self.upload_original(bytes, &filing, FALLBACK_PERSON, &submission.file_name)
                    .await,
            );
        }

        let result = PipelineResult {
            file_name: submission.file_name.clone(),
            namespace: submission.namespace.clone(),
            submitted_on: submission.submitted_on,
            pages: outcomes,
            original: original.record,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Finished '{}': {}/{} pages in {}ms",
            result.file_name,
            result.processed_pages(),
            total,
            result.duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_submission_complete(&result.file_name, total, result.processed_pages());
        }
        Ok(result)
    }

    /// Process independent submissions concurrently, at most
    /// `config.concurrency` at a time. Results keep the input order.
    pub async fn process_batch(
        &self,
        submissions: &[Submission],
    ) -> Vec<Result<PipelineResult, DocNormError>> {
        info!(
            "Processing batch of {} submission(s), concurrency {}",
            submissions.len(),
            self.config.concurrency
        );
        stream::iter(submissions.iter().map(|s| self.process(s)))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    async fn process_page(
        &self,
        page: RasterPage,
        filing: &FilingContext,
        file_name: &str,
        original: &mut PendingOriginal,
    ) -> Result<PageSuccess, PageError> {
        let number = page.number();
        let mut degradations = Vec::new();

        let (oriented, reason) = orient::correct_orientation(
            page,
            self.collaborators.recognizer.as_ref(),
            &self.config,
        )
        .await
        .into_parts();
        degradations.extend(reason);
        let OrientedPage {
            page,
            decision,
            detection,
        } = oriented;
        debug!("Page {}: rotation {} ({:?})", number, decision.rotation, decision.signal);

        let (normalized, reason) = normalize::normalize(page, &detection, &self.config)
            .await?
            .into_parts();
        degradations.extend(reason);
        let cropped = normalized.cropped();

        let (classification, reason) = classify::classify(
            &normalized.page.image,
            &detection.text,
            self.collaborators.model.as_ref(),
            &self.config,
        )
        .await
        .into_parts();
        degradations.extend(reason);

        if let Some(bytes) = original.bytes.take() {
            let person = assemble::person_for(&classification);
            original.record = Some(self.upload_original(bytes, filing, &person, file_name).await);
        }

        let PageArtifact {
            pdf,
            file_name: filename,
            remote_path,
            person,
            doc_type,
            width,
            height,
            ..
        } = assemble::assemble(normalized.page, classification, filing, &self.config).await?;

        if let Err(e) = self.collaborators.storage.upload(pdf, &remote_path).await {
            return Err(PageError::UploadFailed {
                page: number,
                remote_path,
                detail: e.to_string(),
            });
        }
        let public_url = self.publish(&remote_path).await;

        for d in &degradations {
            warn!("Page {}: {}", number, d);
        }

        Ok(PageSuccess {
            page: number,
            doc_type,
            person,
            filename,
            remote_path,
            rotation: decision.rotation,
            cropped,
            width,
            height,
            public_url,
            degradations,
        })
    }

    async fn upload_original(
        &self,
        bytes: Vec<u8>,
        filing: &FilingContext,
        person: &str,
        file_name: &str,
    ) -> OriginalUpload {
        let remote_path = filing.original_path(person, file_name);
        match self.collaborators.storage.upload(bytes, &remote_path).await {
            Ok(()) => {
                info!("Original stored at {}", remote_path);
                let public_url = self.publish(&remote_path).await;
                OriginalUpload {
                    remote_path,
                    uploaded: true,
                    public_url,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Original upload to {} failed: {}", remote_path, e);
                OriginalUpload {
                    remote_path,
                    uploaded: false,
                    public_url: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Public link for an uploaded object, when enabled. Failures only warn.
    async fn publish(&self, remote_path: &str) -> Option<String> {
        if !self.config.publish_links {
            return None;
        }
        match self.collaborators.storage.publish(remote_path).await {
            Ok(url) => url,
            Err(e) => {
                warn!("Publishing {} failed: {}", remote_path, e);
                None
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        ArchiveStorage, ModelClient, ModelError, ModelRequest, NullRecognizer, StorageError,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct FixedModel(&'static str);

    #[async_trait]
    impl ModelClient for FixedModel {
        async fn complete(&self, _request: ModelRequest) -> Result<String, ModelError> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct MemoryStorage {
        paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArchiveStorage for MemoryStorage {
        async fn upload(&self, _bytes: Vec<u8>, remote_path: &str) -> Result<(), StorageError> {
            self.paths.lock().unwrap().push(remote_path.to_string());
            Ok(())
        }

        async fn publish(&self, remote_path: &str) -> Result<Option<String>, StorageError> {
            Ok(Some(format!("https://files.example{remote_path}")))
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn pipeline(reply: &'static str, storage: Arc<MemoryStorage>, publish: bool) -> Pipeline {
        let config = PipelineConfig::builder().publish_links(publish).build().unwrap();
        Pipeline::new(
            config,
            Collaborators::new(Arc::new(NullRecognizer), Arc::new(FixedModel(reply)), storage),
        )
    }

    fn submission() -> Submission {
        Submission::from_bytes(png(40, 60), "photo.png", "555")
            .with_date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
    }

    #[tokio::test]
    async fn single_image_is_filed_with_its_original() {
        let storage = Arc::new(MemoryStorage::default());
        let p = pipeline(r#"{"doc_type":"Passport","person_name":"Ann Lee"}"#, storage.clone(), false);
        let result = p.process(&submission()).await.unwrap();

        assert_eq!(result.processed_pages(), 1);
        let page = result.pages[0].as_success().unwrap();
        assert_eq!(page.remote_path, "/Clients/555/Ann Lee/2024-02-29_Passport_page1.pdf");
        assert!(page.public_url.is_none());

        let original = result.original.unwrap();
        assert!(original.uploaded);
        assert_eq!(original.remote_path, "/Clients/555/Ann Lee/originals/2024-02-29_photo.png");
        assert_eq!(storage.paths.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn publish_links_are_recorded() {
        let storage = Arc::new(MemoryStorage::default());
        let p = pipeline(r#"{"doc_type":"Other","person_name":""}"#, storage, true);
        let result = p.process(&submission()).await.unwrap();
        let page = result.pages[0].as_success().unwrap();
        assert_eq!(page.person, "Client");
        assert_eq!(
            page.public_url.as_deref(),
            Some("https://files.example/Clients/555/Client/2024-02-29_Other_page1.pdf")
        );
        assert!(result.original.unwrap().public_url.is_some());
    }

    #[tokio::test]
    async fn undecodable_bytes_abort() {
        let storage = Arc::new(MemoryStorage::default());
        let p = pipeline("{}", storage.clone(), false);
        let bad = Submission::from_bytes(b"not an image at all".to_vec(), "x.bin", "555");
        let err = p.process(&bad).await.unwrap_err();
        assert!(err.is_decode_error(), "got {err}");
        assert!(storage.paths.lock().unwrap().is_empty());
    }
}
