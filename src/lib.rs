//! # edgequake-docnorm
//!
//! Turn photographed or scanned client documents into upright, cropped,
//! classified single-page PDFs filed under the holder's name.
//!
//! ## Why this crate?
//!
//! Documents submitted from phones arrive sideways, upside down, on a desk
//! with half the room in frame, or as multi-page PDFs mixing passports with
//! bank statements. Filing them by hand means opening each page, rotating,
//! cropping and renaming it. This crate does that per page: it uses text
//! detection to find the upright orientation and the document region, asks
//! a language model what the page is and whose it is, and stores each page
//! as its own PDF at a predictable path.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Submission (path | bytes | URL)
//!  │
//!  ├─ 1. Extract    decode image (EXIF-corrected) or rasterise PDF pages
//!  ├─ 2. Orient     0/90/180/270 from text detections
//!  ├─ 3. Normalize  crop to sheet outline or text cluster (coverage band)
//!  ├─ 4. Classify   doc type + holder name (text model or vision model)
//!  ├─ 5. Assemble   one-page PDF, /<root>/<namespace>/<person>/<date>_<type>_page<N>.pdf
//!  └─ 6. Upload     page artifacts + one copy of the original file
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docnorm::{
//!     Collaborators, LlmModelClient, LocalDirStorage, NullRecognizer, Pipeline,
//!     PipelineConfig, Submission,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / EDGEQUAKE_LLM_PROVIDER / ...
//!     let config = PipelineConfig::default();
//!     let collaborators = Collaborators::new(
//!         Arc::new(NullRecognizer),
//!         Arc::new(LlmModelClient::from_config(&config)?),
//!         Arc::new(LocalDirStorage::new("archive")),
//!     );
//!     let pipeline = Pipeline::new(config, collaborators);
//!
//!     let result = pipeline
//!         .process(&Submission::from_path("scan.pdf", "972501234567"))
//!         .await?;
//!     for page in result.pages.iter().filter_map(|p| p.as_success()) {
//!         println!("{} → {}", page.page, page.remote_path);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docnorm` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docnorm = { version = "0.1", default-features = false }
//! ```
//!
//! ## External services
//!
//! Text detection, the classification model and archive storage are traits
//! in [`collaborators`]. Production implementations talk to Google Cloud
//! Vision, any `edgequake-llm` provider, and a local directory tree; tests
//! plug in-process fakes into the same seams.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod collaborators;
pub mod config;
pub mod error;
pub mod geometry;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use collaborators::{
    ArchiveStorage, CloudVisionRecognizer, Collaborators, LlmModelClient, LocalDirStorage,
    ModelClient, ModelError, ModelRequest, NullRecognizer, RecognitionError, StorageError,
    TextBlock, TextDetection, TextRecognizer,
};
pub use config::{
    CropEvidence, Heuristics, OrientationStrategy, PipelineConfig, PipelineConfigBuilder,
    ScriptFamily, Taxonomy,
};
pub use error::{Degradation, DocNormError, PageError, Staged};
pub use output::{OriginalUpload, PageOutcome, PageSuccess, PipelineResult};
pub use pipeline::classify::{ClassificationResult, ClassificationSource};
pub use pipeline::extract::{PdfRasterizer, PdfiumRasterizer, RasterOptions};
pub use pipeline::input::{ContentKind, InputSource, Submission};
pub use pipeline::orient::Rotation;
pub use process::Pipeline;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
