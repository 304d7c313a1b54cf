//! Progress-callback trait for per-page pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline walks through each page of a submission.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docnorm::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     uploaded: Arc<AtomicUsize>,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, file_name: &str, page_num: usize, total_pages: usize, remote_path: &str) {
//!         self.uploaded.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} page {}/{} -> {}", file_name, page_num, total_pages, remote_path);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     uploaded: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// Pages of one submission are processed sequentially, but
/// [`crate::process::Pipeline::process_batch`] runs several submissions at
/// once, so one callback instance can see interleaved events from different
/// submissions. Page events carry the submission's file name so
/// implementations can tell them apart. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once per submission after extraction, before the first page.
    fn on_submission_start(&self, file_name: &str, total_pages: usize) {
        let _ = (file_name, total_pages);
    }

    /// Called when a page enters the orientation stage.
    ///
    /// # Arguments
    /// * `file_name`   : submitted file name, as passed to `on_submission_start`
    /// * `page_num`    : 1-indexed page number
    /// * `total_pages` : total pages in the submission
    fn on_page_start(&self, file_name: &str, page_num: usize, total_pages: usize) {
        let _ = (file_name, page_num, total_pages);
    }

    /// Called when a page has been classified, assembled and uploaded.
    fn on_page_complete(&self, file_name: &str, page_num: usize, total_pages: usize, remote_path: &str) {
        let _ = (file_name, page_num, total_pages, remote_path);
    }

    /// Called when a page fails.
    fn on_page_error(&self, file_name: &str, page_num: usize, total_pages: usize, error: &str) {
        let _ = (file_name, page_num, total_pages, error);
    }

    /// Called once after every page of the submission has been attempted.
    fn on_submission_complete(&self, file_name: &str, total_pages: usize, success_count: usize) {
        let _ = (file_name, total_pages, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
