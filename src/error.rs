//! Error types for the edgequake-docnorm library.
//!
//! Failures fall into three tiers:
//!
//! * [`DocNormError`]: **Fatal**: the submission cannot be processed at all
//!   (unreadable file, no page could be extracted, provider not configured).
//!   Returned as `Err(DocNormError)` from [`crate::process::Pipeline::process`].
//!
//! * [`PageError`]: **Non-fatal**: one page failed (render glitch, encoding
//!   error, upload rejected) but its siblings are fine. Stored inside
//!   [`crate::output::PageOutcome`] so one bad page never costs the whole
//!   submission.
//!
//! * [`Degradation`]: **Recoverable**: a stage could not do its job and fell
//!   back to a safe default (identity transform, sentinel classification).
//!   The page still succeeds; the degradation is recorded so operators can
//!   re-triage it by hand.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docnorm library.
#[derive(Debug, Error)]
pub enum DocNormError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The content kind could not be determined from the declaration or the bytes.
    #[error("Unsupported content for '{name}': first bytes {magic:?} are neither an image nor a PDF")]
    UnsupportedContent { name: String, magic: Vec<u8> },

    // ── Decode errors ─────────────────────────────────────────────────────
    /// The input was read but could not be decoded into any page.
    #[error("Failed to decode '{name}': {detail}")]
    Decode { name: String, detail: String },

    /// The PDF requires a password.
    #[error("PDF '{name}' is encrypted and cannot be opened without a password")]
    PasswordRequired { name: String },

    /// Decoding succeeded but yielded zero pages.
    #[error("'{name}' contains no pages")]
    NoPages { name: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install\n\
pdfium system-wide so it can be found by the dynamic loader.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocNormError {
    /// True for the decode class of errors, the only class that aborts a
    /// submission once its bytes are in hand.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            DocNormError::Decode { .. }
                | DocNormError::PasswordRequired { .. }
                | DocNormError::NoPages { .. }
                | DocNormError::UnsupportedContent { .. }
        )
    }
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::PageOutcome::Error`] when a page fails.
/// Processing continues with the next page.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PageError {
    /// The PDF page could not be rasterised.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The normalized bitmap could not be encoded as a PDF.
    #[error("Page {page}: PDF encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The storage collaborator rejected the upload.
    #[error("Page {page}: upload to '{remote_path}' failed: {detail}")]
    UploadFailed {
        page: usize,
        remote_path: String,
        detail: String,
    },

    /// A blocking task panicked or was cancelled.
    #[error("Page {page}: internal error: {detail}")]
    Internal { page: usize, detail: String },
}

/// A recoverable fallback taken by one stage of the page pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Degradation {
    /// Text detection, orientation or cropping fell back to the identity transform.
    #[error("{stage} degraded: {detail}")]
    DetectionDegraded { stage: String, detail: String },

    /// The model could not classify the page; the sentinel result was used.
    #[error("classification unavailable: {detail}")]
    ClassificationUnavailable { detail: String },
}

impl Degradation {
    pub fn detection(stage: &str, detail: impl Into<String>) -> Self {
        Degradation::DetectionDegraded {
            stage: stage.to_string(),
            detail: detail.into(),
        }
    }

    pub fn classification(detail: impl Into<String>) -> Self {
        Degradation::ClassificationUnavailable {
            detail: detail.into(),
        }
    }
}

/// Outcome of a stage that can fall back to a safe default instead of failing.
///
/// `Done` means the stage worked; `Degraded` carries the fallback value
/// together with the reason it was used. Hard failures are `Err(PageError)`
/// at the call site, never a variant here.
#[derive(Debug, Clone)]
pub enum Staged<T> {
    Done(T),
    Degraded { value: T, reason: Degradation },
}

impl<T> Staged<T> {
    pub fn degraded(value: T, reason: Degradation) -> Self {
        Staged::Degraded { value, reason }
    }

    /// Split into the value and the optional degradation reason.
    pub fn into_parts(self) -> (T, Option<Degradation>) {
        match self {
            Staged::Done(value) => (value, None),
            Staged::Degraded { value, reason } => (value, Some(reason)),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Staged::Done(value) | Staged::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Staged::Degraded { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Staged<U> {
        match self {
            Staged::Done(value) => Staged::Done(f(value)),
            Staged::Degraded { value, reason } => Staged::Degraded {
                value: f(value),
                reason,
            },
        }
    }
}
