//! Output types returned by the pipeline.

use crate::error::{Degradation, PageError};
use crate::pipeline::orient::Rotation;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Result of processing one submission.
///
/// Always returned once the submission decoded, even when some pages
/// failed; inspect [`PipelineResult::failed_pages`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Submitted file name, as given.
    pub file_name: String,
    /// Client namespace the artifacts were filed under.
    pub namespace: String,
    /// Submission date used in every file name.
    pub submitted_on: NaiveDate,
    /// One entry per extracted page, in document order.
    pub pages: Vec<PageOutcome>,
    /// The single upload of the untouched source file.
    pub original: Option<OriginalUpload>,
    /// Wall-clock time for the whole submission.
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn processed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.is_success()).count()
    }

    pub fn failed_pages(&self) -> usize {
        self.total_pages() - self.processed_pages()
    }
}

/// Outcome of a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    Success(PageSuccess),
    Error {
        /// 1-indexed page number.
        page: usize,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<PageError>,
    },
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Success(_))
    }

    pub fn page(&self) -> usize {
        match self {
            PageOutcome::Success(s) => s.page,
            PageOutcome::Error { page, .. } => *page,
        }
    }

    pub fn as_success(&self) -> Option<&PageSuccess> {
        match self {
            PageOutcome::Success(s) => Some(s),
            PageOutcome::Error { .. } => None,
        }
    }

    pub(crate) fn from_error(page: usize, error: PageError) -> Self {
        PageOutcome::Error {
            page,
            message: error.to_string(),
            error: Some(error),
        }
    }
}

/// A page that was normalized, classified and uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSuccess {
    /// 1-indexed page number.
    pub page: usize,
    pub doc_type: String,
    pub person: String,
    pub filename: String,
    pub remote_path: String,
    /// Clockwise rotation applied to make the page upright.
    pub rotation: Rotation,
    /// True when a crop or perspective warp was applied.
    pub cropped: bool,
    /// Final page size in pixels.
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Fallbacks taken on the way; empty when every stage did its job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Degradation>,
}

/// Record of the single original-file upload of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalUpload {
    pub remote_path: String,
    pub uploaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(page: usize) -> PageOutcome {
        PageOutcome::Success(PageSuccess {
            page,
            doc_type: "Passport".into(),
            person: "Ann Lee".into(),
            filename: format!("2024-03-01_Passport_page{page}.pdf"),
            remote_path: format!("/Clients/555/Ann Lee/2024-03-01_Passport_page{page}.pdf"),
            rotation: Rotation::Deg0,
            cropped: true,
            width: 100,
            height: 140,
            public_url: None,
            degradations: vec![],
        })
    }

    #[test]
    fn counts_successes_and_failures() {
        let result = PipelineResult {
            file_name: "scan.pdf".into(),
            namespace: "555".into(),
            submitted_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            pages: vec![
                success(1),
                PageOutcome::from_error(
                    2,
                    PageError::UploadFailed {
                        page: 2,
                        remote_path: "/x".into(),
                        detail: "quota".into(),
                    },
                ),
            ],
            original: None,
            duration_ms: 5,
        };
        assert_eq!(result.total_pages(), 2);
        assert_eq!(result.processed_pages(), 1);
        assert_eq!(result.failed_pages(), 1);
        assert_eq!(result.pages[1].page(), 2);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(success(1)).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["rotation"], 0);
        assert!(json.get("degradations").is_none());

        let err = PageOutcome::Error {
            page: 3,
            message: "boom".into(),
            error: None,
        };
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "boom");
    }
}
