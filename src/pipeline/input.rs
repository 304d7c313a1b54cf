//! Input resolution: turn a [`Submission`] into raw bytes of a known kind.
//!
//! Submissions arrive as a local path (CLI), an in-memory buffer (webhook
//! handlers that already hold the attachment) or an HTTP(S) URL (messaging
//! platforms hand out file links). All three end as a byte buffer; pdfium and
//! the image decoders both read from memory, so nothing is staged on disk.

use crate::error::DocNormError;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What the submitted bytes contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Image,
    Pdf,
}

impl ContentKind {
    /// Map a MIME type as sent by messaging webhooks.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        let essence = mime.split(';').next().unwrap_or("").trim();
        if essence == "application/pdf" || essence == "application/x-pdf" {
            Some(ContentKind::Pdf)
        } else if essence.starts_with("image/") {
            Some(ContentKind::Image)
        } else {
            None
        }
    }

    /// Recognise the kind from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(ContentKind::Pdf);
        }
        image::guess_format(bytes).ok().map(|_| ContentKind::Image)
    }

    /// Guess from a file extension.
    pub fn from_extension(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(ContentKind::Pdf),
            "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp" | "tif" | "tiff" => {
                Some(ContentKind::Image)
            }
            _ => None,
        }
    }
}

/// Where the submitted bytes come from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Url(String),
}

/// One end-user submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub source: InputSource,
    /// Declared content kind. Sniffed from the bytes when absent.
    pub kind: Option<ContentKind>,
    /// Client namespace, e.g. the sender's phone number.
    pub namespace: String,
    /// Original file name as submitted.
    pub file_name: String,
    pub submitted_on: NaiveDate,
}

impl Submission {
    pub fn new(source: InputSource, file_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            source,
            kind: None,
            namespace: namespace.into(),
            file_name: file_name.into(),
            submitted_on: chrono::Local::now().date_naive(),
        }
    }

    /// A local file. The file name is taken from the path.
    pub fn from_path(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Self::new(InputSource::Path(path), file_name, namespace)
    }

    pub fn from_bytes(
        bytes: Vec<u8>,
        file_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::new(InputSource::Bytes(bytes), file_name, namespace)
    }

    /// A remote file. The file name is the last URL path segment.
    pub fn from_url(url: impl Into<String>, namespace: impl Into<String>) -> Self {
        let url = url.into();
        let file_name = filename_from_url(&url);
        Self::new(InputSource::Url(url), file_name, namespace)
    }

    /// Parse a CLI-style argument: an HTTP(S) URL or a local path.
    pub fn from_arg(arg: &str, namespace: impl Into<String>) -> Self {
        if is_url(arg) {
            Self::from_url(arg, namespace)
        } else {
            Self::from_path(arg, namespace)
        }
    }

    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Declare the kind from a MIME type. Unknown MIME types leave it unset.
    pub fn with_mime(mut self, mime: &str) -> Self {
        if let Some(kind) = ContentKind::from_mime(mime) {
            self.kind = Some(kind);
        }
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.submitted_on = date;
        self
    }
}

/// Submission bytes with their resolved kind.
#[derive(Debug)]
pub struct LoadedInput {
    pub bytes: Vec<u8>,
    pub kind: ContentKind,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read the submission's bytes and settle on a content kind.
///
/// The declared kind wins; otherwise magic bytes decide, then the file
/// extension. Nothing matching is an `UnsupportedContent` error.
pub async fn load(submission: &Submission, timeout_secs: u64) -> Result<LoadedInput, DocNormError> {
    let bytes = match &submission.source {
        InputSource::Path(path) => read_local(path).await?,
        InputSource::Bytes(bytes) => bytes.clone(),
        InputSource::Url(url) => download_url(url, timeout_secs).await?,
    };

    let kind = submission
        .kind
        .or_else(|| ContentKind::sniff(&bytes))
        .or_else(|| ContentKind::from_extension(&submission.file_name))
        .ok_or_else(|| DocNormError::UnsupportedContent {
            name: submission.file_name.clone(),
            magic: bytes.iter().take(8).copied().collect(),
        })?;

    debug!(
        "Loaded '{}': {} bytes, {:?}",
        submission.file_name,
        bytes.len(),
        kind
    );
    Ok(LoadedInput { bytes, kind })
}

async fn read_local(path: &Path) -> Result<Vec<u8>, DocNormError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DocNormError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DocNormError::FileNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(DocNormError::Decode {
            name: path.display().to_string(),
            detail: e.to_string(),
        }),
    }
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, DocNormError> {
    info!("Downloading submission from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocNormError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            DocNormError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DocNormError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_send_err)?;

    if !response.status().is_success() {
        return Err(DocNormError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_send_err)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Extract a reasonable file name from a URL.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "download".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn kind_from_mime() {
        assert_eq!(ContentKind::from_mime("application/pdf"), Some(ContentKind::Pdf));
        assert_eq!(ContentKind::from_mime("image/jpeg"), Some(ContentKind::Image));
        assert_eq!(ContentKind::from_mime("IMAGE/PNG; q=1"), Some(ContentKind::Image));
        assert_eq!(ContentKind::from_mime("text/plain"), None);
    }

    #[test]
    fn kind_from_magic_bytes() {
        assert_eq!(ContentKind::sniff(b"%PDF-1.7\n"), Some(ContentKind::Pdf));
        assert_eq!(
            ContentKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]),
            Some(ContentKind::Image)
        );
        assert_eq!(
            ContentKind::sniff(b"\x89PNG\r\n\x1a\n"),
            Some(ContentKind::Image)
        );
        assert_eq!(ContentKind::sniff(b"hello"), None);
    }

    #[test]
    fn url_file_names() {
        assert_eq!(filename_from_url("https://x.io/files/scan.jpg?sig=1"), "scan.jpg");
        assert_eq!(filename_from_url("https://x.io/files/"), "download");
    }

    #[tokio::test]
    async fn declared_kind_wins_over_sniffing() {
        let s = Submission::from_bytes(b"%PDF-1.4".to_vec(), "a.pdf", "ns").with_kind(ContentKind::Image);
        let loaded = load(&s, 5).await.unwrap();
        assert_eq!(loaded.kind, ContentKind::Image);
    }

    #[tokio::test]
    async fn unknown_bytes_are_unsupported() {
        let s = Submission::from_bytes(b"just text".to_vec(), "notes.txt", "ns");
        let err = load(&s, 5).await.unwrap_err();
        assert!(matches!(err, DocNormError::UnsupportedContent { .. }));
        assert!(err.is_decode_error());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let s = Submission::from_path("/definitely/not/here.pdf", "ns");
        assert_eq!(s.file_name, "here.pdf");
        let err = load(&s, 5).await.unwrap_err();
        assert!(matches!(err, DocNormError::FileNotFound { .. }));
    }
}
