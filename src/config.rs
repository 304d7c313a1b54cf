//! Configuration types for document normalization.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The heuristic thresholds that decide when to
//! rotate and when to crop live together in [`Heuristics`], so tuning them is
//! a one-place change and every threshold can be unit-tested against fixed
//! synthetic inputs.

use crate::error::DocNormError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper bound for [`PipelineConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for one pipeline instance.
///
/// Built via [`PipelineConfig::builder()`] or using [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docnorm::{CropEvidence, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .crop_evidence(CropEvidence::TextBlocks)
///     .coverage_band(0.2, 0.8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising PDF pages. Range: 72–400. Default: 200.
    ///
    /// 200 DPI keeps 8pt print legible for text recognition while a full A4
    /// page stays around 1650 × 2340 px.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 3000.
    pub max_rendered_pixels: u32,

    /// Orientation strategy. Default: [`OrientationStrategy::OcrVote`].
    pub orientation_strategy: OrientationStrategy,

    /// Source of crop evidence. Default: [`CropEvidence::Auto`].
    pub crop_evidence: CropEvidence,

    /// Heuristic thresholds shared by the orientation, crop and routing stages.
    pub heuristics: Heuristics,

    /// Document-type labels the classifier must choose from.
    pub taxonomy: Taxonomy,

    /// Root folder of every remote path. Default: `"Clients"`.
    pub remote_root: String,

    /// Ask the storage collaborator for a public link after each upload. Default: false.
    pub publish_links: bool,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for classification requests. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per classification. Default: 300.
    ///
    /// The expected answer is a two-field JSON object; a small cap keeps a
    /// chatty model from burning tokens on prose around it.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient model failure. Range: 0–10. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom classification instructions. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Number of submissions processed concurrently by [`crate::process::Pipeline::process_batch`].
    /// Pages within one submission are always sequential. Default: 4.
    pub concurrency: usize,

    /// Optional progress callback for per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 3000,
            orientation_strategy: OrientationStrategy::default(),
            crop_evidence: CropEvidence::default(),
            heuristics: Heuristics::default(),
            taxonomy: Taxonomy::default(),
            remote_root: "Clients".to_string(),
            publish_links: false,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 300,
            max_retries: 2,
            retry_backoff_ms: 500,
            system_prompt: None,
            download_timeout_secs: 120,
            concurrency: 4,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("orientation_strategy", &self.orientation_strategy)
            .field("crop_evidence", &self.crop_evidence)
            .field("heuristics", &self.heuristics)
            .field("taxonomy", &self.taxonomy.labels().len())
            .field("remote_root", &self.remote_root)
            .field("publish_links", &self.publish_links)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn orientation_strategy(mut self, strategy: OrientationStrategy) -> Self {
        self.config.orientation_strategy = strategy;
        self
    }

    pub fn crop_evidence(mut self, evidence: CropEvidence) -> Self {
        self.config.crop_evidence = evidence;
        self
    }

    pub fn heuristics(mut self, heuristics: Heuristics) -> Self {
        self.config.heuristics = heuristics;
        self
    }

    /// Set the accepted crop coverage band (exclusive on both ends).
    pub fn coverage_band(mut self, min: f32, max: f32) -> Self {
        self.config.heuristics.min_coverage = min;
        self.config.heuristics.max_coverage = max;
        self
    }

    pub fn taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.config.taxonomy = taxonomy;
        self
    }

    pub fn remote_root(mut self, root: impl Into<String>) -> Self {
        self.config.remote_root = root.into();
        self
    }

    pub fn publish_links(mut self, v: bool) -> Self {
        self.config.publish_links = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DocNormError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(DocNormError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(DocNormError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(DocNormError::InvalidConfig(format!(
                "max_retries must be 0–{MAX_RETRIES}, got {}",
                c.max_retries
            )));
        }
        if c.taxonomy.labels().is_empty() {
            return Err(DocNormError::InvalidConfig(
                "Taxonomy must contain at least one label".into(),
            ));
        }
        c.heuristics.validate()?;
        Ok(self.config)
    }
}

// ── Heuristics ───────────────────────────────────────────────────────────

/// Every tunable threshold used by the orientation, crop and routing stages.
///
/// Defaults were picked for phone photos of single A4/ID-sized sheets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    /// Height (px) pages are downscaled to before crop detection. Default: 800.
    pub working_height: u32,

    /// Crops covering at most this fraction of the page are rejected as
    /// detection fragments. Default: 0.15.
    pub min_coverage: f32,

    /// Crops covering at least this fraction of the page are rejected as
    /// no-ops on an already flat scan. Default: 0.85.
    pub max_coverage: f32,

    /// Text blocks whose vertical gap is at most this fraction of the page
    /// height belong to the same cluster. Default: 0.08.
    pub block_gap_fraction: f32,

    /// Padding (px, full resolution) added around an axis-aligned crop. Default: 20.
    pub crop_padding_px: u32,

    /// Gaussian blur sigma applied before edge detection. Default: 1.5.
    pub blur_sigma: f32,

    /// Canny hysteresis thresholds. Defaults: 30 / 90.
    pub canny_low: f32,
    pub canny_high: f32,

    /// Radius of the morphological closing that joins broken sheet edges. Default: 3.
    pub close_radius: u8,

    /// Douglas–Peucker epsilon as a fraction of the contour perimeter. Default: 0.02.
    pub polygon_epsilon_fraction: f64,

    /// Minimum lead (in scored characters) a non-zero rotation needs over the
    /// upright candidate before the page is turned. Default: 1.
    pub orientation_min_margin: usize,

    /// Scripts whose letters count toward the orientation vote.
    pub scripts: Vec<ScriptFamily>,

    /// Pages with more OCR text than this (chars) are classified from text
    /// alone; shorter ones are sent as images. Default: 40.
    pub min_text_chars: usize,

    /// OCR text longer than this (chars) is truncated before prompting. Default: 3000.
    pub max_prompt_chars: usize,

    /// JPEG quality for archival PDFs and model images. Default: 85.
    pub jpeg_quality: u8,

    /// Contrast adjustment applied to the final page (0 = off). Default: 0.
    pub contrast: f32,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            working_height: 800,
            min_coverage: 0.15,
            max_coverage: 0.85,
            block_gap_fraction: 0.08,
            crop_padding_px: 20,
            blur_sigma: 1.5,
            canny_low: 30.0,
            canny_high: 90.0,
            close_radius: 3,
            polygon_epsilon_fraction: 0.02,
            orientation_min_margin: 1,
            scripts: vec![
                ScriptFamily::Latin,
                ScriptFamily::Cyrillic,
                ScriptFamily::Hebrew,
            ],
            min_text_chars: 40,
            max_prompt_chars: 3000,
            jpeg_quality: 85,
            contrast: 0.0,
        }
    }
}

impl Heuristics {
    /// Reject threshold combinations that would make a stage meaningless.
    pub fn validate(&self) -> Result<(), DocNormError> {
        if !(0.0..1.0).contains(&self.min_coverage)
            || !(0.0..=1.0).contains(&self.max_coverage)
            || self.min_coverage >= self.max_coverage
        {
            return Err(DocNormError::InvalidConfig(format!(
                "coverage band must satisfy 0 ≤ min < max ≤ 1, got {}–{}",
                self.min_coverage, self.max_coverage
            )));
        }
        if self.working_height < 64 {
            return Err(DocNormError::InvalidConfig(format!(
                "working_height must be ≥ 64, got {}",
                self.working_height
            )));
        }
        if self.canny_low > self.canny_high {
            return Err(DocNormError::InvalidConfig(
                "canny_low must not exceed canny_high".into(),
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(DocNormError::InvalidConfig(format!(
                "jpeg_quality must be 1–100, got {}",
                self.jpeg_quality
            )));
        }
        if self.scripts.is_empty() {
            return Err(DocNormError::InvalidConfig(
                "at least one script family is required for orientation voting".into(),
            ));
        }
        Ok(())
    }

    /// True when `coverage` lies strictly inside the accepted crop band.
    pub fn accepts_coverage(&self, coverage: f32) -> bool {
        coverage > self.min_coverage && coverage < self.max_coverage
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the orientation stage decides which way is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationStrategy {
    /// Recognise text at all four rotations and keep the one that reads best. (default)
    #[default]
    OcrVote,
    /// Detect once and read the angle of the first text block's baseline.
    TextAngle,
}

/// Evidence the geometric normalizer crops from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropEvidence {
    /// Sheet outline when it lies inside the coverage band. An outline that
    /// fills the frame leaves the page uncropped; clustered text blocks are
    /// used only when there is no outline or it is a fragment. (default)
    #[default]
    Auto,
    /// Edge detection + largest contour only.
    Contour,
    /// Clustered OCR block geometry only.
    TextBlocks,
}

/// Script families whose letters count toward the orientation vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFamily {
    Latin,
    Cyrillic,
    Hebrew,
    Arabic,
    Greek,
}

impl ScriptFamily {
    /// True when `c` is a letter of this script.
    pub fn contains(self, c: char) -> bool {
        if !c.is_alphabetic() {
            return false;
        }
        let cp = c as u32;
        match self {
            ScriptFamily::Latin => {
                c.is_ascii_alphabetic() || (0x00C0..=0x024F).contains(&cp) || (0x1E00..=0x1EFF).contains(&cp)
            }
            ScriptFamily::Cyrillic => (0x0400..=0x052F).contains(&cp),
            ScriptFamily::Hebrew => (0x0590..=0x05FF).contains(&cp) || (0xFB1D..=0xFB4F).contains(&cp),
            ScriptFamily::Arabic => (0x0600..=0x06FF).contains(&cp) || (0x0750..=0x077F).contains(&cp),
            ScriptFamily::Greek => (0x0370..=0x03FF).contains(&cp),
        }
    }
}

/// The extensible set of document-type labels the classifier chooses from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    labels: Vec<String>,
}

/// Labels used when no custom taxonomy is configured.
pub const DEFAULT_DOC_TYPES: &[&str] = &[
    "ID_Document",
    "Passport",
    "Photo_ID",
    "Application_Form",
    "Marriage_Certificate",
    "Birth_Certificate",
    "Name_Change_Cert",
    "Marital_Status_Doc",
    "Police_Clearance",
    "Relationship_Letter",
    "Chat_History",
    "Joint_Photos",
    "Bank_Statement",
    "Salary_Slip",
    "Employment_Doc",
    "National_Insurance",
    "Rental_Contract",
    "Utility_Bill",
    "Recommendation_Letter",
    "Power_of_Attorney",
    "Lawyer_License",
    "Minor_Document",
    "Other",
];

impl Default for Taxonomy {
    fn default() -> Self {
        Self::new(DEFAULT_DOC_TYPES.iter().copied())
    }
}

impl Taxonomy {
    /// Build a taxonomy from labels, normalised and deduplicated in order.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = crate::naming::normalize_label(label.as_ref());
            if !label.is_empty() && !out.contains(&label) {
                out.push(label);
            }
        }
        Self { labels: out }
    }

    /// Add a label, keeping the set deduplicated.
    pub fn with_label(mut self, label: impl AsRef<str>) -> Self {
        let label = crate::naming::normalize_label(label.as_ref());
        if !label.is_empty() && !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Map a free-form model label onto the taxonomy.
    ///
    /// Matching is case-insensitive after normalisation. Unknown labels map to
    /// `Other` when the taxonomy has it, else `None`.
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        let wanted = crate::naming::normalize_label(raw);
        if wanted.is_empty() {
            return None;
        }
        self.labels
            .iter()
            .find(|l| l.eq_ignore_ascii_case(&wanted))
            .or_else(|| self.labels.iter().find(|l| l.as_str() == "Other"))
            .map(String::as_str)
    }
}
