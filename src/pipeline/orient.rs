//! Orientation correction: make page content upright.
//!
//! Two strategies, selected by [`OrientationStrategy`]:
//!
//! * **OCR vote** (default): recognise text at 0°, 90°, 180° and 270° and keep
//!   the rotation under which the most letters of the expected scripts are
//!   read. Upside-down text is mostly recognised as punctuation and noise, so
//!   the letter count separates the candidates well.
//! * **Text angle**: detect once, read the direction of the first block's top
//!   edge, undo it, and detect again on the turned page.
//!
//! Pages without any recognisable text are left at 0°. Recognizer failures
//! count as "no text" and are reported as a degradation.

use crate::collaborators::{TextDetection, TextRecognizer};
use crate::config::{Heuristics, OrientationStrategy, PipelineConfig};
use crate::error::{Degradation, Staged};
use crate::pipeline::extract::RasterPage;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

const STAGE: &str = "orientation";

/// A clockwise quarter-turn rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Candidates in tie-break order.
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// The rotation that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg0,
            Rotation::Deg90 => Rotation::Deg270,
            Rotation::Deg180 => Rotation::Deg180,
            Rotation::Deg270 => Rotation::Deg90,
        }
    }

    /// Bucket an angle in degrees onto the nearest quarter turn.
    ///
    /// [315°, 45°) → 0, [45°, 135°) → 90, [135°, 225°) → 180, [225°, 315°) → 270.
    pub fn nearest(angle_degrees: f32) -> Self {
        let a = angle_degrees.rem_euclid(360.0);
        if !(45.0..315.0).contains(&a) {
            Rotation::Deg0
        } else if a < 135.0 {
            Rotation::Deg90
        } else if a < 225.0 {
            Rotation::Deg180
        } else {
            Rotation::Deg270
        }
    }

    /// Rotate an image clockwise by this amount.
    pub fn apply(self, img: &DynamicImage) -> DynamicImage {
        match self {
            Rotation::Deg0 => img.clone(),
            Rotation::Deg90 => img.rotate90(),
            Rotation::Deg180 => img.rotate180(),
            Rotation::Deg270 => img.rotate270(),
        }
    }

    pub fn is_identity(self) -> bool {
        self == Rotation::Deg0
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> u16 {
        r.degrees()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        Rotation::from_degrees(degrees).ok_or_else(|| format!("{degrees} is not a quarter turn"))
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("{}°", self.degrees()))
    }
}

/// Evidence behind an orientation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrientationSignal {
    /// Letter counts of the winner and the best other candidate.
    Vote { score: usize, runner_up: usize },
    /// Measured angle of the first block's top edge.
    TextAngle { degrees: f32 },
    NoEvidence,
}

/// The rotation applied to one page and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationDecision {
    pub rotation: Rotation,
    pub signal: OrientationSignal,
}

impl OrientationDecision {
    pub fn unchanged() -> Self {
        Self {
            rotation: Rotation::Deg0,
            signal: OrientationSignal::NoEvidence,
        }
    }
}

/// An upright page with the text detection made on it.
#[derive(Debug, Clone)]
pub struct OrientedPage {
    pub page: RasterPage,
    pub decision: OrientationDecision,
    /// Detection of the returned (rotated) page, reused by later stages.
    pub detection: TextDetection,
}

/// Count letters belonging to any of the expected scripts.
pub fn script_score(text: &str, heuristics: &Heuristics) -> usize {
    text.chars()
        .filter(|c| heuristics.scripts.iter().any(|s| s.contains(*c)))
        .count()
}

/// Pick the winning rotation from per-candidate scores (indexed like [`Rotation::ALL`]).
///
/// Ties go to the earliest candidate. A non-zero rotation must beat the
/// upright score by at least `min_margin`.
pub fn choose_by_vote(scores: [usize; 4], min_margin: usize) -> OrientationDecision {
    let mut best = 0;
    for i in 1..4 {
        if scores[i] > scores[best] {
            best = i;
        }
    }
    if scores[best] == 0 {
        return OrientationDecision::unchanged();
    }
    if best != 0 && scores[best] < scores[0] + min_margin.max(1) {
        best = 0;
    }
    let runner_up = scores
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != best)
        .map(|(_, s)| *s)
        .max()
        .unwrap_or(0);
    OrientationDecision {
        rotation: Rotation::ALL[best],
        signal: OrientationSignal::Vote {
            score: scores[best],
            runner_up,
        },
    }
}

/// Angle in degrees, in `[0, 360)`, of the edge from the first to the
/// second vertex of the first block. Image coordinates, so positive angles
/// turn clockwise.
pub fn first_block_angle(detection: &TextDetection) -> Option<f32> {
    let block = detection.blocks.first()?;
    let (a, b) = (block.vertices.first()?, block.vertices.get(1)?);
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    Some(dy.atan2(dx).to_degrees().rem_euclid(360.0))
}

/// Determine and apply the rotation that makes `page` upright.
pub async fn correct_orientation(
    page: RasterPage,
    recognizer: &dyn TextRecognizer,
    config: &PipelineConfig,
) -> Staged<OrientedPage> {
    match config.orientation_strategy {
        OrientationStrategy::OcrVote => by_vote(page, recognizer, &config.heuristics).await,
        OrientationStrategy::TextAngle => by_text_angle(page, recognizer).await,
    }
}

async fn rotate_all(img: DynamicImage) -> Option<[DynamicImage; 4]> {
    tokio::task::spawn_blocking(move || {
        let r90 = img.rotate90();
        let r180 = img.rotate180();
        let r270 = img.rotate270();
        [img, r90, r180, r270]
    })
    .await
    .ok()
}

async fn rotate(img: DynamicImage, rotation: Rotation) -> Option<DynamicImage> {
    if rotation.is_identity() {
        return Some(img);
    }
    tokio::task::spawn_blocking(move || rotation.apply(&img))
        .await
        .ok()
}

async fn by_vote(
    page: RasterPage,
    recognizer: &dyn TextRecognizer,
    heuristics: &Heuristics,
) -> Staged<OrientedPage> {
    let index = page.index;
    let Some(candidates) = rotate_all(page.image.clone()).await else {
        return Staged::degraded(
            unchanged(page, TextDetection::empty()),
            Degradation::detection(STAGE, "rotation task failed"),
        );
    };

    let mut scores = [0usize; 4];
    let mut detections: Vec<TextDetection> = Vec::with_capacity(4);
    let mut failures = Vec::new();

    for (i, candidate) in candidates.iter().enumerate() {
        let detection = match recognizer.detect_text(candidate).await {
            Ok(d) => d,
            Err(e) => {
                warn!("Page {}: recognition at {} failed: {}", index + 1, Rotation::ALL[i], e);
                failures.push(format!("{}: {}", Rotation::ALL[i], e));
                TextDetection::empty()
            }
        };
        scores[i] = script_score(&detection.text, heuristics);
        detections.push(detection);
    }

    let decision = choose_by_vote(scores, heuristics.orientation_min_margin);
    debug!(
        "Page {}: vote scores {:?} → {}",
        index + 1,
        scores,
        decision.rotation
    );

    let slot = Rotation::ALL
        .iter()
        .position(|r| *r == decision.rotation)
        .unwrap_or(0);
    let detection = detections.swap_remove(slot);
    let [c0, c90, c180, c270] = candidates;
    let image = match slot {
        1 => c90,
        2 => c180,
        3 => c270,
        _ => c0,
    };

    let oriented = OrientedPage {
        page: RasterPage::new(index, image),
        decision,
        detection,
    };
    if failures.is_empty() {
        Staged::Done(oriented)
    } else {
        Staged::degraded(
            oriented,
            Degradation::detection(STAGE, format!("recognition failed at {}", failures.join("; "))),
        )
    }
}

async fn by_text_angle(page: RasterPage, recognizer: &dyn TextRecognizer) -> Staged<OrientedPage> {
    let index = page.index;
    let first = match recognizer.detect_text(&page.image).await {
        Ok(d) => d,
        Err(e) => {
            warn!("Page {}: recognition failed: {}", index + 1, e);
            return Staged::degraded(
                unchanged(page, TextDetection::empty()),
                Degradation::detection(STAGE, e.to_string()),
            );
        }
    };

    let Some(angle) = first_block_angle(&first) else {
        return Staged::Done(unchanged(page, first));
    };
    let rotation = Rotation::nearest(angle).inverse();
    debug!(
        "Page {}: first block at {:.1}° → rotate {}",
        index + 1,
        angle,
        rotation
    );
    let decision = OrientationDecision {
        rotation,
        signal: OrientationSignal::TextAngle { degrees: angle },
    };

    if rotation.is_identity() {
        return Staged::Done(OrientedPage {
            page,
            decision,
            detection: first,
        });
    }

    let Some(image) = rotate(page.image.clone(), rotation).await else {
        return Staged::degraded(
            unchanged(page, first),
            Degradation::detection(STAGE, "rotation task failed"),
        );
    };

    // Geometry of the first detection no longer matches the turned page.
    match recognizer.detect_text(&image).await {
        Ok(detection) => Staged::Done(OrientedPage {
            page: RasterPage::new(index, image),
            decision,
            detection,
        }),
        Err(e) => {
            warn!("Page {}: re-detection after rotation failed: {}", index + 1, e);
            Staged::degraded(
                OrientedPage {
                    page: RasterPage::new(index, image),
                    decision,
                    detection: TextDetection::empty(),
                },
                Degradation::detection(STAGE, e.to_string()),
            )
        }
    }
}

fn unchanged(page: RasterPage, detection: TextDetection) -> OrientedPage {
    OrientedPage {
        page,
        decision: OrientationDecision::unchanged(),
        detection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{RecognitionError, TextBlock};
    use crate::geometry::Point;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn bucket_boundaries() {
        assert_eq!(Rotation::nearest(0.0), Rotation::Deg0);
        assert_eq!(Rotation::nearest(44.9), Rotation::Deg0);
        assert_eq!(Rotation::nearest(45.0), Rotation::Deg90);
        assert_eq!(Rotation::nearest(134.9), Rotation::Deg90);
        assert_eq!(Rotation::nearest(135.0), Rotation::Deg180);
        assert_eq!(Rotation::nearest(225.0), Rotation::Deg270);
        assert_eq!(Rotation::nearest(315.0), Rotation::Deg0);
        assert_eq!(Rotation::nearest(-10.0), Rotation::Deg0);
        assert_eq!(Rotation::nearest(-90.0), Rotation::Deg270);
    }

    #[test]
    fn inverse_undoes_rotation() {
        let img = DynamicImage::new_rgb8(3, 7);
        for r in Rotation::ALL {
            let back = r.inverse().apply(&r.apply(&img));
            assert_eq!((back.width(), back.height()), (3, 7));
        }
    }

    #[test]
    fn rotation_serializes_as_degrees() {
        assert_eq!(serde_json::to_string(&Rotation::Deg270).unwrap(), "270");
        let r: Rotation = serde_json::from_str("90").unwrap();
        assert_eq!(r, Rotation::Deg90);
        assert!(serde_json::from_str::<Rotation>("45").is_err());
    }

    #[test]
    fn vote_ties_prefer_upright() {
        let d = choose_by_vote([10, 10, 3, 10], 1);
        assert_eq!(d.rotation, Rotation::Deg0);
        let d = choose_by_vote([0, 12, 12, 0], 1);
        assert_eq!(d.rotation, Rotation::Deg90);
    }

    #[test]
    fn vote_margin_keeps_close_calls_upright() {
        assert_eq!(choose_by_vote([20, 22, 0, 0], 3).rotation, Rotation::Deg0);
        assert_eq!(choose_by_vote([20, 23, 0, 0], 3).rotation, Rotation::Deg90);
    }

    #[test]
    fn vote_without_text_is_no_evidence() {
        let d = choose_by_vote([0, 0, 0, 0], 1);
        assert_eq!(d, OrientationDecision::unchanged());
    }

    #[test]
    fn script_score_counts_letters_only() {
        let h = Heuristics::default();
        assert_eq!(script_score("AB 12 !?", &h), 2);
        assert_eq!(script_score("Иван שלום", &h), 8);
    }

    #[test]
    fn block_angle_from_first_edge() {
        let detection = TextDetection {
            text: "x".into(),
            blocks: vec![TextBlock {
                text: "x".into(),
                vertices: vec![Point::new(10.0, 10.0), Point::new(10.0, 50.0)],
            }],
        };
        let angle = first_block_angle(&detection).unwrap();
        assert!((angle - 90.0).abs() < 1e-3);
        assert!(first_block_angle(&TextDetection::empty()).is_none());
    }

    /// Reports an angled block on the first call, then upright text.
    struct AngledThenUpright {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextRecognizer for AngledThenUpright {
        async fn detect_text(&self, _page: &DynamicImage) -> Result<TextDetection, RecognitionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let vertices = if call == 0 {
                vec![Point::new(5.0, 5.0), Point::new(5.0, 40.0)]
            } else {
                vec![Point::new(5.0, 5.0), Point::new(40.0, 5.0)]
            };
            Ok(TextDetection {
                text: "Passport".into(),
                blocks: vec![TextBlock {
                    text: "Passport".into(),
                    vertices,
                }],
            })
        }
    }

    #[tokio::test]
    async fn text_angle_detects_exactly_twice_after_rotation() {
        let recognizer = AngledThenUpright {
            calls: AtomicUsize::new(0),
        };
        let config = PipelineConfig::builder()
            .orientation_strategy(OrientationStrategy::TextAngle)
            .build()
            .unwrap();
        let page = RasterPage::new(0, DynamicImage::new_rgb8(30, 60));
        let (oriented, reason) = correct_orientation(page, &recognizer, &config)
            .await
            .into_parts();
        assert!(reason.is_none());
        assert_eq!(oriented.decision.rotation, Rotation::Deg270);
        assert_eq!((oriented.page.image.width(), oriented.page.image.height()), (60, 30));
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first_block_angle(&oriented.detection), Some(0.0));
    }

    struct Broken;

    #[async_trait]
    impl TextRecognizer for Broken {
        async fn detect_text(&self, _page: &DynamicImage) -> Result<TextDetection, RecognitionError> {
            Err(RecognitionError::Request("offline".into()))
        }
    }

    #[tokio::test]
    async fn recognizer_failure_degrades_to_identity() {
        let page = RasterPage::new(0, DynamicImage::new_rgb8(10, 20));
        let staged = correct_orientation(page, &Broken, &PipelineConfig::default()).await;
        assert!(staged.is_degraded());
        let (oriented, _) = staged.into_parts();
        assert_eq!(oriented.decision.rotation, Rotation::Deg0);
        assert_eq!(oriented.page.image.width(), 10);
    }
}
