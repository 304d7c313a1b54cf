//! Content classification: document type and holder name for one page.
//!
//! Pages with enough recognised text are classified from the text alone,
//! which is cheaper and avoids vision-model hallucinations on dense print.
//! Photos, ID cards and other text-poor pages go to the vision model as a
//! JPEG. Either way the model answers with a small JSON object; anything
//! that cannot be turned into a result yields the sentinel classification.

use crate::collaborators::{ModelClient, ModelRequest};
use crate::config::{PipelineConfig, Taxonomy};
use crate::error::{Degradation, Staged};
use crate::naming::{FALLBACK_DOC_TYPE, UNKNOWN_PERSON};
use crate::pipeline::encode;
use crate::prompts::{classification_prompt, text_user_message, IMAGE_USER_MESSAGE};
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Longest edge of images sent to the vision model.
const MODEL_IMAGE_MAX_EDGE: u32 = 1600;

/// How a classification was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Text,
    Image,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub doc_type: String,
    pub person_name: String,
    pub source: ClassificationSource,
}

impl ClassificationResult {
    /// `{"doc_type": "Document", "person_name": "Unknown"}`
    pub fn sentinel() -> Self {
        Self {
            doc_type: FALLBACK_DOC_TYPE.to_string(),
            person_name: UNKNOWN_PERSON.to_string(),
            source: ClassificationSource::Fallback,
        }
    }
}

/// Classify a normalized page. Never fails: problems yield the sentinel,
/// marked as a `ClassificationUnavailable` degradation.
pub async fn classify(
    image: &DynamicImage,
    text: &str,
    model: &dyn ModelClient,
    config: &PipelineConfig,
) -> Staged<ClassificationResult> {
    let h = &config.heuristics;
    let system = classification_prompt(&config.taxonomy, config.system_prompt.as_deref());
    let trimmed = text.trim();

    let (request, source) = if trimmed.chars().count() > h.min_text_chars {
        let body: String = trimmed.chars().take(h.max_prompt_chars).collect();
        (
            ModelRequest::text(system, text_user_message(&body)),
            ClassificationSource::Text,
        )
    } else {
        let img = image.clone();
        let quality = h.jpeg_quality;
        let encoded = tokio::task::spawn_blocking(move || {
            let img = fit_for_model(img);
            encode::encode_for_model(&img, quality)
        })
        .await;
        match encoded {
            Ok(Ok(data)) => (
                ModelRequest::image(system, IMAGE_USER_MESSAGE, data),
                ClassificationSource::Image,
            ),
            Ok(Err(e)) => return unavailable(format!("image encoding failed: {e}")),
            Err(e) => return unavailable(format!("image encoding task failed: {e}")),
        }
    };

    debug!("Classifying via {:?}", source);
    let raw = match model.complete(request).await {
        Ok(raw) => raw,
        Err(e) => return unavailable(e.to_string()),
    };

    match parse_response(&raw, &config.taxonomy, source) {
        Some(result) => {
            debug!("Classified as {} / {:?}", result.doc_type, result.person_name);
            Staged::Done(result)
        }
        None => unavailable(format!("unparseable model output: {}", preview(&raw))),
    }
}

fn unavailable(detail: String) -> Staged<ClassificationResult> {
    warn!("Classification unavailable: {}", detail);
    Staged::degraded(
        ClassificationResult::sentinel(),
        Degradation::classification(detail),
    )
}

fn fit_for_model(img: DynamicImage) -> DynamicImage {
    if img.width().max(img.height()) > MODEL_IMAGE_MAX_EDGE {
        img.resize(MODEL_IMAGE_MAX_EDGE, MODEL_IMAGE_MAX_EDGE, FilterType::Triangle)
    } else {
        img
    }
}

fn preview(raw: &str) -> String {
    let p: String = raw.chars().take(80).collect();
    if raw.chars().count() > 80 {
        format!("{p}…")
    } else {
        p
    }
}

/// Turn raw model output into a result.
///
/// The first balanced `{...}` object is parsed as JSON. `person_name` may
/// also arrive as `full_name` or `name`. The label is mapped onto the
/// taxonomy, or to `Document` when it does not fit.
pub fn parse_response(
    raw: &str,
    taxonomy: &Taxonomy,
    source: ClassificationSource,
) -> Option<ClassificationResult> {
    let object = extract_json_object(raw)?;
    let value: Value = serde_json::from_str(object).ok()?;
    let map = value.as_object()?;

    let field = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|k| map.get(*k))
            .find_map(|v| v.as_str().map(|s| s.trim().to_string()))
    };

    let raw_type = field(&["doc_type", "document_type", "type"]);
    let person = field(&["person_name", "full_name", "name"]);
    if raw_type.is_none() && person.is_none() {
        return None;
    }

    let doc_type = raw_type
        .as_deref()
        .and_then(|t| taxonomy.resolve(t))
        .unwrap_or(FALLBACK_DOC_TYPE)
        .to_string();

    Some(ClassificationResult {
        doc_type,
        person_name: person.unwrap_or_default(),
        source,
    })
}

/// First balanced brace-delimited substring, ignoring braces inside JSON strings.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ModelError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn extracts_object_from_chatter() {
        let raw = "Sure! ```json\n{\"doc_type\": \"Passport\", \"person_name\": \"A {B}\"}\n``` done {x}";
        assert_eq!(
            extract_json_object(raw),
            Some("{\"doc_type\": \"Passport\", \"person_name\": \"A {B}\"}")
        );
    }

    #[test]
    fn escaped_quotes_stay_inside_strings() {
        let raw = r#"{"person_name": "O\"Neil }", "doc_type": "Other"}"#;
        assert_eq!(extract_json_object(raw), Some(raw));
    }

    #[test]
    fn unbalanced_is_none() {
        assert_eq!(extract_json_object("{\"doc_type\": \"Passport\""), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn aliases_and_label_matching() {
        let t = Taxonomy::default();
        let r = parse_response(
            r#"{"doc_type": "bank statement", "full_name": " Ivan Petrov "}"#,
            &t,
            ClassificationSource::Text,
        )
        .unwrap();
        assert_eq!(r.doc_type, "Bank_Statement");
        assert_eq!(r.person_name, "Ivan Petrov");

        let r = parse_response(r#"{"doc_type": "Ticket", "name": "Bo"}"#, &t, ClassificationSource::Image)
            .unwrap();
        assert_eq!(r.doc_type, "Other");
    }

    #[test]
    fn unknown_label_without_other_is_document() {
        let t = Taxonomy::new(["Invoice"]);
        let r = parse_response(r#"{"doc_type": "Ticket", "person_name": ""}"#, &t, ClassificationSource::Text)
            .unwrap();
        assert_eq!(r.doc_type, "Document");
        assert_eq!(r.person_name, "");
    }

    #[test]
    fn object_without_fields_is_rejected() {
        let t = Taxonomy::default();
        assert!(parse_response(r#"{"rotation": 90}"#, &t, ClassificationSource::Text).is_none());
        assert!(parse_response("[1, 2]", &t, ClassificationSource::Text).is_none());
    }

    struct Scripted {
        reply: Result<String, ()>,
        seen: Mutex<Vec<ModelRequest>>,
    }

    #[async_trait]
    impl ModelClient for Scripted {
        async fn complete(&self, request: ModelRequest) -> Result<String, ModelError> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone().map_err(|_| ModelError::Exhausted {
                attempts: 3,
                detail: "HTTP 503".into(),
            })
        }
    }

    fn scripted(reply: Result<&str, ()>) -> Scripted {
        Scripted {
            reply: reply.map(str::to_string),
            seen: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn long_text_goes_to_text_model_truncated() {
        let model = scripted(Ok(r#"{"doc_type":"Utility_Bill","person_name":"Dana Cohen"}"#));
        let config = PipelineConfig::default();
        let text = "Electricity bill ".repeat(400);
        let staged = classify(&DynamicImage::new_rgb8(8, 8), &text, &model, &config).await;
        let (result, reason) = staged.into_parts();
        assert!(reason.is_none());
        assert_eq!(result.source, ClassificationSource::Text);
        assert_eq!(result.doc_type, "Utility_Bill");

        let seen = model.seen.lock().unwrap();
        assert!(!seen[0].has_image());
        assert!(seen[0].text.chars().count() < 3000 + 200);
    }

    #[tokio::test]
    async fn short_text_goes_to_vision_model() {
        let model = scripted(Ok(r#"{"doc_type":"Joint_Photos","person_name":""}"#));
        let staged = classify(&DynamicImage::new_rgb8(8, 8), "hi", &model, &PipelineConfig::default()).await;
        assert_eq!(staged.value().source, ClassificationSource::Image);
        assert!(model.seen.lock().unwrap()[0].has_image());
    }

    #[tokio::test]
    async fn model_failure_yields_sentinel() {
        let model = scripted(Err(()));
        let staged = classify(&DynamicImage::new_rgb8(8, 8), "", &model, &PipelineConfig::default()).await;
        assert!(staged.is_degraded());
        assert_eq!(staged.value(), &ClassificationResult::sentinel());
    }

    #[tokio::test]
    async fn malformed_output_yields_sentinel() {
        let model = scripted(Ok("I think this is a passport."));
        let staged = classify(&DynamicImage::new_rgb8(8, 8), "", &model, &PipelineConfig::default()).await;
        let (result, reason) = staged.into_parts();
        assert_eq!(result.doc_type, "Document");
        assert_eq!(result.person_name, "Unknown");
        assert!(matches!(reason, Some(Degradation::ClassificationUnavailable { .. })));
    }
}
