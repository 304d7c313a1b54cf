//! Prompts for document classification.
//!
//! Every prompt lives here so wording changes touch one file and tests can
//! inspect the exact text without calling a model. Callers can replace the
//! instructions via [`crate::config::PipelineConfig::system_prompt`]; the
//! taxonomy list and the response format are always appended so the parser
//! keeps working.

use crate::config::Taxonomy;

/// Default instructions for classifying a document page.
pub const DEFAULT_CLASSIFICATION_PROMPT: &str = r#"You are a paralegal filing documents submitted for an immigration or residence application.

Your task is to identify ONE page of a document and the person it belongs to.

1. DOCUMENT TYPE
   - Choose exactly one label from the list below
   - Use "Other" only when no label fits
   - Judge by content (titles, stamps, form numbers), not by file names

2. HOLDER NAME
   - Extract the first and last name of the person the document is about
   - Transliterate to Latin script (e.g. "Иван Петров" -> "Ivan Petrov")
   - Use an empty string when no person is named"#;

/// Response contract appended to every classification prompt.
pub const RESPONSE_FORMAT: &str = r#"Return ONLY a JSON object, without markdown fences or commentary:
{"doc_type": "<one label>", "person_name": "<First Last>"}"#;

/// User turn for image classification; the page image is attached.
pub const IMAGE_USER_MESSAGE: &str = "Classify the attached document page.";

/// Build the full system prompt for `taxonomy`.
pub fn classification_prompt(taxonomy: &Taxonomy, custom: Option<&str>) -> String {
    let instructions = custom.unwrap_or(DEFAULT_CLASSIFICATION_PROMPT);
    let labels = taxonomy
        .labels()
        .iter()
        .map(|l| format!("   - {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{instructions}\n\nLABELS\n{labels}\n\n{RESPONSE_FORMAT}")
}

/// User turn carrying recognised page text.
pub fn text_user_message(text: &str) -> String {
    format!(
        "Classify the document page whose recognised text follows.\n\n\"\"\"\n{}\n\"\"\"",
        text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_label() {
        let taxonomy = Taxonomy::default();
        let prompt = classification_prompt(&taxonomy, None);
        for label in taxonomy.labels() {
            assert!(prompt.contains(label.as_str()), "missing {label}");
        }
        assert!(prompt.contains("person_name"));
    }

    #[test]
    fn custom_instructions_keep_contract() {
        let taxonomy = Taxonomy::new(["Invoice"]);
        let prompt = classification_prompt(&taxonomy, Some("Be brief."));
        assert!(prompt.starts_with("Be brief."));
        assert!(prompt.contains("- Invoice"));
        assert!(prompt.contains(RESPONSE_FORMAT));
    }

    #[test]
    fn text_message_quotes_text() {
        let msg = text_user_message("PASSPORT No 123");
        assert!(msg.contains("\"\"\"\nPASSPORT No 123\n\"\"\""));
    }
}
