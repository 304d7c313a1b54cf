//! Text normalisation for names that end up in remote paths.
//!
//! Document-type labels and holder names come straight from model output, so
//! both are reduced to a conservative character set before they are used as
//! folder or file names.

use once_cell::sync::Lazy;
use regex::Regex;

/// Token used for the person folder when no usable name was extracted.
pub const FALLBACK_PERSON: &str = "Client";

/// Person name of the sentinel classification.
pub const UNKNOWN_PERSON: &str = "Unknown";

/// Document type of the sentinel classification.
pub const FALLBACK_DOC_TYPE: &str = "Document";

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-]+").unwrap());
static REPEATED_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());
static REPEATED_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

/// Normalise a document-type label: whitespace and hyphen runs become single
/// underscores, anything outside `[A-Za-z0-9_]` is dropped.
///
/// `"bank statement"` → `"bank_statement"`, `" Utility-Bill "` → `"Utility_Bill"`.
pub fn normalize_label(raw: &str) -> String {
    let joined = SEPARATORS.replace_all(raw.trim(), "_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    REPEATED_UNDERSCORES
        .replace_all(&kept, "_")
        .trim_matches('_')
        .to_string()
}

/// Reduce a holder name to alphanumerics, space, underscore and hyphen.
///
/// Returns [`FALLBACK_PERSON`] when nothing survives.
pub fn sanitize_name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let collapsed = REPEATED_SPACES.replace_all(kept.trim(), " ");
    if collapsed.is_empty() {
        FALLBACK_PERSON.to_string()
    } else {
        collapsed.into_owned()
    }
}

/// Reduce one remote path segment to alphanumerics, `.`, `_` and `-`.
/// Other characters become `_`; leading and trailing dots are dropped.
pub fn sanitize_segment(raw: &str, fallback: &str) -> String {
    let kept: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let kept = kept.trim_matches('.');
    if kept.is_empty() {
        fallback.to_string()
    } else {
        kept.to_string()
    }
}

/// Make a submitted file name safe to embed in a remote path segment.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    sanitize_segment(base, "original")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_joined_with_underscores() {
        assert_eq!(normalize_label("Bank Statement"), "Bank_Statement");
        assert_eq!(normalize_label("  utility-bill  "), "utility_bill");
        assert_eq!(normalize_label("Power of  Attorney"), "Power_of_Attorney");
        assert_eq!(normalize_label("ID_Document!"), "ID_Document");
        assert_eq!(normalize_label("__"), "");
    }

    #[test]
    fn names_keep_letters_digits_and_separators() {
        assert_eq!(sanitize_name("Ivan Petrov"), "Ivan Petrov");
        assert_eq!(sanitize_name("  O'Brien, Mary-Jane "), "OBrien Mary-Jane");
        assert_eq!(sanitize_name("Anna   Smith_2"), "Anna Smith_2");
    }

    #[test]
    fn empty_name_falls_back() {
        assert_eq!(sanitize_name(""), FALLBACK_PERSON);
        assert_eq!(sanitize_name("../.."), FALLBACK_PERSON);
        assert_eq!(sanitize_name("   "), FALLBACK_PERSON);
    }

    #[test]
    fn file_names_lose_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("scan 01.jpg"), "scan_01.jpg");
        assert_eq!(sanitize_file_name(".."), "original");
    }

    #[test]
    fn segments_replace_separators() {
        assert_eq!(sanitize_segment("+972 50-123", "x"), "_972_50-123");
        assert_eq!(sanitize_segment(" ", "x"), "x");
    }
}
