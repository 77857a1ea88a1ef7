use strsim::jaro_winkler;
use unicode_normalization::UnicodeNormalization;

/// Minimum similarity (Jaro-Winkler) at which two distinct store keys are
/// reported as a possible duplicate. Identity is never merged on this score.
pub const NEAR_DUPLICATE_SIMILARITY: f64 = 0.95;

/// Human-readable form of a scraped entity name.
///
/// Applies NFKC, collapses every run of whitespace to a single space and
/// trims both ends. Case and punctuation are preserved.
pub fn display_form(raw: &str) -> String {
    let folded: String = raw.nfkc().collect();
    let mut out = String::with_capacity(folded.len());
    for word in folded.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Comparison key for a scraped entity name: the display form, lower-cased.
///
/// Only used for lookups and equality; never persisted or shown.
pub fn normalize(raw: &str) -> String {
    display_form(raw).to_lowercase()
}

/// Canonical identity key for a store, kept alongside the display form it
/// was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameKey {
    key: String,
    display: String,
}

impl NameKey {
    pub fn new(raw: &str) -> Self {
        let display = display_form(raw);
        let key = display.to_lowercase();
        Self { key, display }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Jaro-Winkler similarity between two keys.
    pub fn similarity(&self, other: &str) -> f64 {
        jaro_winkler(&self.key, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_preserves_case() {
        assert_eq!(display_form("  Acme \t  Café\n"), "Acme Café");
        assert_eq!(display_form(""), "");
        assert_eq!(display_form("   "), "");
    }

    #[test]
    fn folds_compatibility_forms() {
        // full-width letters and a decomposed e + combining acute
        assert_eq!(display_form("ＡＣＭＥ"), "ACME");
        assert_eq!(normalize("Acme Cafe\u{301}"), normalize("acme   café"));
        // non-breaking space counts as whitespace after folding
        assert_eq!(normalize("Acme\u{a0}Café"), "acme café");
    }

    #[test]
    fn normalize_is_idempotent_and_consistent_with_display_form() {
        for raw in ["  Acme   Café ", "ＡＣＭＥ", "קסטרו  ", "H&M", "McDonald's"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
            assert_eq!(normalize(&display_form(raw)), once);
        }
    }

    #[test]
    fn hebrew_names_keep_their_script() {
        assert_eq!(display_form(" רולדין   בייקרי "), "רולדין בייקרי");
        assert_eq!(normalize("רולדין בייקרי"), "רולדין בייקרי");
    }

    #[test]
    fn name_key_similarity_flags_near_duplicates() {
        let a = NameKey::new("Roladin Bakery");
        assert_eq!(a.key(), "roladin bakery");
        assert_eq!(a.display(), "Roladin Bakery");
        assert!(a.similarity("roladin bakery.") >= NEAR_DUPLICATE_SIMILARITY);
        assert!(a.similarity("golda") < NEAR_DUPLICATE_SIMILARITY);
    }
}
