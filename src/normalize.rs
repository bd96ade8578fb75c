// 🧹 Name & Identifier Normalization
//
// Problem solved:
// - "ACME CORP", "Acme Corporation", "Acme Corp." → "acme"
// - "SMITH JOHN A JR" and "John Smith" → "john smith"
// - "123", " 0000000123 " → "0000000123"
// - "NA", "none", "" tickers → absent

use crate::config::NormalizationConfig;
use crate::error::RecordError;
use crate::records::EntityKind;

/// Width CIK-style numeric identifiers are padded to
pub const LOCAL_ID_WIDTH: usize = 10;

const TICKER_PLACEHOLDERS: [&str; 6] = ["", "NA", "NONE", "N/A", "NAN", "NULL"];
const MAX_TICKER_LEN: usize = 6;

// ============================================================================
// NAME NORMALIZER
// ============================================================================

/// NameNormalizer - turns display names into blocking/scoring keys
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    corporate_suffixes: Vec<String>,
    person_suffixes: Vec<String>,
}

impl NameNormalizer {
    pub fn new(config: &NormalizationConfig) -> Self {
        NameNormalizer {
            corporate_suffixes: config.corporate_suffixes.iter().map(|s| s.trim().to_lowercase()).collect(),
            person_suffixes: config.person_suffixes.iter().map(|s| s.trim().to_lowercase()).collect(),
        }
    }

    pub fn normalize(&self, kind: EntityKind, name: &str) -> String {
        match kind {
            EntityKind::Company => self.normalize_company(name),
            EntityKind::Insider => self.normalize_person(name),
        }
    }

    /// Case-fold, strip punctuation, drop trailing corporate designators
    ///
    /// Designators are only stripped from the end and the first token is
    /// always kept, so "Co Inc" stays "co".
    pub fn normalize_company(&self, name: &str) -> String {
        let mut tokens = tokenize(name);

        while tokens.len() > 1 {
            let last = tokens.last().map(String::as_str).unwrap_or("");
            if self.corporate_suffixes.iter().any(|s| s == last) {
                tokens.pop();
            } else {
                break;
            }
        }

        tokens.join(" ")
    }

    /// Filer names are "LAST FIRST MIDDLE"; order-independent key
    ///
    /// Drops generational suffixes and single-letter initials, then sorts.
    pub fn normalize_person(&self, name: &str) -> String {
        let tokens = tokenize(name);

        let mut kept: Vec<String> = tokens
            .iter()
            .filter(|t| t.chars().count() > 1)
            .filter(|t| !self.person_suffixes.iter().any(|s| s == *t))
            .cloned()
            .collect();

        // "J" alone, or only initials: keep what we have rather than nothing
        if kept.is_empty() {
            kept = tokens;
        }

        kept.sort();
        kept.join(" ")
    }
}

impl Default for NameNormalizer {
    fn default() -> Self {
        NameNormalizer::new(&NormalizationConfig::default())
    }
}

fn tokenize(name: &str) -> Vec<String> {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    cleaned.split_whitespace().map(|s| s.to_string()).collect()
}

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Trim, upper-case, and zero-pad numeric ids to 10 digits
pub fn normalize_local_id(raw: &str) -> Result<String, RecordError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RecordError::data_quality("local_id", raw, "empty identifier"));
    }

    // "123.0" shows up when a spreadsheet touched the extract
    let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        if trimmed.len() >= LOCAL_ID_WIDTH {
            return Ok(trimmed.to_string());
        }
        return Ok(format!("{:0>width$}", trimmed, width = LOCAL_ID_WIDTH));
    }

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(RecordError::data_quality("local_id", raw, "control characters in identifier"));
    }

    Ok(trimmed.to_uppercase())
}

/// Identifier with leading zeros removed ("0000000123" → "123")
pub fn strip_padding(id: &str) -> &str {
    let stripped = id.trim().trim_start_matches('0');
    if stripped.is_empty() && !id.trim().is_empty() {
        "0"
    } else {
        stripped
    }
}

/// Upper-cased ticker, or None for placeholders and malformed values
pub fn clean_ticker(raw: &str) -> Option<String> {
    let upper = raw.trim().to_uppercase();
    if TICKER_PLACEHOLDERS.contains(&upper.as_str()) {
        return None;
    }
    if upper.len() > MAX_TICKER_LEN {
        return None;
    }
    if !upper.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        return None;
    }
    Some(upper)
}

/// Normalized edit-distance similarity in [0, 1]; empty names never match
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_suffixes_stripped() {
        let n = NameNormalizer::default();
        assert_eq!(n.normalize_company("Acme Corp"), "acme");
        assert_eq!(n.normalize_company("ACME CORPORATION"), "acme");
        assert_eq!(n.normalize_company("Acme Corp."), "acme");
        assert_eq!(n.normalize_company("Acme Holdings Co., Inc."), "acme holdings");
        assert_eq!(n.normalize_company("Co Inc"), "co");
    }

    #[test]
    fn test_suffix_only_stripped_at_end() {
        let n = NameNormalizer::default();
        assert_eq!(n.normalize_company("Inc Research Group"), "inc research group");
    }

    #[test]
    fn test_person_names_order_independent() {
        let n = NameNormalizer::default();
        assert_eq!(n.normalize_person("SMITH JOHN A JR"), "john smith");
        assert_eq!(n.normalize_person("John Smith"), "john smith");
        assert_eq!(n.normalize_person("Smith, John"), "john smith");
        assert_eq!(n.normalize_person("J"), "j");
    }

    #[test]
    fn test_custom_suffix_dictionary() {
        let config = NormalizationConfig {
            corporate_suffixes: vec!["holdings".into()],
            person_suffixes: vec![],
        };
        let n = NameNormalizer::new(&config);
        assert_eq!(n.normalize_company("Acme Holdings"), "acme");
        assert_eq!(n.normalize_company("Acme Inc"), "acme inc");
    }

    #[test]
    fn test_normalize_local_id() {
        assert_eq!(normalize_local_id("123").unwrap(), "0000000123");
        assert_eq!(normalize_local_id(" 0000000123 ").unwrap(), "0000000123");
        assert_eq!(normalize_local_id("123.0").unwrap(), "0000000123");
        assert_eq!(normalize_local_id("12345678901").unwrap(), "12345678901");
        assert_eq!(normalize_local_id("abc-1").unwrap(), "ABC-1");
        assert!(normalize_local_id("   ").is_err());
    }

    #[test]
    fn test_strip_padding() {
        assert_eq!(strip_padding("0000000123"), "123");
        assert_eq!(strip_padding("0000"), "0");
        assert_eq!(strip_padding("ABC"), "ABC");
    }

    #[test]
    fn test_clean_ticker() {
        assert_eq!(clean_ticker(" acm "), Some("ACM".to_string()));
        assert_eq!(clean_ticker("BRK.B"), Some("BRK.B".to_string()));
        assert_eq!(clean_ticker("NA"), None);
        assert_eq!(clean_ticker("none"), None);
        assert_eq!(clean_ticker("n/a"), None);
        assert_eq!(clean_ticker(""), None);
        assert_eq!(clean_ticker("TOOLONGX"), None);
        assert_eq!(clean_ticker("A B"), None);
    }

    #[test]
    fn test_name_similarity() {
        assert_eq!(name_similarity("acme", "acme"), 1.0);
        assert_eq!(name_similarity("", ""), 0.0);
        assert!(name_similarity("acme", "acne") > 0.7);
        assert!(name_similarity("acme", "globex") < 0.3);
    }
}
