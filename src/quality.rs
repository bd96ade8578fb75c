// ✅ Field Quality Checks - adapter-stage validation
//
// Every raw field that feeds a canonical record goes through one of these.
// A failure is a RecordError::DataQuality: the row is quarantined with the
// offending field and value, never coerced to a default.

use chrono::{Datelike, NaiveDate};

use crate::error::RecordError;

/// Date layouts seen across filing eras: SEC "31-JAN-2006", ISO, US slashes
const DATE_FORMATS: [&str; 4] = ["%d-%b-%Y", "%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

/// Plausible trade years; anything else is a keying error
const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

pub fn parse_trade_date(field: &str, raw: &str) -> Result<NaiveDate, RecordError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RecordError::data_quality(field, raw, "missing date"));
    }

    // Some releases append a time component: "2006-01-31 00:00:00"
    let date_part = trimmed.split_whitespace().next().unwrap_or(trimmed);

    let parsed = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .ok_or_else(|| RecordError::data_quality(field, raw, "unrecognized date format"))?;

    if parsed.year() < MIN_YEAR || parsed.year() > MAX_YEAR {
        return Err(RecordError::data_quality(field, raw, "date out of range"));
    }
    Ok(parsed)
}

fn parse_number(field: &str, raw: &str) -> Result<f64, RecordError> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',' && *c != '$').collect();
    let value: f64 = cleaned
        .parse()
        .map_err(|_| RecordError::data_quality(field, raw, "not a number"))?;
    if !value.is_finite() {
        return Err(RecordError::data_quality(field, raw, "not a finite number"));
    }
    Ok(value)
}

/// Share counts: required, non-negative
pub fn parse_quantity(field: &str, raw: &str) -> Result<f64, RecordError> {
    if raw.trim().is_empty() {
        return Err(RecordError::data_quality(field, raw, "missing quantity"));
    }
    let value = parse_number(field, raw)?;
    if value < 0.0 {
        return Err(RecordError::data_quality(field, raw, "negative quantity"));
    }
    Ok(value)
}

/// Prices: absent is fine (gifts, grants), malformed or negative is not
pub fn parse_optional_price(field: &str, raw: &str) -> Result<Option<f64>, RecordError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let value = parse_number(field, raw)?;
    if value < 0.0 {
        return Err(RecordError::data_quality(field, raw, "negative price"));
    }
    Ok(Some(value))
}

/// Boolean role columns: "1"/"0", "true"/"false", "Y"/"N", "X", blank
pub fn parse_flag(field: &str, raw: &str) -> Result<bool, RecordError> {
    match raw.trim().to_uppercase().as_str() {
        "" | "0" | "FALSE" | "N" | "NO" => Ok(false),
        "1" | "TRUE" | "Y" | "YES" | "X" => Ok(true),
        _ => Err(RecordError::data_quality(field, raw, "not a boolean flag")),
    }
}

/// Required free text (names)
pub fn require_text(field: &str, raw: &str) -> Result<String, RecordError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RecordError::data_quality(field, raw, "missing value"));
    }
    Ok(trimmed.to_string())
}

/// Optional free text: blank becomes None
pub fn optional_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Form 4 transaction codes are one letter (occasionally with a footnote digit)
pub fn parse_transaction_code(field: &str, raw: &str) -> Result<String, RecordError> {
    let upper = raw.trim().to_uppercase();
    let mut chars = upper.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() && chars.all(|d| d.is_ascii_digit()) => Ok(c.to_string()),
        _ => Err(RecordError::data_quality(field, raw, "invalid transaction code")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2006, 1, 31).unwrap();
        assert_eq!(parse_trade_date("d", "31-JAN-2006").unwrap(), expected);
        assert_eq!(parse_trade_date("d", "2006-01-31").unwrap(), expected);
        assert_eq!(parse_trade_date("d", "01/31/2006").unwrap(), expected);
        assert_eq!(parse_trade_date("d", "2006-01-31 00:00:00").unwrap(), expected);
    }

    #[test]
    fn test_trade_date_failures_are_quarantinable() {
        let err = parse_trade_date("TRANS_DATE", "31-FOO-2006").unwrap_err();
        assert_eq!(err.reason_code(), "DATA_QUALITY");
        assert!(parse_trade_date("TRANS_DATE", "").is_err());
        assert!(parse_trade_date("TRANS_DATE", "0206-01-01").is_err());
    }

    #[test]
    fn test_quantity() {
        assert_eq!(parse_quantity("s", "1,000").unwrap(), 1000.0);
        assert_eq!(parse_quantity("s", "0").unwrap(), 0.0);
        assert!(parse_quantity("s", "").is_err());
        assert!(parse_quantity("s", "-5").is_err());
        assert!(parse_quantity("s", "lots").is_err());
        assert!(parse_quantity("s", "NaN").is_err());
    }

    #[test]
    fn test_optional_price() {
        assert_eq!(parse_optional_price("p", "").unwrap(), None);
        assert_eq!(parse_optional_price("p", "$12.50").unwrap(), Some(12.5));
        assert!(parse_optional_price("p", "twelve").is_err());
    }

    #[test]
    fn test_flags() {
        assert!(parse_flag("f", "1").unwrap());
        assert!(parse_flag("f", "true").unwrap());
        assert!(!parse_flag("f", "").unwrap());
        assert!(parse_flag("f", "maybe").is_err());
    }

    #[test]
    fn test_transaction_code() {
        assert_eq!(parse_transaction_code("c", " p ").unwrap(), "P");
        assert_eq!(parse_transaction_code("c", "S1").unwrap(), "S");
        assert!(parse_transaction_code("c", "").is_err());
        assert!(parse_transaction_code("c", "12").is_err());
    }
}
