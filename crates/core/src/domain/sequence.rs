use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_PERIOD_KEY_LEN: usize = 32;

/// Grouping key a counter runs under, typically the two-digit year.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, SequenceError> {
        let value = raw.as_ref().trim();
        let well_formed = !value.is_empty()
            && value.len() <= MAX_PERIOD_KEY_LEN
            && value.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !well_formed {
            return Err(SequenceError::InvalidPeriodKey(raw.as_ref().to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// `2025-03-14` becomes `"25"`.
    pub fn for_year(at: DateTime<Utc>) -> Self {
        Self(format!("{:02}", at.year().rem_euclid(100)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCounter {
    pub period_key: PeriodKey,
    pub last_value: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("invalid period key `{0}`: expected 1-32 ascii letters, digits, `-` or `_`")]
    InvalidPeriodKey(String),
    #[error("invalid code prefix `{0}`: expected ascii letters or digits")]
    InvalidPrefix(String),
}

/// Renders `PREFIX-PERIOD-NNNN`, zero-padding the value to `width` digits.
pub fn format_code(
    prefix: &str,
    period_key: &PeriodKey,
    value: u64,
    width: usize,
) -> Result<String, SequenceError> {
    let prefix = prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(SequenceError::InvalidPrefix(prefix.to_string()));
    }

    Ok(format!("{}-{}-{:0width$}", prefix.to_ascii_uppercase(), period_key, value, width = width))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{format_code, PeriodKey, SequenceError};

    #[test]
    fn period_key_for_year_uses_two_digits() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).single().expect("valid date");
        assert_eq!(PeriodKey::for_year(at).as_str(), "25");

        let early = Utc.with_ymd_and_hms(2007, 1, 1, 0, 0, 0).single().expect("valid date");
        assert_eq!(PeriodKey::for_year(early).as_str(), "07");
    }

    #[test]
    fn period_key_rejects_blank_and_odd_characters() {
        assert!(PeriodKey::new(" 25 ").is_ok());
        assert_eq!(PeriodKey::new(""), Err(SequenceError::InvalidPeriodKey(String::new())));
        assert!(PeriodKey::new("25/26").is_err());
    }

    #[test]
    fn codes_are_zero_padded() {
        let period = PeriodKey::new("25").expect("period");
        assert_eq!(format_code("qt", &period, 7, 4).expect("code"), "QT-25-0007");
        assert_eq!(format_code("PO", &period, 12345, 4).expect("code"), "PO-25-12345");
        assert!(format_code("Q T", &period, 1, 4).is_err());
    }
}
