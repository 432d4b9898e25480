use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

/// Human-facing receipt number: `<prefix>-<YYYYMMDD>-<NNNN>`.
///
/// Uniqueness is not a property of the value; the issuing registry guarantees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReceiptNumber {
    prefix: String,
    date: NaiveDate,
    sequence: u32,
}

impl ReceiptNumber {
    pub fn new(
        prefix: impl Into<String>,
        date: NaiveDate,
        sequence: u32,
    ) -> Result<Self, DomainError> {
        let prefix = prefix.into().trim().to_ascii_uppercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::validation(format!(
                "receipt number prefix must be alphanumeric (got '{prefix}')"
            )));
        }
        if sequence == 0 {
            return Err(DomainError::validation("receipt number sequence starts at 1"));
        }
        Ok(Self {
            prefix,
            date,
            sequence,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The number issued after this one on the same day.
    pub fn next(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            date: self.date,
            sequence: self.sequence + 1,
        }
    }
}

impl core::fmt::Display for ReceiptNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}-{}-{:04}",
            self.prefix,
            self.date.format("%Y%m%d"),
            self.sequence
        )
    }
}

impl core::str::FromStr for ReceiptNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("malformed receipt number: {s}"));

        let mut parts = s.trim().rsplitn(3, '-');
        let (Some(seq), Some(date), Some(prefix)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| invalid())?;
        let sequence = seq.parse::<u32>().map_err(|_| invalid())?;
        Self::new(prefix, date, sequence)
    }
}

impl TryFrom<String> for ReceiptNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReceiptNumber> for String {
    fn from(value: ReceiptNumber) -> Self {
        value.to_string()
    }
}
