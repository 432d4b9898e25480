//! Receipt number issuance.
//!
//! A number is claimed atomically in a registry; the registry refuses a number
//! that is already taken. Two generators racing on the same day therefore never
//! hand out the same number: the loser retries with the next sequence.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing::debug;

use stockflow_core::DomainError;
use stockflow_purchasing::ReceiptNumber;

/// Durable set of issued receipt numbers.
pub trait ReceiptNumberRegistry: Send + Sync {
    /// Claim `number`; `Ok(false)` when it is already taken.
    fn claim(&self, number: &ReceiptNumber) -> Result<bool, DomainError>;

    /// Highest sequence issued for `prefix` on `date` (0 when none).
    fn last_sequence(&self, prefix: &str, date: NaiveDate) -> u32;
}

impl<R> ReceiptNumberRegistry for Arc<R>
where
    R: ReceiptNumberRegistry + ?Sized,
{
    fn claim(&self, number: &ReceiptNumber) -> Result<bool, DomainError> {
        (**self).claim(number)
    }

    fn last_sequence(&self, prefix: &str, date: NaiveDate) -> u32 {
        (**self).last_sequence(prefix, date)
    }
}

#[derive(Debug, Default)]
struct Issued {
    numbers: HashSet<ReceiptNumber>,
    last: BTreeMap<(String, NaiveDate), u32>,
}

#[derive(Debug, Default)]
pub struct InMemoryReceiptNumberRegistry {
    inner: Mutex<Issued>,
}

impl InMemoryReceiptNumberRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptNumberRegistry for InMemoryReceiptNumberRegistry {
    fn claim(&self, number: &ReceiptNumber) -> Result<bool, DomainError> {
        let mut issued = self
            .inner
            .lock()
            .map_err(|_| DomainError::invariant("receipt number registry poisoned"))?;
        if !issued.numbers.insert(number.clone()) {
            return Ok(false);
        }
        let last = issued
            .last
            .entry((number.prefix().to_string(), number.date()))
            .or_insert(0);
        *last = (*last).max(number.sequence());
        Ok(true)
    }

    fn last_sequence(&self, prefix: &str, date: NaiveDate) -> u32 {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.last.get(&(prefix.to_string(), date)).copied())
            .unwrap_or(0)
    }
}

/// Issues `<prefix>-<YYYYMMDD>-<NNNN>` numbers.
#[derive(Debug)]
pub struct ReceiptNumberGenerator<R> {
    registry: R,
    prefix: String,
    max_attempts: u32,
}

impl<R> ReceiptNumberGenerator<R>
where
    R: ReceiptNumberRegistry,
{
    pub fn new(registry: R, prefix: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            registry,
            prefix: prefix.into().trim().to_ascii_uppercase(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Claim the next free number for `date`.
    ///
    /// Surfaces `DuplicateReceiptNumber` only when every attempt collided.
    pub fn next(&self, date: NaiveDate) -> Result<ReceiptNumber, DomainError> {
        let mut candidate = ReceiptNumber::new(
            self.prefix.as_str(),
            date,
            self.registry.last_sequence(&self.prefix, date) + 1,
        )?;

        for attempt in 1..=self.max_attempts {
            if self.registry.claim(&candidate)? {
                return Ok(candidate);
            }
            debug!(number = %candidate, attempt, "receipt number taken; trying next");
            let after = self.registry.last_sequence(&self.prefix, date);
            candidate = if after >= candidate.sequence() {
                ReceiptNumber::new(self.prefix.as_str(), date, after + 1)?
            } else {
                candidate.next()
            };
        }

        Err(DomainError::duplicate_receipt_number(candidate.to_string()))
    }
}
