use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{DomainError, DomainResult, Entity, ProductId, SupplierId};

/// Stock batch identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Total vs. unallocated quantity of a batch.
///
/// Invariant: `0 <= available <= quantity`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantities {
    pub quantity: i64,
    pub available: i64,
}

impl Quantities {
    pub fn allocated(&self) -> i64 {
        self.quantity - self.available
    }

    fn checked(self) -> DomainResult<Self> {
        if self.quantity < 0 || self.available < 0 || self.available > self.quantity {
            return Err(DomainError::invariant(format!(
                "batch quantities out of range (quantity: {}, available: {})",
                self.quantity, self.available
            )));
        }
        Ok(self)
    }
}

/// Parameters for a batch about to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub cost_price: Decimal,
    pub lot_code: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub received_at: DateTime<Utc>,
}

/// A physically distinguishable lot of one product.
///
/// `quantity` is what was received (changed only by explicit adjustment);
/// `available` is the unallocated part of it. `cost_price` never changes after
/// creation, so every unit issued from this batch is costed the same.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatch {
    id: BatchId,
    product_id: ProductId,
    /// Creation order within the product (tie-breaker for equal receive times).
    sequence: u64,
    lot_code: Option<String>,
    supplier_id: Option<SupplierId>,
    quantity: i64,
    available_quantity: i64,
    cost_price: Decimal,
    manufacture_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    received_at: DateTime<Utc>,
    is_active: bool,
}

impl StockBatch {
    /// Validate and build a new, fully available batch.
    pub fn create(new: NewBatch, sequence: u64) -> DomainResult<Self> {
        if new.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "batch quantity must be positive (got {})",
                new.quantity
            )));
        }
        if new.cost_price.is_sign_negative() {
            return Err(DomainError::validation("cost price cannot be negative"));
        }
        if let (Some(made), Some(expires)) = (new.manufacture_date, new.expiry_date) {
            if expires < made {
                return Err(DomainError::validation(
                    "expiry date cannot precede manufacture date",
                ));
            }
        }
        let lot_code = new
            .lot_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(Self {
            id: new.batch_id,
            product_id: new.product_id,
            sequence,
            lot_code,
            supplier_id: new.supplier_id,
            quantity: new.quantity,
            available_quantity: new.quantity,
            cost_price: new.cost_price,
            manufacture_date: new.manufacture_date,
            expiry_date: new.expiry_date,
            received_at: new.received_at,
            is_active: true,
        })
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn lot_code(&self) -> Option<&str> {
        self.lot_code.as_deref()
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn available_quantity(&self) -> i64 {
        self.available_quantity
    }

    pub fn quantities(&self) -> Quantities {
        Quantities {
            quantity: self.quantity,
            available: self.available_quantity,
        }
    }

    pub fn cost_price(&self) -> Decimal {
        self.cost_price
    }

    pub fn manufacture_date(&self) -> Option<NaiveDate> {
        self.manufacture_date
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Expired once the expiry date lies strictly before `as_of`.
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|d| d < as_of)
    }

    /// Not yet expired, but expiring no later than `as_of + days`.
    pub fn expires_within(&self, as_of: NaiveDate, days: u32) -> bool {
        let Some(expiry) = self.expiry_date else {
            return false;
        };
        let horizon = as_of
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        !self.is_expired(as_of) && expiry <= horizon
    }

    /// Whether an incoming delivery can be merged into this batch instead of
    /// opening a new one.
    pub fn accepts_augment(
        &self,
        lot_code: Option<&str>,
        cost_price: Decimal,
        expiry_date: Option<NaiveDate>,
    ) -> bool {
        self.is_active
            && lot_code.is_some()
            && self.lot_code.as_deref() == lot_code.map(str::trim)
            && self.cost_price == cost_price
            && self.expiry_date == expiry_date
    }

    /// Quantities after a signed adjustment of `quantity`.
    ///
    /// A positive delta adds fresh, unallocated units; a negative one shrinks the
    /// batch and clamps `available` to the new total.
    pub fn adjusted(&self, delta: i64) -> DomainResult<Quantities> {
        if delta == 0 {
            return Err(DomainError::invalid_quantity("adjustment delta cannot be zero"));
        }
        let quantity = add_units(self.quantity, delta)?;
        if quantity < 0 {
            return Err(DomainError::insufficient_stock(delta.saturating_neg(), self.quantity));
        }
        let available = if delta > 0 {
            add_units(self.available_quantity, delta)?
        } else {
            self.available_quantity.min(quantity)
        };
        Quantities {
            quantity,
            available,
        }
        .checked()
    }

    /// Quantities after adding units to both totals (receipt augment).
    pub fn augmented(&self, amount: i64) -> DomainResult<Quantities> {
        ensure_positive(amount)?;
        Quantities {
            quantity: add_units(self.quantity, amount)?,
            available: add_units(self.available_quantity, amount)?,
        }
        .checked()
    }

    /// Quantities after taking `amount` out of `available`.
    pub fn reserved(&self, amount: i64) -> DomainResult<Quantities> {
        ensure_positive(amount)?;
        if amount > self.available_quantity {
            return Err(DomainError::insufficient_stock(
                amount,
                self.available_quantity,
            ));
        }
        Quantities {
            quantity: self.quantity,
            available: self.available_quantity - amount,
        }
        .checked()
    }

    /// Quantities after putting `amount` back into `available`.
    pub fn released(&self, amount: i64) -> DomainResult<Quantities> {
        ensure_positive(amount)?;
        let allocated = self.quantity - self.available_quantity;
        if amount > allocated {
            return Err(DomainError::insufficient_stock(amount, allocated));
        }
        Quantities {
            quantity: self.quantity,
            available: self.available_quantity + amount,
        }
        .checked()
    }

    pub(crate) fn set_quantities(&mut self, q: Quantities) {
        debug_assert!(q.quantity >= 0 && (0..=q.quantity).contains(&q.available));
        self.quantity = q.quantity;
        self.available_quantity = q.available;
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }
}

impl Entity for StockBatch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn ensure_positive(amount: i64) -> DomainResult<()> {
    if amount <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "quantity must be positive (got {amount})"
        )));
    }
    Ok(())
}

fn add_units(current: i64, amount: i64) -> DomainResult<i64> {
    current.checked_add(amount).ok_or_else(|| {
        DomainError::invalid_quantity(format!("{current} + {amount} overflows the batch quantity"))
    })
}
