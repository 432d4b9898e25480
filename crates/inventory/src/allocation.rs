//! Allocation engine: batch selection under an issuance policy.
//!
//! Planning is pure. It reads a product's batch set, orders the eligible
//! batches, and greedily takes `min(available, remaining)` from each until the
//! request is covered. Nothing is mutated here; the `ProductStock` aggregate
//! turns a complete plan into a single event, so a request that cannot be fully
//! covered leaves every batch untouched.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, ProductId};

use crate::batch::{BatchId, StockBatch};

/// Order in which batches are issued.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssuancePolicy {
    /// Oldest received first.
    #[default]
    Fifo,
    /// Newest received first.
    Lifo,
    /// Earliest expiry first; batches without expiry go last.
    Fefo,
}

impl core::fmt::Display for IssuancePolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            IssuancePolicy::Fifo => "FIFO",
            IssuancePolicy::Lifo => "LIFO",
            IssuancePolicy::Fefo => "FEFO",
        })
    }
}

impl core::str::FromStr for IssuancePolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(IssuancePolicy::Fifo),
            "LIFO" => Ok(IssuancePolicy::Lifo),
            "FEFO" => Ok(IssuancePolicy::Fefo),
            other => Err(DomainError::validation(format!(
                "unknown issuance policy: {other}"
            ))),
        }
    }
}

/// Quantity taken from one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

impl AllocationLine {
    pub fn line_cost(&self) -> Decimal {
        self.unit_cost * Decimal::from(self.quantity)
    }
}

/// A fully covered allocation, in issue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub product_id: ProductId,
    pub policy: IssuancePolicy,
    pub requested: i64,
    pub lines: Vec<AllocationLine>,
}

impl AllocationPlan {
    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Cost of goods sold for this allocation (per-lot costing).
    pub fn cost_of_goods(&self) -> Decimal {
        self.lines.iter().map(AllocationLine::line_cost).sum()
    }
}

/// Which batches may be issued from.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Eligibility {
    /// When set, batches expired as of this date are skipped.
    pub exclude_expired_as_of: Option<NaiveDate>,
}

impl Eligibility {
    pub fn allows(&self, batch: &StockBatch) -> bool {
        batch.is_active()
            && batch.available_quantity() > 0
            && !self
                .exclude_expired_as_of
                .is_some_and(|as_of| batch.is_expired(as_of))
    }
}

/// Eligible batches in the order `policy` issues them.
pub fn candidates<'a>(
    batches: &'a [StockBatch],
    policy: IssuancePolicy,
    eligibility: Eligibility,
) -> Vec<&'a StockBatch> {
    let mut out: Vec<&StockBatch> = batches.iter().filter(|b| eligibility.allows(b)).collect();

    match policy {
        IssuancePolicy::Fifo => {
            out.sort_by_key(|b| (b.received_at(), b.sequence()));
        }
        IssuancePolicy::Lifo => {
            out.sort_by(|a, b| {
                (b.received_at(), b.sequence()).cmp(&(a.received_at(), a.sequence()))
            });
        }
        IssuancePolicy::Fefo => {
            // `None` sorts before `Some` in Option's ordering, so key on
            // (is_none, date) to push undated batches last.
            out.sort_by_key(|b| {
                (
                    b.expiry_date().is_none(),
                    b.expiry_date(),
                    b.received_at(),
                    b.sequence(),
                )
            });
        }
    }

    out
}

/// Plan an allocation of `requested` units.
///
/// Fails with `InvalidQuantity` for a non-positive request and with
/// `InsufficientStock` when eligible batches cannot cover it.
pub fn plan_allocation(
    product_id: ProductId,
    batches: &[StockBatch],
    requested: i64,
    policy: IssuancePolicy,
    eligibility: Eligibility,
) -> DomainResult<AllocationPlan> {
    if requested <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "requested quantity must be positive (got {requested})"
        )));
    }

    let ordered = candidates(batches, policy, eligibility);
    if ordered.is_empty() {
        return Err(DomainError::insufficient_stock(requested, 0));
    }

    let mut remaining = requested;
    let mut lines = Vec::new();
    for batch in &ordered {
        if remaining == 0 {
            break;
        }
        let take = batch.available_quantity().min(remaining);
        lines.push(AllocationLine {
            batch_id: batch.id_typed(),
            quantity: take,
            unit_cost: batch.cost_price(),
        });
        remaining -= take;
    }

    if remaining > 0 {
        let available = ordered.iter().map(|b| b.available_quantity()).sum();
        return Err(DomainError::insufficient_stock(requested, available));
    }

    Ok(AllocationPlan {
        product_id,
        policy,
        requested,
        lines,
    })
}

/// `Σ(cost × available) / Σ(available)` over active batches with stock.
///
/// `None` when nothing is available to value.
pub fn weighted_average_cost(batches: &[StockBatch]) -> Option<Decimal> {
    let (value, units) = batches
        .iter()
        .filter(|b| b.is_active() && b.available_quantity() > 0)
        .fold((Decimal::ZERO, 0i64), |(value, units), b| {
            (
                value + b.cost_price() * Decimal::from(b.available_quantity()),
                units + b.available_quantity(),
            )
        });

    if units == 0 {
        None
    } else {
        Some(value / Decimal::from(units))
    }
}
