use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult};

/// Header-level discount: a flat amount or a percentage of the sub-total, never both.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Discount {
    Amount(Decimal),
    Percentage(Decimal),
}

impl Discount {
    /// Monetary discount against `sub_total`, never more than the sub-total itself.
    pub fn amount_on(&self, sub_total: Decimal) -> Decimal {
        let raw = match self {
            Discount::Amount(a) => *a,
            Discount::Percentage(p) => (sub_total * *p / Decimal::ONE_HUNDRED).round_dp(2),
        };
        raw.min(sub_total).max(Decimal::ZERO)
    }

    fn validate(&self) -> DomainResult<()> {
        match self {
            Discount::Amount(a) if a.is_sign_negative() => {
                Err(DomainError::validation("discount amount cannot be negative"))
            }
            Discount::Percentage(p) if p.is_sign_negative() || *p > Decimal::ONE_HUNDRED => {
                Err(DomainError::validation(
                    "discount percentage must be between 0 and 100",
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Header adjustments applied on top of the line sub-total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustments {
    pub discount: Option<Discount>,
    pub tax: Decimal,
    pub shipping: Decimal,
}

impl Adjustments {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(d) = &self.discount {
            d.validate()?;
        }
        if self.tax.is_sign_negative() {
            return Err(DomainError::validation("tax cannot be negative"));
        }
        if self.shipping.is_sign_negative() {
            return Err(DomainError::validation("shipping cannot be negative"));
        }
        Ok(())
    }
}

/// Financial totals of a receipt, derived from its lines and header adjustments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub sub_total: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl Totals {
    /// `total = sub_total - discount + tax + shipping`.
    pub fn compute(line_totals: impl IntoIterator<Item = Decimal>, adj: &Adjustments) -> Self {
        let sub_total: Decimal = line_totals.into_iter().sum();
        let discount = adj
            .discount
            .map(|d| d.amount_on(sub_total))
            .unwrap_or(Decimal::ZERO);

        Self {
            sub_total,
            discount,
            tax: adj.tax,
            shipping: adj.shipping,
            total: sub_total - discount + adj.tax + adj.shipping,
        }
    }
}
