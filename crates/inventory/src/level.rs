use serde::{Deserialize, Serialize};

use stockflow_core::ProductId;

use crate::batch::StockBatch;

/// On-hand view of one product, summed over its active batches.
///
/// Always computed from the batch set; there is no stored running total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub on_hand: i64,
    pub available: i64,
    pub allocated: i64,
    pub reorder_level: Option<i64>,
    pub is_low_stock: bool,
    pub active_batches: usize,
}

impl StockLevel {
    pub fn from_batches(
        product_id: ProductId,
        batches: &[StockBatch],
        reorder_level: Option<i64>,
    ) -> Self {
        let (on_hand, available, active_batches) = batches
            .iter()
            .filter(|b| b.is_active())
            .fold((0i64, 0i64, 0usize), |(q, a, n), b| {
                (q + b.quantity(), a + b.available_quantity(), n + 1)
            });

        Self {
            product_id,
            on_hand,
            available,
            allocated: on_hand - available,
            reorder_level,
            is_low_stock: reorder_level.is_some_and(|r| on_hand <= r),
            active_batches,
        }
    }
}
