use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockflow_core::{Aggregate, SupplierId};
use stockflow_events::EventEnvelope;
use stockflow_purchasing::{PurchaseReceipt, ReceiptEvent, ReceiptId, ReceiptStatus};

use crate::read_model::{KeyedStore, Page, Pagination};

use super::{Projection, ProjectionError, StreamCursors};

/// Receipt search criteria. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptFilter {
    pub supplier_id: Option<SupplierId>,
    pub status: Option<ReceiptStatus>,
    /// Inclusive order-date range.
    pub order_date_from: Option<NaiveDate>,
    pub order_date_to: Option<NaiveDate>,
    /// Case-insensitive match on receipt number, invoice number, reference or notes.
    pub text: Option<String>,
}

impl ReceiptFilter {
    pub fn matches(&self, r: &PurchaseReceipt) -> bool {
        if self.supplier_id.is_some_and(|s| r.supplier_id() != Some(s)) {
            return false;
        }
        if self.status.is_some_and(|s| r.status() != s) {
            return false;
        }
        if self.order_date_from.is_some() || self.order_date_to.is_some() {
            let Some(d) = r.order().order_date else {
                return false;
            };
            if self.order_date_from.is_some_and(|from| d < from)
                || self.order_date_to.is_some_and(|to| d > to)
            {
                return false;
            }
        }
        match self.text.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => text_matches(r, &needle.to_lowercase()),
            _ => true,
        }
    }
}

fn text_matches(r: &PurchaseReceipt, needle: &str) -> bool {
    let number = r.receipt_number().map(ToString::to_string);
    [
        number.as_deref(),
        r.delivery().invoice_number.as_deref(),
        r.delivery().delivery_note.as_deref(),
        r.order().reference.as_deref(),
        r.order().notes.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|hay| hay.to_lowercase().contains(needle))
}

/// Delivery and quality aggregates for one supplier.
///
/// Rates are percentages rounded to two places; `None` when nothing was
/// measured yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierPerformance {
    pub supplier_id: SupplierId,
    /// Receipts that are not cancelled.
    pub receipts: u64,
    pub total_ordered: i64,
    pub total_received: i64,
    pub total_accepted: i64,
    pub total_rejected: i64,
    pub total_damaged: i64,
    pub acceptance_rate: Option<Decimal>,
    /// Receipts carrying both an expected and a received date.
    pub dated_deliveries: u64,
    pub on_time_deliveries: u64,
    pub on_time_rate: Option<Decimal>,
}

fn percentage(part: i64, whole: i64) -> Option<Decimal> {
    (whole > 0).then(|| {
        (Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(whole)).round_dp(2)
    })
}

/// Searchable receipt directory.
///
/// Holds a folded copy of each receipt; rebuilt from the store like any other
/// projection.
#[derive(Debug)]
pub struct ReceiptDirectoryProjection<S>
where
    S: KeyedStore<ReceiptId, PurchaseReceipt>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ReceiptDirectoryProjection<S>
where
    S: KeyedStore<ReceiptId, PurchaseReceipt>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, receipt_id: ReceiptId) -> Option<PurchaseReceipt> {
        self.store.get(&receipt_id)
    }

    /// Matching receipts, newest receipt number first.
    pub fn search(&self, filter: &ReceiptFilter, pagination: Pagination) -> Page<PurchaseReceipt> {
        let mut rows: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|r| r.is_created() && filter.matches(r))
            .collect();
        rows.sort_by(|a, b| b.receipt_number().cmp(&a.receipt_number()));
        pagination.apply(rows)
    }

    pub fn supplier_performance(&self, supplier_id: SupplierId) -> SupplierPerformance {
        let mut perf = SupplierPerformance {
            supplier_id,
            receipts: 0,
            total_ordered: 0,
            total_received: 0,
            total_accepted: 0,
            total_rejected: 0,
            total_damaged: 0,
            acceptance_rate: None,
            dated_deliveries: 0,
            on_time_deliveries: 0,
            on_time_rate: None,
        };

        let receipts = self.store.list().into_iter().filter(|r| {
            r.supplier_id() == Some(supplier_id) && r.status() != ReceiptStatus::Cancelled
        });
        for r in receipts {
            perf.receipts += 1;
            for item in r.items() {
                perf.total_ordered += item.ordered_quantity;
                perf.total_received += item.received_quantity;
                perf.total_accepted += item.accepted_quantity;
                perf.total_rejected += item.rejected_quantity;
                perf.total_damaged += item.damaged_quantity;
            }
            if let (Some(expected), Some(received)) =
                (r.order().expected_date, r.delivery().received_date)
            {
                perf.dated_deliveries += 1;
                if received <= expected {
                    perf.on_time_deliveries += 1;
                }
            }
        }

        perf.acceptance_rate = percentage(perf.total_accepted, perf.total_received);
        perf.on_time_rate = percentage(
            perf.on_time_deliveries as i64,
            perf.dated_deliveries as i64,
        );
        perf
    }
}

impl<S> Projection for ReceiptDirectoryProjection<S>
where
    S: KeyedStore<ReceiptId, PurchaseReceipt>,
{
    fn name(&self) -> &'static str {
        "receipt_directory"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PurchaseReceipt::AGGREGATE_TYPE {
            return Ok(());
        }
        let aggregate_id = envelope.aggregate_id();

        self.cursors
            .advance(aggregate_id, envelope.sequence_number(), || {
                let ev: ReceiptEvent = serde_json::from_value(envelope.payload().clone())
                    .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
                let receipt_id = ev.receipt_id();
                if receipt_id.0 != aggregate_id {
                    return Err(ProjectionError::StreamMismatch(
                        "event receipt_id does not match envelope aggregate_id".to_string(),
                    ));
                }

                let mut receipt = self
                    .store
                    .get(&receipt_id)
                    .unwrap_or_else(|| PurchaseReceipt::empty(receipt_id));
                receipt.apply(&ev);
                self.store.upsert(receipt_id, receipt);
                Ok(())
            })
    }

    fn reset(&self) {
        self.cursors.clear();
        self.store.clear();
    }
}
