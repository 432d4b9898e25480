use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockflow_core::{ProductId, SupplierId};
use stockflow_events::EventEnvelope;
use stockflow_inventory::{BatchId, InventoryEvent, ProductStock, Quantities, StockBatch};

use crate::read_model::KeyedStore;

use super::{Projection, ProjectionError, StreamCursors};

/// Queryable copy of one batch, across all products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchView {
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub lot_code: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub quantity: i64,
    pub available: i64,
    pub cost_price: Decimal,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub received_at: DateTime<Utc>,
    pub is_active: bool,
}

impl BatchView {
    fn from_batch(b: &StockBatch) -> Self {
        Self {
            batch_id: b.id_typed(),
            product_id: b.product_id(),
            lot_code: b.lot_code().map(str::to_string),
            supplier_id: b.supplier_id(),
            quantity: b.quantity(),
            available: b.available_quantity(),
            cost_price: b.cost_price(),
            manufacture_date: b.manufacture_date(),
            expiry_date: b.expiry_date(),
            received_at: b.received_at(),
            is_active: b.is_active(),
        }
    }

    fn set(&mut self, q: Quantities) {
        self.quantity = q.quantity;
        self.available = q.available;
    }

    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|d| d < as_of)
    }

    pub fn expires_within(&self, as_of: NaiveDate, days: u32) -> bool {
        let horizon = as_of
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        !self.is_expired(as_of) && self.expiry_date.is_some_and(|d| d <= horizon)
    }
}

/// Cross-product batch index (supplier, lot and expiry listings).
///
/// Per-product reads that feed a write decision go to the aggregate instead;
/// this view may trail the store.
#[derive(Debug)]
pub struct BatchIndexProjection<S>
where
    S: KeyedStore<BatchId, BatchView>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> BatchIndexProjection<S>
where
    S: KeyedStore<BatchId, BatchView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, batch_id: BatchId) -> Option<BatchView> {
        self.store.get(&batch_id)
    }

    pub fn by_product(&self, product_id: ProductId) -> Vec<BatchView> {
        self.select(|b| b.product_id == product_id)
    }

    pub fn by_supplier(&self, supplier_id: SupplierId) -> Vec<BatchView> {
        self.select(|b| b.supplier_id == Some(supplier_id))
    }

    pub fn by_lot(&self, lot_code: &str) -> Vec<BatchView> {
        let lot_code = lot_code.trim();
        self.select(|b| b.lot_code.as_deref() == Some(lot_code))
    }

    /// Active batches with units left that expire within the window.
    pub fn expiring_within(&self, as_of: NaiveDate, days: u32) -> Vec<BatchView> {
        let mut rows =
            self.select(|b| b.is_active && b.available > 0 && b.expires_within(as_of, days));
        rows.sort_by_key(|b| (b.expiry_date, b.received_at));
        rows
    }

    /// Active batches past their expiry that still hold available units.
    pub fn expired(&self, as_of: NaiveDate) -> Vec<BatchView> {
        let mut rows = self.select(|b| b.is_active && b.available > 0 && b.is_expired(as_of));
        rows.sort_by_key(|b| (b.expiry_date, b.received_at));
        rows
    }

    fn select(&self, keep: impl Fn(&BatchView) -> bool) -> Vec<BatchView> {
        let mut rows: Vec<_> = self.store.list().into_iter().filter(|b| keep(b)).collect();
        rows.sort_by_key(|b| (b.received_at, b.batch_id));
        rows
    }

    fn update(
        &self,
        batch_id: BatchId,
        f: impl FnOnce(&mut BatchView),
    ) -> Result<(), ProjectionError> {
        let mut view = self.store.get(&batch_id).ok_or_else(|| {
            ProjectionError::StreamMismatch(format!("event for unknown batch {batch_id}"))
        })?;
        f(&mut view);
        self.store.upsert(batch_id, view);
        Ok(())
    }

    fn apply_event(&self, ev: InventoryEvent) -> Result<(), ProjectionError> {
        match ev {
            InventoryEvent::BatchReceived(e) => {
                self.store
                    .upsert(e.batch.id_typed(), BatchView::from_batch(&e.batch));
                Ok(())
            }
            InventoryEvent::BatchAugmented(e) => self.update(e.batch_id, |v| v.set(e.after)),
            InventoryEvent::BatchAdjusted(e) => self.update(e.batch_id, |v| v.set(e.after)),
            InventoryEvent::StockReserved(e) | InventoryEvent::StockReleased(e) => {
                self.update(e.batch_id, |v| v.set(e.after))
            }
            InventoryEvent::StockReturned(e) => self.update(e.batch_id, |v| v.set(e.after)),
            InventoryEvent::BatchDeactivated(e) => self.update(e.batch_id, |v| v.is_active = false),
            InventoryEvent::BatchActivated(e) => self.update(e.batch_id, |v| v.is_active = true),
            InventoryEvent::StockAllocated(e) => {
                for line in &e.lines {
                    self.update(line.batch_id, |v| v.available -= line.quantity)?;
                }
                Ok(())
            }
        }
    }
}

impl<S> Projection for BatchIndexProjection<S>
where
    S: KeyedStore<BatchId, BatchView>,
{
    fn name(&self) -> &'static str {
        "batch_index"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ProductStock::AGGREGATE_TYPE {
            return Ok(());
        }
        let aggregate_id = envelope.aggregate_id();

        self.cursors
            .advance(aggregate_id, envelope.sequence_number(), || {
                let ev: InventoryEvent = serde_json::from_value(envelope.payload().clone())
                    .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
                if ev.product_id().0 != aggregate_id {
                    return Err(ProjectionError::StreamMismatch(
                        "event product_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                self.apply_event(ev)
            })
    }

    fn reset(&self) {
        self.cursors.clear();
        self.store.clear();
    }
}
