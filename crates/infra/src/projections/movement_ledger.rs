use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockflow_core::{ProductId, UserId};
use stockflow_events::EventEnvelope;
use stockflow_inventory::{
    BatchId, Direction, InventoryEvent, MovementId, MovementType, ProductStock, Reference,
    StockMovement,
};

use crate::read_model::{KeyedStore, Page, Pagination};

use super::{Projection, ProjectionError, StreamCursors};

/// Ledger query criteria. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub batch_id: Option<BatchId>,
    pub user_id: Option<UserId>,
    pub movement_type: Option<MovementType>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    pub reference: Option<Reference>,
}

impl MovementFilter {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, m: &StockMovement) -> bool {
        self.product_id.is_none_or(|p| m.product_id() == p)
            && self.batch_id.is_none_or(|b| m.batch_id() == Some(b))
            && self.user_id.is_none_or(|u| m.user_id() == Some(u))
            && self.movement_type.is_none_or(|t| m.movement_type() == t)
            && self.from.is_none_or(|from| m.occurred_at() >= from)
            && self.to.is_none_or(|to| m.occurred_at() < to)
            && self
                .reference
                .as_ref()
                .is_none_or(|r| m.reference() == Some(r))
    }
}

/// Incoming vs. outgoing sums of one product's ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub movements: u64,
    pub quantity_in: i64,
    pub quantity_out: i64,
    pub cost_in: Decimal,
    pub cost_out: Decimal,
}

impl LedgerTotals {
    pub fn net_quantity(&self) -> i64 {
        self.quantity_in - self.quantity_out
    }
}

/// Append-only movement ledger read model.
///
/// Movements are keyed by their derived id, so a redelivered event rewrites
/// identical rows instead of duplicating them.
#[derive(Debug)]
pub struct MovementLedgerProjection<S>
where
    S: KeyedStore<MovementId, StockMovement>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> MovementLedgerProjection<S>
where
    S: KeyedStore<MovementId, StockMovement>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, id: MovementId) -> Option<StockMovement> {
        self.store.get(&id)
    }

    /// Matching movements, newest first.
    pub fn query(&self, filter: &MovementFilter, pagination: Pagination) -> Page<StockMovement> {
        let mut rows: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        rows.sort_by(|a, b| {
            b.occurred_at()
                .cmp(&a.occurred_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        pagination.apply(rows)
    }

    pub fn totals(&self, product_id: ProductId) -> LedgerTotals {
        self.store
            .list()
            .into_iter()
            .filter(|m| m.product_id() == product_id)
            .fold(LedgerTotals::default(), |mut t, m| {
                t.movements += 1;
                match m.direction() {
                    Direction::Incoming => {
                        t.quantity_in += m.quantity();
                        t.cost_in += m.total_cost();
                    }
                    Direction::Outgoing => {
                        t.quantity_out += m.quantity();
                        t.cost_out += m.total_cost();
                    }
                }
                t
            })
    }
}

impl<S> Projection for MovementLedgerProjection<S>
where
    S: KeyedStore<MovementId, StockMovement>,
{
    fn name(&self) -> &'static str {
        "movement_ledger"
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

                for m in ev.movements() {
                    self.store.upsert(m.id(), m.clone());
                }
                Ok(())
            })
    }

    fn reset(&self) {
        self.cursors.clear();
        self.store.clear();
    }
}
