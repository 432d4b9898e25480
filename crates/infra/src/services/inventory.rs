use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use uuid::Uuid;

use stockflow_core::{DomainError, ProductId, SupplierId, UserId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{
    ActivateBatch, AdjustBatch, AllocateStock, AllocationPlan, BatchId, DeactivateBatch,
    Eligibility, InventoryCommand, InventoryEvent, IssuancePolicy, MovementType, ProductStock,
    Provenance, Quantities, ReceiveBatch, ReleaseStock, ReserveStock, ReturnStock, StockBatch,
    StockLevel,
};

use crate::catalog::Catalog;
use crate::command_dispatcher::{CommandDispatcher, Committed, DispatchError};
use crate::config::AllocationConfig;
use crate::event_store::EventStore;

/// A consumption request from a sales or fulfilment caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    /// `None` uses the configured default.
    pub policy: Option<IssuancePolicy>,
    /// OUT or SALE.
    pub movement_type: MovementType,
    /// Idempotency key; generated when absent. Repeating it returns the plan
    /// already committed under it without allocating again.
    pub operation_id: Option<Uuid>,
    pub provenance: Provenance,
    pub occurred_at: DateTime<Utc>,
}

impl AllocationRequest {
    pub fn sale(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            policy: None,
            movement_type: MovementType::Sale,
            operation_id: None,
            provenance: Provenance::default(),
            occurred_at: Utc::now(),
        }
    }

    pub fn out(product_id: ProductId, quantity: i64) -> Self {
        Self {
            movement_type: MovementType::Out,
            ..Self::sale(product_id, quantity)
        }
    }

    pub fn with_policy(mut self, policy: IssuancePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn by(mut self, user_id: UserId) -> Self {
        self.provenance.user_id = Some(user_id);
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Direct stock-in outside the receipt workflow (opening balances, found stock).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchIntake {
    pub product_id: ProductId,
    pub quantity: i64,
    pub cost_price: Decimal,
    pub lot_code: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub provenance: Provenance,
    pub occurred_at: DateTime<Utc>,
}

impl BatchIntake {
    pub fn new(product_id: ProductId, quantity: i64, cost_price: Decimal) -> Self {
        Self {
            product_id,
            quantity,
            cost_price,
            lot_code: None,
            supplier_id: None,
            manufacture_date: None,
            expiry_date: None,
            provenance: Provenance::default(),
            occurred_at: Utc::now(),
        }
    }
}

/// Batch store, allocation engine and stock level queries for one catalog.
///
/// Every write goes through the product's stream with optimistic-concurrency
/// retry; every read rehydrates the aggregate, so answers are never stale.
#[derive(Debug)]
pub struct InventoryService<S, B, C> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    catalog: C,
    settings: AllocationConfig,
}

impl<S, B, C> InventoryService<S, B, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    C: Catalog,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        catalog: C,
        settings: AllocationConfig,
    ) -> Self {
        Self {
            dispatcher,
            catalog,
            settings,
        }
    }

    pub fn settings(&self) -> &AllocationConfig {
        &self.settings
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Allocate stock across batches and commit the plan.
    ///
    /// Either the whole quantity is committed, with one ledger line per touched
    /// batch, or nothing changes.
    pub fn allocate(&self, request: AllocationRequest) -> Result<AllocationPlan, DispatchError> {
        if request.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "requested quantity must be positive (got {})",
                request.quantity
            ))
            .into());
        }
        self.catalog.require_product(request.product_id)?;

        let policy = request.policy.unwrap_or(self.settings.default_policy);
        let operation_id = request.operation_id.unwrap_or_else(Uuid::now_v7);
        let command = InventoryCommand::AllocateStock(AllocateStock {
            product_id: request.product_id,
            operation_id,
            quantity: request.quantity,
            policy,
            movement_type: request.movement_type,
            exclude_expired: self.settings.exclude_expired,
            provenance: request.provenance,
            occurred_at: request.occurred_at,
        });

        let committed = self.execute(&command)?;
        if committed.is_noop() {
            let plan = self
                .stock(request.product_id)?
                .allocation(operation_id)
                .cloned()
                .ok_or_else(|| DomainError::invariant("allocation committed no plan"))?;
            debug!(product_id = %request.product_id, %operation_id, "allocation already applied");
            return Ok(plan);
        }
        let plan = committed
            .events
            .iter()
            .find_map(|e| match e {
                InventoryEvent::StockAllocated(a) => Some(a.plan()),
                _ => None,
            })
            .ok_or_else(|| DomainError::invariant("allocation committed no plan"))?;

        info!(
            product_id = %request.product_id,
            quantity = request.quantity,
            policy = %policy,
            batches = plan.lines.len(),
            cost_of_goods = %plan.cost_of_goods(),
            "stock allocated"
        );
        Ok(plan)
    }

    /// The plan `allocate` would commit right now, without committing it.
    pub fn preview(
        &self,
        product_id: ProductId,
        quantity: i64,
        policy: Option<IssuancePolicy>,
        as_of: NaiveDate,
    ) -> Result<AllocationPlan, DispatchError> {
        if quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "requested quantity must be positive (got {quantity})"
            ))
            .into());
        }
        let stock = self.stock(product_id)?;
        let eligibility = Eligibility {
            exclude_expired_as_of: self.settings.exclude_expired.then_some(as_of),
        };
        let policy = policy.unwrap_or(self.settings.default_policy);
        let plan = stock.plan(quantity, policy, eligibility)?;
        debug!(
            product_id = %product_id,
            quantity,
            lines = plan.lines.len(),
            "allocation previewed"
        );
        Ok(plan)
    }

    /// Stock-in a new batch, or top up a batch with matching lot, cost and expiry.
    ///
    /// Returns `None` when the intake's reference was already applied.
    pub fn create_batch(&self, intake: BatchIntake) -> Result<Option<BatchId>, DispatchError> {
        if intake.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "received quantity must be positive (got {})",
                intake.quantity
            ))
            .into());
        }
        self.catalog.require_product(intake.product_id)?;

        let product_id = intake.product_id;
        let quantity = intake.quantity;
        let committed = self.execute(&InventoryCommand::ReceiveBatch(ReceiveBatch {
            product_id,
            batch_id: BatchId::new(),
            operation_id: Uuid::now_v7(),
            quantity,
            cost_price: intake.cost_price,
            lot_code: intake.lot_code,
            supplier_id: intake.supplier_id,
            manufacture_date: intake.manufacture_date,
            expiry_date: intake.expiry_date,
            provenance: intake.provenance,
            occurred_at: intake.occurred_at,
        }))?;

        let batch_id = committed.events.iter().find_map(|e| match e {
            InventoryEvent::BatchReceived(r) => Some(r.batch.id_typed()),
            InventoryEvent::BatchAugmented(a) => Some(a.batch_id),
            _ => None,
        });
        if let Some(batch_id) = batch_id {
            info!(product_id = %product_id, batch_id = %batch_id, quantity, "stock received");
        }
        Ok(batch_id)
    }

    /// Signed correction of a batch total. `write_off` records DAMAGE.
    pub fn adjust(
        &self,
        product_id: ProductId,
        batch_id: BatchId,
        delta: i64,
        write_off: bool,
        provenance: Provenance,
    ) -> Result<Quantities, DispatchError> {
        if delta == 0 {
            return Err(DomainError::invalid_quantity("adjustment delta cannot be zero").into());
        }
        let committed = self.execute(&InventoryCommand::AdjustBatch(AdjustBatch {
            product_id,
            batch_id,
            operation_id: Uuid::now_v7(),
            delta,
            write_off,
            provenance,
            occurred_at: Utc::now(),
        }))?;
        info!(product_id = %product_id, batch_id = %batch_id, delta, write_off, "batch adjusted");
        quantities_after(&committed, batch_id)
    }

    pub fn reserve(
        &self,
        product_id: ProductId,
        batch_id: BatchId,
        quantity: i64,
    ) -> Result<Quantities, DispatchError> {
        let committed = self.execute(&InventoryCommand::ReserveStock(ReserveStock {
            product_id,
            batch_id,
            quantity,
            occurred_at: Utc::now(),
        }))?;
        quantities_after(&committed, batch_id)
    }

    pub fn release(
        &self,
        product_id: ProductId,
        batch_id: BatchId,
        quantity: i64,
    ) -> Result<Quantities, DispatchError> {
        let committed = self.execute(&InventoryCommand::ReleaseStock(ReleaseStock {
            product_id,
            batch_id,
            quantity,
            occurred_at: Utc::now(),
        }))?;
        quantities_after(&committed, batch_id)
    }

    /// Put issued units back into a batch (RETURN movement).
    pub fn return_stock(
        &self,
        product_id: ProductId,
        batch_id: BatchId,
        quantity: i64,
        provenance: Provenance,
    ) -> Result<Quantities, DispatchError> {
        let committed = self.execute(&InventoryCommand::ReturnStock(ReturnStock {
            product_id,
            batch_id,
            operation_id: Uuid::now_v7(),
            quantity,
            provenance,
            occurred_at: Utc::now(),
        }))?;
        info!(product_id = %product_id, batch_id = %batch_id, quantity, "stock returned");
        quantities_after(&committed, batch_id)
    }

    pub fn deactivate(
        &self,
        product_id: ProductId,
        batch_id: BatchId,
    ) -> Result<(), DispatchError> {
        self.execute(&InventoryCommand::DeactivateBatch(DeactivateBatch {
            product_id,
            batch_id,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    pub fn activate(&self, product_id: ProductId, batch_id: BatchId) -> Result<(), DispatchError> {
        self.execute(&InventoryCommand::ActivateBatch(ActivateBatch {
            product_id,
            batch_id,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    /// Current batch set of a product, rehydrated from its stream.
    pub fn stock(&self, product_id: ProductId) -> Result<ProductStock, DispatchError> {
        self.dispatcher
            .load(product_id.0, |id| ProductStock::empty(ProductId::new(id)))
    }

    pub fn level(&self, product_id: ProductId) -> Result<StockLevel, DispatchError> {
        self.catalog.require_product(product_id)?;
        let stock = self.stock(product_id)?;
        Ok(stock.level(self.catalog.reorder_level(product_id)))
    }

    pub fn weighted_average_cost(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Decimal>, DispatchError> {
        Ok(self.stock(product_id)?.weighted_average_cost())
    }

    pub fn batch(
        &self,
        product_id: ProductId,
        batch_id: BatchId,
    ) -> Result<StockBatch, DispatchError> {
        self.stock(product_id)?
            .batch(batch_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("batch {batch_id}")).into())
    }

    pub fn batches(&self, product_id: ProductId) -> Result<Vec<StockBatch>, DispatchError> {
        Ok(self.stock(product_id)?.batches().to_vec())
    }

    pub fn active_batches(&self, product_id: ProductId) -> Result<Vec<StockBatch>, DispatchError> {
        Ok(owned(self.stock(product_id)?.active_batches()))
    }

    pub fn available_batches(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<StockBatch>, DispatchError> {
        Ok(owned(self.stock(product_id)?.available_batches()))
    }

    pub fn batches_by_lot(
        &self,
        product_id: ProductId,
        lot_code: &str,
    ) -> Result<Vec<StockBatch>, DispatchError> {
        Ok(owned(self.stock(product_id)?.batches_by_lot(lot_code)))
    }

    pub fn batches_by_supplier(
        &self,
        product_id: ProductId,
        supplier_id: SupplierId,
    ) -> Result<Vec<StockBatch>, DispatchError> {
        Ok(owned(self.stock(product_id)?.batches_by_supplier(supplier_id)))
    }

    pub fn expiring_within(
        &self,
        product_id: ProductId,
        as_of: NaiveDate,
        days: u32,
    ) -> Result<Vec<StockBatch>, DispatchError> {
        Ok(owned(self.stock(product_id)?.expiring_within(as_of, days)))
    }

    pub fn expired(
        &self,
        product_id: ProductId,
        as_of: NaiveDate,
    ) -> Result<Vec<StockBatch>, DispatchError> {
        Ok(owned(self.stock(product_id)?.expired(as_of)))
    }

    fn execute(
        &self,
        command: &InventoryCommand,
    ) -> Result<Committed<InventoryEvent>, DispatchError> {
        self.dispatcher.dispatch_with_retry(
            command.product_id().0,
            ProductStock::AGGREGATE_TYPE,
            command,
            |id| ProductStock::empty(ProductId::new(id)),
            self.settings.max_retries,
        )
    }
}

fn owned(batches: Vec<&StockBatch>) -> Vec<StockBatch> {
    batches.into_iter().cloned().collect()
}

fn quantities_after(
    committed: &Committed<InventoryEvent>,
    batch_id: BatchId,
) -> Result<Quantities, DispatchError> {
    committed
        .events
        .iter()
        .rev()
        .find_map(|e| match e {
            InventoryEvent::BatchAdjusted(a) if a.batch_id == batch_id => Some(a.after),
            InventoryEvent::BatchAugmented(a) if a.batch_id == batch_id => Some(a.after),
            InventoryEvent::StockReserved(h) | InventoryEvent::StockReleased(h)
                if h.batch_id == batch_id =>
            {
                Some(h.after)
            }
            InventoryEvent::StockReturned(r) if r.batch_id == batch_id => Some(r.after),
            _ => None,
        })
        .ok_or_else(|| {
            DomainError::invariant(format!("no quantity change recorded for batch {batch_id}"))
                .into()
        })
}
