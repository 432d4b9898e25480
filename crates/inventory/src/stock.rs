use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{Aggregate, AggregateRoot, DomainError, DomainResult, ProductId, SupplierId};
use stockflow_events::Event;

use crate::allocation::{
    AllocationLine, AllocationPlan, Eligibility, IssuancePolicy, plan_allocation,
    weighted_average_cost,
};
use crate::batch::{BatchId, NewBatch, Quantities, StockBatch};
use crate::level::StockLevel;
use crate::movement::{
    Direction, MovementDraft, MovementId, MovementType, Provenance, Reference, StockMovement,
};

/// Aggregate root: the batch set of one product.
///
/// All batch mutations for a product go through this aggregate, so its stream
/// version serialises them: a concurrent writer fails the optimistic append and
/// must re-plan against fresh state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    id: ProductId,
    batches: Vec<StockBatch>,
    /// Provenance of every stock-in applied so far (idempotency guard).
    received_references: BTreeSet<Reference>,
    /// Every ledger line recorded so far; a derived id seen twice is a replayed operation.
    recorded_movements: BTreeSet<MovementId>,
    /// Committed allocations by operation id.
    allocations: BTreeMap<Uuid, AllocationPlan>,
    version: u64,
}

impl ProductStock {
    pub const AGGREGATE_TYPE: &'static str = "inventory.stock";

    /// Create an empty instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            batches: Vec::new(),
            received_references: BTreeSet::new(),
            recorded_movements: BTreeSet::new(),
            allocations: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.id
    }

    pub fn batches(&self) -> &[StockBatch] {
        &self.batches
    }

    pub fn batch(&self, batch_id: BatchId) -> Option<&StockBatch> {
        self.batches.iter().find(|b| b.id_typed() == batch_id)
    }

    pub fn active_batches(&self) -> Vec<&StockBatch> {
        self.batches.iter().filter(|b| b.is_active()).collect()
    }

    pub fn available_batches(&self) -> Vec<&StockBatch> {
        self.batches
            .iter()
            .filter(|b| b.is_active() && b.available_quantity() > 0)
            .collect()
    }

    pub fn batches_by_lot(&self, lot_code: &str) -> Vec<&StockBatch> {
        let lot_code = lot_code.trim();
        self.batches
            .iter()
            .filter(|b| b.lot_code() == Some(lot_code))
            .collect()
    }

    pub fn batches_by_supplier(&self, supplier_id: SupplierId) -> Vec<&StockBatch> {
        self.batches
            .iter()
            .filter(|b| b.supplier_id() == Some(supplier_id))
            .collect()
    }

    pub fn expiring_within(&self, as_of: NaiveDate, days: u32) -> Vec<&StockBatch> {
        self.batches
            .iter()
            .filter(|b| b.is_active() && b.expires_within(as_of, days))
            .collect()
    }

    pub fn expired(&self, as_of: NaiveDate) -> Vec<&StockBatch> {
        self.batches
            .iter()
            .filter(|b| b.is_active() && b.is_expired(as_of))
            .collect()
    }

    pub fn weighted_average_cost(&self) -> Option<Decimal> {
        weighted_average_cost(&self.batches)
    }

    /// Derived on-hand/available view (never stored separately).
    pub fn level(&self, reorder_level: Option<i64>) -> StockLevel {
        StockLevel::from_batches(self.id, &self.batches, reorder_level)
    }

    /// Preview an allocation without committing it.
    pub fn plan(
        &self,
        quantity: i64,
        policy: IssuancePolicy,
        eligibility: Eligibility,
    ) -> DomainResult<AllocationPlan> {
        plan_allocation(self.id, &self.batches, quantity, policy, eligibility)
    }

    pub fn has_received(&self, reference: &Reference) -> bool {
        self.received_references.contains(reference)
    }

    /// The plan committed under `operation_id`, if that allocation already ran.
    pub fn allocation(&self, operation_id: Uuid) -> Option<&AllocationPlan> {
        self.allocations.get(&operation_id)
    }

    fn has_recorded(&self, operation_id: Uuid) -> bool {
        self.recorded_movements.contains(&MovementId::derive(operation_id, 0))
    }

    fn batch_mut(&mut self, batch_id: BatchId) -> Option<&mut StockBatch> {
        self.batches.iter_mut().find(|b| b.id_typed() == batch_id)
    }

    fn set_quantities(&mut self, batch_id: BatchId, q: Quantities) {
        if let Some(b) = self.batch_mut(batch_id) {
            b.set_quantities(q);
        }
    }

    fn next_sequence(&self) -> u64 {
        self.batches.iter().map(StockBatch::sequence).max().unwrap_or(0) + 1
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveBatch (stock-in; creates or augments a batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBatch {
    pub product_id: ProductId,
    /// Id to use if a new batch is opened.
    pub batch_id: BatchId,
    pub operation_id: Uuid,
    pub quantity: i64,
    pub cost_price: Decimal,
    pub lot_code: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub provenance: Provenance,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustBatch (signed change of a batch's total quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustBatch {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub operation_id: Uuid,
    pub delta: i64,
    /// Record a negative delta as DAMAGE rather than ADJUSTMENT.
    pub write_off: bool,
    pub provenance: Provenance,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock (hold units of one batch without issuing them).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock (undo a reservation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnStock (issued units come back into a batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStock {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub operation_id: Uuid,
    pub quantity: i64,
    pub provenance: Provenance,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateBatch {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateBatch {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AllocateStock (consume across batches under a policy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateStock {
    pub product_id: ProductId,
    pub operation_id: Uuid,
    pub quantity: i64,
    pub policy: IssuancePolicy,
    /// OUT or SALE, depending on the caller.
    pub movement_type: MovementType,
    /// Skip batches expired as of the allocation's business date.
    pub exclude_expired: bool,
    pub provenance: Provenance,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    ReceiveBatch(ReceiveBatch),
    AdjustBatch(AdjustBatch),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    ReturnStock(ReturnStock),
    DeactivateBatch(DeactivateBatch),
    ActivateBatch(ActivateBatch),
    AllocateStock(AllocateStock),
}

impl InventoryCommand {
    pub fn product_id(&self) -> ProductId {
        match self {
            InventoryCommand::ReceiveBatch(c) => c.product_id,
            InventoryCommand::AdjustBatch(c) => c.product_id,
            InventoryCommand::ReserveStock(c) => c.product_id,
            InventoryCommand::ReleaseStock(c) => c.product_id,
            InventoryCommand::ReturnStock(c) => c.product_id,
            InventoryCommand::DeactivateBatch(c) => c.product_id,
            InventoryCommand::ActivateBatch(c) => c.product_id,
            InventoryCommand::AllocateStock(c) => c.product_id,
        }
    }
}

/// Event: BatchReceived (new batch opened, IN movement recorded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceived {
    pub product_id: ProductId,
    pub batch: StockBatch,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchAugmented (delivery merged into an existing batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAugmented {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub after: Quantities,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAdjusted {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub delta: i64,
    pub after: Quantities,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved / StockReleased share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHoldChanged {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub after: Quantities,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReturned {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub after: Quantities,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchDeactivated / BatchActivated share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatusChanged {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAllocated (one logical consumption, one movement per batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAllocated {
    pub product_id: ProductId,
    pub operation_id: Uuid,
    pub policy: IssuancePolicy,
    pub requested: i64,
    pub lines: Vec<AllocationLine>,
    pub movements: Vec<StockMovement>,
    pub occurred_at: DateTime<Utc>,
}

impl StockAllocated {
    pub fn plan(&self) -> AllocationPlan {
        AllocationPlan {
            product_id: self.product_id,
            policy: self.policy,
            requested: self.requested,
            lines: self.lines.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    BatchReceived(BatchReceived),
    BatchAugmented(BatchAugmented),
    BatchAdjusted(BatchAdjusted),
    StockReserved(BatchHoldChanged),
    StockReleased(BatchHoldChanged),
    StockReturned(StockReturned),
    BatchDeactivated(BatchStatusChanged),
    BatchActivated(BatchStatusChanged),
    StockAllocated(StockAllocated),
}

impl InventoryEvent {
    pub fn product_id(&self) -> ProductId {
        match self {
            InventoryEvent::BatchReceived(e) => e.product_id,
            InventoryEvent::BatchAugmented(e) => e.product_id,
            InventoryEvent::BatchAdjusted(e) => e.product_id,
            InventoryEvent::StockReserved(e) | InventoryEvent::StockReleased(e) => e.product_id,
            InventoryEvent::StockReturned(e) => e.product_id,
            InventoryEvent::BatchDeactivated(e) | InventoryEvent::BatchActivated(e) => e.product_id,
            InventoryEvent::StockAllocated(e) => e.product_id,
        }
    }

    /// Ledger entries this event appends.
    pub fn movements(&self) -> &[StockMovement] {
        match self {
            InventoryEvent::BatchReceived(e) => core::slice::from_ref(&e.movement),
            InventoryEvent::BatchAugmented(e) => core::slice::from_ref(&e.movement),
            InventoryEvent::BatchAdjusted(e) => core::slice::from_ref(&e.movement),
            InventoryEvent::StockReturned(e) => core::slice::from_ref(&e.movement),
            InventoryEvent::StockAllocated(e) => &e.movements,
            InventoryEvent::StockReserved(_)
            | InventoryEvent::StockReleased(_)
            | InventoryEvent::BatchDeactivated(_)
            | InventoryEvent::BatchActivated(_) => &[],
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::BatchReceived(_) => "inventory.stock.batch_received",
            InventoryEvent::BatchAugmented(_) => "inventory.stock.batch_augmented",
            InventoryEvent::BatchAdjusted(_) => "inventory.stock.batch_adjusted",
            InventoryEvent::StockReserved(_) => "inventory.stock.reserved",
            InventoryEvent::StockReleased(_) => "inventory.stock.released",
            InventoryEvent::StockReturned(_) => "inventory.stock.returned",
            InventoryEvent::BatchDeactivated(_) => "inventory.stock.batch_deactivated",
            InventoryEvent::BatchActivated(_) => "inventory.stock.batch_activated",
            InventoryEvent::StockAllocated(_) => "inventory.stock.allocated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::BatchReceived(e) => e.occurred_at,
            InventoryEvent::BatchAugmented(e) => e.occurred_at,
            InventoryEvent::BatchAdjusted(e) => e.occurred_at,
            InventoryEvent::StockReserved(e) | InventoryEvent::StockReleased(e) => e.occurred_at,
            InventoryEvent::StockReturned(e) => e.occurred_at,
            InventoryEvent::BatchDeactivated(e) | InventoryEvent::BatchActivated(e) => {
                e.occurred_at
            }
            InventoryEvent::StockAllocated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductStock {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.recorded_movements
            .extend(event.movements().iter().map(StockMovement::id));

        match event {
            InventoryEvent::BatchReceived(e) => {
                self.id = e.product_id;
                self.batches.push(e.batch.clone());
                if let Some(r) = e.movement.reference() {
                    self.received_references.insert(r.clone());
                }
            }
            InventoryEvent::BatchAugmented(e) => {
                self.set_quantities(e.batch_id, e.after);
                if let Some(r) = e.movement.reference() {
                    self.received_references.insert(r.clone());
                }
            }
            InventoryEvent::BatchAdjusted(e) => self.set_quantities(e.batch_id, e.after),
            InventoryEvent::StockReserved(e) | InventoryEvent::StockReleased(e) => {
                self.set_quantities(e.batch_id, e.after)
            }
            InventoryEvent::StockReturned(e) => self.set_quantities(e.batch_id, e.after),
            InventoryEvent::BatchDeactivated(e) => {
                if let Some(b) = self.batch_mut(e.batch_id) {
                    b.set_active(false);
                }
            }
            InventoryEvent::BatchActivated(e) => {
                if let Some(b) = self.batch_mut(e.batch_id) {
                    b.set_active(true);
                }
            }
            InventoryEvent::StockAllocated(e) => {
                self.allocations.insert(e.operation_id, e.plan());
                for line in &e.lines {
                    if let Some(b) = self.batch_mut(line.batch_id) {
                        let q = b.quantities();
                        b.set_quantities(Quantities {
                            quantity: q.quantity,
                            available: q.available - line.quantity,
                        });
                    }
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_product_id(command.product_id())?;
        match command {
            InventoryCommand::ReceiveBatch(cmd) => self.handle_receive(cmd),
            InventoryCommand::AdjustBatch(cmd) => self.handle_adjust(cmd),
            InventoryCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            InventoryCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            InventoryCommand::ReturnStock(cmd) => self.handle_return(cmd),
            InventoryCommand::DeactivateBatch(cmd) => {
                self.handle_set_active(cmd.batch_id, false, cmd.occurred_at)
            }
            InventoryCommand::ActivateBatch(cmd) => {
                self.handle_set_active(cmd.batch_id, true, cmd.occurred_at)
            }
            InventoryCommand::AllocateStock(cmd) => self.handle_allocate(cmd),
        }
    }
}

impl ProductStock {
    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_new_operation(&self, operation_id: Uuid) -> Result<(), DomainError> {
        if self.has_recorded(operation_id) {
            return Err(DomainError::conflict(format!(
                "operation {operation_id} was already applied"
            )));
        }
        Ok(())
    }

    fn require_batch(&self, batch_id: BatchId) -> Result<&StockBatch, DomainError> {
        self.batch(batch_id)
            .ok_or_else(|| DomainError::not_found(format!("batch {batch_id}")))
    }

    fn handle_receive(&self, cmd: &ReceiveBatch) -> Result<Vec<InventoryEvent>, DomainError> {
        if cmd.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "received quantity must be positive (got {})",
                cmd.quantity
            )));
        }

        // Same provenance already applied: accept as a no-op.
        if let Some(reference) = &cmd.provenance.reference {
            if self.has_received(reference) {
                return Ok(vec![]);
            }
        }
        if self.has_recorded(cmd.operation_id) {
            return Ok(vec![]);
        }

        let existing = self.batches.iter().find(|b| {
            b.accepts_augment(cmd.lot_code.as_deref(), cmd.cost_price, cmd.expiry_date)
        });

        if let Some(batch) = existing {
            let after = batch.augmented(cmd.quantity)?;
            let movement = StockMovement::record(MovementDraft {
                id: MovementId::derive(cmd.operation_id, 0),
                product_id: self.id,
                batch_id: Some(batch.id_typed()),
                movement_type: MovementType::In,
                direction: Direction::Incoming,
                quantity: cmd.quantity,
                unit_cost: batch.cost_price(),
                provenance: &cmd.provenance,
                occurred_at: cmd.occurred_at,
            })?;
            return Ok(vec![InventoryEvent::BatchAugmented(BatchAugmented {
                product_id: self.id,
                batch_id: batch.id_typed(),
                quantity: cmd.quantity,
                after,
                movement,
                occurred_at: cmd.occurred_at,
            })]);
        }

        if self.batch(cmd.batch_id).is_some() {
            return Err(DomainError::conflict(format!(
                "batch {} already exists",
                cmd.batch_id
            )));
        }

        let batch = StockBatch::create(
            NewBatch {
                batch_id: cmd.batch_id,
                product_id: self.id,
                quantity: cmd.quantity,
                cost_price: cmd.cost_price,
                lot_code: cmd.lot_code.clone(),
                supplier_id: cmd.supplier_id,
                manufacture_date: cmd.manufacture_date,
                expiry_date: cmd.expiry_date,
                received_at: cmd.occurred_at,
            },
            self.next_sequence(),
        )?;
        let movement = StockMovement::record(MovementDraft {
            id: MovementId::derive(cmd.operation_id, 0),
            product_id: self.id,
            batch_id: Some(batch.id_typed()),
            movement_type: MovementType::In,
            direction: Direction::Incoming,
            quantity: cmd.quantity,
            unit_cost: cmd.cost_price,
            provenance: &cmd.provenance,
            occurred_at: cmd.occurred_at,
        })?;

        Ok(vec![InventoryEvent::BatchReceived(BatchReceived {
            product_id: self.id,
            batch,
            movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustBatch) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_new_operation(cmd.operation_id)?;
        let batch = self.require_batch(cmd.batch_id)?;
        let after = batch.adjusted(cmd.delta)?;

        let (movement_type, direction) = match (cmd.delta > 0, cmd.write_off) {
            (true, true) => {
                return Err(DomainError::validation("a write-off must reduce stock"));
            }
            (true, false) => (MovementType::Adjustment, Direction::Incoming),
            (false, true) => (MovementType::Damage, Direction::Outgoing),
            (false, false) => (MovementType::Adjustment, Direction::Outgoing),
        };
        let movement = StockMovement::record(MovementDraft {
            id: MovementId::derive(cmd.operation_id, 0),
            product_id: self.id,
            batch_id: Some(cmd.batch_id),
            movement_type,
            direction,
            quantity: cmd.delta.abs(),
            unit_cost: batch.cost_price(),
            provenance: &cmd.provenance,
            occurred_at: cmd.occurred_at,
        })?;

        Ok(vec![InventoryEvent::BatchAdjusted(BatchAdjusted {
            product_id: self.id,
            batch_id: cmd.batch_id,
            delta: cmd.delta,
            after,
            movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        let batch = self.require_batch(cmd.batch_id)?;
        if !batch.is_active() {
            return Err(DomainError::invariant("cannot reserve from an inactive batch"));
        }
        let after = batch.reserved(cmd.quantity)?;
        Ok(vec![InventoryEvent::StockReserved(BatchHoldChanged {
            product_id: self.id,
            batch_id: cmd.batch_id,
            quantity: cmd.quantity,
            after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<InventoryEvent>, DomainError> {
        let batch = self.require_batch(cmd.batch_id)?;
        let after = batch.released(cmd.quantity)?;
        Ok(vec![InventoryEvent::StockReleased(BatchHoldChanged {
            product_id: self.id,
            batch_id: cmd.batch_id,
            quantity: cmd.quantity,
            after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_new_operation(cmd.operation_id)?;
        let batch = self.require_batch(cmd.batch_id)?;
        let after = batch.released(cmd.quantity)?;
        let movement = StockMovement::record(MovementDraft {
            id: MovementId::derive(cmd.operation_id, 0),
            product_id: self.id,
            batch_id: Some(cmd.batch_id),
            movement_type: MovementType::Return,
            direction: Direction::Incoming,
            quantity: cmd.quantity,
            unit_cost: batch.cost_price(),
            provenance: &cmd.provenance,
            occurred_at: cmd.occurred_at,
        })?;

        Ok(vec![InventoryEvent::StockReturned(StockReturned {
            product_id: self.id,
            batch_id: cmd.batch_id,
            quantity: cmd.quantity,
            after,
            movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_active(
        &self,
        batch_id: BatchId,
        active: bool,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InventoryEvent>, DomainError> {
        let batch = self.require_batch(batch_id)?;
        if batch.is_active() == active {
            return Ok(vec![]);
        }
        let e = BatchStatusChanged {
            product_id: self.id,
            batch_id,
            occurred_at,
        };
        Ok(vec![if active {
            InventoryEvent::BatchActivated(e)
        } else {
            InventoryEvent::BatchDeactivated(e)
        }])
    }

    fn handle_allocate(&self, cmd: &AllocateStock) -> Result<Vec<InventoryEvent>, DomainError> {
        if !matches!(cmd.movement_type, MovementType::Out | MovementType::Sale) {
            return Err(DomainError::validation(format!(
                "allocation must be recorded as OUT or SALE, not {}",
                cmd.movement_type
            )));
        }

        // A replayed allocation is answered by the plan already committed.
        if let Some(done) = self.allocations.get(&cmd.operation_id) {
            if done.requested != cmd.quantity {
                return Err(DomainError::conflict(format!(
                    "operation {} already allocated {} units",
                    cmd.operation_id, done.requested
                )));
            }
            return Ok(vec![]);
        }

        let eligibility = Eligibility {
            exclude_expired_as_of: cmd.exclude_expired.then(|| cmd.occurred_at.date_naive()),
        };
        let plan = self.plan(cmd.quantity, cmd.policy, eligibility)?;

        let movements = plan
            .lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                StockMovement::record(MovementDraft {
                    id: MovementId::derive(cmd.operation_id, idx as u32),
                    product_id: self.id,
                    batch_id: Some(line.batch_id),
                    movement_type: cmd.movement_type,
                    direction: Direction::Outgoing,
                    quantity: line.quantity,
                    unit_cost: line.unit_cost,
                    provenance: &cmd.provenance,
                    occurred_at: cmd.occurred_at,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(vec![InventoryEvent::StockAllocated(StockAllocated {
            product_id: self.id,
            operation_id: cmd.operation_id,
            policy: plan.policy,
            requested: plan.requested,
            lines: plan.lines,
            movements,
            occurred_at: cmd.occurred_at,
        })])
    }
}
