//! Inventory domain module (event-sourced).
//!
//! Batch-level stock, the append-only movement ledger, and the allocation
//! engine, implemented purely as deterministic domain logic (no IO, no
//! storage). All batch mutations of one product go through the
//! [`ProductStock`] aggregate.

pub mod allocation;
pub mod batch;
pub mod level;
pub mod movement;
pub mod stock;

pub use allocation::{
    AllocationLine, AllocationPlan, Eligibility, IssuancePolicy, candidates, plan_allocation,
    weighted_average_cost,
};
pub use batch::{BatchId, NewBatch, Quantities, StockBatch};
pub use level::StockLevel;
pub use movement::{
    Direction, MovementDraft, MovementId, MovementType, Provenance, Reference, StockMovement,
};
pub use stock::{
    ActivateBatch, AdjustBatch, AllocateStock, BatchAdjusted, BatchAugmented, BatchHoldChanged,
    BatchReceived, BatchStatusChanged, DeactivateBatch, InventoryCommand, InventoryEvent,
    ProductStock, ReceiveBatch, ReleaseStock, ReserveStock, ReturnStock, StockAllocated,
    StockReturned,
};
