//! Application services: the entry points other subsystems call.
//!
//! Services validate input against collaborators, route commands through the
//! dispatcher and translate committed events into answers. They hold no state
//! of their own.

pub mod inventory;
pub mod receiving;

pub use inventory::{AllocationRequest, BatchIntake, InventoryService};
pub use receiving::{NewLine, NewReceipt, ReceivingService};
