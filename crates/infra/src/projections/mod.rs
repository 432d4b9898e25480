//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event store
//! - **Idempotent**: safe for at-least-once delivery (per-stream cursors)
//! - **Disposable**: never the source of truth for a write decision

pub mod batch_index;
pub mod cursor;
pub mod movement_ledger;
pub mod receipt_directory;
pub mod replay;

pub use batch_index::{BatchIndexProjection, BatchView};
pub use cursor::StreamCursors;
pub use movement_ledger::{LedgerTotals, MovementFilter, MovementLedgerProjection};
pub use receipt_directory::{ReceiptDirectoryProjection, ReceiptFilter, SupplierPerformance};
pub use replay::{catch_up, rebuild};

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockflow_events::EventEnvelope;

use crate::event_store::EventStoreError;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("event does not belong to its envelope stream: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

impl ProjectionError {
    /// A gap in one stream; a catch-up from the store resolves it.
    pub fn is_gap(&self) -> bool {
        matches!(self, ProjectionError::NonMonotonicSequence { .. })
    }
}

/// A read model fed by published envelopes.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply one envelope. Envelopes of foreign aggregate types are ignored.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop all state and cursors.
    fn reset(&self);
}
