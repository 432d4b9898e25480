//! Command execution pipeline (application-level orchestration).
//!
//! This module implements the **command dispatch pattern** for event-sourced aggregates.
//! It orchestrates the full lifecycle: loading history, rehydrating state, handling commands,
//! persisting events, and publishing to the event bus.
//!
//! ## Command Execution Flow
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (for projections, workers, etc.)
//! ```
//!
//! Step 4 is what serialises writers of one stream: two commands planned against
//! the same version cannot both commit. [`CommandDispatcher::dispatch_with_retry`]
//! turns that into a compare-and-swap loop that re-plans on fresh state.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use stockflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion};
use stockflow_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The aggregate rejected the command (validation, stock, workflow, ...).
    #[error(transparent)]
    Domain(DomainError),
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    /// Every retry lost the race against another writer.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    /// The domain error behind this failure, if it is one.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Domain(value)
    }
}

/// Result of a committed command: the typed events and their stored form.
#[derive(Debug, Clone)]
pub struct Committed<E> {
    pub events: Vec<E>,
    pub stored: Vec<StoredEvent>,
}

impl<E> Committed<E> {
    fn nothing() -> Self {
        Self {
            events: vec![],
            stored: vec![],
        }
    }

    /// The command was accepted without producing events.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// ## Execution Guarantees
///
/// - **Atomicity**: events are persisted before publication (if append fails, nothing is published)
/// - **Consistency**: optimistic concurrency is enforced on every append
/// - **Isolation**: each command operates on a single aggregate instance
///
/// ## At-Least-Once Delivery
///
/// If event publication fails after a successful append, the error is returned to the caller.
/// The events are already persisted; projections catch up from the store.
///
/// ## Generic Parameters
///
/// - `S`: Event store implementation (must implement `EventStore` trait)
/// - `B`: Event bus implementation (must implement `EventBus` trait)
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its full stream (strongly consistent read).
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full event-sourcing pipeline, once.
    ///
    /// 1. **Load + rehydrate** the aggregate from its stream
    /// 2. **Decide**: `aggregate.handle(command)` (pure, no mutation)
    /// 3. **Persist** with `ExpectedVersion::Exact(loaded version)`
    /// 4. **Publish** committed envelopes
    ///
    /// A concurrent writer makes step 3 fail with `DispatchError::Concurrency`.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Committed<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockflow_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate = self.load(aggregate_id, make_aggregate)?;
        let expected = ExpectedVersion::Exact(aggregate.version());

        let decided = aggregate.handle(command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(Committed::nothing());
        }

        let stored = self.commit(aggregate_id, aggregate_type, expected, &decided)?;
        Ok(Committed {
            events: decided,
            stored,
        })
    }

    /// Dispatch, re-planning on fresh state after each lost race.
    ///
    /// `max_retries` counts re-attempts after the first try. Domain rejections
    /// are returned immediately; they are decisions, not races.
    pub fn dispatch_with_retry<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
        max_retries: u32,
    ) -> Result<Committed<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockflow_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.dispatch(aggregate_id, aggregate_type, command, &make_aggregate) {
                Err(DispatchError::Concurrency(msg)) if attempt <= max_retries => {
                    debug!(
                        aggregate_id = %aggregate_id,
                        aggregate_type,
                        attempt,
                        reason = %msg,
                        "stream moved underneath command; re-planning"
                    );
                }
                Err(DispatchError::Concurrency(last)) => {
                    warn!(
                        aggregate_id = %aggregate_id,
                        aggregate_type,
                        attempts = attempt,
                        "concurrency retries exhausted"
                    );
                    return Err(DispatchError::RetriesExhausted {
                        attempts: attempt,
                        last,
                    });
                }
                other => return other,
            }
        }
    }

    /// Append already-decided events under `expected`, then publish them.
    ///
    /// For callers that must do other work between deciding and committing.
    pub fn commit<E>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: ExpectedVersion,
        events: &[E],
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        E: stockflow_events::Event + Serialize,
    {
        let uncommitted = events
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // The stream must belong to the aggregate and be strictly increasing.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockflow_core::ProductId;
    use stockflow_events::InMemoryEventBus;
    use stockflow_inventory::{
        BatchId, InventoryCommand, InventoryEvent, ProductStock, Provenance, ReceiveBatch,
        ReserveStock,
    };

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn setup() -> Dispatcher {
        CommandDispatcher::new(InMemoryEventStore::new(), Arc::new(InMemoryEventBus::new()))
    }

    fn receive(product_id: ProductId, quantity: i64) -> (BatchId, InventoryCommand) {
        let batch_id = BatchId::new();
        let cmd = InventoryCommand::ReceiveBatch(ReceiveBatch {
            product_id,
            batch_id,
            operation_id: Uuid::now_v7(),
            quantity,
            cost_price: dec!(1.00),
            lot_code: None,
            supplier_id: None,
            manufacture_date: None,
            expiry_date: None,
            provenance: Provenance::default(),
            occurred_at: Utc::now(),
        });
        (batch_id, cmd)
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let dispatcher = setup();
        let sub = dispatcher.bus().subscribe();
        let product_id = ProductId::new(AggregateId::new());
        let (_, cmd) = receive(product_id, 5);

        let committed = dispatcher
            .dispatch(product_id.0, ProductStock::AGGREGATE_TYPE, &cmd, |id| {
                ProductStock::empty(ProductId::new(id))
            })
            .unwrap();

        assert_eq!(committed.stored.len(), 1);
        assert!(matches!(committed.events[0], InventoryEvent::BatchReceived(_)));
        let env = sub.try_recv().unwrap();
        assert_eq!(env.sequence_number(), 1);
        assert_eq!(env.event_type(), "inventory.stock.batch_received");

        let stock: ProductStock = dispatcher
            .load(product_id.0, |id| ProductStock::empty(ProductId::new(id)))
            .unwrap();
        assert_eq!(stock.version(), 1);
    }

    #[test]
    fn domain_rejection_is_surfaced_untouched() {
        let dispatcher = setup();
        let product_id = ProductId::new(AggregateId::new());
        let (batch_id, cmd) = receive(product_id, 5);
        dispatcher
            .dispatch(product_id.0, ProductStock::AGGREGATE_TYPE, &cmd, |id| {
                ProductStock::empty(ProductId::new(id))
            })
            .unwrap();

        let err = dispatcher
            .dispatch_with_retry(
                product_id.0,
                ProductStock::AGGREGATE_TYPE,
                &InventoryCommand::ReserveStock(ReserveStock {
                    product_id,
                    batch_id,
                    quantity: 6,
                    occurred_at: Utc::now(),
                }),
                |id| ProductStock::empty(ProductId::new(id)),
                3,
            )
            .unwrap_err();

        assert_eq!(
            err.domain(),
            Some(&DomainError::insufficient_stock(6, 5))
        );
    }

    #[test]
    fn stale_commit_is_a_concurrency_error() {
        let dispatcher = setup();
        let product_id = ProductId::new(AggregateId::new());
        let (_, cmd) = receive(product_id, 5);

        let stock = ProductStock::empty(product_id);
        let decided = stock.handle(&cmd).unwrap();
        dispatcher
            .commit(product_id.0, ProductStock::AGGREGATE_TYPE, ExpectedVersion::Exact(0), &decided)
            .unwrap();

        let err = dispatcher
            .commit(product_id.0, ProductStock::AGGREGATE_TYPE, ExpectedVersion::Exact(0), &decided)
            .unwrap_err();
        assert!(err.is_concurrency());
    }
}
