//! Replaying the event store through projections.

use tracing::info;

use crate::event_store::EventStore;

use super::{Projection, ProjectionError};

/// Reset a projection and replay every stored event through it.
///
/// Returns the number of envelopes offered to the projection.
pub fn rebuild<P, S>(projection: &P, store: &S) -> Result<usize, ProjectionError>
where
    P: Projection + ?Sized,
    S: EventStore + ?Sized,
{
    projection.reset();
    let count = replay_all(projection, store)?;
    info!(projection = projection.name(), events = count, "projection rebuilt");
    Ok(count)
}

/// Offer every stored event to a projection without resetting it.
///
/// Cursors skip what was already applied, so this fills gaps left by missed
/// deliveries.
pub fn catch_up<P, S>(projection: &P, store: &S) -> Result<usize, ProjectionError>
where
    P: Projection + ?Sized,
    S: EventStore + ?Sized,
{
    replay_all(projection, store)
}

fn replay_all<P, S>(projection: &P, store: &S) -> Result<usize, ProjectionError>
where
    P: Projection + ?Sized,
    S: EventStore + ?Sized,
{
    // Commit order keeps every stream in sequence order.
    let events = store.load_all()?;
    for stored in &events {
        projection.apply_envelope(&stored.to_envelope())?;
    }
    Ok(events.len())
}
