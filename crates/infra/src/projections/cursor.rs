use std::collections::HashMap;
use std::sync::RwLock;

use stockflow_core::AggregateId;

use super::ProjectionError;

/// Last applied sequence number per aggregate stream.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.get(&aggregate_id).copied())
            .unwrap_or(0)
    }

    /// Run `apply` for the next event of a stream and advance the cursor.
    ///
    /// - Replays (`seq <= cursor`) are skipped without calling `apply`
    /// - The first event seen may carry any positive sequence; after that each
    ///   event must follow its predecessor directly
    /// - The cursor moves only when `apply` succeeds
    ///
    /// The cursor lock is held while `apply` runs, so applies are serialised.
    pub fn advance(
        &self,
        aggregate_id: AggregateId,
        seq: u64,
        apply: impl FnOnce() -> Result<(), ProjectionError>,
    ) -> Result<(), ProjectionError> {
        let Ok(mut cursors) = self.inner.write() else {
            return Ok(());
        };
        let last = cursors.get(&aggregate_id).copied().unwrap_or(0);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    pub fn clear(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}
