use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use stockflow_events::{EventBus, EventEnvelope, Subscription};

use crate::event_store::EventStore;
use crate::projections::{Projection, catch_up};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(shutdown: mpsc::Sender<()>, join: thread::JoinHandle<()>) -> Self {
        Self {
            shutdown,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Generic projection worker loop.
///
/// - Subscribes to an event bus
/// - Applies an idempotent handler for each message
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a worker thread that processes messages from the bus subscription.
    ///
    /// `handler` must be idempotent (at-least-once delivery safe). The
    /// subscription is taken before this returns, so nothing published after
    /// the call is missed.
    pub fn spawn<M, B, H, E>(name: &'static str, bus: B, mut handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M> + Send + Sync + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &mut handler))?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }

    /// Feed a projection from the bus, catching up from the store on a gap.
    pub fn spawn_projection<P, B, S>(
        name: &'static str,
        bus: B,
        projection: Arc<P>,
        store: S,
    ) -> io::Result<WorkerHandle>
    where
        P: Projection + ?Sized + 'static,
        B: EventBus<EventEnvelope<JsonValue>> + Send + Sync + 'static,
        S: EventStore + 'static,
    {
        Self::spawn(name, bus, move |env: EventEnvelope<JsonValue>| {
            match projection.apply_envelope(&env) {
                Err(e) if e.is_gap() => {
                    debug!(worker = name, error = %e, "stream gap; catching up from store");
                    catch_up(&*projection, &store).map(|_| ())
                }
                other => other,
            }
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = ?err, "projection worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
