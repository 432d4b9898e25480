//! Background workers (bus consumers and periodic scans).

pub mod projection_worker;

pub use projection_worker::{ProjectionWorker, WorkerHandle};
