//! Background threads that keep projections current.

pub mod projection_worker;

pub use projection_worker::{ProjectionWorker, WorkerHandle, WorkerOptions, partition_of};
