/// Batches, items, log entries and the values reported about them.
pub mod model;

/// The contract a batch type implements.
pub mod processor;

/// Batch type to processor resolution.
pub mod registry;

/// The handle processors work through during a run.
pub mod context;

/// Batch creation, processing, reprocessing and reporting.
pub mod manager;
