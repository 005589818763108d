//! Record sources turning raw input into the records a batch is created from.
//!
//! Each record becomes the verbatim source payload of one item, so whatever a
//! source produces here is exactly what a processor, and later a reprocess
//! batch, gets to see.

/// CSV input: one record per row.
#[cfg(feature = "csv")]
pub mod csv;

/// JSON input: a top-level array of records.
#[cfg(feature = "json")]
pub mod json;
