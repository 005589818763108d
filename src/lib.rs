#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Reliable Imports for Rust

 A batch/item lifecycle engine for importing externally supplied records.
 Every record of a batch is stored with its original payload and its own
 outcome, processed inside its own transaction, and can be reprocessed later
 without going back to the source it came from.

 ## Core Concepts

- **Batch:** a durable unit of work grouping the records submitted together. It goes
  `pending → processing → completed | failed`.
- **Item:** one record of a batch, carrying its verbatim source payload and its own status
  (`pending → processing → completed | failed | skipped`).
- **BatchProcessor:** the validation and transformation logic for one batch type.
- **ProcessorRegistry:** resolves a batch type to its processor, by explicit registration or
  by naming convention (`CustomerDataProcessor` handles `customer_data`).
- **ProcessingContext:** what a processor works through during a run: database access scoped
  to the current item's transaction, durable logging, run-scoped metadata, reprocess awareness.
- **BatchManager:** creates batches, processes them, reprocesses failures into linked child
  batches, and reports summaries.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| csv           | Enables the CSV record source                                 |
| json          | Enables the JSON record source                                |
| full          | Enables all available features                                |

 ## Getting Started

```rust
# use std::sync::Arc;
# use serde_json::json;
# use reliable_imports::{
#     core::{
#         context::ProcessingContext,
#         manager::{BatchManagerBuilder, ItemSelection, NewBatch},
#         model::{BatchStatus, Item, ItemResult},
#         processor::{BatchProcessor, ItemProcessorResult},
#         registry::ProcessorRegistry,
#     },
#     store::Store,
#     BatchError,
# };
#[derive(Default)]
struct CustomerDataProcessor;

impl BatchProcessor for CustomerDataProcessor {
    fn validate_item(&self, item: &Item, ctx: &mut ProcessingContext) -> bool {
        let valid = item.source_data["email"].as_str().is_some_and(|email| email.contains('@'));
        if !valid {
            ctx.warning(format!("invalid email in row {}", item.item_index));
        }
        valid
    }

    fn process_item(&self, item: &Item, ctx: &mut ProcessingContext) -> ItemProcessorResult {
        let outcome = ctx.execute(
            "INSERT INTO customers (email) VALUES (?)",
            &[item.source_data["email"].clone().into()],
        )?;
        Ok(ItemResult::new().target("customers", outcome.last_insert_rowid()))
    }
}

fn main() -> Result<(), BatchError> {
    let store = Arc::new(Store::in_memory()?);
    store.execute_script("CREATE TABLE customers (id INTEGER PRIMARY KEY, email TEXT UNIQUE NOT NULL)")?;

    let mut registry = ProcessorRegistry::new();
    registry.register_by_convention::<CustomerDataProcessor>();

    let manager = BatchManagerBuilder::new().store(store).registry(registry).build()?;

    let batch_id = manager.create_batch(
        NewBatch::new(
            "customer_data",
            vec![
                json!({"email": "ada@example.com"}),
                json!({"email": "ada@example.com"}),
                json!({"email": "not-an-email"}),
            ],
        )
        .source_info(json!({"file": "customers.csv"})),
    )?;

    let summary = manager.process_batch(batch_id, true)?;
    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!((summary.completed_items, summary.failed_items, summary.skipped_items), (1, 1, 1));

    // the duplicate fails again: the first row is still in the table
    let report = manager.reprocess_batch_report(batch_id, ItemSelection::FailedOnly, true)?;
    assert_eq!(report.items_reprocessed, 1);
    assert_eq!(report.summary.failed_items, 1);

    Ok(())
}
```

 ## Configuration

 [`store::StoreConfig::from_env`] reads `RELIABLE_IMPORTS_DATABASE_URL` (or `DATABASE_URL`) and
 `RELIABLE_IMPORTS_MAX_CONNECTIONS`, loading a `.env` file first when one exists.

 ## Demos
+ `demos/customer_import.rs`: CSV customer import with a failing row and its reprocessing
  (`cargo run --example customer_import --features csv`).
 */

/// Batch lifecycle engine
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// SQLite persistence of batches, items and logs
pub mod store;

/// Record sources (for example: csv and json readers)
pub mod source;
