#![allow(dead_code)]

pub mod mocks;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::bail;
use reliable_imports::{
    core::{
        context::{ProcessingContext, Row},
        manager::{BatchManager, BatchManagerBuilder},
        model::{Item, ItemResult},
        processor::{BatchProcessor, ItemProcessorResult},
        registry::ProcessorRegistry,
    },
    store::Store,
};
use serde_json::{Value, json};

pub const CUSTOMERS_TABLE: &str =
    "CREATE TABLE customers (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE, name TEXT)";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Imports customers. The records steer the outcome:
/// - `"invalid": true` fails validation,
/// - `"fail": true` raises after writing the row,
/// - `"flaky": true` raises while the shared outage flag is set.
pub struct CustomerDataProcessor {
    outage: Arc<AtomicBool>,
}

impl CustomerDataProcessor {
    pub fn new(outage: Arc<AtomicBool>) -> Self {
        Self { outage }
    }
}

impl BatchProcessor for CustomerDataProcessor {
    fn validate_item(&self, item: &Item, ctx: &mut ProcessingContext) -> bool {
        if item.source_data["invalid"].as_bool().unwrap_or(false) {
            ctx.warning(format!("row {} is invalid", item.item_index));
            return false;
        }
        item.source_data["email"].is_string()
    }

    fn process_item(&self, item: &Item, ctx: &mut ProcessingContext) -> ItemProcessorResult {
        let email = item.source_data["email"].as_str().unwrap_or_default();
        ctx.info(format!("importing {email}"));

        let outcome = ctx.execute(
            "INSERT INTO customers (email, name) VALUES (?, ?)",
            &[email.into(), item.source_data["name"].clone().into()],
        )?;

        if item.source_data["fail"].as_bool().unwrap_or(false) {
            bail!("simulated failure for {email}");
        }
        if item.source_data["flaky"].as_bool().unwrap_or(false)
            && self.outage.load(Ordering::SeqCst)
        {
            bail!("crm unavailable for {email}");
        }

        Ok(ItemResult::new()
            .target("customers", outcome.last_insert_rowid())
            .processed_data(json!({ "email": email })))
    }

    fn on_batch_start(&self, ctx: &mut ProcessingContext) -> anyhow::Result<()> {
        if ctx.is_reprocess() {
            let original = ctx.original_batch_id();
            ctx.info(format!("reprocessing batch {original}"));
        }
        Ok(())
    }
}

pub fn customer_registry(outage: Arc<AtomicBool>) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry.register("customer_data", move || {
        Box::new(CustomerDataProcessor::new(Arc::clone(&outage)))
    });
    registry
}

pub fn manager_with(registry: ProcessorRegistry) -> BatchManager {
    init_logger();
    let store = Store::in_memory().unwrap();
    store.execute_script(CUSTOMERS_TABLE).unwrap();
    BatchManagerBuilder::new()
        .store(Arc::new(store))
        .registry(registry)
        .build()
        .unwrap()
}

/// A manager for `customer_data` whose flaky rows keep failing.
pub fn customers_manager() -> BatchManager {
    manager_with(customer_registry(Arc::new(AtomicBool::new(true))))
}

/// `count` customer records, with the given indexes marked invalid or failing.
pub fn customer_records(count: usize, invalid: &[usize], failing: &[usize]) -> Vec<Value> {
    (0..count)
        .map(|index| {
            let mut record = json!({
                "email": format!("customer{index}@example.com"),
                "name": format!("Customer {index}"),
            });
            if invalid.contains(&index) {
                record["invalid"] = json!(true);
            }
            if failing.contains(&index) {
                record["fail"] = json!(true);
            }
            record
        })
        .collect()
}

pub fn customer_emails(manager: &BatchManager) -> Vec<String> {
    let store = manager.store();
    let rows = store
        .block_on(sqlx::query("SELECT email FROM customers ORDER BY id").fetch_all(store.pool()))
        .unwrap();
    rows.iter().map(|row| row.get("email")).collect()
}
