use std::sync::Arc;

use anyhow::bail;
use log::info;
use reliable_imports::{
    core::{
        context::{ProcessingContext, Row},
        manager::{BatchManagerBuilder, ItemSelection, NewBatch},
        model::{Item, ItemResult},
        processor::{BatchProcessor, ItemProcessorResult},
        registry::{ProcessorCatalog, ProcessorRegistry},
    },
    source::csv::CsvRecordReaderBuilder,
    store::{Store, StoreConfig},
    BatchError,
};
use serde_json::json;

const REQUIRED_FIELDS: [&str; 3] = ["email", "first_name", "last_name"];

#[derive(Default)]
struct CustomerDataProcessor;

impl BatchProcessor for CustomerDataProcessor {
    fn validate_item(&self, item: &Item, ctx: &mut ProcessingContext) -> bool {
        let data = &item.source_data;

        for field in REQUIRED_FIELDS {
            if data[field].as_str().is_none_or(str::is_empty) {
                ctx.warning(format!("Missing required field: {field}"));
                return false;
            }
        }

        let email = data["email"].as_str().unwrap_or_default();
        if !email.contains('@') {
            ctx.warning(format!("Invalid email: {email}"));
            return false;
        }

        true
    }

    fn process_item(&self, item: &Item, ctx: &mut ProcessingContext) -> ItemProcessorResult {
        let data = &item.source_data;
        let email = data["email"].as_str().unwrap_or_default();

        if data["phone"].as_str().is_some_and(|phone| phone.starts_with("000")) {
            bail!("phone number {} rejected by the CRM", data["phone"]);
        }

        ctx.info(format!("Processing customer: {email}"));

        let existing = ctx.fetch_optional("SELECT id FROM customers WHERE email = ?", &[email.into()])?;

        let customer_id: i64 = match existing {
            Some(row) => {
                let customer_id: i64 = row.try_get("id")?;
                ctx.execute(
                    "UPDATE customers SET first_name = ?, last_name = ?, phone = ? WHERE id = ?",
                    &[
                        data["first_name"].clone().into(),
                        data["last_name"].clone().into(),
                        data["phone"].clone().into(),
                        customer_id.into(),
                    ],
                )?;
                ctx.info(format!("Updated existing customer: {customer_id}"));
                customer_id
            }
            None => {
                let outcome = ctx.execute(
                    "INSERT INTO customers (email, first_name, last_name, phone) VALUES (?, ?, ?, ?)",
                    &[
                        email.into(),
                        data["first_name"].clone().into(),
                        data["last_name"].clone().into(),
                        data["phone"].clone().into(),
                    ],
                )?;
                ctx.info(format!("Created new customer: {}", outcome.last_insert_rowid()));
                outcome.last_insert_rowid()
            }
        };

        Ok(ItemResult::new().target("customers", customer_id).processed_data(json!({
            "email": email,
            "name": format!("{} {}", data["first_name"].as_str().unwrap_or_default(), data["last_name"].as_str().unwrap_or_default()),
        })))
    }

    fn on_batch_start(&self, ctx: &mut ProcessingContext) -> anyhow::Result<()> {
        ctx.info("Starting customer data import batch");
        ctx.execute(
            "CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                phone TEXT
            )",
            &[],
        )?;
        Ok(())
    }

    fn on_batch_complete(&self, ctx: &mut ProcessingContext, success: bool) {
        if success {
            ctx.info("Customer import batch completed successfully");
        } else {
            ctx.error("Customer import batch completed with errors");
        }
    }
}

fn main() -> Result<(), BatchError> {
    env_logger::init();

    let config = StoreConfig::from_env().unwrap_or_else(|_| StoreConfig::in_memory());
    let store = Arc::new(Store::connect(&config)?);

    let mut registry = ProcessorRegistry::new();
    registry.discover(ProcessorCatalog::new().with::<CustomerDataProcessor>());

    let manager = BatchManagerBuilder::new()
        .store(store)
        .registry(registry)
        .build()?;

    let csv = "email,first_name,last_name,phone
    john@example.com,John,Doe,555-0100
    jane@example.com,Jane,Smith,555-0101
    invalid-email,Bad,Data,
    bob@example.com,Bob,Johnson,000-0000";

    let records = CsvRecordReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv.as_bytes())
        .read_all()?;

    let batch_id = manager.create_batch(
        NewBatch::new("customer_data", records)
            .source_info(json!({"source": "demo", "file": "sample_data.csv"}))
            .metadata(json!({"imported_by": "demo_script"})),
    )?;
    info!("Created batch: {}", batch_id);

    let summary = manager.process_batch(batch_id, true)?;
    info!(
        "Status: {}, total: {}, completed: {}, failed: {}, skipped: {}, success rate: {:.1}%",
        summary.status,
        summary.total_items,
        summary.completed_items,
        summary.failed_items,
        summary.skipped_items,
        summary.success_rate()
    );
    if let Some(throughput) = summary.items_per_second() {
        info!("Throughput: {:.1} items/sec", throughput);
    }

    if summary.failed_items > 0 {
        info!("Reprocessing {} failed items", summary.failed_items);
        let report = manager.reprocess_batch_report(batch_id, ItemSelection::FailedOnly, true)?;
        info!(
            "Reprocess batch {}: status {}, completed {}/{}",
            report.new_batch_id,
            report.status,
            report.summary.completed_items,
            report.summary.total_items
        );
    }

    for failed in manager.failed_batches()? {
        info!("Failed batch {}: {:?}", failed.id, failed.error_message);
    }

    Ok(())
}
