mod common;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use common::{customer_emails, customer_records, customer_registry, customers_manager, manager_with};
use reliable_imports::{
    BatchError,
    core::{
        manager::{ItemSelection, NewBatch},
        model::{BatchStatus, ItemStatus},
    },
};
use serde_json::json;

#[test]
fn reprocessing_failed_items_copies_their_payloads() {
    let manager = customers_manager();
    let batch_id = manager
        .create_batch(NewBatch::new("customer_data", customer_records(6, &[4], &[1, 3])))
        .unwrap();
    manager.process_batch(batch_id, true).unwrap();
    let failed_before = manager.get_batch_summary(batch_id).unwrap().failed_items;

    let report = manager
        .reprocess_batch_report(batch_id, ItemSelection::FailedOnly, true)
        .unwrap();

    assert_eq!(report.original_batch_id, batch_id);
    assert_eq!(report.items_reprocessed as u64, failed_before);
    assert_eq!(report.summary.total_items, 2);

    let originals: Vec<_> = manager
        .get_batch_items(batch_id)
        .unwrap()
        .into_iter()
        .filter(|item| item.status == ItemStatus::Failed)
        .map(|item| item.source_data)
        .collect();
    let copies: Vec<_> = manager
        .get_batch_items(report.new_batch_id)
        .unwrap()
        .into_iter()
        .map(|item| (item.item_index, item.source_data))
        .collect();

    assert_eq!(
        copies,
        vec![(0, originals[0].clone()), (1, originals[1].clone())]
    );
}

#[test]
fn reprocess_batch_keeps_lineage_and_context() {
    let manager = customers_manager();
    let batch_id = manager
        .create_batch(
            NewBatch::new("customer_data", customer_records(3, &[], &[2]))
                .source_info(json!({"file": "customers_2024.csv"}))
                .metadata(json!({"imported_by": "nightly"})),
        )
        .unwrap();
    manager.process_batch(batch_id, true).unwrap();

    let new_batch_id = manager
        .reprocess_batch(batch_id, ItemSelection::FailedOnly, true)
        .unwrap();

    let child = manager.get_batch(new_batch_id).unwrap();
    assert_eq!(child.parent_batch_id, Some(batch_id));
    assert!(child.is_reprocess());
    assert_eq!(child.batch_type, "customer_data");
    assert_eq!(child.source_info, json!({"file": "customers_2024.csv"}));
    assert_eq!(child.metadata, json!({"imported_by": "nightly"}));

    let logs = manager.get_batch_logs(new_batch_id).unwrap();
    let expected = format!("reprocessing batch {batch_id}");
    assert!(logs.iter().any(|entry| entry.message == expected));

    // the original is left as it was
    let original = manager.get_batch_summary(batch_id).unwrap();
    assert_eq!(original.failed_items, 1);
    assert_eq!(original.completed_items, 2);
}

#[test]
fn skipped_items_are_not_reprocessed_by_default() {
    let manager = customers_manager();
    let batch_id = manager
        .create_batch(NewBatch::new("customer_data", customer_records(10, &[2, 5, 7], &[])))
        .unwrap();
    manager.process_batch(batch_id, true).unwrap();

    let result = manager.reprocess_batch(batch_id, ItemSelection::FailedOnly, true);
    assert!(matches!(result, Err(BatchError::Validation(_))));

    let report = manager
        .reprocess_batch_report(batch_id, ItemSelection::FailedOrSkipped, true)
        .unwrap();
    assert_eq!(report.items_reprocessed, 3);
    // still invalid
    assert_eq!(report.summary.skipped_items, 3);
}

#[test]
fn selecting_all_items_copies_the_whole_batch() {
    let manager = customers_manager();
    let batch_id = manager
        .create_batch(NewBatch::new("customer_data", customer_records(4, &[0], &[])))
        .unwrap();
    manager.process_batch(batch_id, true).unwrap();

    let report = manager
        .reprocess_batch_report(batch_id, ItemSelection::failed_items_only(false), true)
        .unwrap();

    assert_eq!(report.items_reprocessed, 4);
    assert_eq!(report.summary.total_items, 4);
    // rows 1..3 are already imported, so the unique email makes them fail this time
    assert_eq!(report.summary.failed_items, 3);
    assert_eq!(report.summary.skipped_items, 1);
    assert_eq!(report.status, BatchStatus::Completed);
}

#[test]
fn reprocessing_after_an_outage_recovers_the_failed_rows() {
    let outage = Arc::new(AtomicBool::new(true));
    let manager = manager_with(customer_registry(Arc::clone(&outage)));
    let mut records = customer_records(4, &[], &[]);
    records[1]["flaky"] = json!(true);
    records[2]["flaky"] = json!(true);
    let batch_id = manager
        .create_batch(NewBatch::new("customer_data", records))
        .unwrap();

    let first = manager.process_batch(batch_id, true).unwrap();
    assert_eq!(first.failed_items, 2);

    outage.store(false, Ordering::SeqCst);
    let report = manager
        .reprocess_batch_report(batch_id, ItemSelection::FailedOnly, true)
        .unwrap();

    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(report.summary.completed_items, 2);
    assert_eq!(report.summary.success_rate(), 100.0);
    assert_eq!(customer_emails(&manager).len(), 4);
}

#[test]
fn parent_must_have_the_same_batch_type() {
    let outage = Arc::new(AtomicBool::new(true));
    let mut registry = customer_registry(Arc::clone(&outage));
    registry.register("supplier_data", move || {
        Box::new(common::CustomerDataProcessor::new(Arc::clone(&outage)))
    });
    let manager = manager_with(registry);
    let customers = manager
        .create_batch(NewBatch::new("customer_data", customer_records(1, &[], &[])))
        .unwrap();

    let result = manager.create_batch(
        NewBatch::new("supplier_data", customer_records(1, &[], &[])).parent(customers),
    );

    assert!(matches!(result, Err(BatchError::Validation(_))));
    assert_eq!(
        manager
            .list_batches(&Default::default())
            .unwrap()
            .len(),
        1
    );
}
