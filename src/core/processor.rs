use crate::core::{
    context::ProcessingContext,
    model::{Item, ItemResult},
};

/// Result of processing one item: an [`ItemResult`] on success, any error otherwise.
pub type ItemProcessorResult = anyhow::Result<ItemResult>;

/// The validation and transformation logic for one batch type.
///
/// Only [`validate_item`](BatchProcessor::validate_item) and
/// [`process_item`](BatchProcessor::process_item) are required. The
/// [`BatchManager`](crate::core::manager::BatchManager) calls the hooks in this order:
///
/// 1. `on_batch_start` once
/// 2. `validate_batch` once; `false` fails the batch before any item is touched
/// 3. for every pending item, in ordinal order:
///    `should_skip_item`, `validate_item`, `process_item`, and `on_item_error` when processing fails
/// 4. `on_batch_complete` once, with `false` if the run was aborted
///
/// Every item runs inside its own transaction: the queries a processor issues
/// through the context while handling an item are committed together with the
/// item's status, or rolled back together when `process_item` fails.
///
/// # Examples
///
/// ```
/// use reliable_imports::core::{
///     context::ProcessingContext,
///     model::{Item, ItemResult},
///     processor::{BatchProcessor, ItemProcessorResult},
/// };
///
/// #[derive(Default)]
/// struct CustomerDataProcessor;
///
/// impl BatchProcessor for CustomerDataProcessor {
///     fn validate_item(&self, item: &Item, ctx: &mut ProcessingContext) -> bool {
///         let has_email = item.source_data["email"].as_str().is_some_and(|e| e.contains('@'));
///         if !has_email {
///             ctx.warning("missing or invalid email");
///         }
///         has_email
///     }
///
///     fn process_item(&self, item: &Item, ctx: &mut ProcessingContext) -> ItemProcessorResult {
///         let email = item.source_data["email"].as_str().unwrap_or_default();
///         let outcome = ctx.execute(
///             "INSERT INTO customers (email) VALUES (?)",
///             &[email.into()],
///         )?;
///         Ok(ItemResult::new().target("customers", outcome.last_insert_rowid()))
///     }
/// }
/// ```
pub trait BatchProcessor {
    /// Checks one item before processing. `false` marks it `skipped` with a warning.
    fn validate_item(&self, item: &Item, ctx: &mut ProcessingContext) -> bool;

    /// Processes one item. Returning an error marks the item `failed` and rolls
    /// back everything done through the context for this item.
    fn process_item(&self, item: &Item, ctx: &mut ProcessingContext) -> ItemProcessorResult;

    /// Validates the batch as a whole, after `on_batch_start`.
    fn validate_batch(&self, _ctx: &mut ProcessingContext) -> bool {
        true
    }

    /// Setup hook, e.g. to load reference data into the context metadata.
    /// An error fails the batch.
    fn on_batch_start(&self, _ctx: &mut ProcessingContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_batch_complete(&self, _ctx: &mut ProcessingContext, _success: bool) {}

    /// Called after a failed item has been recorded. Returning `false` escalates
    /// and aborts the rest of the batch.
    fn on_item_error(
        &self,
        _item: &Item,
        _error: &anyhow::Error,
        _ctx: &mut ProcessingContext,
    ) -> bool {
        true
    }

    /// Skips an item silently, without the validation warning.
    fn should_skip_item(&self, _item: &Item, _ctx: &mut ProcessingContext) -> bool {
        false
    }
}
