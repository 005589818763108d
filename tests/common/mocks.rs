//! Mock version of a batch processor
use mockall::mock;

use reliable_imports::core::{
    context::ProcessingContext,
    model::Item,
    processor::{BatchProcessor, ItemProcessorResult},
};

mock! {
    pub Processor {}
    impl BatchProcessor for Processor {
        fn validate_item(&self, item: &Item, ctx: &mut ProcessingContext) -> bool;
        fn process_item(&self, item: &Item, ctx: &mut ProcessingContext) -> ItemProcessorResult;
        fn validate_batch(&self, ctx: &mut ProcessingContext) -> bool;
        fn on_batch_start(&self, ctx: &mut ProcessingContext) -> anyhow::Result<()>;
        fn on_batch_complete(&self, ctx: &mut ProcessingContext, success: bool);
        fn on_item_error(
            &self,
            item: &Item,
            error: &anyhow::Error,
            ctx: &mut ProcessingContext,
        ) -> bool;
        fn should_skip_item(&self, item: &Item, ctx: &mut ProcessingContext) -> bool;
    }
}
