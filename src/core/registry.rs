use std::{any, collections::BTreeMap, fmt};

use log::debug;

use crate::{BatchError, core::processor::BatchProcessor};

/// Builds a fresh processor for every run.
pub type ProcessorFactory = Box<dyn Fn() -> Box<dyn BatchProcessor>>;

const PROCESSOR_SUFFIX: &str = "Processor";

/// Resolves a batch type to the processor that handles it.
///
/// Registration is explicit. The naming convention (`CustomerDataProcessor`
/// handles `customer_data`) is only a helper on top of it, see
/// [`register_by_convention`](ProcessorRegistry::register_by_convention) and
/// [`discover`](ProcessorRegistry::discover).
///
/// # Examples
///
/// ```
/// # use reliable_imports::core::{context::ProcessingContext, model::{Item, ItemResult}};
/// # use reliable_imports::core::processor::{BatchProcessor, ItemProcessorResult};
/// use reliable_imports::core::registry::ProcessorRegistry;
///
/// #[derive(Default)]
/// struct CustomerDataProcessor;
/// # impl BatchProcessor for CustomerDataProcessor {
/// #     fn validate_item(&self, _: &Item, _: &mut ProcessingContext) -> bool { true }
/// #     fn process_item(&self, _: &Item, _: &mut ProcessingContext) -> ItemProcessorResult {
/// #         Ok(ItemResult::new())
/// #     }
/// # }
///
/// let mut registry = ProcessorRegistry::new();
/// registry.register("customers", || Box::new(CustomerDataProcessor));
/// let derived = registry.register_by_convention::<CustomerDataProcessor>();
///
/// assert_eq!(derived, "customer_data");
/// assert_eq!(registry.batch_types(), vec!["customer_data", "customers"]);
/// assert!(registry.resolve("orders").is_err());
/// ```
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `batch_type`.
    pub fn register<F>(&mut self, batch_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn BatchProcessor> + 'static,
    {
        let batch_type = batch_type.into();
        if self
            .factories
            .insert(batch_type.clone(), Box::new(factory))
            .is_some()
        {
            debug!("Replaced processor for batch type: {}", batch_type);
        } else {
            debug!("Registered processor for batch type: {}", batch_type);
        }
        self
    }

    /// Registers a `Default`-constructible processor type under an explicit batch type.
    pub fn register_type<P>(&mut self, batch_type: impl Into<String>) -> &mut Self
    where
        P: BatchProcessor + Default + 'static,
    {
        self.register(batch_type, || Box::new(P::default()))
    }

    /// Registers `P` under the batch type derived from its type name and returns that batch type.
    pub fn register_by_convention<P>(&mut self) -> String
    where
        P: BatchProcessor + Default + 'static,
    {
        let batch_type = batch_type_from_name(short_type_name::<P>());
        self.register_type::<P>(batch_type.clone());
        batch_type
    }

    /// Registers every entry of `catalog` under its convention-derived batch type.
    /// Returns how many processors were registered.
    pub fn discover(&mut self, catalog: ProcessorCatalog) -> usize {
        let mut count = 0;
        for (declared_name, factory) in catalog.entries {
            let batch_type = batch_type_from_name(&declared_name);
            if batch_type.is_empty() {
                debug!("Ignoring processor with unusable name: {}", declared_name);
                continue;
            }
            self.factories.insert(batch_type.clone(), factory);
            debug!("Discovered {} for batch type: {}", declared_name, batch_type);
            count += 1;
        }
        count
    }

    pub fn has(&self, batch_type: &str) -> bool {
        self.factories.contains_key(batch_type)
    }

    /// Known batch types, sorted.
    pub fn batch_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Fails with [`BatchError::ProcessorNotFound`] listing the known types.
    pub fn ensure_registered(&self, batch_type: &str) -> Result<(), BatchError> {
        if self.has(batch_type) {
            Ok(())
        } else {
            Err(BatchError::ProcessorNotFound {
                batch_type: batch_type.to_string(),
                available: self.batch_types(),
            })
        }
    }

    pub fn resolve(&self, batch_type: &str) -> Result<Box<dyn BatchProcessor>, BatchError> {
        self.ensure_registered(batch_type)?;
        self.factories
            .get(batch_type)
            .map(|factory| factory())
            .ok_or_else(|| BatchError::ProcessorNotFound {
                batch_type: batch_type.to_string(),
                available: self.batch_types(),
            })
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("batch_types", &self.batch_types())
            .finish()
    }
}

/// A set of processor types offered for convention-based discovery.
#[derive(Default)]
pub struct ProcessorCatalog {
    entries: Vec<(String, ProcessorFactory)>,
}

impl ProcessorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `P`, declared under its Rust type name.
    pub fn with<P>(self) -> Self
    where
        P: BatchProcessor + Default + 'static,
    {
        self.with_named(short_type_name::<P>(), || Box::new(P::default()))
    }

    /// Adds a factory under an explicit declared name, e.g. `"InvoiceLineProcessor"`.
    pub fn with_named<F>(mut self, declared_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn BatchProcessor> + 'static,
    {
        self.entries.push((declared_name.into(), Box::new(factory)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Last path segment of the type name, without generic arguments.
fn short_type_name<P: ?Sized>() -> &'static str {
    let full = any::type_name::<P>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// Derives a batch type from a declared processor name.
///
/// The `Processor` suffix is stripped and the rest converted from CamelCase to
/// snake_case: `CustomerDataProcessor` becomes `customer_data`, `HTTPLogProcessor`
/// becomes `http_log`.
pub fn batch_type_from_name(declared_name: &str) -> String {
    let name = declared_name.trim();
    let name = match name.strip_suffix(PROCESSOR_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem,
        _ => name,
    };
    camel_to_snake(name)
}

/// Two passes: a word starting with an uppercase letter followed by lowercase
/// letters is split from whatever precedes it, then a lowercase letter or digit
/// is split from a following uppercase letter. Existing underscores are kept,
/// so `Snake_Case` becomes `snake__case`.
fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();

    let mut words = Vec::with_capacity(chars.len() + 4);
    let mut index = 0;
    while index < chars.len() {
        let starts_word = chars.get(index + 1).is_some_and(char::is_ascii_uppercase)
            && chars.get(index + 2).is_some_and(char::is_ascii_lowercase);
        words.push(chars[index]);
        index += 1;
        if starts_word {
            words.push('_');
            words.push(chars[index]);
            index += 1;
            while index < chars.len() && chars[index].is_ascii_lowercase() {
                words.push(chars[index]);
                index += 1;
            }
        }
    }

    let mut snake = String::with_capacity(words.len() + 4);
    let mut index = 0;
    while index < words.len() {
        let current = words[index];
        snake.push(current);
        index += 1;
        if (current.is_ascii_lowercase() || current.is_ascii_digit())
            && words.get(index).is_some_and(char::is_ascii_uppercase)
        {
            snake.push('_');
            snake.push(words[index]);
            index += 1;
        }
    }

    snake.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        context::ProcessingContext,
        model::{Item, ItemResult},
        processor::ItemProcessorResult,
    };

    #[derive(Default)]
    struct CustomerDataProcessor;

    impl BatchProcessor for CustomerDataProcessor {
        fn validate_item(&self, _item: &Item, _ctx: &mut ProcessingContext) -> bool {
            true
        }

        fn process_item(&self, _item: &Item, _ctx: &mut ProcessingContext) -> ItemProcessorResult {
            Ok(ItemResult::new())
        }
    }

    #[derive(Default)]
    struct InvoiceLinesProcessor;

    impl BatchProcessor for InvoiceLinesProcessor {
        fn validate_item(&self, _item: &Item, _ctx: &mut ProcessingContext) -> bool {
            false
        }

        fn process_item(&self, _item: &Item, _ctx: &mut ProcessingContext) -> ItemProcessorResult {
            Ok(ItemResult::new())
        }
    }

    #[test]
    fn derives_batch_types_from_names() {
        assert_eq!(batch_type_from_name("CustomerDataProcessor"), "customer_data");
        assert_eq!(batch_type_from_name("HTTPLogProcessor"), "http_log");
        assert_eq!(batch_type_from_name("Orders"), "orders");
        assert_eq!(batch_type_from_name("Invoice2LineProcessor"), "invoice2_line");
        assert_eq!(batch_type_from_name("getHTTPResponseCode"), "get_http_response_code");
        assert_eq!(batch_type_from_name("Processor"), "processor");
        assert_eq!(batch_type_from_name("Snake_CaseProcessor"), "snake__case");
        assert_eq!(batch_type_from_name("aBcDeProcessor"), "a_bc_de");
    }

    #[test]
    fn short_type_name_drops_the_module_path() {
        assert_eq!(short_type_name::<CustomerDataProcessor>(), "CustomerDataProcessor");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }

    #[test]
    fn unknown_batch_type_lists_known_types() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register_type::<CustomerDataProcessor>("customer_data")
            .register_type::<InvoiceLinesProcessor>("invoice_lines");

        let err = registry.resolve("orders").err().unwrap();

        match &err {
            BatchError::ProcessorNotFound {
                batch_type,
                available,
            } => {
                assert_eq!(batch_type, "orders");
                assert_eq!(available, &vec!["customer_data", "invoice_lines"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("customer_data, invoice_lines"));
    }

    #[test]
    fn discover_registers_catalog_by_convention() {
        let mut registry = ProcessorRegistry::new();
        let catalog = ProcessorCatalog::new()
            .with::<CustomerDataProcessor>()
            .with::<InvoiceLinesProcessor>()
            .with_named("", || Box::new(CustomerDataProcessor));
        assert_eq!(catalog.len(), 3);

        let count = registry.discover(catalog);

        assert_eq!(count, 2);
        assert!(registry.has("customer_data"));
        assert!(registry.has("invoice_lines"));
        assert!(registry.resolve("invoice_lines").is_ok());
    }

    #[test]
    fn register_replaces_previous_factory() {
        let mut registry = ProcessorRegistry::new();
        registry.register("customer_data", || Box::new(InvoiceLinesProcessor));
        registry.register("customer_data", || Box::new(CustomerDataProcessor));

        assert_eq!(registry.batch_types(), vec!["customer_data"]);
        assert!(format!("{registry:?}").contains("customer_data"));
    }
}
