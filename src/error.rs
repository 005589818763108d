use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error(
        "no processor registered for batch type `{batch_type}` (available types: [{}])",
        .available.join(", ")
    )]
    ProcessorNotFound {
        batch_type: String,
        available: Vec<String>,
    },

    #[error("batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("record source error: {0}")]
    Source(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}
