use std::{env, time::Duration};

use crate::BatchError;

const DATABASE_URL_VAR: &str = "RELIABLE_IMPORTS_DATABASE_URL";
const FALLBACK_DATABASE_URL_VAR: &str = "DATABASE_URL";
const MAX_CONNECTIONS_VAR: &str = "RELIABLE_IMPORTS_MAX_CONNECTIONS";

const IN_MEMORY_URL: &str = "sqlite::memory:";
const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for the [`Store`](super::Store).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use reliable_imports::store::StoreConfig;
///
/// let config = StoreConfig::new("sqlite://imports.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(10));
///
/// assert_eq!(config.url(), "sqlite://imports.db");
/// assert!(!config.is_in_memory());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    url: String,
    max_connections: u32,
    busy_timeout: Duration,
    create_if_missing: bool,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            create_if_missing: true,
        }
    }

    /// A private in-memory database, gone when the store is dropped.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_URL)
    }

    /// Reads the configuration from the environment, loading a `.env` file first if present.
    ///
    /// `RELIABLE_IMPORTS_DATABASE_URL` wins over `DATABASE_URL`.
    /// `RELIABLE_IMPORTS_MAX_CONNECTIONS` overrides the pool size.
    pub fn from_env() -> Result<Self, BatchError> {
        dotenvy::dotenv().ok();

        let url = env::var(DATABASE_URL_VAR)
            .or_else(|_| env::var(FALLBACK_DATABASE_URL_VAR))
            .map_err(|_| {
                BatchError::Configuration(format!(
                    "set {DATABASE_URL_VAR} or {FALLBACK_DATABASE_URL_VAR}"
                ))
            })?;

        let mut config = Self::new(url);
        if let Ok(raw) = env::var(MAX_CONNECTIONS_VAR) {
            config.max_connections = parse_max_connections(&raw)?;
        }
        Ok(config)
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn create_if_missing(mut self, create_if_missing: bool) -> Self {
        self.create_if_missing = create_if_missing;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn get_max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn get_busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn get_create_if_missing(&self) -> bool {
        self.create_if_missing
    }

    /// In-memory databases live and die with their connection, so the pool is pinned to one.
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn parse_max_connections(raw: &str) -> Result<u32, BatchError> {
    match raw.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(BatchError::Configuration(format!(
            "{MAX_CONNECTIONS_VAR} must be a positive integer, got `{raw}`"
        ))),
        Ok(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_in_memory() {
        let config = StoreConfig::default();
        assert_eq!(config.url(), "sqlite::memory:");
        assert!(config.is_in_memory());
        assert_eq!(config.get_max_connections(), 4);
        assert!(config.get_create_if_missing());
    }

    #[test]
    fn shared_cache_memory_urls_count_as_in_memory() {
        assert!(StoreConfig::new("sqlite://file:imports?mode=memory&cache=shared").is_in_memory());
        assert!(!StoreConfig::new("sqlite:///var/lib/imports.db").is_in_memory());
    }

    #[test]
    fn setters_override_defaults() {
        let config = StoreConfig::new("sqlite://x.db")
            .max_connections(1)
            .busy_timeout(Duration::from_millis(250))
            .create_if_missing(false);

        assert_eq!(config.get_max_connections(), 1);
        assert_eq!(config.get_busy_timeout(), Duration::from_millis(250));
        assert!(!config.get_create_if_missing());
    }

    #[test]
    fn max_connections_must_be_positive() {
        assert_eq!(parse_max_connections(" 12 ").unwrap(), 12);
        assert!(matches!(
            parse_max_connections("0"),
            Err(BatchError::Configuration(_))
        ));
        assert!(matches!(
            parse_max_connections("many"),
            Err(BatchError::Configuration(_))
        ));
    }
}
