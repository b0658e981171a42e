//! Configuration for recordgate models
//!
//! Everything a `Model` would otherwise read from process-wide state lives
//! here and is handed to `Model::new` explicitly.

use std::time::Duration;

use crate::error::{ModelError, Result};

/// Default number of records per page
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Hard ceiling on ids cached per large page
pub const DEFAULT_LARGE_LIMIT: usize = 20_000;

/// Lifetime of a cached id list
pub const DEFAULT_LIST_CACHE_TTL: Duration = Duration::from_secs(60);

/// Coordination-level lifetime of the table lock
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5);

/// Per-model configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    // -------------------------------------------------------------------------
    // Pagination
    // -------------------------------------------------------------------------
    /// Records per page when the request does not say
    pub page_limit: usize,

    /// Maximum ids cached per large page; also bounds page arithmetic
    pub large_limit: usize,

    // -------------------------------------------------------------------------
    // Coordination
    // -------------------------------------------------------------------------
    /// How long a cached id list stays valid
    pub list_cache_ttl: Duration,

    /// Expiry attached to the table lock in the coordination backend
    pub lock_ttl: Duration,

    /// How reads wait for a held lock
    pub read_retry: ReadRetry,

    /// Namespace prepended to every coordination key
    pub key_prefix: String,

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------
    /// Declare schema indexes on construction. Exactly one process in a fleet
    /// should run with this enabled.
    pub build_indexes: bool,

    /// Emit per-field and allocation diagnostics
    pub debug: bool,
}

/// Read-side wait policy while a writer holds the table lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRetry {
    /// Pause between lock polls (zero yields the thread instead of sleeping)
    pub delay: Duration,

    /// Give up after this many polls
    pub max_attempts: u32,

    /// Give up once this much time has passed
    pub timeout: Duration,
}

impl Default for ReadRetry {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1),
            max_attempts: 10_000,
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            large_limit: DEFAULT_LARGE_LIMIT,
            list_cache_ttl: DEFAULT_LIST_CACHE_TTL,
            lock_ttl: DEFAULT_LOCK_TTL,
            read_retry: ReadRetry::default(),
            key_prefix: "recordgate".to_string(),
            build_indexes: true,
            debug: false,
        }
    }
}

impl ModelConfig {
    /// Create a new config builder
    pub fn builder() -> ModelConfigBuilder {
        ModelConfigBuilder::default()
    }
}

/// Builder for ModelConfig
#[derive(Default)]
pub struct ModelConfigBuilder {
    config: ModelConfig,
}

impl ModelConfigBuilder {
    /// Set the default page size
    pub fn page_limit(mut self, limit: usize) -> Self {
        self.config.page_limit = limit;
        self
    }

    /// Set the large-page ceiling
    pub fn large_limit(mut self, limit: usize) -> Self {
        self.config.large_limit = limit;
        self
    }

    /// Set the cached id list lifetime
    pub fn list_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.list_cache_ttl = ttl;
        self
    }

    /// Set the table lock expiry
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.config.lock_ttl = ttl;
        self
    }

    /// Set the read wait policy
    pub fn read_retry(mut self, retry: ReadRetry) -> Self {
        self.config.read_retry = retry;
        self
    }

    /// Set the coordination key namespace
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Enable or disable index declaration on construction
    pub fn build_indexes(mut self, enabled: bool) -> Self {
        self.config.build_indexes = enabled;
        self
    }

    /// Enable or disable debug diagnostics
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    pub fn build(self) -> Result<ModelConfig> {
        let config = self.config;
        if config.page_limit == 0 {
            return Err(ModelError::Config("page_limit must be positive".to_string()));
        }
        if config.large_limit == 0 {
            return Err(ModelError::Config("large_limit must be positive".to_string()));
        }
        if config.read_retry.max_attempts == 0 {
            return Err(ModelError::Config(
                "read_retry.max_attempts must be positive".to_string(),
            ));
        }
        if config.list_cache_ttl.is_zero() {
            return Err(ModelError::Config("list_cache_ttl must be positive".to_string()));
        }
        Ok(config)
    }
}
