//! Process-wide driver holder
//!
//! The storage layer registers one lazily built driver under [`STORAGE_KEY`]
//! when its configuration names [`SERVER_NAME`]. Construction happens on
//! first use; concurrent first callers share a single connect and version
//! check. A failed construction leaves the slot empty so a later call can
//! retry.

use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::driver::{Backend, DocumentDriver};
use crate::error::Result;

/// Storage server name this driver answers to
pub const SERVER_NAME: &str = "sqldriver";

/// Well-known key the driver is registered under
pub const STORAGE_KEY: &str = "storage";

/// Picks the backend for a configuration
pub type BackendResolver = Arc<dyn Fn(&StorageConfig) -> Result<Backend> + Send + Sync>;

/// Lazily constructed, shared [`DocumentDriver`]
pub struct DriverRegistry {
    config: StorageConfig,
    resolver: BackendResolver,
    slot: OnceCell<Arc<DocumentDriver>>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("key", &STORAGE_KEY)
            .field("identity", &self.config.identity())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl DriverRegistry {
    /// Whether a configuration selects this driver
    pub fn accepts(config: &StorageConfig) -> bool {
        config.server == SERVER_NAME
    }

    /// Registry for a configuration, or `None` when another server is named
    pub fn from_config(config: StorageConfig) -> Option<Self> {
        if !Self::accepts(&config) {
            debug!(server = %config.server, "Storage server is not handled by docsql");
            return None;
        }
        Some(Self {
            config,
            resolver: Arc::new(Backend::for_config),
            slot: OnceCell::new(),
        })
    }

    /// Override how the backend is chosen
    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&StorageConfig) -> Result<Backend> + Send + Sync + 'static,
    {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Key the driver is registered under
    pub fn key(&self) -> &'static str {
        STORAGE_KEY
    }

    /// Configuration the driver is built from
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Whether the driver has been built
    pub fn is_initialized(&self) -> bool {
        self.slot.initialized()
    }

    /// The shared driver, building it on first use
    pub async fn get(&self) -> Result<Arc<DocumentDriver>> {
        let driver = self
            .slot
            .get_or_try_init(|| async {
                info!(
                    key = STORAGE_KEY,
                    identity = %self.config.identity(),
                    "Initializing storage driver"
                );
                let backend = (self.resolver)(&self.config)?;
                let driver = DocumentDriver::connect_with(backend, self.config.clone()).await?;
                Ok::<_, crate::Error>(Arc::new(driver))
            })
            .await?;
        Ok(Arc::clone(driver))
    }
}
