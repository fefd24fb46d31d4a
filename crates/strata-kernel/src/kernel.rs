//! The kernel: one store, its subscribers, and the tool engine over them.
//!
//! Every component shares the same [`PathStore`] through an `Arc`, so a tool
//! mutation is visible to the next read and fans out to the subscription
//! registry from the engine.

use std::fmt;

use tracing::{debug, info};

use crate::config::{ConfigError, StrataConfig};
use crate::store::{
    Address, NodePath, PathStore, Resolved, SharedPathStore, StoreError, StoreResult,
    render_uri, shared_path_store,
};
use crate::subscriptions::{SharedSubscriptionRegistry, shared_subscription_registry};
use crate::tools::ToolEngine;

/// Error type for kernel construction.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("seeding store: {0}")]
    Seed(#[from] StoreError),
}

/// In-memory document server state.
#[derive(Clone)]
pub struct Kernel {
    config: StrataConfig,
    store: SharedPathStore,
    subscriptions: SharedSubscriptionRegistry,
    engine: ToolEngine,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("scheme", &self.config.scheme)
            .field("engine", &self.engine)
            .finish()
    }
}

impl Kernel {
    /// Build a kernel and seed its store from `config.seed`.
    pub fn new(config: StrataConfig) -> Result<Self, KernelError> {
        config.validate()?;
        let settings = config.tool_settings()?;

        let store = shared_path_store();
        let subscriptions = shared_subscription_registry();
        let engine = ToolEngine::new(store.clone(), subscriptions.clone(), settings);

        let kernel = Self {
            config,
            store,
            subscriptions,
            engine,
        };
        let seeded = kernel.seed()?;
        info!(scheme = %kernel.config.scheme, seeded, "kernel ready");
        Ok(kernel)
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn scheme(&self) -> &str {
        &self.config.scheme
    }

    pub fn store(&self) -> &PathStore {
        &self.store
    }

    pub fn shared_store(&self) -> SharedPathStore {
        self.store.clone()
    }

    pub fn subscriptions(&self) -> &SharedSubscriptionRegistry {
        &self.subscriptions
    }

    pub fn engine(&self) -> &ToolEngine {
        &self.engine
    }

    /// Parse an address under this kernel's scheme.
    pub fn address(&self, raw: &str) -> StoreResult<Address> {
        Address::parse(raw, &self.config.scheme)
    }

    pub fn uri(&self, path: &NodePath) -> String {
        render_uri(&self.config.scheme, path)
    }

    /// Resolve an address to a file's content or a directory's listing.
    pub fn read(&self, raw: &str) -> StoreResult<Resolved> {
        let address = self.address(raw)?;
        self.store.read(address.path())
    }

    /// Every address currently in the store, root first.
    pub fn addresses(&self) -> Vec<String> {
        self.store
            .snapshot()
            .keys()
            .map(|path| self.uri(path))
            .collect()
    }

    fn seed(&self) -> StoreResult<usize> {
        let mut created = 0;
        for (raw, content) in &self.config.seed {
            let path = NodePath::parse(raw)?;
            if path.is_dir() {
                created += self.store.mkdir_all(&path)?.len();
                continue;
            }
            if let Some(parent) = path.parent() {
                created += self.store.mkdir_all(&parent)?.len();
            }
            created += self.store.write(&path, content.as_str())?.len();
            debug!(path = %path, bytes = content.len(), "seeded");
        }
        Ok(created)
    }
}
