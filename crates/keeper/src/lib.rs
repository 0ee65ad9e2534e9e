//! Key-value storage over whichever storage facility the platform offers.
//!
//! [`KvKeeper`] resolves a driver for a requested [`DriverType`], preferring
//! the structured store and falling back to the simple string map when the
//! type is `auto`. Drivers are created once per type, initialized lazily, and
//! rebuilt transparently after their connection was closed. Every failing
//! operation is reported to the registered error listeners before the error
//! reaches the caller.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod listeners;
mod platform;
mod registry;
mod storage;

pub use config::{CONFIGURABLE_KEYS, KeeperConfig, KeeperConfigBuilder};
pub use listeners::{ErrorListener, ErrorListeners};
pub use platform::Platform;
pub use registry::DriverRegistry;
pub use storage::Storage;

pub use kv_keeper_store::{
    DriverKind, DriverType, Error, Namespace, Result, StorageConfig, StorageDriver,
};
pub use kv_keeper_store_simple::{
    MemorySimpleFacility, PresenceCheck, SimpleFacility, SimpleStorage, ValueEncoding, WriteError,
};
pub use kv_keeper_store_structured::{
    ConnectionStatus, MemoryDatabaseFactory, StructuredFacility, StructuredStorage,
};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::ConfigState;

#[derive(Debug)]
struct Inner {
    config: RwLock<ConfigState>,
    registry: DriverRegistry,
    listeners: ErrorListeners,
}

/// Entry point resolving storage drivers and forwarding operations to them.
///
/// Cloning is cheap; clones share configuration, drivers and listeners.
#[derive(Clone, Debug)]
pub struct KvKeeper {
    inner: Arc<Inner>,
}

impl KvKeeper {
    /// Creates an unconfigured keeper using the default settings.
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self::from_state(platform, ConfigState::default())
    }

    /// Creates a keeper with `config`, which counts as its one configuration.
    #[must_use]
    pub fn with_config(platform: Platform, config: KeeperConfig) -> Self {
        Self::from_state(platform, ConfigState::configured(config))
    }

    fn from_state(platform: Platform, state: ConfigState) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(state),
                registry: DriverRegistry::new(platform),
                listeners: ErrorListeners::default(),
            }),
        }
    }

    /// Applies string-keyed options. Succeeds at most once.
    ///
    /// Accepted keys are listed in [`CONFIGURABLE_KEYS`]. An unknown key or
    /// an invalid `defaultDriverType` resets every setting to its default.
    /// On success cached drivers are dropped so they pick up the new names.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigurationAlreadySet`], [`Error::ConfigurationKey`] or
    /// [`Error::InvalidType`].
    pub fn configure<I, K, V>(&self, options: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut state = self.inner.config.write();
        state.configure(options)?;

        let config = state.config();
        info!(
            database = %config.database_name,
            store = %config.store_name,
            default_driver_type = %config.default_driver_type,
            "storage configured"
        );

        // Cleared under the write guard so no resolution pairs the new
        // names with a driver built for the old ones.
        self.inner.registry.clear();
        drop(state);
        Ok(())
    }

    /// A copy of the active configuration.
    #[must_use]
    pub fn config(&self) -> KeeperConfig {
        self.inner.config.read().config().clone()
    }

    /// Namespace the simple driver currently prefixes keys with.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.inner.config.read().config().namespace()
    }

    /// The driver registry backing this keeper.
    #[must_use]
    pub fn registry(&self) -> &DriverRegistry {
        &self.inner.registry
    }

    /// Resolves and initializes a driver.
    ///
    /// `None` requests the configured default type. `Auto` prefers the
    /// structured driver and falls back to the simple one.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedPlatform`] when no driver of the requested type is
    /// available, or the driver's initialization error.
    pub async fn get_storage(&self, driver_type: Option<DriverType>) -> Result<Storage> {
        let (requested, resolved) = {
            let state = self.inner.config.read();
            let config = state.config();
            let requested = driver_type.unwrap_or(config.default_driver_type);
            (requested, self.inner.registry.resolve(requested, config))
        };

        let Some((kind, driver)) = resolved else {
            debug!(%requested, "no storage driver available");
            return self
                .inner
                .listeners
                .report(Err(Error::UnsupportedPlatform(requested)));
        };

        debug!(%requested, %kind, "resolved storage driver");
        self.inner.listeners.report(driver.init().await)?;

        Ok(Storage::new(driver, self.inner.listeners.clone()))
    }

    /// Resolves the default driver in the background.
    ///
    /// Any failure is logged and reported to the error listeners; the next
    /// call resolves again.
    pub fn preconnect(&self) -> tokio::task::JoinHandle<()> {
        let keeper = self.clone();

        tokio::spawn(async move {
            match keeper.get_storage(None).await {
                Ok(storage) => debug!(kind = %storage.kind(), "preconnected storage driver"),
                Err(err) => debug!(%err, "preconnect failed"),
            }
        })
    }

    /// Stores `value` under `key` using the default driver.
    ///
    /// # Errors
    ///
    /// Resolution or storage failure.
    pub async fn set_item(&self, key: &str, value: impl ToString + Send) -> Result<()> {
        self.get_storage(None).await?.set_item(key, value).await
    }

    /// The value stored under `key` in the default driver.
    ///
    /// # Errors
    ///
    /// Resolution or storage failure.
    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.get_storage(None).await?.get_item(key).await
    }

    /// Whether `key` is present in the default driver.
    ///
    /// # Errors
    ///
    /// Resolution or storage failure.
    pub async fn has_item(&self, key: &str) -> Result<bool> {
        self.get_storage(None).await?.has_item(key).await
    }

    /// Removes `key` from the default driver.
    ///
    /// # Errors
    ///
    /// Resolution or storage failure.
    pub async fn remove_item(&self, key: &str) -> Result<()> {
        self.get_storage(None).await?.remove_item(key).await
    }

    /// Every key in the default driver.
    ///
    /// # Errors
    ///
    /// Resolution or storage failure.
    pub async fn get_keys(&self) -> Result<Vec<String>> {
        self.get_storage(None).await?.get_keys().await
    }

    /// Number of keys in the default driver.
    ///
    /// # Errors
    ///
    /// Resolution or storage failure.
    pub async fn get_length(&self) -> Result<usize> {
        self.get_storage(None).await?.get_length().await
    }

    /// Removes every key from the default driver.
    ///
    /// # Errors
    ///
    /// Resolution or storage failure.
    pub async fn clear(&self) -> Result<()> {
        self.get_storage(None).await?.clear().await
    }

    /// Registers a listener for every storage error.
    pub fn add_error_listener(&self, listener: ErrorListener) {
        self.inner.listeners.add(listener);
    }

    /// Removes the first registration of `listener`.
    pub fn remove_error_listener(&self, listener: &ErrorListener) -> bool {
        self.inner.listeners.remove(listener)
    }

    /// The registered listeners in registration order.
    #[must_use]
    pub fn error_listeners(&self) -> Vec<ErrorListener> {
        self.inner.listeners.snapshot()
    }

    /// Removes every error listener.
    pub fn remove_all_error_listeners(&self) {
        self.inner.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_default_scenario() {
        let keeper = KvKeeper::new(Platform::in_memory());

        keeper.set_item("foo", "bar").await.unwrap();

        assert_eq!(keeper.get_item("foo").await.unwrap().as_deref(), Some("bar"));
        assert_eq!(
            keeper.registry().cached(DriverKind::Structured).map(|d| d.kind()),
            Some(DriverKind::Structured)
        );
    }

    #[tokio::test]
    async fn test_values_are_stringified() {
        let keeper = KvKeeper::new(Platform::in_memory());

        keeper.set_item("n", 42).await.unwrap();

        assert_eq!(keeper.get_item("n").await.unwrap().as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_configure_rebuilds_drivers() {
        let keeper = KvKeeper::new(Platform::in_memory());
        let before = keeper.get_storage(Some(DriverType::Simple)).await.unwrap();

        keeper.configure([("storeName", "cache")]).unwrap();

        assert!(before.is_closed());
        assert_eq!(keeper.namespace().as_str(), "kv-keeper-items:cache:");
        let after = keeper.get_storage(Some(DriverType::Simple)).await.unwrap();
        assert!(!after.same_driver(&before));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_configure_is_logged() {
        let keeper = KvKeeper::new(Platform::in_memory());

        keeper.configure([("databaseName", "app")]).unwrap();

        assert!(logs_contain("storage configured"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_configure_while_resolving() {
        let facility = MemorySimpleFacility::new();
        let keeper = KvKeeper::new(Platform::new().with_simple(facility.clone()));

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let keeper = keeper.clone();
                tokio::spawn(async move {
                    for n in 0..50 {
                        let _ = keeper.set_item(&format!("w{i}-{n}"), n).await;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::task::yield_now().await;
        keeper.configure([("storeName", "cache")]).unwrap();

        for writer in writers {
            writer.await.unwrap();
        }

        keeper.set_item("after", "1").await.unwrap();
        assert_eq!(facility.get_item("kv-keeper-items:cache:after").as_deref(), Some("1"));
        assert_eq!(facility.get_item("kv-keeper-items:items:after"), None);
    }

    #[tokio::test]
    async fn test_failed_configure_keeps_drivers() {
        let keeper = KvKeeper::new(Platform::in_memory());
        let storage = keeper.get_storage(None).await.unwrap();

        keeper.configure([("nope", "1")]).unwrap_err();

        assert!(!storage.is_closed());
    }
}
