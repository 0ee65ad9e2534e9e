use std::sync::Arc;

use kv_keeper_store::{DriverKind, Result, StorageDriver};

use crate::ErrorListeners;

/// An initialized driver handed out by [`KvKeeper::get_storage`](crate::KvKeeper::get_storage).
///
/// Every failed operation is reported to the keeper's error listeners
/// before the error is returned.
#[derive(Clone, Debug)]
pub struct Storage {
    driver: Arc<dyn StorageDriver>,
    listeners: ErrorListeners,
}

impl Storage {
    pub(crate) fn new(driver: Arc<dyn StorageDriver>, listeners: ErrorListeners) -> Self {
        Self { driver, listeners }
    }

    /// The driver type backing this storage.
    #[must_use]
    pub fn kind(&self) -> DriverKind {
        self.driver.kind()
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// [`Error::StorageWrite`](kv_keeper_store::Error::StorageWrite) when the
    /// facility rejects the write, or a structured request failure.
    pub async fn set_item(&self, key: &str, value: impl ToString + Send) -> Result<()> {
        let value = value.to_string();
        self.listeners
            .report(self.driver.set_item(key, &value).await)
    }

    /// The value stored under `key`.
    ///
    /// # Errors
    ///
    /// A structured request failure, or
    /// [`Error::Parse`](kv_keeper_store::Error::Parse) for an undecodable value.
    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.listeners.report(self.driver.get_item(key).await)
    }

    /// Whether `key` is present.
    ///
    /// # Errors
    ///
    /// Same as [`Storage::get_item`].
    pub async fn has_item(&self, key: &str) -> Result<bool> {
        self.listeners.report(self.driver.has_item(key).await)
    }

    /// Removes `key`; removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// A structured request failure.
    pub async fn remove_item(&self, key: &str) -> Result<()> {
        self.listeners.report(self.driver.remove_item(key).await)
    }

    /// Every key owned by this storage.
    ///
    /// # Errors
    ///
    /// A structured request failure.
    pub async fn get_keys(&self) -> Result<Vec<String>> {
        self.listeners.report(self.driver.get_keys().await)
    }

    /// Number of keys owned by this storage.
    ///
    /// # Errors
    ///
    /// A structured request failure.
    pub async fn get_length(&self) -> Result<usize> {
        self.listeners.report(self.driver.get_length().await)
    }

    /// Removes every key owned by this storage.
    ///
    /// # Errors
    ///
    /// A structured request failure.
    pub async fn clear(&self) -> Result<()> {
        self.listeners.report(self.driver.clear().await)
    }

    /// Closes the underlying driver. The next resolution creates a new one.
    pub fn close(&self) {
        self.driver.close();
    }

    /// Whether the underlying driver is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.driver.is_closed()
    }

    /// Whether both handles share one driver instance.
    #[must_use]
    pub fn same_driver(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.driver, &other.driver)
    }
}
