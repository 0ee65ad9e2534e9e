//! Storage driver over an asynchronous, versioned, transactional record
//! store (the `IndexedDB` model).
//!
//! The driver owns one connection. It is opened lazily by
//! [`StorageDriver::init`], which also creates the record store the first
//! time the database is opened. When another party upgrades or deletes the
//! database the driver closes its connection and reports itself closed, so
//! the registry creates a fresh driver that reconnects.
//!
//! Records live in a store owned exclusively by this library, so unlike the
//! simple driver no key prefixing or filtering is applied.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod facility;
mod memory;

pub use facility::{
    Connection, KeyCursor, KeyRange, OpenError, Record, RequestError, SchemaEditor, SchemaError,
    StructuredFacility, Transaction, TransactionMode, UpgradeHandler, VersionChangeHandler,
};
pub use memory::MemoryDatabaseFactory;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use kv_keeper_store::{DriverKind, Error, Result, StorageConfig, StorageDriver};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Key path of the record store.
pub const KEY_PATH: &str = "key";

impl From<RequestError> for Error {
    fn from(RequestError(message): RequestError) -> Self {
        Self::Request(message)
    }
}

impl From<OpenError> for Error {
    fn from(err: OpenError) -> Self {
        match err {
            OpenError::Failed(message) => Self::Connection(message),
            OpenError::Blocked => Self::ConnectionBlocked,
        }
    }
}

/// Options specific to [`StructuredStorage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StructuredStorageOptions {
    /// Yield to the scheduler once after a delete completes, so
    /// `remove_item` never resolves on its first poll.
    pub defer_remove: bool,
}

impl Default for StructuredStorageOptions {
    fn default() -> Self {
        Self { defer_remove: true }
    }
}

/// Lifecycle of the driver's connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection yet, or the last attempt failed.
    Unconnected,
    /// An open request is in flight.
    Connecting,
    /// The connection is open.
    Ready,
    /// The driver was closed. Terminal.
    Closed,
}

#[derive(Debug)]
enum ConnectionState {
    Unconnected,
    Connecting,
    Ready(Arc<dyn Connection>),
    Closed,
}

impl ConnectionState {
    const fn status(&self) -> ConnectionStatus {
        match self {
            Self::Unconnected => ConnectionStatus::Unconnected,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Ready(_) => ConnectionStatus::Ready,
            Self::Closed => ConnectionStatus::Closed,
        }
    }

    /// Moves to `Closed`, returning the connection that was open, if any.
    fn close(&mut self) -> Option<Arc<dyn Connection>> {
        match std::mem::replace(self, Self::Closed) {
            Self::Ready(connection) => Some(connection),
            _ => None,
        }
    }
}

/// Driver over a [`StructuredFacility`].
#[derive(Debug)]
pub struct StructuredStorage {
    facility: Arc<dyn StructuredFacility>,
    config: StorageConfig,
    options: StructuredStorageOptions,
    state: Arc<Mutex<ConnectionState>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl StructuredStorage {
    /// Creates an unconnected driver.
    #[must_use]
    pub fn new(
        facility: Arc<dyn StructuredFacility>,
        config: StorageConfig,
        options: StructuredStorageOptions,
    ) -> Self {
        debug!(
            database = %config.database_name,
            store = %config.store_name,
            "creating structured storage driver"
        );

        Self {
            facility,
            config,
            options,
            state: Arc::new(Mutex::new(ConnectionState::Unconnected)),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status()
    }

    fn setup_schema(
        store_name: &str,
        schema: &mut dyn SchemaEditor,
    ) -> std::result::Result<(), SchemaError> {
        if schema.contains_store(store_name) {
            info!(store = store_name, "record store already exists, keeping it");
            return Ok(());
        }

        match schema.create_store(store_name, KEY_PATH) {
            Ok(()) => {
                info!(store = store_name, "created record store");
                Ok(())
            }
            Err(SchemaError::AlreadyExists(message)) => {
                warn!(store = store_name, %message, "record store already exists, ignoring");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn on_version_change(state: &Weak<Mutex<ConnectionState>>, database: &str) {
        let Some(state) = state.upgrade() else {
            return;
        };

        let connection = state.lock().close();
        if let Some(connection) = connection {
            info!(database, "database changed externally, closing connection");
            connection.close();
        }
    }

    fn transaction(&self, mode: TransactionMode) -> Result<Box<dyn Transaction>> {
        let connection = match &*self.state.lock() {
            ConnectionState::Ready(connection) => Arc::clone(connection),
            _ => return Err(Error::Connection("database connection is not open".to_string())),
        };

        Ok(connection.transaction(&self.config.store_name, mode)?)
    }
}

#[async_trait]
impl StorageDriver for StructuredStorage {
    fn kind(&self) -> DriverKind {
        DriverKind::Structured
    }

    async fn init(&self) -> Result<()> {
        let _init = self.init_lock.lock().await;

        {
            let mut state = self.state.lock();
            match &*state {
                ConnectionState::Ready(_) => return Ok(()),
                ConnectionState::Closed => {
                    return Err(Error::Connection("storage driver is closed".to_string()));
                }
                ConnectionState::Unconnected | ConnectionState::Connecting => {
                    *state = ConnectionState::Connecting;
                }
            }
        }

        info!(
            database = %self.config.database_name,
            version = self.config.database_version,
            "opening database"
        );

        let store_name = self.config.store_name.clone();
        let upgrade = move |schema: &mut dyn SchemaEditor| Self::setup_schema(&store_name, schema);
        let opened = self
            .facility
            .open(
                &self.config.database_name,
                self.config.database_version,
                &upgrade,
            )
            .await;

        let connection = match opened {
            Ok(connection) => connection,
            Err(err) => {
                warn!(database = %self.config.database_name, %err, "failed to open database");
                let mut state = self.state.lock();
                if matches!(*state, ConnectionState::Connecting) {
                    *state = ConnectionState::Unconnected;
                }
                return Err(err.into());
            }
        };

        let weak_state = Arc::downgrade(&self.state);
        let database = self.config.database_name.clone();
        connection.on_version_change(Box::new(move || {
            Self::on_version_change(&weak_state, &database);
        }));

        let mut state = self.state.lock();
        if matches!(*state, ConnectionState::Closed) {
            drop(state);
            connection.close();
            return Err(Error::Connection("storage driver is closed".to_string()));
        }
        *state = ConnectionState::Ready(connection);

        Ok(())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let tx = self.transaction(TransactionMode::ReadWrite)?;
        tx.put(Record::new(key, value)).await?;
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let tx = self.transaction(TransactionMode::ReadOnly)?;
        let record = tx.get(key).await?;
        Ok(record.map(|record| record.value))
    }

    async fn has_item(&self, key: &str) -> Result<bool> {
        let tx = self.transaction(TransactionMode::ReadOnly)?;
        let mut cursor = tx.open_key_cursor(KeyRange::Only(key.to_string())).await?;
        Ok(cursor.next_key().await?.is_some())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let tx = self.transaction(TransactionMode::ReadWrite)?;
        tx.delete(key).await?;

        if self.options.defer_remove {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn get_keys(&self) -> Result<Vec<String>> {
        let tx = self.transaction(TransactionMode::ReadOnly)?;
        let mut cursor = tx.open_key_cursor(KeyRange::All).await?;

        let mut keys = Vec::new();
        while let Some(key) = cursor.next_key().await? {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn get_length(&self) -> Result<usize> {
        let tx = self.transaction(TransactionMode::ReadOnly)?;
        Ok(tx.count().await?)
    }

    async fn clear(&self) -> Result<()> {
        let tx = self.transaction(TransactionMode::ReadWrite)?;
        tx.clear().await?;
        Ok(())
    }

    fn close(&self) {
        let connection = self.state.lock().close();
        if let Some(connection) = connection {
            connection.close();
        }
        info!(database = %self.config.database_name, "closed structured storage driver");
    }

    fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), ConnectionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::future::Future;

    use tracing_test::traced_test;

    const DB: &str = "kv-keeper-items";

    fn storage_with(
        factory: &MemoryDatabaseFactory,
        config: StorageConfig,
        options: StructuredStorageOptions,
    ) -> StructuredStorage {
        StructuredStorage::new(Arc::new(factory.clone()), config, options)
    }

    async fn ready_storage(factory: &MemoryDatabaseFactory) -> StructuredStorage {
        let storage = storage_with(
            factory,
            StorageConfig::default(),
            StructuredStorageOptions::default(),
        );
        storage.init().await.unwrap();
        storage
    }

    fn keep_schema(_: &mut dyn SchemaEditor) -> std::result::Result<(), SchemaError> {
        Ok(())
    }

    fn config_with_version(database_version: u32) -> StorageConfig {
        StorageConfig {
            database_version,
            ..StorageConfig::default()
        }
    }

    fn polls_to_complete<F: Future>(future: F) -> usize {
        let mut task = tokio_test::task::spawn(future);
        let mut polls = 1;
        while task.poll().is_pending() {
            polls += 1;
        }
        polls
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;

        storage.set_item("foo", "bar").await.unwrap();

        assert_eq!(storage.get_item("foo").await.unwrap().as_deref(), Some("bar"));
        assert_eq!(storage.get_item("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_serialized_writes_last_wins() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;

        storage.set_item("foo", "first").await.unwrap();
        storage.set_item("foo", "second").await.unwrap();

        assert_eq!(storage.get_item("foo").await.unwrap().as_deref(), Some("second"));
        assert_eq!(storage.get_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_has_item_uses_record_existence() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;

        assert!(!storage.has_item("empty").await.unwrap());
        storage.set_item("empty", "").await.unwrap();
        assert!(storage.has_item("empty").await.unwrap());

        storage.remove_item("empty").await.unwrap();
        assert!(!storage.has_item("empty").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;

        storage.remove_item("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_length_and_clear() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;

        for key in ["b", "c", "a"] {
            storage.set_item(key, "value").await.unwrap();
        }

        assert_eq!(storage.get_keys().await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(storage.get_length().await.unwrap(), 3);

        storage.clear().await.unwrap();

        assert_eq!(storage.get_length().await.unwrap(), 0);
        assert!(storage.get_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_require_init() {
        let factory = MemoryDatabaseFactory::new();
        let storage = storage_with(
            &factory,
            StorageConfig::default(),
            StructuredStorageOptions::default(),
        );

        assert_eq!(storage.status(), ConnectionStatus::Unconnected);
        assert!(matches!(
            storage.get_item("foo").await,
            Err(Error::Connection(_))
        ));
        assert_eq!(factory.open_connections(DB), 0);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;

        storage.init().await.unwrap();

        assert_eq!(storage.status(), ConnectionStatus::Ready);
        assert_eq!(factory.open_connections(DB), 1);
        assert_eq!(factory.version(DB), Some(1));
    }

    #[tokio::test]
    async fn test_open_failure_is_retryable() {
        let factory = MemoryDatabaseFactory::new();
        let storage = storage_with(
            &factory,
            StorageConfig::default(),
            StructuredStorageOptions::default(),
        );
        factory.fail_next_open("UnknownError: internal error opening backing store");

        assert_eq!(
            storage.init().await,
            Err(Error::Connection(
                "UnknownError: internal error opening backing store".to_string()
            ))
        );
        assert_eq!(storage.status(), ConnectionStatus::Unconnected);

        storage.init().await.unwrap();
        assert_eq!(storage.status(), ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn test_blocked_open() {
        let factory = MemoryDatabaseFactory::new();
        let _held = factory
            .open(DB, 1, &|schema: &mut dyn SchemaEditor| {
                schema.create_store("items", KEY_PATH)
            })
            .await
            .unwrap();

        let storage = storage_with(
            &factory,
            config_with_version(2),
            StructuredStorageOptions::default(),
        );

        assert_eq!(storage.init().await, Err(Error::ConnectionBlocked));
        assert_eq!(storage.status(), ConnectionStatus::Unconnected);
    }

    #[tokio::test]
    async fn test_version_change_closes_driver() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;
        storage.set_item("foo", "bar").await.unwrap();

        let upgraded = factory
            .open(DB, 2, &keep_schema)
            .await
            .unwrap();

        assert!(storage.is_closed());
        assert_eq!(factory.open_connections(DB), 1);

        upgraded.close();
        let reconnected = storage_with(
            &factory,
            config_with_version(2),
            StructuredStorageOptions::default(),
        );
        reconnected.init().await.unwrap();
        assert_eq!(reconnected.get_item("foo").await.unwrap().as_deref(), Some("bar"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_existing_store_is_ignored_on_upgrade() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;
        storage.set_item("foo", "bar").await.unwrap();
        storage.close();

        let upgraded = storage_with(
            &factory,
            config_with_version(2),
            StructuredStorageOptions::default(),
        );
        upgraded.init().await.unwrap();

        assert!(logs_contain("record store already exists"));
        assert_eq!(factory.version(DB), Some(2));
        assert_eq!(upgraded.get_item("foo").await.unwrap().as_deref(), Some("bar"));
    }

    #[derive(Default)]
    struct RacingSchema {
        attempts: usize,
    }

    impl SchemaEditor for RacingSchema {
        fn contains_store(&self, _name: &str) -> bool {
            false
        }

        fn create_store(
            &mut self,
            name: &str,
            _key_path: &str,
        ) -> std::result::Result<(), SchemaError> {
            self.attempts += 1;
            Err(SchemaError::AlreadyExists(format!(
                "ConstraintError: object store '{name}' already exists"
            )))
        }
    }

    #[test]
    #[traced_test]
    fn test_store_created_concurrently_is_ignored() {
        let mut schema = RacingSchema::default();

        assert_eq!(StructuredStorage::setup_schema("items", &mut schema), Ok(()));
        assert_eq!(schema.attempts, 1);
        assert!(logs_contain("ignoring"));
    }

    #[tokio::test]
    async fn test_length_ignores_other_stores() {
        let factory = MemoryDatabaseFactory::new();
        let other = factory
            .open(DB, 1, &|schema: &mut dyn SchemaEditor| -> std::result::Result<(), SchemaError> {
                schema.create_store("items", KEY_PATH)?;
                schema.create_store("other", KEY_PATH)
            })
            .await
            .unwrap();
        let tx = other.transaction("other", TransactionMode::ReadWrite).unwrap();
        tx.put(Record::new("foreign-1", "x")).await.unwrap();
        tx.put(Record::new("foreign-2", "y")).await.unwrap();
        other.close();

        let storage = ready_storage(&factory).await;
        storage.set_item("a", "1").await.unwrap();

        assert_eq!(storage.get_length().await.unwrap(), 1);
        assert_eq!(storage.get_keys().await.unwrap(), vec!["a"]);

        storage.clear().await.unwrap();
        let tx = other_store(&factory).await;
        assert_eq!(tx.count().await.unwrap(), 2);
    }

    async fn other_store(factory: &MemoryDatabaseFactory) -> Box<dyn Transaction> {
        let connection = factory
            .open(DB, 1, &keep_schema)
            .await
            .unwrap();
        let Ok(tx) = connection.transaction("other", TransactionMode::ReadOnly) else {
            panic!("other store should exist");
        };
        tx
    }

    #[tokio::test]
    async fn test_schema_failure_propagates() {
        let factory = MemoryDatabaseFactory::new();
        factory.fail_next_upgrade("QuotaExceededError: no room for schema");
        let storage = storage_with(
            &factory,
            StorageConfig::default(),
            StructuredStorageOptions::default(),
        );

        assert_eq!(
            storage.init().await,
            Err(Error::Connection(
                "QuotaExceededError: no room for schema".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_request_failure() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;
        factory.fail_requests("UnknownError: write failed");

        let err = storage.set_item("foo", "bar").await.unwrap_err();

        assert_eq!(err, Error::Request("UnknownError: write failed".to_string()));
        assert_eq!(err.to_string(), "DB request error: UnknownError: write failed");
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let factory = MemoryDatabaseFactory::new();
        let storage = ready_storage(&factory).await;

        storage.close();

        assert!(storage.is_closed());
        assert_eq!(storage.status(), ConnectionStatus::Closed);
        assert_eq!(factory.open_connections(DB), 0);
        assert!(storage.init().await.is_err());
    }

    #[tokio::test]
    async fn test_remove_is_deferred() {
        let factory = MemoryDatabaseFactory::new();
        let deferred = ready_storage(&factory).await;
        let immediate = storage_with(
            &factory,
            StorageConfig::default(),
            StructuredStorageOptions {
                defer_remove: false,
            },
        );
        immediate.init().await.unwrap();

        let deferred_polls = polls_to_complete(deferred.remove_item("foo"));
        let immediate_polls = polls_to_complete(immediate.remove_item("foo"));

        assert!(deferred_polls > 1);
        assert_eq!(deferred_polls, immediate_polls + 1);
    }
}
