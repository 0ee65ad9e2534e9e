//! In-memory structured facility for local development and tests.
//!
//! Follows the `IndexedDB` rules the driver depends on: databases are
//! versioned, an upgrade notifies every open connection and is blocked while
//! any of them stays open, schema changes made during a failed upgrade are
//! discarded, keys are kept in ascending order and read-only transactions
//! reject writes. Every request yields to the scheduler once before it is
//! served.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::facility::{
    Connection, KeyCursor, KeyRange, OpenError, Record, RequestError, SchemaEditor, SchemaError,
    StructuredFacility, Transaction, TransactionMode, UpgradeHandler, VersionChangeHandler,
};

type SharedHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Debug)]
struct ObjectStore {
    key_path: String,
    records: BTreeMap<String, Record>,
}

struct OpenConnection {
    id: u64,
    handlers: Vec<SharedHandler>,
}

impl Debug for OpenConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("OpenConnection")
            .field("id", &self.id)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Database {
    version: u32,
    stores: HashMap<String, ObjectStore>,
    connections: Vec<OpenConnection>,
}

impl Database {
    fn handlers(&self) -> Vec<SharedHandler> {
        self.connections
            .iter()
            .flat_map(|connection| connection.handlers.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    databases: HashMap<String, Database>,
    next_connection_id: u64,
    open_failure: Option<String>,
    upgrade_failure: Option<String>,
    request_failure: Option<String>,
}

/// In-memory connection factory.
#[derive(Clone, Debug, Default)]
pub struct MemoryDatabaseFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MemoryDatabaseFactory {
    /// Creates a factory without databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `open` fail with `message`.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.state.lock().open_failure = Some(message.into());
    }

    /// Makes the next schema change of an upgrade fail with `message`.
    pub fn fail_next_upgrade(&self, message: impl Into<String>) {
        self.state.lock().upgrade_failure = Some(message.into());
    }

    /// Makes every request fail with `message` until [`Self::restore_requests`].
    pub fn fail_requests(&self, message: impl Into<String>) {
        self.state.lock().request_failure = Some(message.into());
    }

    /// Lets requests succeed again.
    pub fn restore_requests(&self) {
        self.state.lock().request_failure = None;
    }

    /// Current version of `name`, if it exists.
    #[must_use]
    pub fn version(&self, name: &str) -> Option<u32> {
        self.state.lock().databases.get(name).map(|db| db.version)
    }

    /// Number of connections open on `name`.
    #[must_use]
    pub fn open_connections(&self, name: &str) -> usize {
        self.state
            .lock()
            .databases
            .get(name)
            .map_or(0, |db| db.connections.len())
    }

    /// Deletes `name`, notifying its open connections first.
    ///
    /// Returns whether the database existed.
    pub fn delete_database(&self, name: &str) -> bool {
        let handlers = self
            .state
            .lock()
            .databases
            .get(name)
            .map(Database::handlers)
            .unwrap_or_default();

        for handler in handlers {
            handler();
        }

        let existed = self.state.lock().databases.remove(name).is_some();
        debug!(database = name, existed, "deleted database");
        existed
    }
}

struct MemorySchema<'a> {
    stores: &'a mut HashMap<String, ObjectStore>,
    failure: Option<String>,
}

impl SchemaEditor for MemorySchema<'_> {
    fn contains_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    fn create_store(&mut self, name: &str, key_path: &str) -> Result<(), SchemaError> {
        if let Some(message) = self.failure.take() {
            return Err(SchemaError::Other(message));
        }
        if key_path.is_empty() {
            return Err(SchemaError::Other(
                "SyntaxError: key path must not be empty".to_string(),
            ));
        }
        if self.stores.contains_key(name) {
            return Err(SchemaError::AlreadyExists(format!(
                "ConstraintError: object store '{name}' already exists"
            )));
        }

        self.stores.insert(
            name.to_string(),
            ObjectStore {
                key_path: key_path.to_string(),
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl StructuredFacility for MemoryDatabaseFactory {
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: UpgradeHandler<'_>,
    ) -> Result<Arc<dyn Connection>, OpenError> {
        tokio::task::yield_now().await;

        if version == 0 {
            return Err(OpenError::Failed(
                "TypeError: version must be a positive integer".to_string(),
            ));
        }

        let handlers = {
            let mut guard = self.state.lock();
            if let Some(message) = guard.open_failure.take() {
                return Err(OpenError::Failed(message));
            }

            let db = guard.databases.entry(name.to_string()).or_default();
            if version < db.version {
                return Err(OpenError::Failed(format!(
                    "VersionError: requested version {version} is less than the existing version {}",
                    db.version
                )));
            }
            if version > db.version {
                db.handlers()
            } else {
                Vec::new()
            }
        };

        if !handlers.is_empty() {
            debug!(database = name, version, "notifying open connections of version change");
            for handler in handlers {
                handler();
            }
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let db = state.databases.entry(name.to_string()).or_default();

        if version > db.version {
            if !db.connections.is_empty() {
                return Err(OpenError::Blocked);
            }

            let mut stores = db.stores.clone();
            let mut schema = MemorySchema {
                stores: &mut stores,
                failure: state.upgrade_failure.take(),
            };
            upgrade(&mut schema).map_err(|e| OpenError::Failed(e.to_string()))?;

            debug!(database = name, from = db.version, to = version, "upgraded database");
            db.stores = stores;
            db.version = version;
        }

        state.next_connection_id += 1;
        let id = state.next_connection_id;
        db.connections.push(OpenConnection {
            id,
            handlers: Vec::new(),
        });

        Ok(Arc::new(MemoryConnection {
            id,
            database: name.to_string(),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    database: String,
    state: Arc<Mutex<FactoryState>>,
    closed: AtomicBool,
}

impl Debug for MemoryConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Connection for MemoryConnection {
    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction>, RequestError> {
        if self.is_closed() {
            return Err(RequestError(
                "InvalidStateError: the database connection is closing".to_string(),
            ));
        }

        let state = self.state.lock();
        let exists = state
            .databases
            .get(&self.database)
            .is_some_and(|db| db.stores.contains_key(store));
        if !exists {
            return Err(RequestError(format!(
                "NotFoundError: object store '{store}' was not found"
            )));
        }

        Ok(Box::new(MemoryTransaction {
            database: self.database.clone(),
            store: store.to_string(),
            mode,
            state: Arc::clone(&self.state),
        }))
    }

    fn on_version_change(&self, handler: VersionChangeHandler) {
        let mut state = self.state.lock();
        let connection = state
            .databases
            .get_mut(&self.database)
            .and_then(|db| db.connections.iter_mut().find(|c| c.id == self.id));

        if let Some(connection) = connection {
            connection.handlers.push(Arc::from(handler));
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(db) = self.state.lock().databases.get_mut(&self.database) {
            db.connections.retain(|c| c.id != self.id);
        }
        debug!(database = %self.database, id = self.id, "closed connection");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemoryTransaction {
    database: String,
    store: String,
    mode: TransactionMode,
    state: Arc<Mutex<FactoryState>>,
}

impl MemoryTransaction {
    async fn with_store<T, F>(&self, write: bool, f: F) -> Result<T, RequestError>
    where
        T: Send,
        F: FnOnce(&mut ObjectStore) -> T + Send,
    {
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        if let Some(message) = &state.request_failure {
            return Err(RequestError(message.clone()));
        }
        if write && self.mode == TransactionMode::ReadOnly {
            return Err(RequestError(
                "ReadOnlyError: the transaction is read-only".to_string(),
            ));
        }

        let store = state
            .databases
            .get_mut(&self.database)
            .and_then(|db| db.stores.get_mut(&self.store))
            .ok_or_else(|| {
                RequestError(format!(
                    "NotFoundError: object store '{}' was not found",
                    self.store
                ))
            })?;

        Ok(f(store))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn put(&self, record: Record) -> Result<(), RequestError> {
        self.with_store(true, |store| -> Result<(), RequestError> {
            let key = record.key_at(&store.key_path).map(str::to_string).ok_or_else(|| {
                RequestError(format!(
                    "DataError: key path '{}' does not yield a valid key",
                    store.key_path
                ))
            })?;
            store.records.insert(key, record);
            Ok(())
        })
        .await?
    }

    async fn get(&self, key: &str) -> Result<Option<Record>, RequestError> {
        self.with_store(false, |store| store.records.get(key).cloned())
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), RequestError> {
        self.with_store(true, |store| {
            store.records.remove(key);
        })
        .await
    }

    async fn count(&self) -> Result<usize, RequestError> {
        self.with_store(false, |store| store.records.len()).await
    }

    async fn clear(&self) -> Result<(), RequestError> {
        self.with_store(true, |store| store.records.clear()).await
    }

    async fn open_key_cursor(&self, range: KeyRange) -> Result<Box<dyn KeyCursor>, RequestError> {
        let keys: Vec<String> = self
            .with_store(false, |store| {
                store
                    .records
                    .keys()
                    .filter(|key| range.contains(key))
                    .cloned()
                    .collect()
            })
            .await?;

        Ok(Box::new(MemoryKeyCursor {
            keys: keys.into_iter(),
        }))
    }
}

struct MemoryKeyCursor {
    keys: std::vec::IntoIter<String>,
}

#[async_trait]
impl KeyCursor for MemoryKeyCursor {
    async fn next_key(&mut self) -> Result<Option<String>, RequestError> {
        tokio::task::yield_now().await;
        Ok(self.keys.next())
    }
}
