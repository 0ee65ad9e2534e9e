//! Interface of an asynchronous, versioned, transactional record store (the
//! `IndexedDB` model).

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stored record. `key` is the primary key path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key.
    pub key: String,
    /// Stored value.
    pub value: String,
}

impl Record {
    /// Creates a record.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Evaluates a key path against the record.
    #[must_use]
    pub fn key_at(&self, key_path: &str) -> Option<&str> {
        match key_path {
            "key" => Some(&self.key),
            "value" => Some(&self.value),
            _ => None,
        }
    }
}

/// Scope of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only; writes fail.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// Keys a cursor iterates over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyRange {
    /// Every key in the store.
    All,
    /// Exactly one key.
    Only(String),
}

impl KeyRange {
    /// Whether `key` falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(only) => only == key,
        }
    }
}

/// Opening a database failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OpenError {
    /// The open request failed.
    #[error("{0}")]
    Failed(String),

    /// Another open connection prevents the version change.
    #[error("database is blocked by another connection")]
    Blocked,
}

/// Changing the schema during an upgrade failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The store being created already exists.
    #[error("{0}")]
    AlreadyExists(String),

    /// Any other schema failure.
    #[error("{0}")]
    Other(String),
}

/// A transaction or request failed. Carries the facility's message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RequestError(pub String);

/// Called when another party upgrades or deletes the database.
pub type VersionChangeHandler = Box<dyn Fn() + Send + Sync>;

/// Schema setup run while a database is upgraded to a newer version.
pub type UpgradeHandler<'a> =
    &'a (dyn Fn(&mut dyn SchemaEditor) -> Result<(), SchemaError> + Send + Sync);

/// Connection factory of the structured facility.
#[async_trait]
pub trait StructuredFacility: Debug + Send + Sync + 'static {
    /// Opens `name` at `version`, running `upgrade` first if the stored
    /// version is older.
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: UpgradeHandler<'_>,
    ) -> Result<Arc<dyn Connection>, OpenError>;
}

/// Schema operations available during an upgrade.
pub trait SchemaEditor {
    /// Whether a store named `name` exists.
    fn contains_store(&self, name: &str) -> bool;

    /// Creates a store whose records are keyed by `key_path`.
    ///
    /// # Errors
    ///
    /// [`SchemaError::AlreadyExists`] if the store exists already.
    fn create_store(&mut self, name: &str, key_path: &str) -> Result<(), SchemaError>;
}

/// An open database connection.
pub trait Connection: Debug + Send + Sync {
    /// Starts a transaction over one store.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed or the store does not exist.
    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction>, RequestError>;

    /// Registers a handler for external upgrades or deletion.
    fn on_version_change(&self, handler: VersionChangeHandler);

    /// Closes the connection.
    fn close(&self);

    /// Whether the connection was closed.
    fn is_closed(&self) -> bool;
}

/// Requests scoped to one store within one transaction.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Inserts or replaces a record.
    async fn put(&self, record: Record) -> Result<(), RequestError>;

    /// Fetches the record stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Record>, RequestError>;

    /// Deletes the record stored under `key`, if any.
    async fn delete(&self, key: &str) -> Result<(), RequestError>;

    /// Number of records in the store.
    async fn count(&self) -> Result<usize, RequestError>;

    /// Deletes every record in the store.
    async fn clear(&self) -> Result<(), RequestError>;

    /// Opens a forward, keys-only cursor in ascending key order.
    async fn open_key_cursor(&self, range: KeyRange) -> Result<Box<dyn KeyCursor>, RequestError>;
}

/// A forward cursor yielding keys only.
#[async_trait]
pub trait KeyCursor: Send {
    /// Advances the cursor, returning `None` once exhausted.
    async fn next_key(&mut self) -> Result<Option<String>, RequestError>;
}
