//! Uniform asynchronous key-value contract shared by every kv-keeper storage
//! driver, together with the types the drivers and the facade agree on.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod namespace;

pub use error::{Error, Result};
pub use namespace::Namespace;

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use async_trait::async_trait;

/// Default database name.
pub const DEFAULT_DATABASE_NAME: &str = "kv-keeper-items";

/// Default record store name.
pub const DEFAULT_STORE_NAME: &str = "items";

/// Schema version the structured database is opened with by default.
pub const DEFAULT_DATABASE_VERSION: u32 = 1;

/// Driver type as requested by a caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DriverType {
    /// Prefer structured storage, fall back to simple storage.
    #[default]
    Auto,
    /// The synchronous flat string map.
    Simple,
    /// The asynchronous transactional record store.
    Structured,
}

impl DriverType {
    /// String form accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Simple => "simple",
            Self::Structured => "structured",
        }
    }
}

impl Display for DriverType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "simple" | "ls" => Ok(Self::Simple),
            "structured" | "db" => Ok(Self::Structured),
            other => Err(Error::InvalidType(other.to_string())),
        }
    }
}

impl From<DriverKind> for DriverType {
    fn from(kind: DriverKind) -> Self {
        match kind {
            DriverKind::Simple => Self::Simple,
            DriverKind::Structured => Self::Structured,
        }
    }
}

/// Concrete driver type a storage instance is backed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriverKind {
    /// [`DriverType::Simple`].
    Simple,
    /// [`DriverType::Structured`].
    Structured,
}

impl Display for DriverKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&DriverType::from(*self), f)
    }
}

/// Names shared by both drivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    /// Name of the structured database, first half of the namespace.
    pub database_name: String,

    /// Name of the record store, second half of the namespace.
    pub store_name: String,

    /// Schema version the structured database is opened with.
    pub database_version: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            store_name: DEFAULT_STORE_NAME.to_string(),
            database_version: DEFAULT_DATABASE_VERSION,
        }
    }
}

/// A storage driver exposing string values under string keys.
///
/// Both drivers implement every operation asynchronously, even where the
/// underlying facility is synchronous. Whether an operation may complete on
/// its first poll is documented per driver.
///
/// # Required Methods
/// - `kind`: The concrete driver type.
/// - `init`: Make the driver ready (open connections, set up schema).
/// - `set_item` / `get_item` / `has_item` / `remove_item`: Single key CRUD.
/// - `get_keys` / `get_length`: Enumerate the keys owned by this driver.
/// - `clear`: Remove every key owned by this driver.
/// - `close` / `is_closed`: Release the driver so a fresh one is created.
#[async_trait]
pub trait StorageDriver: Debug + Send + Sync + 'static {
    /// The concrete driver type.
    fn kind(&self) -> DriverKind;

    /// Makes the driver ready for use.
    async fn init(&self) -> Result<()>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Returns the value stored under `key`, if any.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Whether a value is stored under `key`.
    async fn has_item(&self, key: &str) -> Result<bool>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// All keys owned by this driver.
    async fn get_keys(&self) -> Result<Vec<String>>;

    /// Number of keys owned by this driver.
    async fn get_length(&self) -> Result<usize>;

    /// Removes every key owned by this driver.
    async fn clear(&self) -> Result<()>;

    /// Releases the driver. A closed driver is never handed out again.
    fn close(&self);

    /// Whether the driver was closed, explicitly or by its facility.
    fn is_closed(&self) -> bool;
}
