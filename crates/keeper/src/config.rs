//! Configuration of a [`KvKeeper`](crate::KvKeeper).
//!
//! Configuration is write-once: it is either supplied at construction time
//! through [`KeeperConfig::builder`], or set by a single successful call to
//! [`KvKeeper::configure`](crate::KvKeeper::configure).

use kv_keeper_store::{
    DEFAULT_DATABASE_NAME, DEFAULT_DATABASE_VERSION, DEFAULT_STORE_NAME, DriverType, Error,
    Namespace, Result, StorageConfig,
};
use kv_keeper_store_simple::{PresenceCheck, SimpleStorageOptions, ValueEncoding};
use kv_keeper_store_structured::StructuredStorageOptions;
use tracing::warn;

const DATABASE_NAME: &str = "databaseName";
const STORE_NAME: &str = "storeName";
const DEFAULT_DRIVER_TYPE: &str = "defaultDriverType";

/// Option keys accepted by [`KvKeeper::configure`](crate::KvKeeper::configure).
pub const CONFIGURABLE_KEYS: [&str; 3] = [DATABASE_NAME, STORE_NAME, DEFAULT_DRIVER_TYPE];

/// Settings of a [`KvKeeper`](crate::KvKeeper).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeeperConfig {
    /// Name of the structured database, first half of the namespace.
    pub database_name: String,

    /// Name of the record store, second half of the namespace.
    pub store_name: String,

    /// Driver type used when none is requested explicitly.
    pub default_driver_type: DriverType,

    /// Schema version the structured database is opened with.
    pub database_version: u32,

    /// Encoding of values written by the simple driver.
    pub value_encoding: ValueEncoding,

    /// Semantics of `has_item` for the simple driver.
    pub presence_check: PresenceCheck,

    /// Whether the structured driver defers `remove_item` by one yield.
    pub defer_remove: bool,
}

impl KeeperConfig {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> KeeperConfigBuilder {
        KeeperConfigBuilder::new()
    }

    /// Namespace the simple driver prefixes its keys with.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.database_name, &self.store_name)
    }

    pub(crate) fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            database_name: self.database_name.clone(),
            store_name: self.store_name.clone(),
            database_version: self.database_version,
        }
    }

    pub(crate) const fn simple_options(&self) -> SimpleStorageOptions {
        SimpleStorageOptions {
            value_encoding: self.value_encoding,
            presence_check: self.presence_check,
        }
    }

    pub(crate) const fn structured_options(&self) -> StructuredStorageOptions {
        StructuredStorageOptions {
            defer_remove: self.defer_remove,
        }
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            store_name: DEFAULT_STORE_NAME.to_string(),
            default_driver_type: DriverType::Auto,
            database_version: DEFAULT_DATABASE_VERSION,
            value_encoding: ValueEncoding::Raw,
            presence_check: PresenceCheck::KeyPresence,
            defer_remove: true,
        }
    }
}

/// Builder for [`KeeperConfig`].
#[derive(Debug, Default)]
pub struct KeeperConfigBuilder {
    config: KeeperConfig,
}

impl KeeperConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database name
    #[must_use]
    pub fn database_name(mut self, database_name: impl Into<String>) -> Self {
        self.config.database_name = database_name.into();
        self
    }

    /// Set the store name
    #[must_use]
    pub fn store_name(mut self, store_name: impl Into<String>) -> Self {
        self.config.store_name = store_name.into();
        self
    }

    /// Set the default driver type
    #[must_use]
    pub const fn default_driver_type(mut self, driver_type: DriverType) -> Self {
        self.config.default_driver_type = driver_type;
        self
    }

    /// Set the structured database schema version
    #[must_use]
    pub const fn database_version(mut self, version: u32) -> Self {
        self.config.database_version = version;
        self
    }

    /// Set the simple driver value encoding
    #[must_use]
    pub const fn value_encoding(mut self, encoding: ValueEncoding) -> Self {
        self.config.value_encoding = encoding;
        self
    }

    /// Set the simple driver presence check
    #[must_use]
    pub const fn presence_check(mut self, presence_check: PresenceCheck) -> Self {
        self.config.presence_check = presence_check;
        self
    }

    /// Set whether structured removals are deferred
    #[must_use]
    pub const fn defer_remove(mut self, defer_remove: bool) -> Self {
        self.config.defer_remove = defer_remove;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> KeeperConfig {
        self.config
    }
}

/// Write-once holder of the active configuration.
#[derive(Debug, Default)]
pub(crate) struct ConfigState {
    config: KeeperConfig,
    configured: bool,
}

impl ConfigState {
    pub(crate) const fn configured(config: KeeperConfig) -> Self {
        Self {
            config,
            configured: true,
        }
    }

    pub(crate) const fn config(&self) -> &KeeperConfig {
        &self.config
    }

    /// Applies string-keyed options all at once.
    ///
    /// Rejects a second configuration. An unknown key or an invalid driver
    /// type resets every setting to its default.
    pub(crate) fn configure<I, K, V>(&mut self, options: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        if self.configured {
            return Err(Error::ConfigurationAlreadySet);
        }

        let mut next = self.config.clone();
        for (key, value) in options {
            let key = key.as_ref();
            if !CONFIGURABLE_KEYS.contains(&key) {
                warn!(key, accepted = ?CONFIGURABLE_KEYS, "rejected configuration key");
                self.config = KeeperConfig::default();
                return Err(Error::ConfigurationKey(key.to_string()));
            }

            let value = value.into();
            match key {
                DATABASE_NAME => next.database_name = value,
                STORE_NAME => next.store_name = value,
                // DEFAULT_DRIVER_TYPE
                _ => match value.parse() {
                    Ok(driver_type) => next.default_driver_type = driver_type,
                    Err(err) => {
                        self.config = KeeperConfig::default();
                        return Err(err);
                    }
                },
            }
        }

        self.config = next;
        self.configured = true;
        Ok(())
    }
}
