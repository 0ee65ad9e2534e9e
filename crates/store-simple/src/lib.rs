//! Storage driver over a synchronous flat string map (the `localStorage`
//! model).
//!
//! The facility is shared with unrelated code, so every key is prefixed with
//! the configured [`Namespace`] and enumeration, counting and clearing only
//! ever touch prefixed keys. The facility is synchronous: every operation of
//! [`SimpleStorage`] completes on its first poll.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod facility;

pub use error::WriteError;
pub use facility::{MemorySimpleFacility, SimpleFacility};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use kv_keeper_store::{DriverKind, Error, Namespace, Result, StorageDriver};
use tracing::debug;

/// How values are written to the facility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Values are stored as-is.
    #[default]
    Raw,
    /// Values are stored JSON encoded and decoded on read.
    Json,
}

/// How `has_item` decides whether an item exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresenceCheck {
    /// The key is present, whatever its value (`""` and `"0"` count).
    #[default]
    KeyPresence,
    /// The key is present and its value is non-empty.
    ValueTruthiness,
}

/// Options specific to [`SimpleStorage`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimpleStorageOptions {
    /// Encoding of stored values.
    pub value_encoding: ValueEncoding,
    /// Semantics of `has_item`.
    pub presence_check: PresenceCheck,
}

/// Driver over a [`SimpleFacility`].
#[derive(Debug)]
pub struct SimpleStorage {
    facility: Arc<dyn SimpleFacility>,
    namespace: Namespace,
    options: SimpleStorageOptions,
    closed: AtomicBool,
}

impl SimpleStorage {
    /// Creates a driver scoping its keys with `namespace`.
    #[must_use]
    pub fn new(
        facility: Arc<dyn SimpleFacility>,
        namespace: Namespace,
        options: SimpleStorageOptions,
    ) -> Self {
        debug!(namespace = %namespace, "creating simple storage driver");

        Self {
            facility,
            namespace,
            options,
            closed: AtomicBool::new(false),
        }
    }

    /// The namespace keys are written under.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn own_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.facility
            .keys()
            .into_iter()
            .filter(|key| self.namespace.owns(key))
    }

    fn encode(&self, value: &str) -> Result<String> {
        match self.options.value_encoding {
            ValueEncoding::Raw => Ok(value.to_string()),
            ValueEncoding::Json => {
                serde_json::to_string(value).map_err(|e| Error::Parse(e.to_string()))
            }
        }
    }

    fn decode(&self, raw: String) -> Result<String> {
        match self.options.value_encoding {
            ValueEncoding::Raw => Ok(raw),
            ValueEncoding::Json => {
                serde_json::from_str(&raw).map_err(|e| Error::Parse(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl StorageDriver for SimpleStorage {
    fn kind(&self) -> DriverKind {
        DriverKind::Simple
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let encoded = self.encode(value)?;
        self.facility
            .set_item(&self.namespace.key(key), &encoded)
            .map_err(|WriteError(message)| Error::StorageWrite(message))
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.facility
            .get_item(&self.namespace.key(key))
            .map(|raw| self.decode(raw))
            .transpose()
    }

    async fn has_item(&self, key: &str) -> Result<bool> {
        let physical_key = self.namespace.key(key);

        match self.options.presence_check {
            PresenceCheck::KeyPresence => Ok(self.facility.contains_key(&physical_key)),
            PresenceCheck::ValueTruthiness => match self.facility.get_item(&physical_key) {
                Some(raw) => Ok(!self.decode(raw)?.is_empty()),
                None => Ok(false),
            },
        }
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.facility.remove_item(&self.namespace.key(key));
        Ok(())
    }

    async fn get_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .own_keys()
            .filter_map(|key| self.namespace.strip(&key).map(str::to_string))
            .collect())
    }

    async fn get_length(&self) -> Result<usize> {
        Ok(self.own_keys().count())
    }

    async fn clear(&self) -> Result<()> {
        let keys: Vec<String> = self.own_keys().collect();
        debug!(count = keys.len(), "clearing simple storage namespace");

        for key in keys {
            self.facility.remove_item(&key);
        }
        Ok(())
    }

    fn close(&self) {
        debug!(namespace = %self.namespace, "closing simple storage driver");
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
