use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use kv_keeper_store::{DriverKind, StorageDriver};
use kv_keeper_store_simple::{MemorySimpleFacility, SimpleFacility, SimpleStorage};
use kv_keeper_store_structured::{MemoryDatabaseFactory, StructuredFacility, StructuredStorage};

use crate::KeeperConfig;

/// The storage facilities available in the current environment.
///
/// Probing a platform is a capability check only; no connection is
/// attempted until a driver's `init` runs.
#[derive(Clone, Default)]
pub struct Platform {
    simple: Option<Arc<dyn SimpleFacility>>,
    structured: Option<Arc<dyn StructuredFacility>>,
}

impl Platform {
    /// A platform without any storage facility.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform offering both in-memory facilities.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new()
            .with_simple(MemorySimpleFacility::new())
            .with_structured(MemoryDatabaseFactory::new())
    }

    /// Adds a simple storage facility.
    #[must_use]
    pub fn with_simple(mut self, facility: impl SimpleFacility) -> Self {
        self.simple = Some(Arc::new(facility));
        self
    }

    /// Adds a structured storage facility.
    #[must_use]
    pub fn with_structured(mut self, facility: impl StructuredFacility) -> Self {
        self.structured = Some(Arc::new(facility));
        self
    }

    /// Creates an uninitialized driver of `kind`, or `None` if unsupported.
    pub(crate) fn create_driver(
        &self,
        kind: DriverKind,
        config: &KeeperConfig,
    ) -> Option<Arc<dyn StorageDriver>> {
        match kind {
            DriverKind::Simple => self.simple.as_ref().map(|facility| {
                Arc::new(SimpleStorage::new(
                    Arc::clone(facility),
                    config.namespace(),
                    config.simple_options(),
                )) as Arc<dyn StorageDriver>
            }),
            DriverKind::Structured => self.structured.as_ref().map(|facility| {
                Arc::new(StructuredStorage::new(
                    Arc::clone(facility),
                    config.storage_config(),
                    config.structured_options(),
                )) as Arc<dyn StorageDriver>
            }),
        }
    }
}

impl Debug for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Platform")
            .field("simple", &self.simple.is_some())
            .field("structured", &self.structured.is_some())
            .finish()
    }
}
