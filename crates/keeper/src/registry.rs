//! Memoized driver instances, at most one live instance per driver type.

use std::collections::HashMap;
use std::sync::Arc;

use kv_keeper_store::{DriverKind, DriverType, StorageDriver};
use parking_lot::Mutex;
use tracing::debug;

use crate::{KeeperConfig, Platform};

#[derive(Clone, Debug)]
enum Slot {
    Ready(Arc<dyn StorageDriver>),
    /// The platform lacks the facility; it is not probed again.
    Unsupported,
}

/// Cache of driver instances keyed by driver type.
///
/// An absent slot means "not probed yet", which is distinct from a slot
/// marked unsupported. Closed drivers are evicted on lookup so the next
/// resolution builds a fresh one.
#[derive(Debug)]
pub struct DriverRegistry {
    platform: Platform,
    slots: Mutex<HashMap<DriverKind, Slot>>,
}

impl DriverRegistry {
    /// Creates an empty registry probing `platform`.
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `requested` to a driver, creating and caching it if needed.
    ///
    /// `Auto` prefers structured storage and falls back to simple storage;
    /// an explicit type only ever yields that type.
    pub fn resolve(
        &self,
        requested: DriverType,
        config: &KeeperConfig,
    ) -> Option<(DriverKind, Arc<dyn StorageDriver>)> {
        let mut guard = self.slots.lock();
        let slots = &mut *guard;

        let mut lookup = |kind: DriverKind| {
            self.lookup_or_create(slots, kind, config)
                .map(|driver| (kind, driver))
        };

        match requested {
            DriverType::Simple => lookup(DriverKind::Simple),
            DriverType::Structured => lookup(DriverKind::Structured),
            DriverType::Auto => lookup(DriverKind::Structured).or_else(|| lookup(DriverKind::Simple)),
        }
    }

    fn lookup_or_create(
        &self,
        slots: &mut HashMap<DriverKind, Slot>,
        kind: DriverKind,
        config: &KeeperConfig,
    ) -> Option<Arc<dyn StorageDriver>> {
        let closed = matches!(slots.get(&kind), Some(Slot::Ready(driver)) if driver.is_closed());
        if closed {
            debug!(%kind, "evicting closed storage driver");
            slots.remove(&kind);
        }

        match slots.get(&kind) {
            Some(Slot::Ready(driver)) => return Some(Arc::clone(driver)),
            Some(Slot::Unsupported) => return None,
            None => {}
        }

        let created = self.platform.create_driver(kind, config);
        debug!(%kind, supported = created.is_some(), "probed storage facility");

        let slot = created.clone().map_or(Slot::Unsupported, Slot::Ready);
        slots.insert(kind, slot);
        created
    }

    /// The live cached driver of `kind`, if any.
    #[must_use]
    pub fn cached(&self, kind: DriverKind) -> Option<Arc<dyn StorageDriver>> {
        match self.slots.lock().get(&kind) {
            Some(Slot::Ready(driver)) if !driver.is_closed() => Some(Arc::clone(driver)),
            _ => None,
        }
    }

    /// Whether `kind` was probed and found unsupported.
    #[must_use]
    pub fn is_unsupported(&self, kind: DriverKind) -> bool {
        matches!(self.slots.lock().get(&kind), Some(Slot::Unsupported))
    }

    /// Closes and forgets every cached driver.
    pub fn clear(&self) {
        let drained: Vec<Slot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();

        for slot in drained {
            if let Slot::Ready(driver) = slot {
                driver.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kv_keeper_store_simple::MemorySimpleFacility;
    use kv_keeper_store_structured::MemoryDatabaseFactory;

    fn resolve(registry: &DriverRegistry, requested: DriverType) -> Option<DriverKind> {
        registry
            .resolve(requested, &KeeperConfig::default())
            .map(|(kind, _)| kind)
    }

    #[test]
    fn test_auto_prefers_structured() {
        let registry = DriverRegistry::new(Platform::in_memory());

        assert_eq!(resolve(&registry, DriverType::Auto), Some(DriverKind::Structured));
        assert!(registry.cached(DriverKind::Simple).is_none());
    }

    #[test]
    fn test_auto_prefers_structured_over_cached_simple() {
        let registry = DriverRegistry::new(Platform::in_memory());

        assert_eq!(resolve(&registry, DriverType::Simple), Some(DriverKind::Simple));
        assert_eq!(resolve(&registry, DriverType::Auto), Some(DriverKind::Structured));
    }

    #[test]
    fn test_auto_falls_back_to_simple() {
        let registry = DriverRegistry::new(Platform::new().with_simple(MemorySimpleFacility::new()));

        assert_eq!(resolve(&registry, DriverType::Auto), Some(DriverKind::Simple));
        assert!(registry.is_unsupported(DriverKind::Structured));
        assert!(!registry.is_unsupported(DriverKind::Simple));
    }

    #[test]
    fn test_nothing_supported() {
        let registry = DriverRegistry::new(Platform::new());

        assert_eq!(resolve(&registry, DriverType::Auto), None);
        assert!(registry.is_unsupported(DriverKind::Structured));
        assert!(registry.is_unsupported(DriverKind::Simple));
    }

    #[test]
    fn test_explicit_type_is_never_substituted() {
        let registry =
            DriverRegistry::new(Platform::new().with_structured(MemoryDatabaseFactory::new()));

        assert_eq!(resolve(&registry, DriverType::Simple), None);
        assert_eq!(
            resolve(&registry, DriverType::Structured),
            Some(DriverKind::Structured)
        );
    }

    #[test]
    fn test_instances_are_memoized() {
        let registry = DriverRegistry::new(Platform::in_memory());
        let config = KeeperConfig::default();

        let (_, first) = registry.resolve(DriverType::Auto, &config).unwrap();
        let (_, second) = registry.resolve(DriverType::Structured, &config).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_closed_driver_is_replaced() {
        let registry = DriverRegistry::new(Platform::in_memory());
        let config = KeeperConfig::default();

        let (_, first) = registry.resolve(DriverType::Simple, &config).unwrap();
        first.close();
        assert!(registry.cached(DriverKind::Simple).is_none());

        let (_, second) = registry.resolve(DriverType::Simple, &config).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[test]
    fn test_clear_closes_drivers() {
        let registry = DriverRegistry::new(Platform::in_memory());
        let (_, driver) = registry
            .resolve(DriverType::Simple, &KeeperConfig::default())
            .unwrap();

        registry.clear();

        assert!(driver.is_closed());
        assert!(registry.cached(DriverKind::Simple).is_none());
    }
}
