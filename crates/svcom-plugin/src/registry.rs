//! An explicit registry of plugin factories.
//!
//! There is no process-wide registry. Applications create a
//! [`PluginRegistry`], hand clones of it to the code that registers
//! plugins, and keep the returned [`PluginRegistration`] for as long as the
//! plugin should stay available.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

struct Entries<F> {
    next_id: u64,
    factories: BTreeMap<u64, (String, F)>,
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: u64);
}

impl<F: Send> Unregister for Mutex<Entries<F>> {
    fn unregister(&self, id: u64) {
        let removed = self.lock().factories.remove(&id);
        if let Some((name, _)) = &removed {
            tracing::debug!(plugin = %name, "plugin unregistered");
        }
    }
}

/// A shared set of named factories of type `F`.
///
/// Cloning yields another handle to the same set.
pub struct PluginRegistry<F> {
    entries: Arc<Mutex<Entries<F>>>,
}

impl<F> Clone for PluginRegistry<F> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<F> Default for PluginRegistry<F> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 1,
                factories: BTreeMap::new(),
            })),
        }
    }
}

impl<F: Clone + Send + 'static> PluginRegistry<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory. It stays registered until the returned handle is
    /// dropped. Names need not be unique; lookups pick the earliest.
    #[must_use = "dropping the registration removes the plugin"]
    pub fn register(&self, name: impl Into<String>, factory: F) -> PluginRegistration {
        let name = name.into();
        let id = {
            let mut entries = self.entries.lock();
            let id = entries.next_id;
            entries.next_id += 1;
            entries.factories.insert(id, (name.clone(), factory));
            id
        };
        tracing::debug!(plugin = %name, "plugin registered");

        let entries: Arc<dyn Unregister> = self.entries.clone();
        PluginRegistration {
            registry: Arc::downgrade(&entries),
            id,
            name,
        }
    }

    /// Registered factories in registration order.
    pub fn factories(&self) -> Vec<(String, F)> {
        self.entries
            .lock()
            .factories
            .values()
            .map(|(name, factory)| (name.clone(), factory.clone()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<F> {
        self.entries
            .lock()
            .factories
            .values()
            .find(|(registered, _)| registered == name)
            .map(|(_, factory)| factory.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F> fmt::Debug for PluginRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_list()
            .entries(entries.factories.values().map(|(name, _)| name))
            .finish()
    }
}

/// Keeps one factory registered.
pub struct PluginRegistration {
    registry: Weak<dyn Unregister>,
    id: u64,
    name: String,
}

impl PluginRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PluginRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

impl fmt::Debug for PluginRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistration")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Factory = Arc<dyn Fn() -> u32 + Send + Sync>;

    #[test]
    fn registration_is_scoped() {
        let registry: PluginRegistry<Factory> = PluginRegistry::new();
        assert!(registry.is_empty());

        let one = registry.register("one", Arc::new(|| 1));
        let two = registry.register("two", Arc::new(|| 2));
        assert_eq!(registry.len(), 2);
        let names: Vec<String> = registry.factories().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["one".to_string(), "two".to_string()]);

        drop(one);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("one").is_none());
        let factory = registry.get("two").expect("two should still be registered");
        assert_eq!(factory(), 2);
        assert_eq!(two.name(), "two");
    }

    #[test]
    fn clones_share_the_same_set() {
        let registry: PluginRegistry<Factory> = PluginRegistry::new();
        let injected = registry.clone();
        let _registration = injected.register("shared", Arc::new(|| 7));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registration_outliving_the_registry_is_harmless() {
        let registry: PluginRegistry<Factory> = PluginRegistry::new();
        let registration = registry.register("orphan", Arc::new(|| 0));
        drop(registry);
        drop(registration);
    }

    #[test]
    fn duplicate_names_resolve_to_the_earliest() {
        let registry: PluginRegistry<Factory> = PluginRegistry::new();
        let _first = registry.register("dup", Arc::new(|| 1));
        let _second = registry.register("dup", Arc::new(|| 2));
        let factory = registry.get("dup").expect("dup should be registered");
        assert_eq!(factory(), 1);
    }
}
