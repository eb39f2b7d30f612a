//! The process-wide resource cache.
//!
//! One exclusive mutex guards the typed resource caches together with the
//! cluster-object index, so a watch handler sees both views consistently.
//! A single condition variable broadcasts every mutation; discovery
//! readers long-poll by waiting on it until the combined version of their
//! requested names moves away from the version they last acknowledged.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::kubernetes::ObjectIndex;

use super::resource::{ResourceKind, XdsResource};

#[derive(Debug, Clone)]
struct CacheEntry {
    resource: XdsResource,
    version: String,
}

/// Everything guarded by the broker lock.
#[derive(Debug, Default)]
pub struct BrokerState {
    pub index: ObjectIndex,
    caches: HashMap<ResourceKind, BTreeMap<String, CacheEntry>>,
    dirty: bool,
}

impl BrokerState {
    /// Insert, update or delete (version `""`) a resource row.
    ///
    /// A put carrying the currently stored version is a no-op, as is a put
    /// whose value structurally equals the stored one.
    pub fn update_resource(&mut self, resource: XdsResource, version: &str) {
        let kind = resource.kind();
        let name = resource.name();
        let cache = self.caches.entry(kind).or_default();

        let stored_version = cache.get(&name).map(|e| e.version.as_str()).unwrap_or("");
        if stored_version == version {
            return;
        }

        if version.is_empty() {
            if cache.remove(&name).is_some() {
                info!(kind = ?kind, name = %name, "REMOVE {}", resource.describe());
                self.dirty = true;
            }
            return;
        }

        match cache.get(&name) {
            Some(existing) if existing.resource == resource => return,
            Some(_) => {
                info!(kind = ?kind, name = %name, version = %version, "UPDATE {}", resource.describe())
            }
            None => {
                info!(kind = ?kind, name = %name, version = %version, "ADD {}", resource.describe())
            }
        }

        cache.insert(
            name,
            CacheEntry {
                resource,
                version: version.to_string(),
            },
        );
        self.dirty = true;
    }

    /// Borrow a row and its version.
    pub fn get_resource(&self, kind: ResourceKind, name: &str) -> Option<(&XdsResource, &str)> {
        self.caches
            .get(&kind)
            .and_then(|cache| cache.get(name))
            .map(|entry| (&entry.resource, entry.version.as_str()))
    }

    /// Clone a row for a mutate-then-put flow.
    pub fn get_resource_clone(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Option<(XdsResource, String)> {
        self.get_resource(kind, name)
            .map(|(resource, version)| (resource.clone(), version.to_string()))
    }

    /// Collect the requested rows (all rows when `names` is empty) and
    /// their combined version.
    pub fn get_resources(
        &self,
        kind: ResourceKind,
        names: &[String],
    ) -> (BTreeMap<String, XdsResource>, String) {
        let empty = BTreeMap::new();
        let cache = self.caches.get(&kind).unwrap_or(&empty);

        let mut requested = BTreeMap::new();
        let mut versions = Vec::new();
        if names.is_empty() {
            for (name, entry) in cache {
                requested.insert(name.clone(), entry.resource.clone());
                versions.push(entry.version.clone());
            }
        } else {
            for name in names {
                match cache.get(name) {
                    Some(entry) => {
                        requested.insert(name.clone(), entry.resource.clone());
                        versions.push(entry.version.clone());
                    }
                    None => warn!(kind = ?kind, name = %name, "Could not find requested resource"),
                }
            }
        }

        (requested, combined_version(versions))
    }
}

/// `""` when empty, the single version when alone, else the md5 hex digest
/// of the sorted comma-joined versions. The sort keeps the digest a pure
/// function of the version multiset.
fn combined_version(mut versions: Vec<String>) -> String {
    match versions.len() {
        0 => String::new(),
        1 => versions.pop().expect("len checked"),
        _ => {
            versions.sort_unstable();
            format!("{:x}", md5::compute(versions.join(",")))
        }
    }
}

/// The shared lock + condvar pair around [`BrokerState`].
#[derive(Debug, Default)]
pub struct ResourceBroker {
    state: Mutex<BrokerState>,
    changed: Condvar,
}

impl ResourceBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` under the lock; broadcast afterwards if it mutated the
    /// cache. Handlers must do all their read-modify-write inside one
    /// closure invocation.
    pub fn with<R>(&self, f: impl FnOnce(&mut BrokerState) -> R) -> R {
        let mut guard = self.lock();
        let result = f(&mut guard);
        if std::mem::take(&mut guard.dirty) {
            drop(guard);
            self.changed.notify_all();
        }
        result
    }

    /// Snapshot without waiting.
    pub fn get_resources(
        &self,
        kind: ResourceKind,
        names: &[String],
    ) -> (BTreeMap<String, XdsResource>, String) {
        self.lock().get_resources(kind, names)
    }

    /// The discovery long-poll: return as soon as the combined version of
    /// the requested names differs from `last_version`. Broadcasts are
    /// non-targeted, so the predicate is rechecked on every wakeup.
    ///
    /// Blocking; call from a blocking-capable task.
    pub fn wait_for_resources(
        &self,
        kind: ResourceKind,
        names: &[String],
        last_version: &str,
    ) -> (BTreeMap<String, XdsResource>, String) {
        let mut guard = self.lock();
        loop {
            let (resources, version) = guard.get_resources(kind, names);
            if version != last_version {
                return (resources, version);
            }
            debug!(kind = ?kind, version = %version, "Waiting for resource update");
            guard = self
                .changed
                .wait(guard)
                .expect("resource broker lock poisoned");
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().expect("resource broker lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::cluster::{ClusterResource, StaticCluster};
    use crate::xds::XdsResource;

    fn static_row(ip: &str, port: u32) -> XdsResource {
        XdsResource::Cluster(ClusterResource::Static(StaticCluster::new(ip, port)))
    }

    #[test]
    fn test_update_delete_reemit_cycle() {
        let mut state = BrokerState::default();
        state.update_resource(static_row("10.1.0.1", 80), "1");
        let (first, version) = state.get_resources(ResourceKind::Cluster, &[]);
        assert_eq!(version, "1");

        state.update_resource(static_row("10.1.0.1", 80), "");
        let (gone, version) = state.get_resources(ResourceKind::Cluster, &[]);
        assert!(gone.is_empty());
        assert_eq!(version, "");

        state.update_resource(static_row("10.1.0.1", 80), "1");
        let (again, _) = state.get_resources(ResourceKind::Cluster, &[]);
        assert_eq!(first, again);
    }

    #[test]
    fn test_noop_puts_do_not_dirty() {
        let mut state = BrokerState::default();
        state.update_resource(static_row("10.1.0.1", 80), "1");
        state.dirty = false;

        // same version
        state.update_resource(static_row("10.1.0.1", 80), "1");
        assert!(!state.dirty);

        // structurally equal value under a new version
        state.update_resource(static_row("10.1.0.1", 80), "2");
        assert!(!state.dirty);

        // delete of an absent row
        state.update_resource(static_row("10.9.9.9", 80), "");
        assert!(!state.dirty);
    }

    #[test]
    fn test_combined_version() {
        assert_eq!(combined_version(vec![]), "");
        assert_eq!(combined_version(vec!["7".into()]), "7");

        let a = combined_version(vec!["1".into(), "2".into()]);
        let b = combined_version(vec!["2".into(), "1".into()]);
        assert_eq!(a, b);
        assert_eq!(a, format!("{:x}", md5::compute("1,2")));
    }

    #[test]
    fn test_get_resources_intersection() {
        let mut state = BrokerState::default();
        state.update_resource(static_row("10.1.0.1", 80), "1");
        state.update_resource(static_row("10.1.0.2", 80), "2");

        let (all, _) = state.get_resources(ResourceKind::Cluster, &[]);
        assert_eq!(all.len(), 2);

        let names = vec!["80|10_1_0_1.static".to_string(), "missing".to_string()];
        let (some, version) = state.get_resources(ResourceKind::Cluster, &names);
        assert_eq!(some.len(), 1);
        assert_eq!(version, "1");
    }

    #[test]
    fn test_wait_for_resources_wakes_on_change() {
        use std::sync::Arc;
        let broker = Arc::new(ResourceBroker::new());

        let waiter = {
            let broker = broker.clone();
            std::thread::spawn(move || {
                broker.wait_for_resources(ResourceKind::Cluster, &[], "")
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        broker.with(|state| state.update_resource(static_row("10.1.0.1", 80), "1"));

        let (resources, version) = waiter.join().expect("waiter thread");
        assert_eq!(resources.len(), 1);
        assert_eq!(version, "1");
    }
}
