//! Bidirectional selector⇄labels index.
//!
//! Each `(namespace, label_key, label_value)` triple maps to the typed
//! objects carrying that pair: pods via their labels, services and workload
//! controllers via their selectors. Matching in either direction counts how
//! often a candidate appears across the probe's pairs; a candidate matches
//! iff the count covers the full selector of whichever side owns one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::pod::PodInfo;
use super::service::ServiceInfo;
use super::workload::WorkloadInfo;
use super::ObjectKey;

/// Object kinds tracked by the index, ordered child-most last: a probe of a
/// higher type looks *up* at selectors, a lower type looks *down* at labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    Service,
    Workload,
    Pod,
}

/// A projection held by the index.
#[derive(Debug, Clone)]
pub enum ObjectRef {
    Pod(Arc<PodInfo>),
    Service(Arc<ServiceInfo>),
    Workload(Arc<WorkloadInfo>),
}

impl ObjectRef {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ObjectRef::Pod(_) => ResourceType::Pod,
            ObjectRef::Service(_) => ResourceType::Service,
            ObjectRef::Workload(_) => ResourceType::Workload,
        }
    }

    pub fn key(&self) -> ObjectKey {
        match self {
            ObjectRef::Pod(p) => p.key(),
            ObjectRef::Service(s) => s.key(),
            ObjectRef::Workload(w) => w.key(),
        }
    }

    /// The label pairs this object contributes to the index: a pod's
    /// labels, a service's or workload's selector.
    pub fn selector(&self) -> &BTreeMap<String, String> {
        match self {
            ObjectRef::Pod(p) => &p.labels,
            ObjectRef::Service(s) => &s.selector,
            ObjectRef::Workload(w) => &w.selector,
        }
    }
}

type ResourcesOnLabel = HashMap<ResourceType, Vec<ObjectRef>>;

/// The index itself. Lives under the same lock as the resource cache so a
/// handler sees both views consistently.
#[derive(Debug, Default)]
pub struct ObjectIndex {
    by_label: HashMap<(String, String, String), ResourcesOnLabel>,
}

impl ObjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, resource: ObjectRef) {
        debug!(kind = ?resource.resource_type(), key = %resource.key(), "index add");
        let namespace = resource.key().namespace;
        for (k, v) in resource.selector().clone() {
            let slot = self
                .by_label
                .entry((namespace.clone(), k, v))
                .or_default()
                .entry(resource.resource_type())
                .or_default();
            slot.push(resource.clone());
        }
    }

    pub fn remove(&mut self, resource: &ObjectRef) {
        debug!(kind = ?resource.resource_type(), key = %resource.key(), "index remove");
        let key = resource.key();
        for (k, v) in resource.selector().clone() {
            if let Some(on_label) = self
                .by_label
                .get_mut(&(key.namespace.clone(), k, v))
            {
                if let Some(list) = on_label.get_mut(&resource.resource_type()) {
                    list.retain(|existing| existing.key() != key);
                }
            }
        }
    }

    /// Find all objects of `match_type` matched by `probe`'s selector (or,
    /// probing upwards, whose selector matches `probe`'s labels).
    pub fn matched(&self, probe: &ObjectRef, match_type: ResourceType) -> Vec<ObjectRef> {
        let probe_key = probe.key();
        let mut counts: HashMap<ObjectKey, (ObjectRef, usize)> = HashMap::new();

        for (k, v) in probe.selector() {
            let Some(on_label) =
                self.by_label
                    .get(&(probe_key.namespace.clone(), k.clone(), v.clone()))
            else {
                return Vec::new();
            };
            for candidate in on_label.get(&match_type).into_iter().flatten() {
                counts
                    .entry(candidate.key())
                    .and_modify(|(_, n)| *n += 1)
                    .or_insert((candidate.clone(), 1));
            }
        }

        // Probing from a pod up to services/workloads, the candidate owns
        // the selector; probing down to pods, the probe does.
        let selector_on_candidate = probe.resource_type() > match_type;
        counts
            .into_values()
            .filter(|(candidate, count)| {
                let required = if selector_on_candidate {
                    candidate.selector().len()
                } else {
                    probe.selector().len()
                };
                required > 0 && *count == required
            })
            .map(|(candidate, _)| candidate)
            .collect()
    }
}
