//! EDS handler: pod `traffic.svc.<svc>.port.<N>` annotations drive the
//! membership of the service cluster assignments.

use std::collections::HashSet;
use std::sync::Arc;

use crate::kubernetes::{EventContext, PodHandler, PodInfo};
use crate::xds::cluster::service_cluster_name;
use crate::xds::resource::{ResourceKind, XdsResource};

use super::{ClusterAssignment, EndpointEntry};

pub struct EdsTranslator;

fn member_key(pod: &PodInfo) -> String {
    format!("{}@{}", pod.name, pod.namespace)
}

impl EdsTranslator {
    fn apply(cx: &mut EventContext<'_>, old: Option<&PodInfo>, new: Option<&PodInfo>) {
        let mut visited = HashSet::new();

        if let Some(new) = new {
            let entry = EndpointEntry::from_pod(new);
            for (port, services) in new.port_set() {
                for service in services {
                    let name = service_cluster_name(&service, &new.namespace, port);
                    let mut assignment = match cx
                        .state
                        .get_resource_clone(ResourceKind::Endpoint, &name)
                    {
                        Some((XdsResource::Endpoint(assignment), _)) => assignment,
                        _ => ClusterAssignment::new(service, new.namespace.clone(), port),
                    };
                    assignment.endpoints.insert(member_key(new), entry.clone());
                    let version = assignment.version();
                    visited.insert(name);
                    cx.state
                        .update_resource(XdsResource::Endpoint(assignment), &version);
                }
            }
        }

        if let Some(old) = old {
            let key = member_key(old);
            for (port, services) in old.port_set() {
                for service in services {
                    let name = service_cluster_name(&service, &old.namespace, port);
                    if visited.contains(&name) {
                        continue;
                    }
                    let Some((XdsResource::Endpoint(mut assignment), _)) =
                        cx.state.get_resource_clone(ResourceKind::Endpoint, &name)
                    else {
                        continue;
                    };
                    if assignment.endpoints.remove(&key).is_some() {
                        // version() is "" once the last member leaves,
                        // which deletes the row.
                        let version = assignment.version();
                        cx.state
                            .update_resource(XdsResource::Endpoint(assignment), &version);
                    }
                }
            }
        }
    }
}

impl PodHandler for EdsTranslator {
    fn pod_valid(&self, pod: &PodInfo) -> bool {
        pod.valid()
    }

    fn pod_added(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>) {
        Self::apply(cx, None, Some(pod.as_ref()));
    }

    fn pod_deleted(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>) {
        Self::apply(cx, Some(pod.as_ref()), None);
    }

    fn pod_updated(&self, cx: &mut EventContext<'_>, old: &Arc<PodInfo>, new: &Arc<PodInfo>) {
        Self::apply(cx, Some(old.as_ref()), Some(new.as_ref()));
    }
}
