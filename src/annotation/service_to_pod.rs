//! Service-to-pod propagation.
//!
//! Writes `traffic.svc.<svc>.*` keys onto every pod a service selects:
//! cluster-IP routing keys, target-port protocol keys, the headless
//! marker, and the label copies headless pods need to rebuild the
//! service's routing policy locally. All writes are additive and
//! idempotent; re-running with unchanged inputs issues zero patches.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::kubernetes::index::{ObjectRef, ResourceType};
use crate::kubernetes::labels::{
    pod_headless_by_service, pod_key_by_service, pod_port_by_service,
    pod_target_port_by_service, service_port_protocol,
};
use crate::kubernetes::{
    EventContext, ObjectKey, PatchRequest, PodHandler, PodInfo, ServiceHandler, ServiceInfo,
};
use crate::xds::cluster::cluster_annotation_needed;
use crate::xds::listener::http_annotation_needed;

pub struct ServiceToPodAnnotator;

/// The full set of keys this service wants on its pods.
fn annotation_intents(service: &ServiceInfo) -> BTreeMap<String, String> {
    let headless = service.headless();
    let mut intents = BTreeMap::new();

    for port in &service.ports {
        let Some(protocol) = service.labels.get(&service_port_protocol(port.port)) else {
            continue;
        };
        if protocol.is_empty() {
            continue;
        }
        if !headless {
            intents.insert(
                pod_port_by_service(&service.name, port.port),
                protocol.clone(),
            );
        }
        intents.insert(
            pod_target_port_by_service(&service.name, port.effective_target_port()),
            protocol.clone(),
        );
    }

    for (key, value) in &service.labels {
        if value.is_empty() {
            continue;
        }
        let copy = (headless && cluster_annotation_needed(key))
            || http_annotation_needed(key, headless);
        if copy {
            intents.insert(
                pod_key_by_service(&service.name, &key["traffic.".len()..]),
                value.clone(),
            );
        }
    }

    if headless {
        intents.insert(pod_headless_by_service(&service.name), "true".to_string());
    }

    intents
}

fn matched_pods(cx: &EventContext<'_>, service: &Arc<ServiceInfo>) -> Vec<Arc<PodInfo>> {
    cx.state
        .index
        .matched(&ObjectRef::Service(service.clone()), ResourceType::Pod)
        .into_iter()
        .filter_map(|candidate| match candidate {
            ObjectRef::Pod(pod) => Some(pod),
            _ => None,
        })
        .collect()
}

fn push_pod_patch(
    cx: &mut EventContext<'_>,
    pod: ObjectKey,
    set: BTreeMap<String, Option<String>>,
) {
    if !set.is_empty() {
        cx.push_patch(PatchRequest::PodAnnotations { pod, set });
    }
}

impl ServiceToPodAnnotator {
    fn annotate(cx: &mut EventContext<'_>, pod: &PodInfo, service: &ServiceInfo) {
        let set = annotation_intents(service)
            .into_iter()
            .map(|(key, value)| (key, Some(value)))
            .collect();
        push_pod_patch(cx, pod.key(), set);
    }

    /// Remove every `traffic.svc.<svc>.` key the pod currently carries.
    fn clear(cx: &mut EventContext<'_>, pod: &PodInfo, service: &ServiceInfo) {
        let prefix = pod_key_by_service(&service.name, "");
        let set: BTreeMap<String, Option<String>> = pod
            .annotations
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .map(|key| (key.clone(), None))
            .collect();
        push_pod_patch(cx, pod.key(), set);
    }
}

impl ServiceHandler for ServiceToPodAnnotator {
    fn service_added(&self, cx: &mut EventContext<'_>, service: &Arc<ServiceInfo>) {
        if service.is_kube_api() {
            // The API service must bypass mesh routing; tag every port
            // direct so CDS emits the bypass cluster.
            for port in &service.ports {
                cx.push_patch(PatchRequest::ServiceLabel {
                    service: service.key(),
                    key: service_port_protocol(port.port),
                    value: "direct".to_string(),
                });
            }
            return;
        }
        for pod in matched_pods(cx, service) {
            if pod.envoy_enabled() {
                Self::annotate(cx, &pod, service);
            }
        }
    }

    fn service_deleted(&self, cx: &mut EventContext<'_>, service: &Arc<ServiceInfo>) {
        for pod in matched_pods(cx, service) {
            Self::clear(cx, &pod, service);
        }
    }

    fn service_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<ServiceInfo>,
        new: &Arc<ServiceInfo>,
    ) {
        if new.is_kube_api() {
            self.service_added(cx, new);
            return;
        }
        let fresh = annotation_intents(new);
        let stale = annotation_intents(old);
        for pod in matched_pods(cx, new) {
            if !pod.envoy_enabled() {
                continue;
            }
            let mut set: BTreeMap<String, Option<String>> = fresh
                .iter()
                .map(|(key, value)| (key.clone(), Some(value.clone())))
                .collect();
            for key in stale.keys() {
                if !fresh.contains_key(key) {
                    set.insert(key.clone(), None);
                }
            }
            push_pod_patch(cx, pod.key(), set);
        }
    }
}

impl PodHandler for ServiceToPodAnnotator {
    fn pod_added(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>) {
        if !pod.envoy_enabled() {
            return;
        }
        let services: Vec<Arc<ServiceInfo>> = cx
            .state
            .index
            .matched(&ObjectRef::Pod(pod.clone()), ResourceType::Service)
            .into_iter()
            .filter_map(|candidate| match candidate {
                ObjectRef::Service(service) => Some(service),
                _ => None,
            })
            .collect();
        for service in services {
            Self::annotate(cx, pod, &service);
        }
    }

    fn pod_deleted(&self, _cx: &mut EventContext<'_>, _pod: &Arc<PodInfo>) {}
}
