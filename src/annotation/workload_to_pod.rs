//! Workload-controller-to-pod propagation: copies `traffic.envoy.enabled`
//! and `traffic.endpoint.weight` from a deployment / stateful set /
//! daemon set onto its pods under the `traffic.rs.` prefix.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::kubernetes::index::{ObjectRef, ResourceType};
use crate::kubernetes::labels::{
    workload_label_to_annotation, POD_WORKLOAD_PREFIX, ENDPOINT_WEIGHT, ENVOY_ENABLED,
};
use crate::kubernetes::{
    EventContext, PatchRequest, PodHandler, PodInfo, WorkloadHandler, WorkloadInfo,
};

pub struct WorkloadToPodAnnotator;

const PROPAGATED_LABELS: [&str; 2] = [ENVOY_ENABLED, ENDPOINT_WEIGHT];

fn annotation_intents(workload: &WorkloadInfo) -> BTreeMap<String, String> {
    let mut intents = BTreeMap::new();
    for label in PROPAGATED_LABELS {
        if let Some(value) = workload.labels.get(label) {
            if !value.is_empty() {
                intents.insert(workload_label_to_annotation(label), value.clone());
            }
        }
    }
    intents
}

fn matched_pods(cx: &EventContext<'_>, workload: &Arc<WorkloadInfo>) -> Vec<Arc<PodInfo>> {
    cx.state
        .index
        .matched(&ObjectRef::Workload(workload.clone()), ResourceType::Pod)
        .into_iter()
        .filter_map(|candidate| match candidate {
            ObjectRef::Pod(pod) => Some(pod),
            _ => None,
        })
        .collect()
}

impl WorkloadToPodAnnotator {
    fn annotate(cx: &mut EventContext<'_>, pod: &PodInfo, workload: &WorkloadInfo) {
        let set: BTreeMap<String, Option<String>> = annotation_intents(workload)
            .into_iter()
            .map(|(key, value)| (key, Some(value)))
            .collect();
        if !set.is_empty() {
            cx.push_patch(PatchRequest::PodAnnotations { pod: pod.key(), set });
        }
    }

    /// Remove the whole `traffic.rs.` family the pod carries.
    fn clear(cx: &mut EventContext<'_>, pod: &PodInfo) {
        let set: BTreeMap<String, Option<String>> = pod
            .annotations
            .keys()
            .filter(|key| key.starts_with(POD_WORKLOAD_PREFIX))
            .map(|key| (key.clone(), None))
            .collect();
        if !set.is_empty() {
            cx.push_patch(PatchRequest::PodAnnotations { pod: pod.key(), set });
        }
    }
}

impl WorkloadHandler for WorkloadToPodAnnotator {
    fn workload_added(&self, cx: &mut EventContext<'_>, workload: &Arc<WorkloadInfo>) {
        for pod in matched_pods(cx, workload) {
            if pod.envoy_enabled() || workload.envoy_enabled() {
                Self::annotate(cx, &pod, workload);
            }
        }
    }

    fn workload_deleted(&self, cx: &mut EventContext<'_>, workload: &Arc<WorkloadInfo>) {
        for pod in matched_pods(cx, workload) {
            Self::clear(cx, &pod);
        }
    }

    fn workload_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<WorkloadInfo>,
        new: &Arc<WorkloadInfo>,
    ) {
        let fresh = annotation_intents(new);
        let stale = annotation_intents(old);
        for pod in matched_pods(cx, new) {
            if !(pod.envoy_enabled() || new.envoy_enabled()) {
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
            if !set.is_empty() {
                cx.push_patch(PatchRequest::PodAnnotations { pod: pod.key(), set });
            }
        }
    }
}

impl PodHandler for WorkloadToPodAnnotator {
    fn pod_added(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>) {
        let workloads: Vec<Arc<WorkloadInfo>> = cx
            .state
            .index
            .matched(&ObjectRef::Pod(pod.clone()), ResourceType::Workload)
            .into_iter()
            .filter_map(|candidate| match candidate {
                ObjectRef::Workload(workload) => Some(workload),
                _ => None,
            })
            .collect();
        for workload in workloads {
            if pod.envoy_enabled() || workload.envoy_enabled() {
                Self::annotate(cx, pod, &workload);
            }
        }
    }

    fn pod_deleted(&self, _cx: &mut EventContext<'_>, _pod: &Arc<PodInfo>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intents() {
        let workload = WorkloadInfo {
            resource_version: "1".into(),
            name: "api".into(),
            namespace: "default".into(),
            real_type: "Deployment",
            selector: BTreeMap::new(),
            labels: [
                ("traffic.envoy.enabled".to_string(), "true".to_string()),
                ("traffic.endpoint.weight".to_string(), "80".to_string()),
            ]
            .into_iter()
            .collect(),
            ports: vec![],
            host_network: false,
        };
        let intents = annotation_intents(&workload);
        assert_eq!(intents["traffic.rs.envoy.enabled"], "true");
        assert_eq!(intents["traffic.rs.endpoint.weight"], "80");
    }
}
