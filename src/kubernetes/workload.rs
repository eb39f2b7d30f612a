//! Unified projection over the workload controllers whose labels are
//! propagated onto pods: deployments, stateful sets and daemon sets.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::labels::{label_value_bool, ENVOY_ENABLED};
use super::ObjectKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadInfo {
    pub resource_version: String,
    pub name: String,
    pub namespace: String,
    pub real_type: &'static str,
    pub selector: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<u32>,
    pub host_network: bool,
}

impl WorkloadInfo {
    pub fn from_deployment(deployment: &Deployment) -> WorkloadInfo {
        let spec = deployment.spec.as_ref();
        Self::project(
            &deployment.metadata,
            "Deployment",
            spec.map(|s| s.selector.match_labels.clone().unwrap_or_default())
                .unwrap_or_default(),
            spec.map(|s| &s.template),
        )
    }

    pub fn from_stateful_set(set: &StatefulSet) -> WorkloadInfo {
        let spec = set.spec.as_ref();
        Self::project(
            &set.metadata,
            "StatefulSet",
            spec.map(|s| s.selector.match_labels.clone().unwrap_or_default())
                .unwrap_or_default(),
            spec.map(|s| &s.template),
        )
    }

    pub fn from_daemon_set(set: &DaemonSet) -> WorkloadInfo {
        let spec = set.spec.as_ref();
        Self::project(
            &set.metadata,
            "DaemonSet",
            spec.map(|s| s.selector.match_labels.clone().unwrap_or_default())
                .unwrap_or_default(),
            spec.map(|s| &s.template),
        )
    }

    fn project(
        meta: &ObjectMeta,
        real_type: &'static str,
        selector: std::collections::BTreeMap<String, String>,
        template: Option<&PodTemplateSpec>,
    ) -> WorkloadInfo {
        let mut ports = Vec::new();
        let mut host_network = false;
        if let Some(pod_spec) = template.and_then(|t| t.spec.as_ref()) {
            host_network = pod_spec.host_network.unwrap_or(false);
            for container in &pod_spec.containers {
                for port in container.ports.iter().flatten() {
                    let port = port.container_port as u32;
                    if !ports.contains(&port) {
                        ports.push(port);
                    }
                }
            }
        }

        WorkloadInfo {
            resource_version: meta.resource_version.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            real_type,
            selector: selector.into_iter().collect(),
            labels: meta.labels.clone().unwrap_or_default().into_iter().collect(),
            ports,
            host_network,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn envoy_enabled(&self) -> bool {
        self.labels
            .get(ENVOY_ENABLED)
            .map(|v| label_value_bool(v))
            .unwrap_or(false)
    }

    pub fn same_except_version(&self, other: &WorkloadInfo) -> bool {
        let mut probe = other.clone();
        probe.resource_version = self.resource_version.clone();
        *self == probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envoy_enabled() {
        let workload = WorkloadInfo {
            resource_version: "1".into(),
            name: "api".into(),
            namespace: "default".into(),
            real_type: "Deployment",
            selector: BTreeMap::new(),
            labels: [("traffic.envoy.enabled".to_string(), "True".to_string())]
                .into_iter()
                .collect(),
            ports: vec![],
            host_network: false,
        };
        assert!(workload.envoy_enabled());
    }
}
