//! The ClusterAssignment resource: per service+port endpoint membership.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::endpoint::v3::{ClusterLoadAssignment, LocalityLbEndpoints};

use super::lb_endpoint_for;
use crate::kubernetes::labels::{
    is_workload_annotation, label_value_u32, workload_annotation_to_label, DEFAULT_WEIGHT,
    ENDPOINT_WEIGHT, MAX_WEIGHT,
};
use crate::kubernetes::PodInfo;
use crate::xds::cluster::service_cluster_name;

/// One member of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointEntry {
    pub pod_ip: String,
    pub weight: u32,
    /// The contributing pod's resource version; feeds the assignment
    /// version.
    pub src_version: String,
}

impl EndpointEntry {
    /// Derive a member from a pod, reading the endpoint weight off its
    /// labels and workload-propagated annotations. Weights clamp to
    /// [0, 128].
    pub fn from_pod(pod: &PodInfo) -> EndpointEntry {
        let mut weight = DEFAULT_WEIGHT;
        for (key, value) in pod.annotations.iter().chain(pod.labels.iter()) {
            if value.is_empty() {
                continue;
            }
            let key = if is_workload_annotation(key) {
                workload_annotation_to_label(key)
            } else {
                key.clone()
            };
            if key == ENDPOINT_WEIGHT {
                weight = label_value_u32(value).min(MAX_WEIGHT);
            }
        }
        EndpointEntry {
            pod_ip: pod.pod_ip.clone(),
            weight,
            src_version: pod.resource_version.clone(),
        }
    }

    pub fn describe(&self) -> String {
        format!("{}|{}", self.pod_ip, self.weight)
    }
}

/// Endpoint membership of one EDS cluster, keyed by `<pod>@<ns>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    pub service: String,
    pub namespace: String,
    pub port: u32,
    pub endpoints: BTreeMap<String, EndpointEntry>,
}

impl ClusterAssignment {
    pub fn new(service: impl Into<String>, namespace: impl Into<String>, port: u32) -> Self {
        ClusterAssignment {
            service: service.into(),
            namespace: namespace.into(),
            port,
            endpoints: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> String {
        service_cluster_name(&self.service, &self.namespace, self.port)
    }

    pub fn describe(&self) -> String {
        let members: Vec<String> = self.endpoints.values().map(|e| e.describe()).collect();
        format!(
            "{}.{}:{}[{}]",
            self.service,
            self.namespace,
            self.port,
            members.join(",")
        )
    }

    /// Sorted join of the member source versions. Stable under member
    /// reordering; empty membership yields `""` which deletes the row.
    pub fn version(&self) -> String {
        let mut versions: Vec<&str> = self
            .endpoints
            .values()
            .map(|e| e.src_version.as_str())
            .collect();
        if versions.is_empty() {
            return String::new();
        }
        versions.sort_unstable();
        versions.join("-")
    }

    /// The wire representation: a single locality carrying every member
    /// with a non-zero weight. Members at weight 0 stay cached but are
    /// withheld from the response.
    pub fn to_load_assignment(&self) -> ClusterLoadAssignment {
        let lb_endpoints = self
            .endpoints
            .values()
            .filter(|entry| entry.weight > 0)
            .map(|entry| lb_endpoint_for(&entry.pod_ip, self.port, Some(entry.weight)))
            .collect();

        ClusterLoadAssignment {
            cluster_name: self.name(),
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints,
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}
