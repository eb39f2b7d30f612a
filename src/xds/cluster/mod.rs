//! CDS: cluster resources and their translator.

mod bypass_cluster;
mod config;
mod service_cluster;
mod static_cluster;
mod translator;

pub use bypass_cluster::BypassCluster;
pub use config::{needs_service_to_pod_annotation as cluster_annotation_needed, ClusterConfig};
pub use service_cluster::ServiceCluster;
pub use static_cluster::StaticCluster;
pub use translator::CdsTranslator;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::envoy::service::discovery::v3::DiscoveryResponse;
use prost::Message;

use crate::xds::resource::{make_response, XdsResource, CLUSTER_TYPE_URL};

/// Address used by the loopback clusters the owning node routes through.
pub const LOCALHOST: &str = "127.0.0.1";

/// The three cluster shapes served over CDS.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterResource {
    /// EDS-discovered pool behind a service's cluster IP.
    Service(ServiceCluster),
    /// STATIC single-endpoint cluster pointing at a cluster IP directly
    /// (the kube API service).
    Bypass(BypassCluster),
    /// STATIC single-endpoint cluster pointing at one pod IP (or
    /// loopback).
    Static(StaticCluster),
}

impl ClusterResource {
    pub fn name(&self) -> String {
        match self {
            ClusterResource::Service(c) => c.name(),
            ClusterResource::Bypass(c) => c.name(),
            ClusterResource::Static(c) => c.name(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ClusterResource::Service(c) => c.describe(),
            ClusterResource::Bypass(c) => c.describe(),
            ClusterResource::Static(c) => c.describe(),
        }
    }

    pub fn to_cluster(&self) -> Cluster {
        match self {
            ClusterResource::Service(c) => c.to_cluster(),
            ClusterResource::Bypass(c) => c.to_cluster(),
            ClusterResource::Static(c) => c.to_cluster(),
        }
    }
}

/// Name of the EDS cluster serving `<svc>` traffic on `<port>`; dots in
/// the service name are flattened so the name stays `|`-separable.
pub fn service_cluster_name(service: &str, namespace: &str, port: u32) -> String {
    format!("{}|{}|{}.outbound", port, namespace, service.replace('.', "_"))
}

/// Name of the STATIC cluster pointing at `ip:port`.
pub fn static_cluster_name(ip: &str, port: u32) -> String {
    format!("{}|{}.static", port, ip.replace('.', "_"))
}

/// Build the CDS response for a cache snapshot.
pub fn build_response(
    resources: &std::collections::BTreeMap<String, XdsResource>,
    version: &str,
    _node: &Node,
) -> DiscoveryResponse {
    let mut encoded = Vec::with_capacity(resources.len());
    for resource in resources.values() {
        let XdsResource::Cluster(cluster) = resource else {
            continue;
        };
        let cluster = cluster.to_cluster();
        if cluster
            .connect_timeout
            .as_ref()
            .map(|t| t.seconds == 0 && t.nanos == 0)
            .unwrap_or(true)
        {
            // A cluster without a connect timeout is a translator bug, not
            // an input error.
            panic!("cluster {} connect timeout must not be zero", cluster.name);
        }
        encoded.push(cluster.encode_to_vec());
    }
    make_response(encoded, CLUSTER_TYPE_URL, version)
}
