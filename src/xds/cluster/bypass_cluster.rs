//! STATIC cluster addressing a service's cluster IP directly, used for the
//! kube API service whose traffic must not pass through EDS routing.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::cluster::v3::{cluster, Cluster};
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;

use super::{service_cluster_name, ClusterConfig};
use crate::kubernetes::ServiceInfo;
use crate::xds::endpoint::locality_with_endpoint;

#[derive(Debug, Clone, PartialEq)]
pub struct BypassCluster {
    pub service: String,
    pub namespace: String,
    pub port: u32,
    pub cluster_ip: String,
    pub config: ClusterConfig,
}

impl BypassCluster {
    pub fn new(service: &ServiceInfo, port: u32) -> BypassCluster {
        BypassCluster {
            service: service.name.clone(),
            namespace: service.namespace.clone(),
            port,
            cluster_ip: service.cluster_ip.clone(),
            config: ClusterConfig::default(),
        }
    }

    pub fn configure(&mut self, config: &BTreeMap<String, String>) {
        self.config = ClusterConfig::from_config(config);
    }

    pub fn name(&self) -> String {
        service_cluster_name(&self.service, &self.namespace, self.port)
    }

    pub fn describe(&self) -> String {
        format!(
            "{}.{}:{} bypass to {}",
            self.service, self.namespace, self.port, self.cluster_ip
        )
    }

    pub fn to_cluster(&self) -> Cluster {
        let mut result = Cluster {
            name: self.name(),
            connect_timeout: Some(self.config.connect_timeout_pb()),
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::Static as i32,
            )),
            load_assignment: Some(ClusterLoadAssignment {
                cluster_name: self.name(),
                endpoints: vec![locality_with_endpoint(&self.cluster_ip, self.port, None)],
                ..Default::default()
            }),
            ..Default::default()
        };
        self.config.apply(&mut result);
        result
    }
}
