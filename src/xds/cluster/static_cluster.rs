//! STATIC cluster pointing at a single `ip:port` endpoint.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::cluster::v3::{cluster, Cluster};
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;

use super::{static_cluster_name, ClusterConfig};
use crate::xds::endpoint::locality_with_endpoint;

#[derive(Debug, Clone, PartialEq)]
pub struct StaticCluster {
    pub ip: String,
    pub port: u32,
    pub config: ClusterConfig,
}

impl StaticCluster {
    pub fn new(ip: impl Into<String>, port: u32) -> StaticCluster {
        StaticCluster {
            ip: ip.into(),
            port,
            config: ClusterConfig::default(),
        }
    }

    pub fn configure(&mut self, config: &BTreeMap<String, String>) {
        self.config = ClusterConfig::from_config(config);
    }

    pub fn name(&self) -> String {
        static_cluster_name(&self.ip, self.port)
    }

    pub fn describe(&self) -> String {
        format!(
            "{}:{},mc={},mpr={},mr={}",
            self.ip,
            self.port,
            self.config.max_connections,
            self.config.max_pending_requests,
            self.config.max_requests
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
                endpoints: vec![locality_with_endpoint(&self.ip, self.port, None)],
                ..Default::default()
            }),
            ..Default::default()
        };
        self.config.apply(&mut result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_cluster_shape() {
        let cluster = StaticCluster::new("10.1.0.1", 8080).to_cluster();
        assert_eq!(cluster.name, "8080|10_1_0_1.static");
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::Static as i32
            ))
        );
        let assignment = cluster.load_assignment.unwrap();
        assert_eq!(assignment.cluster_name, "8080|10_1_0_1.static");
        assert_eq!(assignment.endpoints.len(), 1);
        assert_eq!(assignment.endpoints[0].lb_endpoints.len(), 1);
    }
}
