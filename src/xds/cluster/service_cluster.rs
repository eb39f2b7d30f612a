//! EDS-discovered cluster for one service port.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::cluster::v3::{cluster, Cluster};
use envoy_types::pb::envoy::config::core::v3::{
    config_source, AggregatedConfigSource, ConfigSource,
};

use super::{service_cluster_name, ClusterConfig};
use crate::kubernetes::ServiceInfo;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCluster {
    pub service: String,
    pub namespace: String,
    pub port: u32,
    pub config: ClusterConfig,
    pub lb_policy: i32,
}

impl ServiceCluster {
    pub fn new(service: &ServiceInfo, port: u32) -> ServiceCluster {
        ServiceCluster {
            service: service.name.clone(),
            namespace: service.namespace.clone(),
            port,
            config: ClusterConfig::default(),
            lb_policy: cluster::LbPolicy::RoundRobin as i32,
        }
    }

    pub fn configure(&mut self, config: &BTreeMap<String, String>) {
        self.config = ClusterConfig::from_config(config);
        if let Some(policy) = config.get("traffic.lb.policy") {
            if let Some(policy) = cluster::LbPolicy::from_str_name(policy) {
                self.lb_policy = policy as i32;
            }
        }
    }

    pub fn name(&self) -> String {
        service_cluster_name(&self.service, &self.namespace, self.port)
    }

    pub fn describe(&self) -> String {
        format!(
            "{}.{}:{},mr={},ct={:?}",
            self.service, self.namespace, self.port, self.config.max_retries,
            self.config.connect_timeout
        )
    }

    pub fn to_cluster(&self) -> Cluster {
        let mut result = Cluster {
            name: self.name(),
            connect_timeout: Some(self.config.connect_timeout_pb()),
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::Eds as i32,
            )),
            eds_cluster_config: Some(cluster::EdsClusterConfig {
                eds_config: Some(ConfigSource {
                    config_source_specifier: Some(config_source::ConfigSourceSpecifier::Ads(
                        AggregatedConfigSource::default(),
                    )),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            lb_policy: self.lb_policy,
            ..Default::default()
        };
        self.config.apply(&mut result);
        result
    }
}
