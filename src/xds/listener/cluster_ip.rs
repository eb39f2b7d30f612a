//! Cluster-IP filter chains: outbound traffic a sidecar intercepts on its
//! way to a service's virtual IP.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::listener::v3::FilterChain;

use crate::kubernetes::ServiceInfo;
use crate::xds::cluster::service_cluster_name;

use super::http_config::ALL_DOMAINS;
use super::{
    destination_match, http_connection_manager_filter, tcp_proxy_filter, HttpChainConfig,
};

/// Plain TCP chain: `(cluster_ip/32, port)` proxied to the service (or
/// bypass) cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIpChain {
    pub cluster_ip: String,
    pub service: String,
    pub namespace: String,
    pub port: u32,
}

impl ClusterIpChain {
    pub fn new(service: &ServiceInfo, port: u32) -> ClusterIpChain {
        ClusterIpChain {
            cluster_ip: service.cluster_ip.clone(),
            service: service.name.clone(),
            namespace: service.namespace.clone(),
            port,
        }
    }

    pub fn name(&self) -> String {
        self.cluster_name()
    }

    pub fn cluster_name(&self) -> String {
        service_cluster_name(&self.service, &self.namespace, self.port)
    }

    pub fn describe(&self) -> String {
        format!("{}, clusterIp={}", self.name(), self.cluster_ip)
    }

    fn routable(&self) -> bool {
        !self.cluster_ip.is_empty() && self.cluster_ip != "None"
    }

    pub fn filter_chain(&self) -> Option<FilterChain> {
        if !self.routable() {
            return None;
        }
        Some(FilterChain {
            filter_chain_match: Some(destination_match(&self.cluster_ip, self.port)),
            filters: vec![tcp_proxy_filter(&self.name(), &self.cluster_name())],
            ..Default::default()
        })
    }
}

/// HTTP chain over the same match, with the service's routing policy.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpClusterIpChain {
    pub chain: ClusterIpChain,
    pub http: HttpChainConfig,
}

impl HttpClusterIpChain {
    pub fn new(service: &ServiceInfo, port: u32) -> HttpClusterIpChain {
        HttpClusterIpChain {
            chain: ClusterIpChain::new(service, port),
            http: HttpChainConfig::default(),
        }
    }

    pub fn configure(&mut self, config: &BTreeMap<String, String>) {
        self.http = HttpChainConfig::from_config(config);
    }

    pub fn name(&self) -> String {
        self.chain.name()
    }

    pub fn describe(&self) -> String {
        format!(
            "{},{},tracing={}",
            self.name(),
            self.chain.cluster_ip,
            self.http.tracing
        )
    }

    pub fn filter_chain(&self) -> Option<FilterChain> {
        if !self.chain.routable() {
            return None;
        }
        let name = self.name();
        let virtual_host = self.http.virtual_host(
            &format!("{}_vh", name),
            &self.chain.cluster_name(),
            vec![ALL_DOMAINS.to_string()],
        );
        Some(FilterChain {
            filter_chain_match: Some(destination_match(&self.chain.cluster_ip, self.port())),
            filters: vec![http_connection_manager_filter(
                &name,
                &name,
                vec![virtual_host],
                self.http.http_filters(),
                self.http.tracing_config(),
            )],
            ..Default::default()
        })
    }

    fn port(&self) -> u32 {
        self.chain.port
    }
}
