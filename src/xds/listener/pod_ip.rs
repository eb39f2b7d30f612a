//! Pod-IP filter chains: the owning node's inbound traffic, and outbound
//! traffic other nodes send straight to a headless-service pod.

use std::collections::{BTreeMap, BTreeSet};

use envoy_types::pb::envoy::config::listener::v3::FilterChain;
use envoy_types::pb::envoy::config::route::v3::VirtualHost;

use crate::kubernetes::PodInfo;
use crate::xds::cluster::{static_cluster_name, LOCALHOST};

use super::http_config::ALL_DOMAINS;
use super::{
    destination_match, http_connection_manager_filter, tcp_proxy_filter, HttpChainConfig,
};

/// Plain TCP chain matched on `(pod_ip/32, port)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIpChain {
    pub pod_ip: String,
    pub node: String,
    pub port: u32,
    /// The pod opted out of loopback routing for its own node.
    pub local_access_pod_ip: bool,
}

impl PodIpChain {
    pub fn new(pod: &PodInfo, port: u32) -> PodIpChain {
        PodIpChain {
            pod_ip: pod.pod_ip.clone(),
            node: pod.node_id(),
            port,
            local_access_pod_ip: pod.local_access_via_pod_ip(),
        }
    }

    pub fn name(&self) -> String {
        format!("{}|{}.static", self.port, self.node.replace('.', "|"))
    }

    pub fn describe(&self) -> String {
        format!("{}:{}", self.node, self.port)
    }

    /// The chain's upstream in the context of the requesting node: the
    /// owning node routes through loopback into its own workload, every
    /// other node to the pod IP.
    pub fn chain_cluster(&self, node_id: &str) -> String {
        if node_id == self.node && !self.local_access_pod_ip {
            static_cluster_name(LOCALHOST, self.port)
        } else {
            static_cluster_name(&self.pod_ip, self.port)
        }
    }

    pub fn filter_chain(&self, node_id: &str) -> FilterChain {
        FilterChain {
            filter_chain_match: Some(destination_match(&self.pod_ip, self.port)),
            filters: vec![tcp_proxy_filter(&self.name(), &self.chain_cluster(node_id))],
            ..Default::default()
        }
    }
}

/// HTTP chain over the same match. For foreign nodes, headless services
/// contribute host-header virtual hosts (`svc:port`, `svc:port.ns`) so a
/// client addressing the service name still lands on this pod's cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpPodIpChain {
    pub chain: PodIpChain,
    pub namespace: String,
    pub services: BTreeSet<String>,
    pub http: HttpChainConfig,
}

impl HttpPodIpChain {
    pub fn new(pod: &PodInfo, port: u32, services: &BTreeSet<String>) -> HttpPodIpChain {
        HttpPodIpChain {
            chain: PodIpChain::new(pod, port),
            namespace: pod.namespace.clone(),
            services: services.clone(),
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
            "{}:{}, tracing={}",
            self.chain.pod_ip, self.chain.port, self.http.tracing
        )
    }

    fn virtual_hosts(&self, node_id: &str) -> Vec<VirtualHost> {
        let cluster = self.chain.chain_cluster(node_id);
        let mut hosts = Vec::new();

        if node_id != self.chain.node {
            // Foreign node: accept the service host headers, fall back to
            // the pod address for direct pod-IP clients.
            for service in &self.services {
                let domains = vec![
                    format!("{}:{}", service, self.chain.port),
                    format!("{}:{}.{}", service, self.chain.port, self.namespace),
                ];
                hosts.push(self.http.virtual_host(
                    &format!("{}_{}_vh", service, self.chain.port),
                    &cluster,
                    domains,
                ));
            }
            hosts.push(self.http.virtual_host(
                &format!("{}_vh", self.name()),
                &cluster,
                vec![ALL_DOMAINS.to_string()],
            ));
        } else {
            // Inbound side: no routing policy applies.
            let plain = HttpChainConfig::default();
            hosts.push(plain.virtual_host(
                &format!("{}_vh", self.name()),
                &cluster,
                vec![ALL_DOMAINS.to_string()],
            ));
        }
        hosts
    }

    pub fn filter_chain(&self, node_id: &str) -> FilterChain {
        let name = self.name();
        let inbound = node_id == self.chain.node;
        let http_filters = if inbound {
            HttpChainConfig::default().http_filters()
        } else {
            self.http.http_filters()
        };
        FilterChain {
            filter_chain_match: Some(destination_match(&self.chain.pod_ip, self.chain.port)),
            filters: vec![http_connection_manager_filter(
                &name,
                &name,
                self.virtual_hosts(node_id),
                http_filters,
                self.http.tracing_config(),
            )],
            ..Default::default()
        }
    }
}
