//! LDS: the sidecar listener, its filter chains, and their translator.
//!
//! Every proxy gets exactly one listener on the shared proxy port. An
//! ORIGINAL_DST listener filter restores the intercepted destination so
//! the per-chain `(destination ip, destination port)` matches work.

mod blackhole;
mod cluster_ip;
mod http_config;
mod pod_ip;
mod translator;

pub use blackhole::BlackholeChain;
pub use cluster_ip::{ClusterIpChain, HttpClusterIpChain};
pub use http_config::{
    needs_service_to_pod_annotation as http_annotation_needed, HttpChainConfig,
};
pub use pod_ip::{HttpPodIpChain, PodIpChain};
pub use translator::LdsTranslator;

use envoy_types::pb::envoy::config::core::v3::{
    address, socket_address, Address, CidrRange, Node, SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter, listener_filter, Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::envoy::config::route::v3::{
    route, route_match, Route, RouteConfiguration, RouteMatch, VirtualHost,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::listener::original_dst::v3::OriginalDst;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager, http_filter, HttpConnectionManager, HttpFilter,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy, TcpProxy,
};
use envoy_types::pb::envoy::service::discovery::v3::DiscoveryResponse;
use envoy_types::pb::google::protobuf::{Any, UInt32Value};
use prost::Message;

use crate::xds::ingress::{build_ingress_chains, IngressRoute};
use crate::xds::resource::{make_response, XdsResource, LISTENER_TYPE_URL};
use crate::xds::INGRESS_NODE_ID;

pub const SIDECAR_LISTENER_NAME: &str = "sidecar";
pub const INGRESS_LISTENER_NAME: &str = "ingress";

pub const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
pub const TCP_PROXY: &str = "envoy.filters.network.tcp_proxy";
pub const ROUTER_HTTP_FILTER: &str = "envoy.filters.http.router";
pub const HTTP_FAULT_FILTER: &str = "envoy.filters.http.fault";
pub const ORIGINAL_DST: &str = "envoy.filters.listener.original_dst";

pub const HCM_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
pub const ROUTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const HTTP_FAULT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.fault.v3.HTTPFault";
pub const ORIGINAL_DST_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.original_dst.v3.OriginalDst";

/// All filter-chain shapes stored in the listener cache. Sidecar chains
/// and ingress rows share the cache; the requesting node id picks which
/// family the response is assembled from.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerResource {
    ClusterIp(ClusterIpChain),
    HttpClusterIp(HttpClusterIpChain),
    PodIp(PodIpChain),
    HttpPodIp(HttpPodIpChain),
    Blackhole(BlackholeChain),
    IngressRoute(IngressRoute),
}

impl ListenerResource {
    pub fn name(&self) -> String {
        match self {
            ListenerResource::ClusterIp(c) => c.name(),
            ListenerResource::HttpClusterIp(c) => c.name(),
            ListenerResource::PodIp(c) => c.name(),
            ListenerResource::HttpPodIp(c) => c.name(),
            ListenerResource::Blackhole(c) => c.name(),
            ListenerResource::IngressRoute(r) => r.name(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ListenerResource::ClusterIp(c) => c.describe(),
            ListenerResource::HttpClusterIp(c) => c.describe(),
            ListenerResource::PodIp(c) => c.describe(),
            ListenerResource::HttpPodIp(c) => c.describe(),
            ListenerResource::Blackhole(_) => "listener,blackhole".to_string(),
            ListenerResource::IngressRoute(r) => r.describe(),
        }
    }

    /// The sidecar filter chain for this row, in the context of the
    /// requesting node. Ingress rows contribute nothing here.
    fn sidecar_filter_chain(&self, node_id: &str) -> Option<FilterChain> {
        match self {
            ListenerResource::ClusterIp(c) => c.filter_chain(),
            ListenerResource::HttpClusterIp(c) => c.filter_chain(),
            ListenerResource::PodIp(c) => Some(c.filter_chain(node_id)),
            ListenerResource::HttpPodIp(c) => Some(c.filter_chain(node_id)),
            ListenerResource::Blackhole(c) => Some(c.filter_chain()),
            ListenerResource::IngressRoute(_) => None,
        }
    }
}

pub(crate) fn typed_any<M: Message>(type_url: &str, message: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

/// Chain match on `(destination ip/32, destination port)`.
pub(crate) fn destination_match(ip: &str, port: u32) -> FilterChainMatch {
    FilterChainMatch {
        destination_port: Some(UInt32Value { value: port }),
        prefix_ranges: vec![CidrRange {
            address_prefix: ip.to_string(),
            prefix_len: Some(UInt32Value { value: 32 }),
        }],
        ..Default::default()
    }
}

pub(crate) fn tcp_proxy_filter(stat_prefix: &str, cluster: &str) -> Filter {
    let proxy = TcpProxy {
        stat_prefix: stat_prefix.to_string(),
        cluster_specifier: Some(tcp_proxy::ClusterSpecifier::Cluster(cluster.to_string())),
        ..Default::default()
    };
    Filter {
        name: TCP_PROXY.to_string(),
        config_type: Some(filter::ConfigType::TypedConfig(typed_any(
            TCP_PROXY_TYPE_URL,
            &proxy,
        ))),
    }
}

pub(crate) fn router_http_filter() -> HttpFilter {
    HttpFilter {
        name: ROUTER_HTTP_FILTER.to_string(),
        config_type: Some(http_filter::ConfigType::TypedConfig(typed_any(
            ROUTER_TYPE_URL,
            &Router::default(),
        ))),
        ..Default::default()
    }
}

/// An HCM network filter serving an inline route configuration.
pub(crate) fn http_connection_manager_filter(
    stat_prefix: &str,
    route_config_name: &str,
    virtual_hosts: Vec<VirtualHost>,
    http_filters: Vec<HttpFilter>,
    tracing: Option<http_connection_manager::Tracing>,
) -> Filter {
    let manager = HttpConnectionManager {
        codec_type: http_connection_manager::CodecType::Auto as i32,
        stat_prefix: stat_prefix.to_string(),
        route_specifier: Some(http_connection_manager::RouteSpecifier::RouteConfig(
            RouteConfiguration {
                name: route_config_name.to_string(),
                virtual_hosts,
                ..Default::default()
            },
        )),
        http_filters,
        tracing,
        ..Default::default()
    };
    Filter {
        name: HTTP_CONNECTION_MANAGER.to_string(),
        config_type: Some(filter::ConfigType::TypedConfig(typed_any(
            HCM_TYPE_URL,
            &manager,
        ))),
    }
}

/// Catch-all prefix route to a cluster.
pub(crate) fn prefix_route(prefix: &str, action: route::Action) -> Route {
    Route {
        r#match: Some(RouteMatch {
            path_specifier: Some(route_match::PathSpecifier::Prefix(prefix.to_string())),
            ..Default::default()
        }),
        action: Some(action),
        ..Default::default()
    }
}

fn listener_address(port: u32) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: "0.0.0.0".to_string(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
    }
}

/// Build the LDS response for the requesting node: the ingress gateway
/// gets the host/SNI-indexed listener, every sidecar the destination-IP
/// one.
pub fn build_response(
    resources: &std::collections::BTreeMap<String, XdsResource>,
    version: &str,
    node: &Node,
    proxy_port: u32,
) -> DiscoveryResponse {
    let listener = if node.id == INGRESS_NODE_ID {
        build_ingress_listener(resources, proxy_port)
    } else {
        build_sidecar_listener(resources, &node.id, proxy_port)
    };
    make_response(vec![listener.encode_to_vec()], LISTENER_TYPE_URL, version)
}

fn build_sidecar_listener(
    resources: &std::collections::BTreeMap<String, XdsResource>,
    node_id: &str,
    proxy_port: u32,
) -> Listener {
    let mut filter_chains = Vec::new();
    for resource in resources.values() {
        let XdsResource::Listener(listener) = resource else {
            continue;
        };
        if let Some(chain) = listener.sidecar_filter_chain(node_id) {
            filter_chains.push(chain);
        }
    }

    Listener {
        name: SIDECAR_LISTENER_NAME.to_string(),
        address: Some(listener_address(proxy_port)),
        filter_chains,
        listener_filters: vec![ListenerFilter {
            name: ORIGINAL_DST.to_string(),
            config_type: Some(listener_filter::ConfigType::TypedConfig(typed_any(
                ORIGINAL_DST_TYPE_URL,
                &OriginalDst::default(),
            ))),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn build_ingress_listener(
    resources: &std::collections::BTreeMap<String, XdsResource>,
    proxy_port: u32,
) -> Listener {
    let rows: Vec<&IngressRoute> = resources
        .values()
        .filter_map(|resource| match resource {
            XdsResource::Listener(ListenerResource::IngressRoute(row)) => Some(row),
            _ => None,
        })
        .collect();

    Listener {
        name: INGRESS_LISTENER_NAME.to_string(),
        address: Some(listener_address(proxy_port)),
        filter_chains: build_ingress_chains(&rows),
        ..Default::default()
    }
}
