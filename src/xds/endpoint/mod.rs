//! EDS: cluster load assignments and their translator.

mod assignment;
mod translator;

pub use assignment::{ClusterAssignment, EndpointEntry};
pub use translator::EdsTranslator;

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::core::v3::{
    address, socket_address, Address, Node, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::service::discovery::v3::DiscoveryResponse;
use envoy_types::pb::google::protobuf::UInt32Value;
use prost::Message;

use crate::xds::resource::{make_response, XdsResource, ENDPOINT_TYPE_URL};

/// One LbEndpoint addressing `ip:port`, optionally weighted.
pub fn lb_endpoint_for(ip: &str, port: u32, weight: Option<u32>) -> LbEndpoint {
    LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(Address {
                address: Some(address::Address::SocketAddress(SocketAddress {
                    address: ip.to_string(),
                    port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        })),
        load_balancing_weight: weight.map(|value| UInt32Value { value }),
        ..Default::default()
    }
}

/// One locality wrapping a single endpoint, the shape STATIC clusters use.
pub fn locality_with_endpoint(ip: &str, port: u32, weight: Option<u32>) -> LocalityLbEndpoints {
    LocalityLbEndpoints {
        lb_endpoints: vec![lb_endpoint_for(ip, port, weight)],
        ..Default::default()
    }
}

/// Build the EDS response: one load assignment per cached row, one
/// locality each, zero-weight members omitted.
pub fn build_response(
    resources: &BTreeMap<String, XdsResource>,
    version: &str,
    _node: &Node,
) -> DiscoveryResponse {
    let mut encoded = Vec::with_capacity(resources.len());
    for resource in resources.values() {
        let XdsResource::Endpoint(assignment) = resource else {
            continue;
        };
        encoded.push(assignment.to_load_assignment().encode_to_vec());
    }
    make_response(encoded, ENDPOINT_TYPE_URL, version)
}
