//! The closed resource unions served over the four discovery families,
//! plus the response envelope shared by every builder.

use envoy_types::pb::envoy::service::discovery::v3::DiscoveryResponse;
use envoy_types::pb::google::protobuf::Any;

use super::cluster::ClusterResource;
use super::endpoint::ClusterAssignment;
use super::listener::ListenerResource;
use super::secret::SecretResource;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// The four resource families of the aggregated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Cluster,
    Endpoint,
    Listener,
    Secret,
}

impl ResourceKind {
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => CLUSTER_TYPE_URL,
            ResourceKind::Endpoint => ENDPOINT_TYPE_URL,
            ResourceKind::Listener => LISTENER_TYPE_URL,
            ResourceKind::Secret => SECRET_TYPE_URL,
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<ResourceKind> {
        match type_url {
            CLUSTER_TYPE_URL => Some(ResourceKind::Cluster),
            ENDPOINT_TYPE_URL => Some(ResourceKind::Endpoint),
            LISTENER_TYPE_URL => Some(ResourceKind::Listener),
            SECRET_TYPE_URL => Some(ResourceKind::Secret),
            _ => None,
        }
    }
}

/// A cached resource value. A closed union keeps the cache monomorphic
/// and lets builders dispatch on the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum XdsResource {
    Cluster(ClusterResource),
    Endpoint(ClusterAssignment),
    Listener(ListenerResource),
    Secret(SecretResource),
}

impl XdsResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            XdsResource::Cluster(_) => ResourceKind::Cluster,
            XdsResource::Endpoint(_) => ResourceKind::Endpoint,
            XdsResource::Listener(_) => ResourceKind::Listener,
            XdsResource::Secret(_) => ResourceKind::Secret,
        }
    }

    pub fn name(&self) -> String {
        match self {
            XdsResource::Cluster(c) => c.name(),
            XdsResource::Endpoint(e) => e.name(),
            XdsResource::Listener(l) => l.name(),
            XdsResource::Secret(s) => s.name(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            XdsResource::Cluster(c) => c.describe(),
            XdsResource::Endpoint(e) => e.describe(),
            XdsResource::Listener(l) => l.describe(),
            XdsResource::Secret(s) => s.describe(),
        }
    }
}

/// Wrap encoded resources in a DiscoveryResponse. Nonce is the fixed
/// string `"0"` in this dialect; proxies treat it opaquely.
pub fn make_response(
    encoded: Vec<Vec<u8>>,
    type_url: &str,
    version: &str,
) -> DiscoveryResponse {
    DiscoveryResponse {
        version_info: version.to_string(),
        resources: encoded
            .into_iter()
            .map(|value| Any {
                type_url: type_url.to_string(),
                value,
            })
            .collect(),
        type_url: type_url.to_string(),
        nonce: "0".to_string(),
        ..Default::default()
    }
}
