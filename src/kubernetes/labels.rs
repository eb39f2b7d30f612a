//! The `traffic.*` tagged-key vocabulary and its parsers.
//!
//! Labels and annotations carrying this prefix are the user API of the
//! control plane: protocol tags, endpoint weights, connection and retry
//! policies, fault injection, and the denormalized per-service /
//! per-workload copies written by the annotation propagators.

use std::time::Duration;

pub const ENVOY_ENABLED: &str = "traffic.envoy.enabled";
pub const ENVOY_ENABLED_BY_WORKLOAD: &str = "traffic.rs.envoy.enabled";
pub const ENDPOINT_WEIGHT: &str = "traffic.endpoint.weight";
pub const ENDPOINT_WEIGHT_BY_WORKLOAD: &str = "traffic.rs.endpoint.weight";
pub const LOCAL_ACCESS_POD_IP: &str = "traffic.envoy.local.use_podip";

pub const POD_SERVICE_PREFIX: &str = "traffic.svc.";
pub const POD_WORKLOAD_PREFIX: &str = "traffic.rs.";

pub const DEFAULT_WEIGHT: u32 = 100;
pub const MAX_WEIGHT: u32 = 128;

/// L7 protocol tag of a port. Ordering matters: when two services tag the
/// same target port, the higher protocol wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// Traffic bypasses Envoy routing policy (plain TCP to the original
    /// destination). Any tag value other than `http`/`tcp` lands here.
    Direct,
    Tcp,
    Http,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Direct
    }
}

impl Protocol {
    /// Parse a protocol tag value. Empty means untagged.
    pub fn parse(value: &str) -> Option<Protocol> {
        match value {
            "" => None,
            "http" => Some(Protocol::Http),
            "tcp" => Some(Protocol::Tcp),
            _ => Some(Protocol::Direct),
        }
    }
}

/// `traffic.port.<N>` - per-port protocol tag on a service or pod.
pub fn service_port_protocol(port: u32) -> String {
    format!("traffic.port.{}", port)
}

/// `traffic.target.port.<N>` - protocol tag of a pod-side port.
pub fn target_port_protocol(port: u32) -> String {
    format!("traffic.target.port.{}", port)
}

/// `traffic.svc.<svc>.<suffix>` - service-denormalized pod annotation.
pub fn pod_key_by_service(svc: &str, suffix: &str) -> String {
    format!("{}{}.{}", POD_SERVICE_PREFIX, svc, suffix)
}

/// `traffic.svc.<svc>.port.<N>` - cluster-IP routing key on a pod.
pub fn pod_port_by_service(svc: &str, port: u32) -> String {
    pod_key_by_service(svc, &format!("port.{}", port))
}

/// `traffic.svc.<svc>.target.port.<N>` - pod-side port key on a pod.
pub fn pod_target_port_by_service(svc: &str, port: u32) -> String {
    pod_key_by_service(svc, &format!("target.port.{}", port))
}

/// `traffic.svc.<svc>.headless` - headless-service marker on a pod.
pub fn pod_headless_by_service(svc: &str) -> String {
    pod_key_by_service(svc, "headless")
}

/// `traffic.ingress.port.<N>.<suffix>` - ingress config denormalized onto
/// a service annotation.
pub fn ingress_attribute(port: u32, suffix: &str) -> String {
    format!("traffic.ingress.port.{}.{}", port, suffix)
}

/// Does this pod annotation key carry a workload-controller label copy?
pub fn is_workload_annotation(key: &str) -> bool {
    key.starts_with(POD_WORKLOAD_PREFIX)
}

/// `traffic.rs.<suffix>` -> `traffic.<suffix>`, undoing the workload
/// propagation prefix so config parsers see the canonical key.
pub fn workload_annotation_to_label(key: &str) -> String {
    format!("traffic.{}", &key[POD_WORKLOAD_PREFIX.len()..])
}

/// `traffic.<suffix>` -> `traffic.rs.<suffix>`.
pub fn workload_label_to_annotation(key: &str) -> String {
    format!("{}{}", POD_WORKLOAD_PREFIX, &key["traffic.".len()..])
}

/// Unsigned integer label value; missing or malformed means 0.
pub fn label_value_u32(value: &str) -> u32 {
    value.parse::<u32>().unwrap_or(0)
}

/// Unsigned 64-bit label value; missing or malformed means 0.
pub fn label_value_u64(value: &str) -> u64 {
    value.parse::<u64>().unwrap_or(0)
}

/// Case-insensitive boolean label value.
pub fn label_value_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Label value interpreted as milliseconds.
pub fn label_value_millis(value: &str) -> Duration {
    Duration::from_millis(label_value_u64(value))
}

/// Float percentage label value, clamped at 0 when malformed.
pub fn label_value_percent(value: &str) -> f64 {
    value.parse::<f64>().unwrap_or(0.0)
}

/// Parse a port number out of a dotted key segment.
pub fn parse_port(value: &str) -> u32 {
    value.parse::<u32>().unwrap_or(0)
}

/// Split `traffic.svc.<svc>.port.<N>` into `(svc, N)`.
pub fn service_and_port(annotation: &str) -> Option<(&str, u32)> {
    let tokens: Vec<&str> = annotation.split('.').collect();
    if tokens.len() < 5
        || tokens[0] != "traffic"
        || tokens[1] != "svc"
        || tokens[2].is_empty()
        || tokens[3] != "port"
    {
        return None;
    }
    let port = parse_port(tokens[4]);
    if port == 0 {
        return None;
    }
    Some((tokens[2], port))
}
