//! Connection and circuit-breaker settings parsed from `traffic.*` keys,
//! shared by all cluster shapes.

use std::collections::BTreeMap;
use std::time::Duration;

use envoy_types::pb::envoy::config::cluster::v3::{circuit_breakers, Cluster};
use envoy_types::pb::google::protobuf::{Duration as PbDuration, UInt32Value};

use crate::kubernetes::labels::{label_value_millis, label_value_u32};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub max_connections: u32,
    pub max_pending_requests: u32,
    pub max_requests: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: 0,
            max_connections: 0,
            max_pending_requests: 0,
            max_requests: 0,
        }
    }
}

/// Service labels copied onto pods of headless services so the pod-side
/// cluster config matches the service-side one.
pub fn needs_service_to_pod_annotation(label: &str) -> bool {
    matches!(
        label,
        "traffic.connection.timeout"
            | "traffic.retries.max"
            | "traffic.connection.max"
            | "traffic.request.max-pending"
            | "traffic.request.max"
    )
}

impl ClusterConfig {
    pub fn from_config(config: &BTreeMap<String, String>) -> ClusterConfig {
        let mut result = ClusterConfig::default();
        for (key, value) in config {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "traffic.connection.timeout" => {
                    let timeout = label_value_millis(value);
                    if !timeout.is_zero() {
                        result.connect_timeout = timeout;
                    }
                }
                "traffic.retries.max" => result.max_retries = label_value_u32(value),
                "traffic.connection.max" => result.max_connections = label_value_u32(value),
                "traffic.request.max-pending" => {
                    result.max_pending_requests = label_value_u32(value)
                }
                "traffic.request.max" => result.max_requests = label_value_u32(value),
                _ => {}
            }
        }
        result
    }

    pub fn connect_timeout_pb(&self) -> PbDuration {
        PbDuration {
            seconds: self.connect_timeout.as_secs() as i64,
            nanos: self.connect_timeout.subsec_nanos() as i32,
        }
    }

    /// Attach the circuit-breaker thresholds when any are set.
    pub fn apply(&self, cluster: &mut Cluster) {
        let mut threshold = circuit_breakers::Thresholds::default();
        let mut has_circuit_breaker = false;
        if self.max_connections > 0 {
            threshold.max_connections = Some(UInt32Value {
                value: self.max_connections,
            });
            has_circuit_breaker = true;
        }
        if self.max_pending_requests > 0 {
            threshold.max_pending_requests = Some(UInt32Value {
                value: self.max_pending_requests,
            });
            has_circuit_breaker = true;
        }
        if self.max_requests > 0 {
            threshold.max_requests = Some(UInt32Value {
                value: self.max_requests,
            });
            has_circuit_breaker = true;
        }
        if self.max_retries > 0 {
            threshold.max_retries = Some(UInt32Value {
                value: self.max_retries,
            });
            has_circuit_breaker = true;
        }
        if has_circuit_breaker {
            cluster.circuit_breakers =
                Some(envoy_types::pb::envoy::config::cluster::v3::CircuitBreakers {
                    thresholds: vec![threshold],
                    ..Default::default()
                });
        }
    }
}
