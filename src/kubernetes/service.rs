//! Service projection.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::labels::{service_port_protocol, Protocol};
use super::ObjectKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortInfo {
    pub name: String,
    pub port: u32,
    pub target_port: u32,
}

impl ServicePortInfo {
    /// The pod-side port; falls back to the service port when the target
    /// port is unset or named.
    pub fn effective_target_port(&self) -> u32 {
        if self.target_port > 0 {
            self.target_port
        } else {
            self.port
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub resource_version: String,
    pub name: String,
    pub namespace: String,
    /// `"None"` marks a headless service.
    pub cluster_ip: String,
    pub selector: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub ports: Vec<ServicePortInfo>,
}

impl ServiceInfo {
    pub fn from_service(service: &Service) -> ServiceInfo {
        let meta = &service.metadata;
        let spec = service.spec.clone().unwrap_or_default();

        let ports = spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| ServicePortInfo {
                name: p.name.unwrap_or_default(),
                port: p.port as u32,
                target_port: match p.target_port {
                    Some(IntOrString::Int(v)) if v > 0 => v as u32,
                    _ => 0,
                },
            })
            .collect();

        ServiceInfo {
            resource_version: meta.resource_version.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            cluster_ip: spec.cluster_ip.unwrap_or_default(),
            selector: spec.selector.unwrap_or_default().into_iter().collect(),
            labels: meta.labels.clone().unwrap_or_default().into_iter().collect(),
            annotations: meta
                .annotations
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            ports,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Per-port protocol from the `traffic.port.<N>` service label.
    pub fn protocol(&self, port: u32) -> Option<Protocol> {
        self.labels
            .get(&service_port_protocol(port))
            .and_then(|v| Protocol::parse(v))
    }

    /// A headless service has no virtual cluster IP.
    pub fn headless(&self) -> bool {
        self.cluster_ip.is_empty() || self.cluster_ip == "None"
    }

    /// The kube API service is special-cased into a bypass cluster.
    pub fn is_kube_api(&self) -> bool {
        self.name == "kubernetes" && self.namespace == "default"
    }

    pub fn same_except_version(&self, other: &ServiceInfo) -> bool {
        let mut probe = other.clone();
        probe.resource_version = self.resource_version.clone();
        *self == probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn service_with(
        name: &str,
        cluster_ip: &str,
        labels: &[(&str, &str)],
        ports: &[(u32, u32)],
    ) -> ServiceInfo {
        ServiceInfo {
            resource_version: "1".into(),
            name: name.into(),
            namespace: "test-ns".into(),
            cluster_ip: cluster_ip.into(),
            selector: BTreeMap::new(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: BTreeMap::new(),
            ports: ports
                .iter()
                .map(|(port, target)| ServicePortInfo {
                    name: String::new(),
                    port: *port,
                    target_port: *target,
                })
                .collect(),
        }
    }

    #[test]
    fn test_protocol_lookup() {
        let svc = service_with("web", "10.0.0.1", &[("traffic.port.8080", "http")], &[(8080, 0)]);
        assert_eq!(svc.protocol(8080), Some(Protocol::Http));
        assert_eq!(svc.protocol(9090), None);
    }

    #[test]
    fn test_headless() {
        assert!(service_with("cache", "None", &[], &[]).headless());
        assert!(service_with("cache", "", &[], &[]).headless());
        assert!(!service_with("web", "10.0.0.1", &[], &[]).headless());
    }

    #[test]
    fn test_effective_target_port() {
        let port = ServicePortInfo {
            name: String::new(),
            port: 80,
            target_port: 8080,
        };
        assert_eq!(port.effective_target_port(), 8080);
        let port = ServicePortInfo {
            name: String::new(),
            port: 80,
            target_port: 0,
        };
        assert_eq!(port.effective_target_port(), 80);
    }
}
