//! Pod projection and the port-set / target-port derivations that drive the
//! EDS, CDS and LDS translators.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Pod;

use super::labels::{
    label_value_bool, parse_port, service_and_port, Protocol, ENVOY_ENABLED,
    ENVOY_ENABLED_BY_WORKLOAD, LOCAL_ACCESS_POD_IP, POD_SERVICE_PREFIX,
};
use super::ObjectKey;

/// Immutable projection of a pod. The core never mutates these; it only
/// requests annotation patches against the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub resource_version: String,
    pub name: String,
    pub namespace: String,
    pub pod_ip: String,
    pub host_ip: String,
    pub host_network: bool,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub container_ids: Vec<String>,
}

/// Config of one pod-side port, merged across the services that tag it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodPortConfig {
    pub protocol: Protocol,
    /// Services whose target port this is. Empty for bare pod-label ports.
    pub services: BTreeSet<String>,
    pub config: BTreeMap<String, String>,
}

impl PodInfo {
    /// Project a raw pod. Pods without an IP are not yet routable and
    /// project to `None`.
    pub fn from_pod(pod: &Pod) -> Option<PodInfo> {
        let status = pod.status.as_ref()?;
        let pod_ip = status.pod_ip.clone().unwrap_or_default();
        if pod_ip.is_empty() {
            return None;
        }

        let container_ids = status
            .container_statuses
            .iter()
            .flatten()
            .filter_map(|c| c.container_id.as_deref())
            .map(|id| id.strip_prefix("docker://").unwrap_or(id).to_string())
            .collect();

        let meta = &pod.metadata;
        Some(PodInfo {
            resource_version: meta.resource_version.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            pod_ip,
            host_ip: status.host_ip.clone().unwrap_or_default(),
            host_network: pod
                .spec
                .as_ref()
                .and_then(|s| s.host_network)
                .unwrap_or(false),
            labels: meta.labels.clone().unwrap_or_default().into_iter().collect(),
            annotations: meta
                .annotations
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            container_ids,
        })
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

    /// The node id the pod's sidecar proxy identifies with.
    pub fn node_id(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }

    /// A pod participates in routing once it has a routable IP and is not
    /// on the host network.
    pub fn valid(&self) -> bool {
        !self.host_network && !self.pod_ip.is_empty()
    }

    /// Sidecar participation. A pod-level label overrides the annotation
    /// propagated from its workload controller.
    pub fn envoy_enabled(&self) -> bool {
        if let Some(value) = self.labels.get(ENVOY_ENABLED) {
            if !value.is_empty() {
                return label_value_bool(value);
            }
        }
        self.annotations
            .get(ENVOY_ENABLED_BY_WORKLOAD)
            .map(|v| label_value_bool(v))
            .unwrap_or(false)
    }

    /// Whether the owning node's pod-IP chain should keep routing to the
    /// pod IP instead of loopback.
    pub fn local_access_via_pod_ip(&self) -> bool {
        self.annotations
            .get(LOCAL_ACCESS_POD_IP)
            .map(|v| label_value_bool(v))
            .unwrap_or(false)
    }

    /// Cluster-IP service ports this pod serves, from the
    /// `traffic.svc.<svc>.port.<N>` annotations written by the service
    /// propagator, plus bare `traffic.port.<N>` pod labels (no service).
    ///
    /// EDS turns every `(port, svc)` entry into a ClusterAssignment member.
    pub fn port_set(&self) -> BTreeMap<u32, BTreeSet<String>> {
        let mut result: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
        for (key, value) in &self.annotations {
            if value.is_empty() {
                continue;
            }
            if let Some((service, port)) = service_and_port(key) {
                result.entry(port).or_default().insert(service.to_string());
            }
        }
        for (key, value) in &self.labels {
            if value.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = key.split('.').collect();
            if tokens.len() < 3 || tokens[0] != "traffic" || tokens[1] != "port" {
                continue;
            }
            let port = parse_port(tokens[2]);
            if port == 0 {
                continue;
            }
            result.entry(port).or_default();
        }
        result
    }

    /// Pod-side ports and their merged config, from the
    /// `traffic.svc.<svc>.target.port.<N>` annotations and bare
    /// `traffic.target.port.<N>` pod labels.
    ///
    /// CDS emits a static cluster and LDS a pod-IP filter chain per entry.
    pub fn target_port_config(&self) -> BTreeMap<u32, PodPortConfig> {
        // Regroup service-scoped annotations into per-service config maps
        // keyed by the canonical `traffic.` form.
        let mut service_config: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (key, value) in &self.annotations {
            if value.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = key.split('.').collect();
            if tokens.len() < 4 || tokens[0] != "traffic" || tokens[1] != "svc" || tokens[2].is_empty()
            {
                continue;
            }
            let service = tokens[2];
            let canonical = format!(
                "traffic{}",
                &key[POD_SERVICE_PREFIX.len() + service.len()..]
            );
            service_config
                .entry(service.to_string())
                .or_default()
                .insert(canonical, value.clone());
        }

        let mut result: BTreeMap<u32, PodPortConfig> = BTreeMap::new();
        for (service, config) in &service_config {
            collect_target_ports(Some(service), config, &mut result);
        }
        let plain_labels: BTreeMap<String, String> = self
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        collect_target_ports(None, &plain_labels, &mut result);
        result
    }
}

fn collect_target_ports(
    service: Option<&str>,
    config: &BTreeMap<String, String>,
    result: &mut BTreeMap<u32, PodPortConfig>,
) {
    for (key, value) in config {
        let tokens: Vec<&str> = key.split('.').collect();
        if tokens.len() != 4 || tokens[0] != "traffic" || tokens[1] != "target" || tokens[2] != "port"
        {
            continue;
        }
        let Some(protocol) = Protocol::parse(value) else {
            continue;
        };
        let port = parse_port(tokens[3]);
        if port == 0 {
            continue;
        }

        let entry = result.entry(port).or_default();
        if entry.services.is_empty() && entry.config.is_empty() {
            entry.protocol = protocol;
        } else if protocol > entry.protocol {
            entry.protocol = protocol;
        }
        if let Some(service) = service {
            entry.services.insert(service.to_string());
        }

        // Merge the scope's remaining config keys onto the port.
        for (k, v) in config {
            if !k.starts_with("traffic.") {
                continue;
            }
            if k.starts_with("traffic.port.") || k.starts_with("traffic.target.port.") {
                continue;
            }
            entry.config.insert(k.clone(), v.clone());
        }
    }
}

impl PodInfo {
    /// Equality modulo `resource_version`, used to suppress no-op updates.
    pub fn same_except_version(&self, other: &PodInfo) -> bool {
        let mut probe = other.clone();
        probe.resource_version = self.resource_version.clone();
        *self == probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_with(
        labels: &[(&str, &str)],
        annotations: &[(&str, &str)],
    ) -> PodInfo {
        PodInfo {
            resource_version: "1".into(),
            name: "pod-0".into(),
            namespace: "test-ns".into(),
            pod_ip: "10.1.1.1".into(),
            host_ip: "172.16.0.1".into(),
            host_network: false,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            container_ids: vec![],
        }
    }

    #[test]
    fn test_port_set() {
        let pod = pod_with(
            &[("traffic.port.1234", "http"), ("traffic.port.2345", "")],
            &[
                ("traffic.svc.testsvc.port.3456", "http"),
                ("traffic.svc.testsvc.port.4567", ""),
            ],
        );
        let result = pod.port_set();
        assert_eq!(result.len(), 2);
        assert!(result.contains_key(&1234));
        assert!(result[&3456].contains("testsvc"));
    }

    #[test]
    fn test_target_port_config() {
        let pod = pod_with(
            &[
                ("traffic.target.port.1234", "http"),
                ("traffic.target.port.2345", ""),
                ("traffic.rate.limit", "200"),
                ("traffic.target.port.6789.rate.limit", "100"),
                ("traffic.target.port.5678", "tcp"),
            ],
            &[
                ("traffic.svc.svc2.target.port.1234", "tcp"),
                ("traffic.svc.svc1.target.port.3456", "http"),
                ("traffic.svc.svc2.tracing.enabled", "true"),
                ("traffic.svc.svc3.target.port.4567", ""),
            ],
        );
        let result = pod.target_port_config();
        assert_eq!(result.len(), 3);
        assert_eq!(result[&1234].protocol, Protocol::Http);
        assert_eq!(result[&3456].protocol, Protocol::Http);
        assert_eq!(result[&1234].config.len(), 2);
        assert_eq!(result[&1234].config["traffic.tracing.enabled"], "true");
        assert_eq!(result[&1234].config["traffic.rate.limit"], "200");
        assert!(result[&1234].services.contains("svc2"));
        assert_eq!(result[&3456].config.len(), 0);
        assert_eq!(result[&5678].config.len(), 1);
        assert_eq!(result[&5678].config["traffic.rate.limit"], "200");
    }

    #[test]
    fn test_envoy_enabled_precedence() {
        let by_workload = pod_with(&[], &[("traffic.rs.envoy.enabled", "true")]);
        assert!(by_workload.envoy_enabled());

        let overridden = pod_with(
            &[("traffic.envoy.enabled", "false")],
            &[("traffic.rs.envoy.enabled", "true")],
        );
        assert!(!overridden.envoy_enabled());
    }

    #[test]
    fn test_same_except_version() {
        let a = pod_with(&[("a", "b")], &[]);
        let mut b = a.clone();
        b.resource_version = "2".into();
        assert!(a.same_except_version(&b));
        b.pod_ip = "10.1.1.2".into();
        assert!(!a.same_except_version(&b));
    }
}
