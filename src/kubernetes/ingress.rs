//! Ingress projection: host/path routing rules and per-host TLS secrets.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::Ingress;

use super::ObjectKey;

/// A backend reference. `service` may be `svc` or `svc.ns`; the split
/// happens when the cluster name is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressBackend {
    pub service: String,
    pub port: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressInfo {
    pub resource_version: String,
    pub name: String,
    pub namespace: String,
    pub default_backend: Option<IngressBackend>,
    /// host -> path -> backend. A rule without a host lands under `"*"`.
    pub rules: BTreeMap<String, BTreeMap<String, IngressBackend>>,
    /// host -> TLS secret name.
    pub tls: BTreeMap<String, String>,
}

impl IngressInfo {
    pub fn from_ingress(ingress: &Ingress) -> IngressInfo {
        let meta = &ingress.metadata;
        let spec = ingress.spec.clone().unwrap_or_default();

        let default_backend = spec.default_backend.as_ref().and_then(backend_of);

        let mut rules: BTreeMap<String, BTreeMap<String, IngressBackend>> = BTreeMap::new();
        for rule in spec.rules.unwrap_or_default() {
            let host = match rule.host.as_deref() {
                None | Some("") => "*".to_string(),
                Some(host) => host.to_string(),
            };
            let paths = rules.entry(host).or_default();
            for path in rule.http.map(|h| h.paths).unwrap_or_default() {
                if let Some(backend) = backend_of(&path.backend) {
                    let path = path.path.unwrap_or_else(|| "/".to_string());
                    paths.insert(path, backend);
                }
            }
        }

        let mut tls = BTreeMap::new();
        for entry in spec.tls.unwrap_or_default() {
            let Some(secret) = entry.secret_name.filter(|s| !s.is_empty()) else {
                continue;
            };
            for host in entry.hosts.unwrap_or_default() {
                tls.insert(host, secret.clone());
            }
        }

        IngressInfo {
            resource_version: meta.resource_version.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            default_backend,
            rules,
            tls,
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

    pub fn same_except_version(&self, other: &IngressInfo) -> bool {
        let mut probe = other.clone();
        probe.resource_version = self.resource_version.clone();
        *self == probe
    }
}

fn backend_of(backend: &k8s_openapi::api::networking::v1::IngressBackend) -> Option<IngressBackend> {
    let service = backend.service.as_ref()?;
    Some(IngressBackend {
        service: service.name.clone(),
        port: service
            .port
            .as_ref()
            .and_then(|p| p.number)
            .unwrap_or(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend as K8sBackend, IngressRule,
        IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
    };

    #[test]
    fn test_projection() {
        let ingress = Ingress {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some("web-ing".into()),
                namespace: Some("default".into()),
                resource_version: Some("7".into()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some("api.example.com".into()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".into()),
                            path_type: "Prefix".into(),
                            backend: K8sBackend {
                                service: Some(IngressServiceBackend {
                                    name: "api".into(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(8080),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                tls: Some(vec![IngressTLS {
                    hosts: Some(vec!["api.example.com".into()]),
                    secret_name: Some("tls-1".into()),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = IngressInfo::from_ingress(&ingress);
        assert_eq!(info.rules["api.example.com"]["/"].service, "api");
        assert_eq!(info.rules["api.example.com"]["/"].port, 8080);
        assert_eq!(info.tls["api.example.com"], "tls-1");
    }
}
