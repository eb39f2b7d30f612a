//! Ingress handler: projects Ingress objects into routing rows and
//! denormalizes the gateway config onto the backing services.

use std::sync::Arc;

use tracing::warn;

use crate::kubernetes::labels::ingress_attribute;
use crate::kubernetes::{
    EventContext, IngressBackend, IngressHandler, IngressInfo, ObjectKey, PatchRequest,
};
use crate::xds::cluster::service_cluster_name;
use crate::xds::listener::ListenerResource;
use crate::xds::resource::{ResourceKind, XdsResource};

use super::IngressRoute;

pub struct IngressLdsTranslator;

/// `serviceName` may carry its own namespace (`svc.ns`); otherwise the
/// ingress namespace applies.
fn resolve_backend(backend: &IngressBackend, ingress_namespace: &str) -> (String, String) {
    match backend.service.split_once('.') {
        Some((service, namespace)) if !namespace.is_empty() => {
            (service.to_string(), namespace.to_string())
        }
        _ => (backend.service.clone(), ingress_namespace.to_string()),
    }
}

fn backend_cluster(backend: &IngressBackend, ingress_namespace: &str) -> String {
    let (service, namespace) = resolve_backend(backend, ingress_namespace);
    service_cluster_name(&service, &namespace, backend.port)
}

/// Every (host, path, backend) triple of the ingress, the default backend
/// mapped to the wildcard host.
fn rows_of(ingress: &IngressInfo) -> Vec<(IngressRoute, IngressBackend)> {
    let mut rows = Vec::new();
    for (host, paths) in &ingress.rules {
        let tls_secret = ingress
            .tls
            .get(host)
            .map(|secret| format!("{}.{}", secret, ingress.namespace));
        for (path, backend) in paths {
            rows.push((
                IngressRoute {
                    host: host.clone(),
                    path: path.clone(),
                    cluster: backend_cluster(backend, &ingress.namespace),
                    tls_secret: tls_secret.clone(),
                },
                backend.clone(),
            ));
        }
    }
    if let Some(backend) = &ingress.default_backend {
        rows.push((
            IngressRoute {
                host: "*".to_string(),
                path: "/".to_string(),
                cluster: backend_cluster(backend, &ingress.namespace),
                tls_secret: None,
            },
            backend.clone(),
        ));
    }
    rows
}

impl IngressLdsTranslator {
    fn denormalize(
        cx: &mut EventContext<'_>,
        ingress: &IngressInfo,
        row: &IngressRoute,
        backend: &IngressBackend,
        add: bool,
    ) {
        let (service, namespace) = resolve_backend(backend, &ingress.namespace);
        let service = ObjectKey::new(namespace, service);
        let mut entries = vec![
            (ingress_attribute(backend.port, "name"), row.host.clone()),
            (ingress_attribute(backend.port, "config"), row.path.clone()),
        ];
        if let Some(secret) = &row.tls_secret {
            entries.push((ingress_attribute(backend.port, "secret"), secret.clone()));
        }
        for (key, value) in entries {
            cx.push_patch(if add {
                PatchRequest::MergeServiceAnnotation {
                    service: service.clone(),
                    key,
                    value,
                }
            } else {
                PatchRequest::UnmergeServiceAnnotation {
                    service: service.clone(),
                    key,
                    value,
                }
            });
        }
    }
}

impl IngressHandler for IngressLdsTranslator {
    fn ingress_added(&self, cx: &mut EventContext<'_>, ingress: &Arc<IngressInfo>) {
        for (row, backend) in rows_of(ingress) {
            // A (host, path) row already claimed by a different cluster is
            // a user conflict: mark the service and keep the first owner.
            if let Some((XdsResource::Listener(ListenerResource::IngressRoute(existing)), _)) =
                cx.state.get_resource(ResourceKind::Listener, &row.name())
            {
                if existing.cluster != row.cluster {
                    let owner = existing.cluster.clone();
                    warn!(
                        row = %row.name(),
                        cluster = %row.cluster,
                        owner = %owner,
                        "Conflicting ingress row, keeping existing owner"
                    );
                    let (service, namespace) = resolve_backend(&backend, &ingress.namespace);
                    cx.push_patch(PatchRequest::ServiceAnnotations {
                        service: ObjectKey::new(namespace, service),
                        set: [(ingress_attribute(backend.port, "conflict"), Some(owner))]
                            .into_iter()
                            .collect(),
                    });
                    continue;
                }
            }

            cx.state.update_resource(
                XdsResource::Listener(ListenerResource::IngressRoute(row.clone())),
                &ingress.resource_version,
            );
            Self::denormalize(cx, ingress, &row, &backend, true);
        }
    }

    fn ingress_deleted(&self, cx: &mut EventContext<'_>, ingress: &Arc<IngressInfo>) {
        for (row, backend) in rows_of(ingress) {
            cx.state
                .update_resource(XdsResource::Listener(ListenerResource::IngressRoute(row.clone())), "");
            Self::denormalize(cx, ingress, &row, &backend, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_backend_namespace_laxness() {
        let plain = IngressBackend {
            service: "api".into(),
            port: 8080,
        };
        assert_eq!(
            resolve_backend(&plain, "default"),
            ("api".to_string(), "default".to_string())
        );

        let qualified = IngressBackend {
            service: "api.prod".into(),
            port: 8080,
        };
        assert_eq!(
            resolve_backend(&qualified, "default"),
            ("api".to_string(), "prod".to_string())
        );
    }
}
