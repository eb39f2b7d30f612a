//! CDS handler: services become EDS/bypass clusters, pods become static
//! clusters (plus the shared loopback cluster per port).

use std::collections::HashSet;
use std::sync::Arc;

use crate::kubernetes::labels::Protocol;
use crate::kubernetes::{EventContext, PodHandler, PodInfo, ServiceHandler, ServiceInfo};
use crate::xds::resource::XdsResource;

use super::{
    service_cluster_name, static_cluster_name, BypassCluster, ClusterResource, ServiceCluster,
    StaticCluster, LOCALHOST,
};

pub struct CdsTranslator;

impl CdsTranslator {
    fn apply_service(
        cx: &mut EventContext<'_>,
        old: Option<&ServiceInfo>,
        new: Option<&ServiceInfo>,
    ) {
        let mut visited = HashSet::new();

        if let Some(new) = new {
            for port in &new.ports {
                let Some(protocol) = new.protocol(port.port) else {
                    continue;
                };
                if new.headless() {
                    // Headless services route per pod; no cluster-IP pool.
                    continue;
                }
                let resource = if protocol == Protocol::Direct {
                    let mut cluster = BypassCluster::new(new, port.port);
                    cluster.configure(&new.labels);
                    ClusterResource::Bypass(cluster)
                } else {
                    let mut cluster = ServiceCluster::new(new, port.port);
                    cluster.configure(&new.labels);
                    ClusterResource::Service(cluster)
                };
                visited.insert(resource.name());
                cx.state
                    .update_resource(XdsResource::Cluster(resource), &new.resource_version);
            }
        }

        if let Some(old) = old {
            for port in &old.ports {
                let name = service_cluster_name(&old.name, &old.namespace, port.port);
                if !visited.contains(&name) {
                    cx.state.update_resource(
                        XdsResource::Cluster(ClusterResource::Service(ServiceCluster::new(
                            old, port.port,
                        ))),
                        "",
                    );
                }
            }
        }
    }

    fn apply_pod(cx: &mut EventContext<'_>, old: Option<&PodInfo>, new: Option<&PodInfo>) {
        let mut visited = HashSet::new();

        if let Some(new) = new {
            for (port, port_config) in new.target_port_config() {
                let mut cluster = StaticCluster::new(new.pod_ip.clone(), port);
                cluster.configure(&port_config.config);
                visited.insert(cluster.name());
                cx.state.update_resource(
                    XdsResource::Cluster(ClusterResource::Static(cluster)),
                    &new.resource_version,
                );

                // The loopback cluster the owning node's pod-IP chain uses;
                // shared across pods, pinned at version "1".
                cx.state.update_resource(
                    XdsResource::Cluster(ClusterResource::Static(StaticCluster::new(
                        LOCALHOST, port,
                    ))),
                    "1",
                );
            }
        }

        if let Some(old) = old {
            for (port, _) in old.target_port_config() {
                let name = static_cluster_name(&old.pod_ip, port);
                if !visited.contains(&name) {
                    cx.state.update_resource(
                        XdsResource::Cluster(ClusterResource::Static(StaticCluster::new(
                            old.pod_ip.clone(),
                            port,
                        ))),
                        "",
                    );
                }
            }
        }
    }
}

impl ServiceHandler for CdsTranslator {
    fn service_added(&self, cx: &mut EventContext<'_>, service: &Arc<ServiceInfo>) {
        Self::apply_service(cx, None, Some(service.as_ref()));
    }

    fn service_deleted(&self, cx: &mut EventContext<'_>, service: &Arc<ServiceInfo>) {
        Self::apply_service(cx, Some(service.as_ref()), None);
    }

    fn service_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<ServiceInfo>,
        new: &Arc<ServiceInfo>,
    ) {
        Self::apply_service(cx, Some(old.as_ref()), Some(new.as_ref()));
    }
}

impl PodHandler for CdsTranslator {
    fn pod_valid(&self, pod: &PodInfo) -> bool {
        pod.valid()
    }

    fn pod_added(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>) {
        Self::apply_pod(cx, None, Some(pod.as_ref()));
    }

    fn pod_deleted(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>) {
        Self::apply_pod(cx, Some(pod.as_ref()), None);
    }

    fn pod_updated(&self, cx: &mut EventContext<'_>, old: &Arc<PodInfo>, new: &Arc<PodInfo>) {
        Self::apply_pod(cx, Some(old.as_ref()), Some(new.as_ref()));
    }
}
