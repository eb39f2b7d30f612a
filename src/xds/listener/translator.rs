//! LDS handler: services contribute cluster-IP chains, pods contribute
//! pod-IP chains; the blackhole chain is seeded at construction and never
//! leaves.

use std::collections::HashSet;
use std::sync::Arc;

use crate::kubernetes::labels::Protocol;
use crate::kubernetes::{EventContext, PodHandler, PodInfo, ServiceHandler, ServiceInfo};
use crate::xds::cache::ResourceBroker;
use crate::xds::resource::XdsResource;

use super::{
    BlackholeChain, ClusterIpChain, HttpClusterIpChain, HttpPodIpChain, ListenerResource,
    PodIpChain,
};

pub struct LdsTranslator;

impl LdsTranslator {
    /// Seeds the permanent blackhole row before any watch event arrives.
    pub fn new(broker: &ResourceBroker) -> LdsTranslator {
        broker.with(|state| {
            state.update_resource(
                XdsResource::Listener(ListenerResource::Blackhole(BlackholeChain)),
                "1",
            );
        });
        LdsTranslator
    }

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
                let resource = if protocol == Protocol::Http {
                    let mut chain = HttpClusterIpChain::new(new, port.port);
                    chain.configure(&new.labels);
                    ListenerResource::HttpClusterIp(chain)
                } else {
                    ListenerResource::ClusterIp(ClusterIpChain::new(new, port.port))
                };
                visited.insert(resource.name());
                cx.state
                    .update_resource(XdsResource::Listener(resource), &new.resource_version);
            }
        }

        if let Some(old) = old {
            for port in &old.ports {
                let chain = ClusterIpChain::new(old, port.port);
                if !visited.contains(&chain.name()) {
                    cx.state
                        .update_resource(XdsResource::Listener(ListenerResource::ClusterIp(chain)), "");
                }
            }
        }
    }

    fn apply_pod(cx: &mut EventContext<'_>, old: Option<&PodInfo>, new: Option<&PodInfo>) {
        let mut visited = HashSet::new();

        if let Some(new) = new {
            for (port, port_config) in new.target_port_config() {
                let resource = if port_config.protocol == Protocol::Http {
                    let mut chain = HttpPodIpChain::new(new, port, &port_config.services);
                    chain.configure(&port_config.config);
                    ListenerResource::HttpPodIp(chain)
                } else {
                    ListenerResource::PodIp(PodIpChain::new(new, port))
                };
                visited.insert(resource.name());
                cx.state
                    .update_resource(XdsResource::Listener(resource), &new.resource_version);
            }
        }

        if let Some(old) = old {
            for (port, _) in old.target_port_config() {
                let chain = PodIpChain::new(old, port);
                if !visited.contains(&chain.name()) {
                    cx.state
                        .update_resource(XdsResource::Listener(ListenerResource::PodIp(chain)), "");
                }
            }
        }
    }
}

impl ServiceHandler for LdsTranslator {
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

impl PodHandler for LdsTranslator {
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
