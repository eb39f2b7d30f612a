//! End-to-end reconciliation scenarios: feed object events through the
//! handlers, replay the propagators' patches onto the pod projections,
//! and assert on the discovery responses the cache would serve.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use prost::Message;

use envoy_types::pb::envoy::config::cluster::v3::{cluster, Cluster};
use envoy_types::pb::envoy::config::core::v3::{address, Node};
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::{FilterChain, Listener};
use envoy_types::pb::envoy::config::route::v3::route;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager, HttpConnectionManager,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;

use trafficplane::annotation::{ServiceToPodAnnotator, WorkloadToPodAnnotator};
use trafficplane::kubernetes::{
    EventContext, IndexMaintainer, IngressBackend, IngressHandler, IngressInfo, PatchRequest,
    PodHandler, PodInfo, SecretHandler, SecretInfo, ServiceHandler, ServiceInfo, ServicePortInfo,
    WorkloadHandler, WorkloadInfo,
};
use trafficplane::xds::cluster::CdsTranslator;
use trafficplane::xds::endpoint::EdsTranslator;
use trafficplane::xds::ingress::IngressLdsTranslator;
use trafficplane::xds::listener::LdsTranslator;
use trafficplane::xds::secret::SdsTranslator;
use trafficplane::xds::{ResourceBroker, ResourceKind, XdsResource, INGRESS_NODE_ID};

const PROXY_PORT: u32 = 10000;

struct Harness {
    broker: Arc<ResourceBroker>,
    index: IndexMaintainer,
    cds: CdsTranslator,
    eds: EdsTranslator,
    lds: LdsTranslator,
    ingress_lds: IngressLdsTranslator,
    sds: SdsTranslator,
    service_annotator: ServiceToPodAnnotator,
    workload_annotator: WorkloadToPodAnnotator,
}

impl Harness {
    fn new() -> Harness {
        let broker = Arc::new(ResourceBroker::new());
        let lds = LdsTranslator::new(&broker);
        Harness {
            broker,
            index: IndexMaintainer,
            cds: CdsTranslator,
            eds: EdsTranslator,
            lds,
            ingress_lds: IngressLdsTranslator,
            sds: SdsTranslator,
            service_annotator: ServiceToPodAnnotator,
            workload_annotator: WorkloadToPodAnnotator,
        }
    }

    fn service_added(&self, service: &Arc<ServiceInfo>) -> Vec<PatchRequest> {
        self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            ServiceHandler::service_added(&self.index, &mut cx, service);
            self.cds.service_added(&mut cx, service);
            ServiceHandler::service_added(&self.lds, &mut cx, service);
            self.service_annotator.service_added(&mut cx, service);
            patches
        })
    }

    fn pod_event(&self, old: Option<&Arc<PodInfo>>, new: Option<&Arc<PodInfo>>) -> Vec<PatchRequest> {
        self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            match (old, new) {
                (None, Some(new)) => {
                    PodHandler::pod_added(&self.index, &mut cx, new);
                    self.eds.pod_added(&mut cx, new);
                    PodHandler::pod_added(&self.cds, &mut cx, new);
                    PodHandler::pod_added(&self.lds, &mut cx, new);
                    PodHandler::pod_added(&self.workload_annotator, &mut cx, new);
                    PodHandler::pod_added(&self.service_annotator, &mut cx, new);
                }
                (Some(old), Some(new)) => {
                    PodHandler::pod_updated(&self.index, &mut cx, old, new);
                    self.eds.pod_updated(&mut cx, old, new);
                    PodHandler::pod_updated(&self.cds, &mut cx, old, new);
                    PodHandler::pod_updated(&self.lds, &mut cx, old, new);
                    PodHandler::pod_updated(&self.workload_annotator, &mut cx, old, new);
                    PodHandler::pod_updated(&self.service_annotator, &mut cx, old, new);
                }
                (Some(old), None) => {
                    PodHandler::pod_deleted(&self.index, &mut cx, old);
                    self.eds.pod_deleted(&mut cx, old);
                    PodHandler::pod_deleted(&self.cds, &mut cx, old);
                    PodHandler::pod_deleted(&self.lds, &mut cx, old);
                }
                (None, None) => {}
            }
            patches
        })
    }

    fn workload_added(&self, workload: &Arc<WorkloadInfo>) -> Vec<PatchRequest> {
        self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            WorkloadHandler::workload_added(&self.index, &mut cx, workload);
            WorkloadHandler::workload_added(&self.workload_annotator, &mut cx, workload);
            patches
        })
    }

    fn ingress_added(&self, ingress: &Arc<IngressInfo>) -> Vec<PatchRequest> {
        self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            self.ingress_lds.ingress_added(&mut cx, ingress);
            patches
        })
    }

    fn secret_added(&self, secret: &Arc<SecretInfo>) {
        self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            if self.sds.secret_valid(secret) {
                self.sds.secret_added(&mut cx, secret);
            }
        })
    }

    fn cluster_names(&self) -> Vec<String> {
        let (resources, _) = self.broker.get_resources(ResourceKind::Cluster, &[]);
        resources.keys().cloned().collect()
    }

    fn endpoint_assignment(&self, name: &str) -> Option<XdsResource> {
        let (resources, _) = self.broker.get_resources(ResourceKind::Endpoint, &[]);
        resources.get(name).cloned()
    }

    fn build_listener(&self, node_id: &str) -> Listener {
        let (resources, version) = self.broker.get_resources(ResourceKind::Listener, &[]);
        let node = Node {
            id: node_id.to_string(),
            ..Default::default()
        };
        let response =
            trafficplane::xds::listener::build_response(&resources, &version, &node, PROXY_PORT);
        Listener::decode(&response.resources[0].value[..]).expect("listener decodes")
    }

    fn build_endpoints(&self) -> Vec<ClusterLoadAssignment> {
        let (resources, version) = self.broker.get_resources(ResourceKind::Endpoint, &[]);
        let node = Node::default();
        let response = trafficplane::xds::endpoint::build_response(&resources, &version, &node);
        response
            .resources
            .iter()
            .map(|any| ClusterLoadAssignment::decode(&any.value[..]).expect("assignment decodes"))
            .collect()
    }

    fn build_clusters(&self) -> Vec<Cluster> {
        let (resources, version) = self.broker.get_resources(ResourceKind::Cluster, &[]);
        let node = Node::default();
        let response = trafficplane::xds::cluster::build_response(&resources, &version, &node);
        response
            .resources
            .iter()
            .map(|any| Cluster::decode(&any.value[..]).expect("cluster decodes"))
            .collect()
    }
}

fn pod(name: &str, namespace: &str, ip: &str, rv: &str, labels: &[(&str, &str)]) -> PodInfo {
    PodInfo {
        resource_version: rv.into(),
        name: name.into(),
        namespace: namespace.into(),
        pod_ip: ip.into(),
        host_ip: "172.16.0.1".into(),
        host_network: false,
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        annotations: BTreeMap::new(),
        container_ids: vec![],
    }
}

fn service(
    name: &str,
    namespace: &str,
    cluster_ip: &str,
    selector: &[(&str, &str)],
    labels: &[(&str, &str)],
    ports: &[(u32, u32)],
) -> ServiceInfo {
    ServiceInfo {
        resource_version: "1".into(),
        name: name.into(),
        namespace: namespace.into(),
        cluster_ip: cluster_ip.into(),
        selector: selector
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
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

/// Replay the propagators' pod patches onto a projection, as the next
/// watch event would surface them.
fn replay_pod_patches(pod: &PodInfo, patches: &[PatchRequest], next_rv: &str) -> PodInfo {
    let mut next = pod.clone();
    next.resource_version = next_rv.into();
    for patch in patches {
        let PatchRequest::PodAnnotations { pod: key, set } = patch else {
            continue;
        };
        if *key != pod.key() {
            continue;
        }
        for (k, v) in set {
            match v {
                Some(v) => {
                    next.annotations.insert(k.clone(), v.clone());
                }
                None => {
                    next.annotations.remove(k);
                }
            }
        }
    }
    next
}

fn http_manager(chain: &FilterChain) -> Option<HttpConnectionManager> {
    let filter = chain.filters.first()?;
    let Some(envoy_types::pb::envoy::config::listener::v3::filter::ConfigType::TypedConfig(any)) =
        &filter.config_type
    else {
        return None;
    };
    if !any.type_url.ends_with("HttpConnectionManager") {
        return None;
    }
    HttpConnectionManager::decode(&any.value[..]).ok()
}

fn chain_for_destination<'a>(listener: &'a Listener, ip: &str, port: u32) -> Option<&'a FilterChain> {
    listener.filter_chains.iter().find(|chain| {
        chain
            .filter_chain_match
            .as_ref()
            .map(|m| {
                m.destination_port.as_ref().map(|p| p.value) == Some(port)
                    && m.prefix_ranges
                        .first()
                        .map(|r| r.address_prefix == ip)
                        .unwrap_or(false)
            })
            .unwrap_or(false)
    })
}

fn routed_clusters(manager: &HttpConnectionManager) -> Vec<(Vec<String>, String)> {
    let Some(http_connection_manager::RouteSpecifier::RouteConfig(config)) =
        &manager.route_specifier
    else {
        return Vec::new();
    };
    config
        .virtual_hosts
        .iter()
        .filter_map(|vh| {
            let route = vh.routes.first()?;
            match route.action.as_ref()? {
                route::Action::Route(action) => match action.cluster_specifier.as_ref()? {
                    envoy_types::pb::envoy::config::route::v3::route_action::ClusterSpecifier::Cluster(c) => {
                        Some((vh.domains.clone(), c.clone()))
                    }
                    _ => None,
                },
                _ => None,
            }
        })
        .collect()
}

#[test]
fn test_service_then_pod_creation() {
    let harness = Harness::new();

    let web = Arc::new(service(
        "web",
        "default",
        "10.0.0.1",
        &[("app", "web")],
        &[("traffic.port.8080", "http")],
        &[(8080, 0)],
    ));
    let pod0 = Arc::new(pod(
        "web-0",
        "default",
        "10.1.0.1",
        "2",
        &[("app", "web"), ("traffic.envoy.enabled", "true")],
    ));

    harness.pod_event(None, Some(&pod0));
    let patches = harness.service_added(&web);

    // the propagator wants both the cluster-IP key and the target-port key
    let pod0b = Arc::new(replay_pod_patches(&pod0, &patches, "3"));
    assert_eq!(
        pod0b.annotations.get("traffic.svc.web.port.8080"),
        Some(&"http".to_string())
    );
    assert_eq!(
        pod0b.annotations.get("traffic.svc.web.target.port.8080"),
        Some(&"http".to_string())
    );
    harness.pod_event(Some(&pod0), Some(&pod0b));

    // CDS: EDS service cluster, pod static cluster, loopback cluster
    let names = harness.cluster_names();
    assert!(names.contains(&"8080|default|web.outbound".to_string()));
    assert!(names.contains(&"8080|10_1_0_1.static".to_string()));
    assert!(names.contains(&"8080|127_0_0_1.static".to_string()));

    let clusters = harness.build_clusters();
    let outbound = clusters
        .iter()
        .find(|c| c.name == "8080|default|web.outbound")
        .expect("outbound cluster");
    assert_eq!(
        outbound.cluster_discovery_type,
        Some(cluster::ClusterDiscoveryType::Type(
            cluster::DiscoveryType::Eds as i32
        ))
    );
    let static_cluster = clusters
        .iter()
        .find(|c| c.name == "8080|10_1_0_1.static")
        .expect("static cluster");
    assert_eq!(
        static_cluster.cluster_discovery_type,
        Some(cluster::ClusterDiscoveryType::Type(
            cluster::DiscoveryType::Static as i32
        ))
    );

    // EDS: one endpoint at weight 100
    let assignments = harness.build_endpoints();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].cluster_name, "8080|default|web.outbound");
    let endpoint = &assignments[0].endpoints[0].lb_endpoints[0];
    assert_eq!(endpoint.load_balancing_weight.as_ref().unwrap().value, 100);
    let addr = endpoint
        .host_identifier
        .as_ref()
        .and_then(|h| match h {
            envoy_types::pb::envoy::config::endpoint::v3::lb_endpoint::HostIdentifier::Endpoint(e) => {
                e.address.as_ref()
            }
            _ => None,
        })
        .and_then(|a| a.address.as_ref());
    match addr {
        Some(address::Address::SocketAddress(socket)) => {
            assert_eq!(socket.address, "10.1.0.1");
        }
        other => panic!("unexpected endpoint address {:?}", other),
    }

    // LDS for the owning node: cluster-IP HTTP chain to the EDS cluster,
    // pod-IP chain to loopback, blackhole present
    let listener = harness.build_listener("web-0.default");
    let cluster_ip_chain =
        chain_for_destination(&listener, "10.0.0.1", 8080).expect("cluster-IP chain");
    let manager = http_manager(cluster_ip_chain).expect("HTTP chain");
    assert_eq!(
        routed_clusters(&manager)[0].1,
        "8080|default|web.outbound".to_string()
    );

    let pod_ip_chain = chain_for_destination(&listener, "10.1.0.1", 8080).expect("pod-IP chain");
    let manager = http_manager(pod_ip_chain).expect("HTTP pod chain");
    assert_eq!(routed_clusters(&manager)[0].1, "8080|127_0_0_1.static");

    assert!(listener
        .filter_chains
        .iter()
        .any(|chain| chain.filter_chain_match.is_none()));
}

#[test]
fn test_headless_service_http_routing() {
    let harness = Harness::new();

    let cache_svc = Arc::new(service(
        "cache",
        "default",
        "None",
        &[("app", "cache")],
        &[("traffic.port.6379", "http")],
        &[(6379, 0)],
    ));
    let pod0 = Arc::new(pod(
        "cache-0",
        "default",
        "10.1.0.5",
        "2",
        &[("app", "cache"), ("traffic.envoy.enabled", "true")],
    ));
    let pod1 = Arc::new(pod(
        "cache-1",
        "default",
        "10.1.0.6",
        "2",
        &[("app", "cache"), ("traffic.envoy.enabled", "true")],
    ));

    harness.pod_event(None, Some(&pod0));
    harness.pod_event(None, Some(&pod1));
    let patches = harness.service_added(&cache_svc);

    let pod0b = Arc::new(replay_pod_patches(&pod0, &patches, "3"));
    let pod1b = Arc::new(replay_pod_patches(&pod1, &patches, "3"));
    assert_eq!(
        pod0b.annotations.get("traffic.svc.cache.headless"),
        Some(&"true".to_string())
    );
    assert!(!pod0b.annotations.contains_key("traffic.svc.cache.port.6379"));
    harness.pod_event(Some(&pod0), Some(&pod0b));
    harness.pod_event(Some(&pod1), Some(&pod1b));

    // no EDS cluster and no assignment for the headless service
    let names = harness.cluster_names();
    assert!(!names.contains(&"6379|default|cache.outbound".to_string()));
    assert!(harness
        .endpoint_assignment("6379|default|cache.outbound")
        .is_none());
    assert!(names.contains(&"6379|10_1_0_5.static".to_string()));
    assert!(names.contains(&"6379|10_1_0_6.static".to_string()));

    // a foreign node routes Host: cache:6379 to the per-pod static cluster
    let listener = harness.build_listener("other.default");
    let chain = chain_for_destination(&listener, "10.1.0.5", 6379).expect("pod chain");
    let manager = http_manager(chain).expect("HTTP chain");
    let routed = routed_clusters(&manager);
    let service_vh = routed
        .iter()
        .find(|(domains, _)| domains.contains(&"cache:6379".to_string()))
        .expect("service virtual host");
    assert!(service_vh.0.contains(&"cache:6379.default".to_string()));
    assert_eq!(service_vh.1, "6379|10_1_0_5.static");
}

#[test]
fn test_weighted_canary() {
    let harness = Harness::new();

    let api = Arc::new(service(
        "api",
        "default",
        "10.0.0.2",
        &[("app", "api")],
        &[("traffic.port.8080", "http")],
        &[(8080, 0)],
    ));
    let deployment_v1 = Arc::new(WorkloadInfo {
        resource_version: "1".into(),
        name: "api-v1".into(),
        namespace: "default".into(),
        real_type: "Deployment",
        selector: [("app".to_string(), "api".to_string()), ("ver".to_string(), "v1".to_string())]
            .into_iter()
            .collect(),
        labels: [
            ("traffic.envoy.enabled".to_string(), "true".to_string()),
            ("traffic.endpoint.weight".to_string(), "80".to_string()),
        ]
        .into_iter()
        .collect(),
        ports: vec![],
        host_network: false,
    });

    let pod_v1 = Arc::new(pod(
        "api-v1-0",
        "default",
        "10.1.0.7",
        "2",
        &[
            ("app", "api"),
            ("ver", "v1"),
            ("traffic.envoy.enabled", "true"),
        ],
    ));
    let pod_v2 = Arc::new(pod(
        "api-v2-0",
        "default",
        "10.1.0.8",
        "2",
        &[
            ("app", "api"),
            ("ver", "v2"),
            ("traffic.envoy.enabled", "true"),
            ("traffic.endpoint.weight", "20"),
        ],
    ));

    harness.pod_event(None, Some(&pod_v1));
    harness.pod_event(None, Some(&pod_v2));
    let workload_patches = harness.workload_added(&deployment_v1);
    let service_patches = harness.service_added(&api);

    let pod_v1b = Arc::new(replay_pod_patches(
        &replay_pod_patches(&pod_v1, &workload_patches, "3"),
        &service_patches,
        "3",
    ));
    assert_eq!(
        pod_v1b.annotations.get("traffic.rs.endpoint.weight"),
        Some(&"80".to_string())
    );
    let pod_v2b = Arc::new(replay_pod_patches(&pod_v2, &service_patches, "3"));
    harness.pod_event(Some(&pod_v1), Some(&pod_v1b));
    harness.pod_event(Some(&pod_v2), Some(&pod_v2b));

    let assignments = harness.build_endpoints();
    assert_eq!(assignments.len(), 1);
    let mut weights: Vec<u32> = assignments[0].endpoints[0]
        .lb_endpoints
        .iter()
        .map(|e| e.load_balancing_weight.as_ref().unwrap().value)
        .collect();
    weights.sort_unstable();
    assert_eq!(weights, vec![20, 80]);

    // weight 0 removes the endpoint from the response but not the cache
    let mut degraded = (*pod_v2b).clone();
    degraded.resource_version = "4".into();
    degraded
        .labels
        .insert("traffic.endpoint.weight".into(), "0".into());
    let degraded = Arc::new(degraded);
    harness.pod_event(Some(&pod_v2b), Some(&degraded));

    let assignments = harness.build_endpoints();
    assert_eq!(assignments[0].endpoints[0].lb_endpoints.len(), 1);
    let Some(XdsResource::Endpoint(cached)) =
        harness.endpoint_assignment("8080|default|api.outbound")
    else {
        panic!("assignment missing from cache");
    };
    assert_eq!(cached.endpoints.len(), 2);
}

#[test]
fn test_ingress_tls_and_sds() {
    let harness = Harness::new();

    let mut rules = BTreeMap::new();
    let mut paths = BTreeMap::new();
    paths.insert(
        "/".to_string(),
        IngressBackend {
            service: "api".into(),
            port: 8080,
        },
    );
    rules.insert("api.example.com".to_string(), paths);
    let mut tls = BTreeMap::new();
    tls.insert("api.example.com".to_string(), "tls-1".to_string());

    let ingress = Arc::new(IngressInfo {
        resource_version: "5".into(),
        name: "web-ing".into(),
        namespace: "default".into(),
        default_backend: None,
        rules,
        tls,
    });
    let patches = harness.ingress_added(&ingress);
    // the gateway config is denormalized onto the backing service
    assert!(patches.iter().any(|p| matches!(
        p,
        PatchRequest::MergeServiceAnnotation { key, value, .. }
            if key == "traffic.ingress.port.8080.name" && value == "api.example.com"
    )));

    let listener = harness.build_listener(INGRESS_NODE_ID);
    let tls_chain = listener
        .filter_chains
        .iter()
        .find(|chain| {
            chain
                .filter_chain_match
                .as_ref()
                .map(|m| m.server_names == vec!["api.example.com".to_string()])
                .unwrap_or(false)
        })
        .expect("TLS chain");
    assert_eq!(
        tls_chain.filter_chain_match.as_ref().unwrap().transport_protocol,
        "tls"
    );
    assert!(tls_chain.transport_socket.is_some());

    let manager = http_manager(tls_chain).expect("TLS HTTP chain");
    assert_eq!(routed_clusters(&manager)[0].1, "8080|default|api.outbound");

    // the plain chain answers the same host with a redirect
    let plain_chain = listener
        .filter_chains
        .iter()
        .find(|chain| chain.transport_socket.is_none())
        .expect("plain chain");
    let manager = http_manager(plain_chain).expect("plain HTTP chain");
    let Some(http_connection_manager::RouteSpecifier::RouteConfig(config)) =
        &manager.route_specifier
    else {
        panic!("inline route config expected");
    };
    let redirect = config
        .virtual_hosts
        .iter()
        .find(|vh| vh.domains == vec!["api.example.com".to_string()])
        .expect("redirect virtual host");
    assert!(matches!(
        redirect.routes[0].action,
        Some(route::Action::Redirect(_))
    ));

    // SDS serves the secret once the TLS material is present
    let mut data = BTreeMap::new();
    data.insert("tls.crt".to_string(), b"CERT".to_vec());
    data.insert("tls.key".to_string(), b"KEY".to_vec());
    let secret = Arc::new(SecretInfo {
        resource_version: "1".into(),
        name: "tls-1".into(),
        namespace: "default".into(),
        labels: BTreeMap::new(),
        data,
    });
    harness.secret_added(&secret);

    let (resources, version) = harness.broker.get_resources(ResourceKind::Secret, &[]);
    let response =
        trafficplane::xds::secret::build_response(&resources, &version, &Node::default());
    assert_eq!(response.resources.len(), 1);
    let secret = Secret::decode(&response.resources[0].value[..]).expect("secret decodes");
    assert_eq!(secret.name, "tls-1.default");
}

#[test]
fn test_propagator_idempotence() {
    let harness = Harness::new();

    let web = Arc::new(service(
        "web",
        "default",
        "10.0.0.1",
        &[("app", "web")],
        &[
            ("traffic.port.8080", "http"),
            ("traffic.tracing.enabled", "true"),
        ],
        &[(8080, 0)],
    ));
    let pod0 = Arc::new(pod(
        "web-0",
        "default",
        "10.1.0.1",
        "2",
        &[("app", "web"), ("traffic.envoy.enabled", "true")],
    ));

    harness.pod_event(None, Some(&pod0));
    let patches = harness.service_added(&web);
    let converged = Arc::new(replay_pod_patches(&pod0, &patches, "3"));
    assert_eq!(
        converged.annotations.get("traffic.svc.web.tracing.enabled"),
        Some(&"true".to_string())
    );
    harness.pod_event(Some(&pod0), Some(&converged));

    // a second add produces only intents the pod already satisfies,
    // so the compare-and-set write path issues zero updates
    let patches = harness.service_added(&web);
    let replayed = replay_pod_patches(&converged, &patches, "3");
    assert_eq!(replayed.annotations, converged.annotations);
}

#[test]
fn test_pod_deletion_purges_assignments() {
    let harness = Harness::new();

    let web = Arc::new(service(
        "web",
        "default",
        "10.0.0.1",
        &[("app", "web")],
        &[("traffic.port.8080", "http")],
        &[(8080, 0)],
    ));
    let pod0 = Arc::new(pod(
        "web-0",
        "default",
        "10.1.0.1",
        "2",
        &[("app", "web"), ("traffic.envoy.enabled", "true")],
    ));

    harness.pod_event(None, Some(&pod0));
    let patches = harness.service_added(&web);
    let pod0b = Arc::new(replay_pod_patches(&pod0, &patches, "3"));
    harness.pod_event(Some(&pod0), Some(&pod0b));
    assert!(harness
        .endpoint_assignment("8080|default|web.outbound")
        .is_some());

    harness.pod_event(Some(&pod0b), None);
    assert!(harness
        .endpoint_assignment("8080|default|web.outbound")
        .is_none());
    assert!(!harness
        .cluster_names()
        .contains(&"8080|10_1_0_1.static".to_string()));
}

#[test]
fn test_port_set_matches_assignment_membership() {
    // the §8 correspondence: a pod is in an assignment iff it carries the
    // matching routing annotation
    let harness = Harness::new();
    let mut annotated = pod(
        "web-0",
        "default",
        "10.1.0.1",
        "2",
        &[("traffic.envoy.enabled", "true")],
    );
    annotated
        .annotations
        .insert("traffic.svc.web.port.8080".into(), "http".into());
    let annotated = Arc::new(annotated);

    harness.pod_event(None, Some(&annotated));
    let Some(XdsResource::Endpoint(assignment)) =
        harness.endpoint_assignment("8080|default|web.outbound")
    else {
        panic!("assignment expected");
    };
    assert!(assignment.endpoints.contains_key("web-0@default"));

    let mut services = BTreeSet::new();
    services.insert("web".to_string());
    assert_eq!(annotated.port_set().get(&8080), Some(&services));
}
