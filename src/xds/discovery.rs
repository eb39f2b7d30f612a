//! The aggregated discovery service: one bidirectional stream per proxy,
//! multiplexing all four resource families.
//!
//! A reader task drains the network side; the stream loop paces request
//! handling to one per 100 ms and spawns a task per request. Each task
//! long-polls the resource broker (blocking on its condition variable off
//! the async runtime), builds the typed response and sends it. Requests
//! without a node id and unknown type URLs are logged and skipped; the
//! stream stays open.

use std::sync::Arc;
use std::time::Duration;

use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};
use crate::xds::resource::ResourceKind;

use super::cache::ResourceBroker;
use super::{cluster, endpoint, listener, secret};

/// Per-stream pacing interval; caps the build rate per proxy.
const REQUEST_TICK: Duration = Duration::from_millis(100);

pub struct AggregatedDiscovery {
    broker: Arc<ResourceBroker>,
    proxy_port: u32,
}

impl AggregatedDiscovery {
    pub fn new(broker: Arc<ResourceBroker>, proxy_port: u32) -> AggregatedDiscovery {
        AggregatedDiscovery { broker, proxy_port }
    }
}

/// Long-poll the broker for the request's names, then build the response
/// for the requesting node.
fn process_request(
    broker: &ResourceBroker,
    proxy_port: u32,
    request: &DiscoveryRequest,
) -> Result<DiscoveryResponse> {
    let node = request.node.clone().unwrap_or_default();
    let Some(kind) = ResourceKind::from_type_url(&request.type_url) else {
        return Err(Error::xds(
            format!("unsupported type URL {}", request.type_url),
            Some(node.id),
        ));
    };

    // The listener response is always the full set.
    let names: &[String] = if kind == ResourceKind::Listener {
        &[]
    } else {
        &request.resource_names
    };

    let (resources, version) = broker.wait_for_resources(kind, names, &request.version_info);
    Ok(build_response(kind, &resources, &version, &node, proxy_port))
}

fn build_response(
    kind: ResourceKind,
    resources: &std::collections::BTreeMap<String, super::XdsResource>,
    version: &str,
    node: &Node,
    proxy_port: u32,
) -> DiscoveryResponse {
    match kind {
        ResourceKind::Cluster => cluster::build_response(resources, version, node),
        ResourceKind::Endpoint => endpoint::build_response(resources, version, node),
        ResourceKind::Listener => listener::build_response(resources, version, node, proxy_port),
        ResourceKind::Secret => secret::build_response(resources, version, node),
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AggregatedDiscovery {
    type StreamAggregatedResourcesStream = ReceiverStream<std::result::Result<DiscoveryResponse, Status>>;
    type DeltaAggregatedResourcesStream = ReceiverStream<std::result::Result<DeltaDiscoveryResponse, Status>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let mut in_stream = request.into_inner();
        let broker = self.broker.clone();
        let proxy_port = self.proxy_port;

        let (req_tx, mut req_rx) = mpsc::channel::<DiscoveryRequest>(16);
        let (tx, rx) = mpsc::channel(100);

        // Reader task: drain the network side, drop protocol errors.
        tokio::spawn(async move {
            loop {
                match in_stream.next().await {
                    Some(Ok(request)) => {
                        let node_id = request.node.as_ref().map(|n| n.id.as_str()).unwrap_or("");
                        if node_id.is_empty() {
                            error!(
                                type_url = %request.type_url,
                                resources = %request.resource_names.join(","),
                                "Missing node id in discovery request"
                            );
                            continue;
                        }
                        if req_tx.send(request).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Error receiving discovery request");
                        return;
                    }
                    None => {
                        info!("ADS stream ended by client");
                        return;
                    }
                }
            }
        });

        // Stream loop: pace inbound requests, one build task each.
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REQUEST_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(request) = req_rx.recv().await else {
                    break;
                };
                debug!(
                    type_url = %request.type_url,
                    version = %request.version_info,
                    nonce = %request.response_nonce,
                    resources = %request.resource_names.join(","),
                    node_id = ?request.node.as_ref().map(|n| &n.id),
                    "Request received"
                );
                if let Some(error_detail) = &request.error_detail {
                    warn!(
                        type_url = %request.type_url,
                        error_code = error_detail.code,
                        error_message = %error_detail.message,
                        "Proxy rejected previous response"
                    );
                }

                let broker = broker.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let type_url = request.type_url.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        process_request(&broker, proxy_port, &request)
                    })
                    .await;

                    match result {
                        Ok(Ok(response)) => {
                            debug!(
                                type_url = %response.type_url,
                                version = %response.version_info,
                                resource_count = response.resources.len(),
                                "Sending discovery response"
                            );
                            if tx.send(Ok(response)).await.is_err() {
                                warn!(type_url = %type_url, "Discovery response receiver dropped");
                            }
                        }
                        Ok(Err(e)) => {
                            error!(type_url = %type_url, error = %e, "Failed to process discovery request");
                        }
                        Err(e) => {
                            error!(type_url = %type_url, error = %e, "Discovery build task failed");
                        }
                    }
                });
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented(
            "delta xDS is not supported; use state-of-the-world ADS",
        ))
    }
}
