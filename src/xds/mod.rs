//! Envoy xDS implementation: the versioned resource cache, the CDS/EDS/
//! LDS/SDS translators, and the aggregated discovery gRPC server.

pub mod cache;
pub mod cluster;
pub mod discovery;
pub mod endpoint;
pub mod ingress;
pub mod listener;
pub mod resource;
pub mod secret;

use std::future::Future;
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use tonic::transport::Server;
use tracing::info;

use crate::config::Settings;
use crate::Result;

pub use cache::{BrokerState, ResourceBroker};
pub use discovery::AggregatedDiscovery;
pub use resource::{ResourceKind, XdsResource};

/// Node id the shared ingress gateway identifies with. All other node ids
/// are `<pod>.<namespace>`.
pub const INGRESS_NODE_ID: &str = "traffic-ingress";

/// Start the aggregated discovery gRPC server and block until shutdown.
pub async fn serve_ads<F>(
    settings: &Settings,
    broker: Arc<ResourceBroker>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: std::net::SocketAddr = settings
        .bind_address()
        .parse()
        .map_err(|e| crate::Error::config(format!("Invalid xDS address: {}", e)))?;

    let ads = AggregatedDiscovery::new(broker, settings.proxy_port);

    info!(address = %addr, "Starting aggregated discovery service");

    Server::builder()
        .add_service(AggregatedDiscoveryServiceServer::new(ads))
        .serve_with_shutdown(addr, shutdown_signal)
        .await
        .map_err(|e| {
            let message = e.to_string();
            if message.contains("Address already in use") || message.contains("bind") {
                crate::Error::transport(format!(
                    "ADS server failed to bind to {}: port already in use",
                    addr
                ))
            } else {
                crate::Error::transport(format!("ADS server failed: {}", e))
            }
        })
}
