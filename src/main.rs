//! Control-plane entry point: wire the translators and propagators onto
//! the watch fan-out, then serve aggregated discovery until shutdown.

use std::sync::Arc;

use tracing::info;

use trafficplane::annotation::{ServiceToPodAnnotator, WorkloadToPodAnnotator};
use trafficplane::config::Settings;
use trafficplane::kubernetes::{IndexMaintainer, KubeClient, WatchHub};
use trafficplane::xds::cluster::CdsTranslator;
use trafficplane::xds::endpoint::EdsTranslator;
use trafficplane::xds::ingress::IngressLdsTranslator;
use trafficplane::xds::listener::LdsTranslator;
use trafficplane::xds::secret::SdsTranslator;
use trafficplane::xds::{self, ResourceBroker};
use trafficplane::{observability, Result};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_logging();

    let settings = Settings::from_env()?;
    let client = KubeClient::new().await?;
    let broker = Arc::new(ResourceBroker::new());

    let index = Arc::new(IndexMaintainer);
    let cds = Arc::new(CdsTranslator);
    let eds = Arc::new(EdsTranslator);
    let lds = Arc::new(LdsTranslator::new(&broker));
    let service_annotator = Arc::new(ServiceToPodAnnotator);
    let workload_annotator = Arc::new(WorkloadToPodAnnotator);

    let mut hub = WatchHub::new(client, broker.clone());
    // The index maintainer runs first so every other handler observes a
    // current selector index.
    hub.register_pod_handler(index.clone());
    hub.register_pod_handler(eds);
    hub.register_pod_handler(cds.clone());
    hub.register_pod_handler(lds.clone());
    hub.register_pod_handler(workload_annotator.clone());
    hub.register_pod_handler(service_annotator.clone());

    hub.register_service_handler(index.clone());
    hub.register_service_handler(cds);
    hub.register_service_handler(lds);
    hub.register_service_handler(service_annotator);

    hub.register_workload_handler(index);
    hub.register_workload_handler(workload_annotator);

    hub.register_ingress_handler(Arc::new(IngressLdsTranslator));
    hub.register_secret_handler(Arc::new(SdsTranslator));

    let _watch_tasks = Arc::new(hub).spawn_all();

    info!(
        grpc_port = settings.grpc_port,
        proxy_port = settings.proxy_port,
        "Starting trafficplane control plane"
    );

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received");
    };

    xds::serve_ads(&settings, broker, shutdown_signal).await
}
