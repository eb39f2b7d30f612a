//! Environment-driven configuration for the control plane.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

const DEFAULT_GRPC_PORT: u16 = 18000;

/// Control-plane settings.
///
/// All state is in-memory; the only configuration surface is the
/// environment. `KUBECONFIG` is consumed by the kube client itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Listen port for the aggregated discovery service.
    pub grpc_port: u16,

    /// The data-plane port every sidecar/gateway proxy listens on. The LDS
    /// translator assembles its single listener on this port.
    pub proxy_port: u32,
}

impl Settings {
    /// Read settings from the environment.
    ///
    /// `TRAFFIC_MANAGE_PORT` defaults to 18000; `ENVOY_PROXY_PORT` is
    /// required and startup aborts without it.
    pub fn from_env() -> Result<Self> {
        let grpc_port = match std::env::var("TRAFFIC_MANAGE_PORT") {
            Ok(value) if !value.is_empty() => value.parse::<u16>().map_err(|e| {
                Error::config(format!("wrong TRAFFIC_MANAGE_PORT value '{}': {}", value, e))
            })?,
            _ => DEFAULT_GRPC_PORT,
        };

        let proxy_port = std::env::var("ENVOY_PROXY_PORT")
            .map_err(|_| Error::config("env ENVOY_PROXY_PORT is not set"))?;
        let proxy_port = proxy_port.parse::<u32>().map_err(|e| {
            Error::config(format!("wrong ENVOY_PROXY_PORT value '{}': {}", proxy_port, e))
        })?;

        Ok(Settings {
            grpc_port,
            proxy_port,
        })
    }

    /// The ADS bind address.
    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.grpc_port)
    }
}
