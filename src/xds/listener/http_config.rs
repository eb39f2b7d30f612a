//! Per-chain HTTP behavior parsed from `traffic.*` keys: retries,
//! timeouts, fault injection, response rate limiting, hash policies and
//! tracing.

use std::collections::BTreeMap;
use std::time::Duration;

use envoy_types::pb::envoy::config::route::v3::{
    route, route_action, RetryPolicy, RouteAction, VirtualHost,
};
use envoy_types::pb::envoy::extensions::filters::common::fault::v3::{
    fault_delay, fault_rate_limit, FaultDelay, FaultRateLimit,
};
use envoy_types::pb::envoy::extensions::filters::http::fault::v3::{fault_abort, FaultAbort, HttpFault};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager, http_filter, HttpFilter,
};
use envoy_types::pb::envoy::r#type::v3::{fractional_percent, FractionalPercent, Percent};
use envoy_types::pb::google::protobuf::{Duration as PbDuration, UInt32Value};

use crate::kubernetes::labels::{
    label_value_bool, label_value_millis, label_value_percent, label_value_u32, label_value_u64,
};

use super::{prefix_route, router_http_filter, typed_any, HTTP_FAULT_FILTER, HTTP_FAULT_TYPE_URL};

pub const ALL_DOMAINS: &str = "*";

#[derive(Debug, Clone, PartialEq)]
pub struct HttpChainConfig {
    pub tracing: bool,
    /// Random-sampling percentage for traced requests.
    pub tracing_sampling: f64,
    pub request_timeout: Duration,
    pub retry_on: String,
    pub retry_times: u32,

    pub fault_delay_time: Duration,
    pub fault_delay_percentage: u32,
    pub fault_abort_status: u32,
    pub fault_abort_percentage: u32,
    pub rate_limit_kbps: u64,

    pub hash_cookie_name: String,
    pub hash_cookie_ttl: Duration,
    pub hash_header_name: String,
}

impl Default for HttpChainConfig {
    fn default() -> Self {
        HttpChainConfig {
            tracing: false,
            tracing_sampling: 100.0,
            request_timeout: Duration::ZERO,
            retry_on: String::new(),
            retry_times: 0,
            fault_delay_time: Duration::from_secs(1),
            fault_delay_percentage: 0,
            fault_abort_status: 503,
            fault_abort_percentage: 0,
            rate_limit_kbps: 0,
            hash_cookie_name: String::new(),
            hash_cookie_ttl: Duration::ZERO,
            hash_header_name: String::new(),
        }
    }
}

/// Service labels the propagator copies onto matching pods. Tracing
/// travels to every pod; the rest only matter on headless-service pods,
/// whose egress chains are pod-IP chains built from pod annotations.
pub fn needs_service_to_pod_annotation(label: &str, headless: bool) -> bool {
    match label {
        "traffic.tracing.enabled" | "traffic.tracing.sampling" => true,
        "traffic.request.timeout"
        | "traffic.retries.5xx"
        | "traffic.retries.connect-failure"
        | "traffic.retries.gateway-error"
        | "traffic.fault.delay.time"
        | "traffic.fault.delay.percentage"
        | "traffic.fault.abort.status"
        | "traffic.fault.abort.percentage"
        | "traffic.rate.limit"
        | "traffic.hash.cookie.name"
        | "traffic.hash.cookie.ttl"
        | "traffic.hash.header.name" => headless,
        _ => false,
    }
}

impl HttpChainConfig {
    pub fn from_config(config: &BTreeMap<String, String>) -> HttpChainConfig {
        let mut result = HttpChainConfig::default();
        for (key, value) in config {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "traffic.tracing.enabled" => result.tracing = label_value_bool(value),
                "traffic.tracing.sampling" => result.tracing_sampling = label_value_percent(value),
                "traffic.request.timeout" => result.request_timeout = label_value_millis(value),
                "traffic.retries.5xx" => {
                    result.retry_on = "5xx".to_string();
                    result.retry_times = label_value_u32(value);
                }
                "traffic.retries.connect-failure" => {
                    result.retry_on = "connect-failure".to_string();
                    result.retry_times = label_value_u32(value);
                }
                "traffic.retries.gateway-error" => {
                    result.retry_on = "gateway-error".to_string();
                    result.retry_times = label_value_u32(value);
                }
                "traffic.fault.delay.time" => result.fault_delay_time = label_value_millis(value),
                "traffic.fault.delay.percentage" => {
                    result.fault_delay_percentage = label_value_u32(value)
                }
                "traffic.fault.abort.status" => result.fault_abort_status = label_value_u32(value),
                "traffic.fault.abort.percentage" => {
                    result.fault_abort_percentage = label_value_u32(value)
                }
                "traffic.rate.limit" => result.rate_limit_kbps = label_value_u64(value),
                "traffic.hash.cookie.name" => result.hash_cookie_name = value.clone(),
                "traffic.hash.cookie.ttl" => result.hash_cookie_ttl = label_value_millis(value),
                "traffic.hash.header.name" => result.hash_header_name = value.clone(),
                _ => {}
            }
        }
        result
    }

    /// Route action to `cluster` with the retry, timeout and hash policy
    /// of this config.
    pub fn route_action(&self, cluster: &str) -> RouteAction {
        let mut action = RouteAction {
            cluster_specifier: Some(route_action::ClusterSpecifier::Cluster(cluster.to_string())),
            ..Default::default()
        };
        if !self.retry_on.is_empty() {
            action.retry_policy = Some(RetryPolicy {
                retry_on: self.retry_on.clone(),
                num_retries: Some(UInt32Value {
                    value: self.retry_times,
                }),
                ..Default::default()
            });
        }
        if !self.request_timeout.is_zero() {
            action.timeout = Some(duration_pb(self.request_timeout));
        }
        if !self.hash_cookie_name.is_empty() {
            action.hash_policy.push(route_action::HashPolicy {
                policy_specifier: Some(route_action::hash_policy::PolicySpecifier::Cookie(
                    route_action::hash_policy::Cookie {
                        name: self.hash_cookie_name.clone(),
                        ttl: if self.hash_cookie_ttl.is_zero() {
                            None
                        } else {
                            Some(duration_pb(self.hash_cookie_ttl))
                        },
                        ..Default::default()
                    },
                )),
                ..Default::default()
            });
        }
        if !self.hash_header_name.is_empty() {
            action.hash_policy.push(route_action::HashPolicy {
                policy_specifier: Some(route_action::hash_policy::PolicySpecifier::Header(
                    route_action::hash_policy::Header {
                        header_name: self.hash_header_name.clone(),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            });
        }
        action
    }

    /// A catch-all virtual host routing every path to `cluster`.
    pub fn virtual_host(&self, name: &str, cluster: &str, domains: Vec<String>) -> VirtualHost {
        VirtualHost {
            name: name.to_string(),
            domains,
            routes: vec![prefix_route("/", route::Action::Route(self.route_action(cluster)))],
            ..Default::default()
        }
    }

    /// HTTP filters for the chain: fault injection (when configured)
    /// ahead of the terminal router.
    pub fn http_filters(&self) -> Vec<HttpFilter> {
        let mut filters = Vec::new();

        let mut fault = HttpFault::default();
        let mut has_fault = false;
        if self.fault_delay_percentage > 0 {
            fault.delay = Some(FaultDelay {
                fault_delay_secifier: Some(fault_delay::FaultDelaySecifier::FixedDelay(
                    duration_pb(self.fault_delay_time),
                )),
                percentage: Some(hundred_percent(self.fault_delay_percentage)),
                ..Default::default()
            });
            has_fault = true;
        }
        if self.fault_abort_percentage > 0 {
            fault.abort = Some(FaultAbort {
                error_type: Some(fault_abort::ErrorType::HttpStatus(self.fault_abort_status)),
                percentage: Some(hundred_percent(self.fault_abort_percentage)),
                ..Default::default()
            });
            has_fault = true;
        }
        if self.rate_limit_kbps > 0 {
            fault.response_rate_limit = Some(FaultRateLimit {
                limit_type: Some(fault_rate_limit::LimitType::FixedLimit(
                    fault_rate_limit::FixedLimit {
                        limit_kbps: self.rate_limit_kbps,
                    },
                )),
                ..Default::default()
            });
            has_fault = true;
        }
        if has_fault {
            filters.push(HttpFilter {
                name: HTTP_FAULT_FILTER.to_string(),
                config_type: Some(http_filter::ConfigType::TypedConfig(typed_any(
                    HTTP_FAULT_TYPE_URL,
                    &fault,
                ))),
                ..Default::default()
            });
        }

        filters.push(router_http_filter());
        filters
    }

    /// Connection-manager tracing config, when enabled.
    pub fn tracing_config(&self) -> Option<http_connection_manager::Tracing> {
        if !self.tracing {
            return None;
        }
        Some(http_connection_manager::Tracing {
            random_sampling: Some(Percent {
                value: self.tracing_sampling,
            }),
            ..Default::default()
        })
    }
}

fn duration_pb(duration: Duration) -> PbDuration {
    PbDuration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

fn hundred_percent(numerator: u32) -> FractionalPercent {
    FractionalPercent {
        numerator,
        denominator: fractional_percent::DenominatorType::Hundred as i32,
    }
}
