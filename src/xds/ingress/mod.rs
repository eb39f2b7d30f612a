//! Ingress-gateway LDS: per-(host, path) routing rows cached from Ingress
//! objects and composed into host/SNI-indexed filter chains at response
//! time.

mod translator;

pub use translator::IngressLdsTranslator;

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::core::v3::{
    config_source, transport_socket, AggregatedConfigSource, ConfigSource, TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::{FilterChain, FilterChainMatch};
use envoy_types::pb::envoy::config::route::v3::{
    redirect_action, route, RedirectAction, Route, VirtualHost,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, DownstreamTlsContext, SdsSecretConfig,
};

use crate::xds::listener::{
    http_connection_manager_filter, prefix_route, router_http_filter, typed_any, HttpChainConfig,
};

pub const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";
pub const TLS_TRANSPORT_SOCKET: &str = "envoy.transport_sockets.tls";

const INGRESS_STAT_PREFIX: &str = "traffic-ingress";

/// One cached routing row of the ingress gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRoute {
    pub host: String,
    pub path: String,
    pub cluster: String,
    /// SDS reference `<secret>.<ns>` when the host terminates TLS.
    pub tls_secret: Option<String>,
}

impl IngressRoute {
    pub fn name(&self) -> String {
        if self.tls_secret.is_some() {
            format!("tls_http|{}|{}", self.host, self.path)
        } else {
            format!("http|{}|{}", self.host, self.path)
        }
    }

    pub fn describe(&self) -> String {
        format!("{} -> {}", self.name(), self.cluster)
    }

    fn route(&self) -> Route {
        let config = HttpChainConfig::default();
        prefix_route(&self.path, route::Action::Route(config.route_action(&self.cluster)))
    }
}

fn redirect_route() -> Route {
    prefix_route(
        "/",
        route::Action::Redirect(RedirectAction {
            scheme_rewrite_specifier: Some(redirect_action::SchemeRewriteSpecifier::HttpsRedirect(
                true,
            )),
            ..Default::default()
        }),
    )
}

fn virtual_host_name(host: &str) -> String {
    if host == "*" {
        "all_ingress_vh".to_string()
    } else {
        format!("{}_ingress_vh", host.replace('.', "_"))
    }
}

/// Longest path first; equal lengths fall back to lexicographic order for
/// determinism.
fn sort_routes(routes: &mut [&IngressRoute]) {
    routes.sort_by(|a, b| {
        b.path
            .len()
            .cmp(&a.path.len())
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Hosts sort ascending with the wildcard last.
fn sorted_hosts<'a, T>(map: &'a BTreeMap<String, T>) -> Vec<&'a String> {
    let mut hosts: Vec<&String> = map.keys().collect();
    hosts.sort_by(|a, b| match (a.as_str(), b.as_str()) {
        ("*", "*") => std::cmp::Ordering::Equal,
        ("*", _) => std::cmp::Ordering::Greater,
        (_, "*") => std::cmp::Ordering::Less,
        _ => a.cmp(b),
    });
    hosts
}

/// Assemble the gateway's filter chains: one TLS chain per SNI host, then
/// a single plain-HTTP chain carrying per-host virtual hosts (with an
/// HTTPS redirect for every TLS host).
pub fn build_ingress_chains(rows: &[&IngressRoute]) -> Vec<FilterChain> {
    let mut tls_rows: BTreeMap<String, Vec<&IngressRoute>> = BTreeMap::new();
    let mut tls_secrets: BTreeMap<String, String> = BTreeMap::new();
    let mut plain_rows: BTreeMap<String, Vec<&IngressRoute>> = BTreeMap::new();

    for row in rows {
        match &row.tls_secret {
            Some(secret) => {
                tls_rows.entry(row.host.clone()).or_default().push(row);
                tls_secrets.insert(row.host.clone(), secret.clone());
            }
            None => plain_rows.entry(row.host.clone()).or_default().push(row),
        }
    }

    let mut chains = Vec::new();

    for host in sorted_hosts(&tls_rows) {
        let mut host_rows = tls_rows[host].clone();
        sort_routes(&mut host_rows);
        let routes = host_rows.iter().map(|row| row.route()).collect();
        chains.push(tls_filter_chain(host, routes, &tls_secrets[host]));
    }

    let mut virtual_hosts = Vec::new();
    for host in sorted_hosts(&plain_rows) {
        if tls_rows.contains_key(host) {
            continue;
        }
        let mut host_rows = plain_rows[host].clone();
        sort_routes(&mut host_rows);
        virtual_hosts.push(VirtualHost {
            name: virtual_host_name(host),
            domains: vec![host.clone()],
            routes: host_rows.iter().map(|row| row.route()).collect(),
            ..Default::default()
        });
    }
    // TLS hosts answer plain HTTP with a redirect.
    for host in sorted_hosts(&tls_rows) {
        virtual_hosts.push(VirtualHost {
            name: format!("{}_redirect_vh", virtual_host_name(host)),
            domains: vec![host.clone()],
            routes: vec![redirect_route()],
            ..Default::default()
        });
    }

    if !virtual_hosts.is_empty() {
        chains.push(FilterChain {
            filter_chain_match: Some(FilterChainMatch::default()),
            filters: vec![http_connection_manager_filter(
                INGRESS_STAT_PREFIX,
                INGRESS_STAT_PREFIX,
                virtual_hosts,
                vec![router_http_filter()],
                None,
            )],
            ..Default::default()
        });
    }

    chains
}

fn tls_filter_chain(host: &str, routes: Vec<Route>, secret: &str) -> FilterChain {
    let name = virtual_host_name(host);
    let virtual_host = VirtualHost {
        name: format!("{}_vh", name),
        domains: vec![host.to_string()],
        routes,
        ..Default::default()
    };

    let tls_context = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                name: secret.to_string(),
                sds_config: Some(ConfigSource {
                    config_source_specifier: Some(config_source::ConfigSourceSpecifier::Ads(
                        AggregatedConfigSource::default(),
                    )),
                    ..Default::default()
                }),
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    FilterChain {
        filter_chain_match: Some(FilterChainMatch {
            server_names: vec![host.to_string()],
            transport_protocol: "tls".to_string(),
            ..Default::default()
        }),
        filters: vec![http_connection_manager_filter(
            &name,
            &name,
            vec![virtual_host],
            vec![router_http_filter()],
            None,
        )],
        transport_socket: Some(TransportSocket {
            name: TLS_TRANSPORT_SOCKET.to_string(),
            config_type: Some(transport_socket::ConfigType::TypedConfig(typed_any(
                DOWNSTREAM_TLS_TYPE_URL,
                &tls_context,
            ))),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(host: &str, path: &str, cluster: &str, secret: Option<&str>) -> IngressRoute {
        IngressRoute {
            host: host.into(),
            path: path.into(),
            cluster: cluster.into(),
            tls_secret: secret.map(String::from),
        }
    }

    #[test]
    fn test_row_names() {
        assert_eq!(row("a.com", "/", "c", None).name(), "http|a.com|/");
        assert_eq!(
            row("a.com", "/", "c", Some("tls-1.default")).name(),
            "tls_http|a.com|/"
        );
    }

    #[test]
    fn test_tls_chain_and_redirect() {
        let tls = row("api.example.com", "/", "8080|default|api.outbound", Some("tls-1.default"));
        let chains = build_ingress_chains(&[&tls]);
        assert_eq!(chains.len(), 2);

        let m = chains[0].filter_chain_match.as_ref().unwrap();
        assert_eq!(m.server_names, vec!["api.example.com".to_string()]);
        assert_eq!(m.transport_protocol, "tls");
        assert!(chains[0].transport_socket.is_some());

        // the plain chain carries only the redirect virtual host
        assert!(chains[1].transport_socket.is_none());
    }

    #[test]
    fn test_route_ordering_longest_path_first() {
        let a = row("a.com", "/", "c1", None);
        let b = row("a.com", "/api/v1", "c2", None);
        let c = row("a.com", "/api", "c3", None);
        let mut rows = vec![&a, &b, &c];
        sort_routes(&mut rows);
        assert_eq!(rows[0].path, "/api/v1");
        assert_eq!(rows[1].path, "/api");
        assert_eq!(rows[2].path, "/");
    }

    #[test]
    fn test_wildcard_host_sorts_last() {
        let mut map = BTreeMap::new();
        map.insert("*".to_string(), ());
        map.insert("a.com".to_string(), ());
        map.insert("b.com".to_string(), ());
        let hosts = sorted_hosts(&map);
        assert_eq!(hosts.last().unwrap().as_str(), "*");
    }
}
