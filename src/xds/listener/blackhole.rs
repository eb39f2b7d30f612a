//! The permanent catch-all chain: HTTP 404 on anything no other chain
//! matched.

use envoy_types::pb::envoy::config::listener::v3::FilterChain;
use envoy_types::pb::envoy::config::route::v3::{route, DirectResponseAction, VirtualHost};

use super::{http_connection_manager_filter, prefix_route, router_http_filter};

pub const BLACKHOLE_NAME: &str = "blackhole";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackholeChain;

impl BlackholeChain {
    pub fn name(&self) -> String {
        BLACKHOLE_NAME.to_string()
    }

    pub fn filter_chain(&self) -> FilterChain {
        let virtual_host = VirtualHost {
            name: "blackhole_vh".to_string(),
            domains: vec!["*".to_string()],
            routes: vec![prefix_route(
                "/",
                route::Action::DirectResponse(DirectResponseAction {
                    status: 404,
                    ..Default::default()
                }),
            )],
            ..Default::default()
        };
        FilterChain {
            filters: vec![http_connection_manager_filter(
                "http",
                BLACKHOLE_NAME,
                vec![virtual_host],
                vec![router_http_filter()],
                None,
            )],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blackhole_has_no_match() {
        let chain = BlackholeChain.filter_chain();
        assert!(chain.filter_chain_match.is_none());
        assert_eq!(chain.filters.len(), 1);
    }
}
