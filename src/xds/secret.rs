//! SDS: TLS material served to the ingress gateway as inline-bytes
//! certificates.

use std::collections::BTreeMap;
use std::sync::Arc;

use envoy_types::pb::envoy::config::core::v3::{data_source, DataSource, Node};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, Secret, TlsCertificate,
};
use envoy_types::pb::envoy::service::discovery::v3::DiscoveryResponse;
use prost::Message;

use crate::kubernetes::secret::{TLS_CERT_KEY, TLS_KEY_KEY};
use crate::kubernetes::{EventContext, SecretHandler, SecretInfo};

use super::resource::{make_response, XdsResource, SECRET_TYPE_URL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretResource {
    pub secret_name: String,
    pub namespace: String,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl SecretResource {
    pub fn name(&self) -> String {
        format!("{}.{}", self.secret_name, self.namespace)
    }

    pub fn describe(&self) -> String {
        format!("secret {}.{}", self.secret_name, self.namespace)
    }

    pub fn to_secret(&self) -> Secret {
        Secret {
            name: self.name(),
            r#type: Some(secret::Type::TlsCertificate(TlsCertificate {
                certificate_chain: Some(DataSource {
                    specifier: Some(data_source::Specifier::InlineBytes(self.cert.clone())),
                    ..Default::default()
                }),
                private_key: Some(DataSource {
                    specifier: Some(data_source::Specifier::InlineBytes(self.key.clone())),
                    ..Default::default()
                }),
                ..Default::default()
            })),
        }
    }
}

/// Build the SDS response for a cache snapshot.
pub fn build_response(
    resources: &BTreeMap<String, XdsResource>,
    version: &str,
    _node: &Node,
) -> DiscoveryResponse {
    let mut encoded = Vec::with_capacity(resources.len());
    for resource in resources.values() {
        let XdsResource::Secret(secret) = resource else {
            continue;
        };
        encoded.push(secret.to_secret().encode_to_vec());
    }
    make_response(encoded, SECRET_TYPE_URL, version)
}

/// Secret handler feeding the cache.
pub struct SdsTranslator;

impl SecretHandler for SdsTranslator {
    fn secret_valid(&self, secret: &SecretInfo) -> bool {
        secret.has_tls_material()
    }

    fn secret_added(&self, cx: &mut EventContext<'_>, secret: &Arc<SecretInfo>) {
        let resource = SecretResource {
            secret_name: secret.name.clone(),
            namespace: secret.namespace.clone(),
            cert: secret.data.get(TLS_CERT_KEY).cloned().unwrap_or_default(),
            key: secret.data.get(TLS_KEY_KEY).cloned().unwrap_or_default(),
        };
        cx.state
            .update_resource(XdsResource::Secret(resource), &secret.resource_version);
    }

    fn secret_deleted(&self, cx: &mut EventContext<'_>, secret: &Arc<SecretInfo>) {
        let resource = SecretResource {
            secret_name: secret.name.clone(),
            namespace: secret.namespace.clone(),
            cert: Vec::new(),
            key: Vec::new(),
        };
        cx.state.update_resource(XdsResource::Secret(resource), "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_shape() {
        let resource = SecretResource {
            secret_name: "tls-1".into(),
            namespace: "default".into(),
            cert: b"CERT".to_vec(),
            key: b"KEY".to_vec(),
        };
        let secret = resource.to_secret();
        assert_eq!(secret.name, "tls-1.default");
        let Some(secret::Type::TlsCertificate(tls)) = secret.r#type else {
            panic!("expected TLS certificate");
        };
        assert_eq!(
            tls.certificate_chain.unwrap().specifier,
            Some(data_source::Specifier::InlineBytes(b"CERT".to_vec()))
        );
    }
}
