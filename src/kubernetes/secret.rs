//! Secret projection. Only secrets carrying `tls.crt` and `tls.key` are
//! served over SDS.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;

use super::ObjectKey;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretInfo {
    pub resource_version: String,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl SecretInfo {
    pub fn from_secret(secret: &Secret) -> SecretInfo {
        let meta = &secret.metadata;
        SecretInfo {
            resource_version: meta.resource_version.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            labels: meta.labels.clone().unwrap_or_default().into_iter().collect(),
            data: secret
                .data
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Valid iff both TLS data keys are present.
    pub fn has_tls_material(&self) -> bool {
        self.data.contains_key(TLS_CERT_KEY) && self.data.contains_key(TLS_KEY_KEY)
    }

    pub fn same_except_version(&self, other: &SecretInfo) -> bool {
        let mut probe = other.clone();
        probe.resource_version = self.resource_version.clone();
        *self == probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_tls_material() {
        let mut secret = SecretInfo {
            resource_version: "1".into(),
            name: "tls-1".into(),
            namespace: "default".into(),
            labels: BTreeMap::new(),
            data: BTreeMap::new(),
        };
        assert!(!secret.has_tls_material());
        secret.data.insert(TLS_CERT_KEY.into(), b"cert".to_vec());
        assert!(!secret.has_tls_material());
        secret.data.insert(TLS_KEY_KEY.into(), b"key".to_vec());
        assert!(secret.has_tls_material());
    }
}
