//! Annotation and label patch plumbing against the API server.
//!
//! All writes are get-modify-update cycles so a lost watch event cannot
//! clobber foreign keys: the current object is fetched, the intended keys
//! are compared, and the update is skipped entirely when nothing would
//! change. Conflicts are retried three times with a one second pause; a
//! still-failing patch is logged and dropped, the next watch event
//! re-triggers reconciliation.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{info, warn};

use crate::errors::Result;

use super::ObjectKey;

const PATCH_ATTEMPTS: usize = 3;
const PATCH_BACKOFF: Duration = Duration::from_secs(1);

/// Thin wrapper over the kube client carrying the patch verbs the core
/// consumes. `Client::try_default` honors `KUBECONFIG` and falls back to
/// the in-cluster config.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub async fn new() -> Result<KubeClient> {
        match std::env::var("KUBECONFIG") {
            Ok(path) => info!(kubeconfig = %path, "Using kubeconfig"),
            Err(_) => info!("KUBECONFIG unset, using in-cluster config"),
        }
        let client = Client::try_default()
            .await
            .map_err(|e| crate::Error::kubernetes(e, "failed to construct Kubernetes client"))?;
        Ok(KubeClient { client })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Set (`Some`) or remove (`None`) pod annotation keys.
    pub async fn update_pod_annotations(
        &self,
        pod: &ObjectKey,
        annotations: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let mut last_err = None;

        for _ in 0..PATCH_ATTEMPTS {
            let mut raw = match api.get(&pod.name).await {
                Ok(raw) => raw,
                Err(e) => return Err(crate::Error::kubernetes(e, format!("get pod {}", pod))),
            };

            let existing = raw.metadata.annotations.get_or_insert_with(Default::default);
            if !apply_changes(existing, annotations) {
                return Ok(());
            }

            match api.replace(&pod.name, &PostParams::default(), &raw).await {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
            tokio::time::sleep(PATCH_BACKOFF).await;
        }

        Err(crate::Error::kubernetes(
            last_err.expect("retry loop always records an error"),
            format!("update annotations of pod {}", pod),
        ))
    }

    /// Set a single service label.
    pub async fn add_service_label(
        &self,
        service: &ObjectKey,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);
        let mut last_err = None;

        for _ in 0..PATCH_ATTEMPTS {
            let mut raw = match api.get(&service.name).await {
                Ok(raw) => raw,
                Err(e) => {
                    return Err(crate::Error::kubernetes(e, format!("get service {}", service)))
                }
            };

            let labels = raw.metadata.labels.get_or_insert_with(Default::default);
            if labels.get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            labels.insert(key.to_string(), value.to_string());

            match api
                .replace(&service.name, &PostParams::default(), &raw)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
            tokio::time::sleep(PATCH_BACKOFF).await;
        }

        Err(crate::Error::kubernetes(
            last_err.expect("retry loop always records an error"),
            format!("label service {}", service),
        ))
    }

    /// Set (`Some`) or remove (`None`) service annotation keys.
    pub async fn update_service_annotations(
        &self,
        service: &ObjectKey,
        annotations: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);
        let mut last_err = None;

        for _ in 0..PATCH_ATTEMPTS {
            let mut raw = match api.get(&service.name).await {
                Ok(raw) => raw,
                Err(e) => {
                    return Err(crate::Error::kubernetes(e, format!("get service {}", service)))
                }
            };

            let existing = raw.metadata.annotations.get_or_insert_with(Default::default);
            if !apply_changes(existing, annotations) {
                return Ok(());
            }

            match api
                .replace(&service.name, &PostParams::default(), &raw)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
            tokio::time::sleep(PATCH_BACKOFF).await;
        }

        Err(crate::Error::kubernetes(
            last_err.expect("retry loop always records an error"),
            format!("update annotations of service {}", service),
        ))
    }

    /// Add `value` to the comma-joined set stored under a service
    /// annotation key. Idempotent.
    pub async fn merge_service_annotation(
        &self,
        service: &ObjectKey,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.edit_service_annotation_set(service, key, value, true)
            .await
    }

    /// Remove `value` from the comma-joined set stored under a service
    /// annotation key.
    pub async fn remove_service_annotation(
        &self,
        service: &ObjectKey,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.edit_service_annotation_set(service, key, value, false)
            .await
    }

    async fn edit_service_annotation_set(
        &self,
        service: &ObjectKey,
        key: &str,
        value: &str,
        add: bool,
    ) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);
        let mut last_err = None;

        for _ in 0..PATCH_ATTEMPTS {
            let mut raw = match api.get(&service.name).await {
                Ok(raw) => raw,
                Err(e) => {
                    return Err(crate::Error::kubernetes(e, format!("get service {}", service)))
                }
            };

            let annotations = raw.metadata.annotations.get_or_insert_with(Default::default);
            let current = annotations.get(key).cloned().unwrap_or_default();
            let next = if add {
                merge_set(&current, value)
            } else {
                remove_set(&current, value)
            };
            let Some(next) = next else {
                return Ok(());
            };
            annotations.insert(key.to_string(), next);

            match api
                .replace(&service.name, &PostParams::default(), &raw)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
            tokio::time::sleep(PATCH_BACKOFF).await;
        }

        Err(crate::Error::kubernetes(
            last_err.expect("retry loop always records an error"),
            format!("merge annotation {} of service {}", key, service),
        ))
    }
}

/// Apply set/remove intents onto an annotation map; true when changed.
fn apply_changes(
    existing: &mut BTreeMap<String, String>,
    intents: &BTreeMap<String, Option<String>>,
) -> bool {
    let mut changed = false;
    for (key, intent) in intents {
        match intent {
            Some(value) => {
                if existing.get(key) != Some(value) {
                    existing.insert(key.clone(), value.clone());
                    changed = true;
                }
            }
            None => {
                if existing.remove(key).is_some() {
                    changed = true;
                }
            }
        }
    }
    changed
}

/// `None` means the set already contains the value.
fn merge_set(current: &str, value: &str) -> Option<String> {
    if current.is_empty() {
        return Some(value.to_string());
    }
    if current.split(',').any(|item| item == value) {
        return None;
    }
    Some(format!("{},{}", current, value))
}

/// `None` means the value was absent.
fn remove_set(current: &str, value: &str) -> Option<String> {
    if !current.split(',').any(|item| item == value) {
        return None;
    }
    Some(
        current
            .split(',')
            .filter(|item| *item != value && !item.is_empty())
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Log-and-drop wrapper used by the watch fan-out after the retry budget
/// is spent.
pub fn log_patch_failure(context: &str, err: &crate::Error) {
    warn!(error = %err, "{} failed, dropping patch; next watch event retries", context);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_changes_idempotent() {
        let mut existing: BTreeMap<String, String> =
            [("a".to_string(), "1".to_string())].into_iter().collect();
        let intents: BTreeMap<String, Option<String>> =
            [("a".to_string(), Some("1".to_string()))].into_iter().collect();
        assert!(!apply_changes(&mut existing, &intents));

        let intents: BTreeMap<String, Option<String>> =
            [("a".to_string(), None)].into_iter().collect();
        assert!(apply_changes(&mut existing, &intents));
        assert!(existing.is_empty());
        assert!(!apply_changes(&mut existing, &intents));
    }

    #[test]
    fn test_merge_and_remove_set() {
        assert_eq!(merge_set("", "a"), Some("a".to_string()));
        assert_eq!(merge_set("a,b", "a"), None);
        assert_eq!(merge_set("a,b", "c"), Some("a,b,c".to_string()));
        assert_eq!(remove_set("a,b,c", "b"), Some("a,c".to_string()));
        assert_eq!(remove_set("a", "b"), None);
        assert_eq!(remove_set("a", "a"), Some(String::new()));
    }
}
