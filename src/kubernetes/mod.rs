//! Kubernetes integration: object projections, the selector index, the
//! watch fan-out, and annotation patch plumbing.

pub mod client;
pub mod index;
pub mod ingress;
pub mod labels;
pub mod pod;
pub mod secret;
pub mod service;
pub mod watch;
pub mod workload;

pub use client::KubeClient;
pub use index::{ObjectIndex, ObjectRef, ResourceType};
pub use ingress::{IngressBackend, IngressInfo};
pub use pod::{PodInfo, PodPortConfig};
pub use secret::SecretInfo;
pub use service::{ServiceInfo, ServicePortInfo};
pub use watch::{
    EventContext, IndexMaintainer, IngressHandler, PatchRequest, PodHandler, SecretHandler,
    ServiceHandler, WatchHub, WorkloadHandler,
};
pub use workload::WorkloadInfo;

/// Identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.namespace)
    }
}
