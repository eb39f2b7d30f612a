//! Watch fan-out.
//!
//! One long-lived watch per kind. Every event is projected, diffed against
//! the previous projection (updates equal modulo `resource_version` are
//! suppressed), and delivered to the registered handlers under the broker
//! lock. Handlers never touch the network; they enqueue patch intents
//! which the fan-out executes after the lock is released.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::xds::cache::{BrokerState, ResourceBroker};

use super::client::{log_patch_failure, KubeClient};
use super::index::ObjectRef;
use super::ingress::IngressInfo;
use super::pod::PodInfo;
use super::secret::SecretInfo;
use super::service::ServiceInfo;
use super::workload::WorkloadInfo;
use super::ObjectKey;

/// What a handler sees while the broker lock is held: the shared state and
/// the patch queue for orchestrator writes.
pub struct EventContext<'a> {
    pub state: &'a mut BrokerState,
    pub patches: &'a mut Vec<PatchRequest>,
}

impl EventContext<'_> {
    pub fn push_patch(&mut self, patch: PatchRequest) {
        self.patches.push(patch);
    }
}

/// An orchestrator write requested by a handler, executed outside the
/// lock.
#[derive(Debug, Clone)]
pub enum PatchRequest {
    PodAnnotations {
        pod: ObjectKey,
        set: BTreeMap<String, Option<String>>,
    },
    ServiceLabel {
        service: ObjectKey,
        key: String,
        value: String,
    },
    ServiceAnnotations {
        service: ObjectKey,
        set: BTreeMap<String, Option<String>>,
    },
    MergeServiceAnnotation {
        service: ObjectKey,
        key: String,
        value: String,
    },
    UnmergeServiceAnnotation {
        service: ObjectKey,
        key: String,
        value: String,
    },
}

pub trait PodHandler: Send + Sync {
    fn pod_valid(&self, _pod: &PodInfo) -> bool {
        true
    }
    fn pod_added(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>);
    fn pod_deleted(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>);
    fn pod_updated(&self, cx: &mut EventContext<'_>, old: &Arc<PodInfo>, new: &Arc<PodInfo>) {
        let _ = old;
        self.pod_added(cx, new);
    }
}

pub trait ServiceHandler: Send + Sync {
    fn service_valid(&self, _service: &ServiceInfo) -> bool {
        true
    }
    fn service_added(&self, cx: &mut EventContext<'_>, service: &Arc<ServiceInfo>);
    fn service_deleted(&self, cx: &mut EventContext<'_>, service: &Arc<ServiceInfo>);
    fn service_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<ServiceInfo>,
        new: &Arc<ServiceInfo>,
    ) {
        let _ = old;
        self.service_added(cx, new);
    }
}

pub trait WorkloadHandler: Send + Sync {
    fn workload_valid(&self, _workload: &WorkloadInfo) -> bool {
        true
    }
    fn workload_added(&self, cx: &mut EventContext<'_>, workload: &Arc<WorkloadInfo>);
    fn workload_deleted(&self, cx: &mut EventContext<'_>, workload: &Arc<WorkloadInfo>);
    fn workload_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<WorkloadInfo>,
        new: &Arc<WorkloadInfo>,
    ) {
        let _ = old;
        self.workload_added(cx, new);
    }
}

pub trait IngressHandler: Send + Sync {
    fn ingress_valid(&self, _ingress: &IngressInfo) -> bool {
        true
    }
    fn ingress_added(&self, cx: &mut EventContext<'_>, ingress: &Arc<IngressInfo>);
    fn ingress_deleted(&self, cx: &mut EventContext<'_>, ingress: &Arc<IngressInfo>);
    fn ingress_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<IngressInfo>,
        new: &Arc<IngressInfo>,
    ) {
        self.ingress_deleted(cx, old);
        self.ingress_added(cx, new);
    }
}

pub trait SecretHandler: Send + Sync {
    fn secret_valid(&self, _secret: &SecretInfo) -> bool {
        true
    }
    fn secret_added(&self, cx: &mut EventContext<'_>, secret: &Arc<SecretInfo>);
    fn secret_deleted(&self, cx: &mut EventContext<'_>, secret: &Arc<SecretInfo>);
    fn secret_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<SecretInfo>,
        new: &Arc<SecretInfo>,
    ) {
        let _ = old;
        self.secret_added(cx, new);
    }
}

/// Validity transition of one object, per kind.
enum Transition<T> {
    Added(Arc<T>),
    Deleted(Arc<T>),
    Updated(Arc<T>, Arc<T>),
}

/// Last-seen projections of one kind, also tracking re-list windows so a
/// reconnect synthesizes deletes for objects that disappeared meanwhile.
struct ProjectionStore<T> {
    store: HashMap<ObjectKey, Arc<T>>,
    init_keys: Option<HashSet<ObjectKey>>,
}

impl<T> ProjectionStore<T> {
    fn new() -> Self {
        ProjectionStore {
            store: HashMap::new(),
            init_keys: None,
        }
    }

    fn begin_init(&mut self) {
        self.init_keys = Some(HashSet::new());
    }

    fn finish_init(&mut self) -> Vec<Transition<T>> {
        let Some(seen) = self.init_keys.take() else {
            return Vec::new();
        };
        let stale: Vec<ObjectKey> = self
            .store
            .keys()
            .filter(|key| !seen.contains(key))
            .cloned()
            .collect();
        stale
            .into_iter()
            .filter_map(|key| self.store.remove(&key).map(Transition::Deleted))
            .collect()
    }

    /// Record a projected object; `None` (unprojectable) acts as a delete.
    fn apply(
        &mut self,
        key: ObjectKey,
        projected: Option<T>,
        same: impl Fn(&T, &T) -> bool,
    ) -> Option<Transition<T>> {
        if let Some(seen) = self.init_keys.as_mut() {
            seen.insert(key.clone());
        }
        let Some(new) = projected else {
            return self.delete(&key);
        };
        let new = Arc::new(new);
        match self.store.insert(key, new.clone()) {
            None => Some(Transition::Added(new)),
            Some(old) if same(old.as_ref(), new.as_ref()) => None,
            Some(old) => Some(Transition::Updated(old, new)),
        }
    }

    fn delete(&mut self, key: &ObjectKey) -> Option<Transition<T>> {
        self.store.remove(key).map(Transition::Deleted)
    }
}

/// Registry of handlers plus the machinery to run every watch.
pub struct WatchHub {
    client: KubeClient,
    broker: Arc<ResourceBroker>,
    pod_handlers: Vec<Arc<dyn PodHandler>>,
    service_handlers: Vec<Arc<dyn ServiceHandler>>,
    workload_handlers: Vec<Arc<dyn WorkloadHandler>>,
    ingress_handlers: Vec<Arc<dyn IngressHandler>>,
    secret_handlers: Vec<Arc<dyn SecretHandler>>,
}

impl WatchHub {
    pub fn new(client: KubeClient, broker: Arc<ResourceBroker>) -> Self {
        WatchHub {
            client,
            broker,
            pod_handlers: Vec::new(),
            service_handlers: Vec::new(),
            workload_handlers: Vec::new(),
            ingress_handlers: Vec::new(),
            secret_handlers: Vec::new(),
        }
    }

    pub fn register_pod_handler(&mut self, handler: Arc<dyn PodHandler>) {
        self.pod_handlers.push(handler);
    }

    pub fn register_service_handler(&mut self, handler: Arc<dyn ServiceHandler>) {
        self.service_handlers.push(handler);
    }

    pub fn register_workload_handler(&mut self, handler: Arc<dyn WorkloadHandler>) {
        self.workload_handlers.push(handler);
    }

    pub fn register_ingress_handler(&mut self, handler: Arc<dyn IngressHandler>) {
        self.ingress_handlers.push(handler);
    }

    pub fn register_secret_handler(&mut self, handler: Arc<dyn SecretHandler>) {
        self.secret_handlers.push(handler);
    }

    /// Spawn every watch loop. The tasks run until the process stops.
    pub fn spawn_all(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn({
                let hub = self.clone();
                async move { hub.watch_pods().await }
            }),
            tokio::spawn({
                let hub = self.clone();
                async move { hub.watch_services().await }
            }),
            tokio::spawn({
                let hub = self.clone();
                async move {
                    hub.watch_workloads::<Deployment>("deployments", |w| {
                        WorkloadInfo::from_deployment(w)
                    })
                    .await
                }
            }),
            tokio::spawn({
                let hub = self.clone();
                async move {
                    hub.watch_workloads::<StatefulSet>("statefulsets", |w| {
                        WorkloadInfo::from_stateful_set(w)
                    })
                    .await
                }
            }),
            tokio::spawn({
                let hub = self.clone();
                async move {
                    hub.watch_workloads::<DaemonSet>("daemonsets", |w| {
                        WorkloadInfo::from_daemon_set(w)
                    })
                    .await
                }
            }),
            tokio::spawn({
                let hub = self.clone();
                async move { hub.watch_ingresses().await }
            }),
            tokio::spawn({
                let hub = self.clone();
                async move { hub.watch_secrets().await }
            }),
        ]
    }

    async fn watch_pods(&self) {
        let api: Api<Pod> = Api::all(self.client.client());
        let mut store = ProjectionStore::new();
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        info!("Start watching pods");
        while let Some(event) = stream.next().await {
            let transitions = match event {
                Ok(event) => collect_transitions(&mut store, event, |pod: &Pod| {
                    PodInfo::from_pod(pod)
                }),
                Err(e) => {
                    warn!(error = %e, "Pod watch error");
                    continue;
                }
            };
            for transition in transitions {
                self.dispatch_pod(transition).await;
            }
        }
        info!("Pod watch terminated");
    }

    async fn watch_services(&self) {
        let api: Api<Service> = Api::all(self.client.client());
        let mut store = ProjectionStore::new();
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        info!("Start watching services");
        while let Some(event) = stream.next().await {
            let transitions = match event {
                Ok(event) => collect_transitions(&mut store, event, |svc: &Service| {
                    Some(ServiceInfo::from_service(svc))
                }),
                Err(e) => {
                    warn!(error = %e, "Service watch error");
                    continue;
                }
            };
            for transition in transitions {
                self.dispatch_service(transition).await;
            }
        }
        info!("Service watch terminated");
    }

    async fn watch_workloads<K>(&self, kind: &str, project: fn(&K) -> WorkloadInfo)
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + 'static,
    {
        let api: Api<K> = Api::all(self.client.client());
        let mut store = ProjectionStore::new();
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        info!(kind = kind, "Start watching workloads");
        while let Some(event) = stream.next().await {
            let transitions = match event {
                Ok(event) => {
                    collect_transitions(&mut store, event, |w: &K| Some(project(w)))
                }
                Err(e) => {
                    warn!(kind = kind, error = %e, "Workload watch error");
                    continue;
                }
            };
            for transition in transitions {
                self.dispatch_workload(transition).await;
            }
        }
        info!(kind = kind, "Workload watch terminated");
    }

    async fn watch_ingresses(&self) {
        let api: Api<Ingress> = Api::all(self.client.client());
        let mut store = ProjectionStore::new();
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        info!("Start watching ingresses");
        while let Some(event) = stream.next().await {
            let transitions = match event {
                Ok(event) => collect_transitions(&mut store, event, |ing: &Ingress| {
                    Some(IngressInfo::from_ingress(ing))
                }),
                Err(e) => {
                    warn!(error = %e, "Ingress watch error");
                    continue;
                }
            };
            for transition in transitions {
                self.dispatch_ingress(transition).await;
            }
        }
        info!("Ingress watch terminated");
    }

    async fn watch_secrets(&self) {
        let api: Api<Secret> = Api::all(self.client.client());
        let mut store = ProjectionStore::new();
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        info!("Start watching secrets");
        while let Some(event) = stream.next().await {
            let transitions = match event {
                Ok(event) => collect_transitions(&mut store, event, |secret: &Secret| {
                    Some(SecretInfo::from_secret(secret))
                }),
                Err(e) => {
                    warn!(error = %e, "Secret watch error");
                    continue;
                }
            };
            for transition in transitions {
                self.dispatch_secret(transition).await;
            }
        }
        info!("Secret watch terminated");
    }

    async fn dispatch_pod(&self, transition: Transition<PodInfo>) {
        let patches = self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            for handler in &self.pod_handlers {
                match &transition {
                    Transition::Added(new) => {
                        if handler.pod_valid(new) {
                            handler.pod_added(&mut cx, new);
                        }
                    }
                    Transition::Deleted(old) => {
                        if handler.pod_valid(old) {
                            handler.pod_deleted(&mut cx, old);
                        }
                    }
                    Transition::Updated(old, new) => {
                        let old_valid = handler.pod_valid(old);
                        let new_valid = handler.pod_valid(new);
                        if !old_valid && new_valid {
                            handler.pod_added(&mut cx, new);
                        } else if old_valid && !new_valid {
                            handler.pod_deleted(&mut cx, old);
                        } else if old_valid && new_valid {
                            handler.pod_updated(&mut cx, old, new);
                        }
                    }
                }
            }
            patches
        });
        self.execute_patches(patches).await;
    }

    async fn dispatch_service(&self, transition: Transition<ServiceInfo>) {
        let patches = self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            for handler in &self.service_handlers {
                match &transition {
                    Transition::Added(new) => {
                        if handler.service_valid(new) {
                            handler.service_added(&mut cx, new);
                        }
                    }
                    Transition::Deleted(old) => {
                        if handler.service_valid(old) {
                            handler.service_deleted(&mut cx, old);
                        }
                    }
                    Transition::Updated(old, new) => {
                        let old_valid = handler.service_valid(old);
                        let new_valid = handler.service_valid(new);
                        if !old_valid && new_valid {
                            handler.service_added(&mut cx, new);
                        } else if old_valid && !new_valid {
                            handler.service_deleted(&mut cx, old);
                        } else if old_valid && new_valid {
                            handler.service_updated(&mut cx, old, new);
                        }
                    }
                }
            }
            patches
        });
        self.execute_patches(patches).await;
    }

    async fn dispatch_workload(&self, transition: Transition<WorkloadInfo>) {
        let patches = self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            for handler in &self.workload_handlers {
                match &transition {
                    Transition::Added(new) => {
                        if handler.workload_valid(new) {
                            handler.workload_added(&mut cx, new);
                        }
                    }
                    Transition::Deleted(old) => {
                        if handler.workload_valid(old) {
                            handler.workload_deleted(&mut cx, old);
                        }
                    }
                    Transition::Updated(old, new) => {
                        let old_valid = handler.workload_valid(old);
                        let new_valid = handler.workload_valid(new);
                        if !old_valid && new_valid {
                            handler.workload_added(&mut cx, new);
                        } else if old_valid && !new_valid {
                            handler.workload_deleted(&mut cx, old);
                        } else if old_valid && new_valid {
                            handler.workload_updated(&mut cx, old, new);
                        }
                    }
                }
            }
            patches
        });
        self.execute_patches(patches).await;
    }

    async fn dispatch_ingress(&self, transition: Transition<IngressInfo>) {
        let patches = self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            for handler in &self.ingress_handlers {
                match &transition {
                    Transition::Added(new) => {
                        if handler.ingress_valid(new) {
                            handler.ingress_added(&mut cx, new);
                        }
                    }
                    Transition::Deleted(old) => {
                        if handler.ingress_valid(old) {
                            handler.ingress_deleted(&mut cx, old);
                        }
                    }
                    Transition::Updated(old, new) => {
                        let old_valid = handler.ingress_valid(old);
                        let new_valid = handler.ingress_valid(new);
                        if !old_valid && new_valid {
                            handler.ingress_added(&mut cx, new);
                        } else if old_valid && !new_valid {
                            handler.ingress_deleted(&mut cx, old);
                        } else if old_valid && new_valid {
                            handler.ingress_updated(&mut cx, old, new);
                        }
                    }
                }
            }
            patches
        });
        self.execute_patches(patches).await;
    }

    async fn dispatch_secret(&self, transition: Transition<SecretInfo>) {
        let patches = self.broker.with(|state| {
            let mut patches = Vec::new();
            let mut cx = EventContext {
                state,
                patches: &mut patches,
            };
            for handler in &self.secret_handlers {
                match &transition {
                    Transition::Added(new) => {
                        if handler.secret_valid(new) {
                            handler.secret_added(&mut cx, new);
                        }
                    }
                    Transition::Deleted(old) => {
                        if handler.secret_valid(old) {
                            handler.secret_deleted(&mut cx, old);
                        }
                    }
                    Transition::Updated(old, new) => {
                        let old_valid = handler.secret_valid(old);
                        let new_valid = handler.secret_valid(new);
                        if !old_valid && new_valid {
                            handler.secret_added(&mut cx, new);
                        } else if old_valid && !new_valid {
                            handler.secret_deleted(&mut cx, old);
                        } else if old_valid && new_valid {
                            handler.secret_updated(&mut cx, old, new);
                        }
                    }
                }
            }
            patches
        });
        self.execute_patches(patches).await;
    }

    async fn execute_patches(&self, patches: Vec<PatchRequest>) {
        for patch in patches {
            let result = match &patch {
                PatchRequest::PodAnnotations { pod, set } => {
                    self.client.update_pod_annotations(pod, set).await
                }
                PatchRequest::ServiceLabel {
                    service,
                    key,
                    value,
                } => self.client.add_service_label(service, key, value).await,
                PatchRequest::ServiceAnnotations { service, set } => {
                    self.client.update_service_annotations(service, set).await
                }
                PatchRequest::MergeServiceAnnotation {
                    service,
                    key,
                    value,
                } => {
                    self.client
                        .merge_service_annotation(service, key, value)
                        .await
                }
                PatchRequest::UnmergeServiceAnnotation {
                    service,
                    key,
                    value,
                } => {
                    self.client
                        .remove_service_annotation(service, key, value)
                        .await
                }
            };
            if let Err(e) = result {
                log_patch_failure("orchestrator patch", &e);
            }
        }
    }
}

fn collect_transitions<K, T>(
    store: &mut ProjectionStore<T>,
    event: watcher::Event<K>,
    project: impl Fn(&K) -> Option<T>,
) -> Vec<Transition<T>>
where
    K: kube::Resource + ResourceExt,
    T: SameExceptVersion,
{
    match event {
        watcher::Event::Init => {
            store.begin_init();
            Vec::new()
        }
        watcher::Event::InitDone => store.finish_init(),
        watcher::Event::InitApply(obj) | watcher::Event::Apply(obj) => {
            let key = ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any());
            store
                .apply(key, project(&obj), T::same_except_version)
                .into_iter()
                .collect()
        }
        watcher::Event::Delete(obj) => {
            let key = ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any());
            store.delete(&key).into_iter().collect()
        }
    }
}

/// Update suppression hook: equality ignoring `resource_version`.
trait SameExceptVersion {
    fn same_except_version(&self, other: &Self) -> bool;
}

impl SameExceptVersion for PodInfo {
    fn same_except_version(&self, other: &Self) -> bool {
        PodInfo::same_except_version(self, other)
    }
}

impl SameExceptVersion for ServiceInfo {
    fn same_except_version(&self, other: &Self) -> bool {
        ServiceInfo::same_except_version(self, other)
    }
}

impl SameExceptVersion for WorkloadInfo {
    fn same_except_version(&self, other: &Self) -> bool {
        WorkloadInfo::same_except_version(self, other)
    }
}

impl SameExceptVersion for IngressInfo {
    fn same_except_version(&self, other: &Self) -> bool {
        IngressInfo::same_except_version(self, other)
    }
}

impl SameExceptVersion for SecretInfo {
    fn same_except_version(&self, other: &Self) -> bool {
        SecretInfo::same_except_version(self, other)
    }
}

/// Keeps the cluster-object index in step with pod, service and workload
/// events. Registered ahead of every other handler so they observe a
/// current index.
pub struct IndexMaintainer;

impl PodHandler for IndexMaintainer {
    fn pod_valid(&self, pod: &PodInfo) -> bool {
        pod.valid()
    }

    fn pod_added(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>) {
        cx.state.index.add(ObjectRef::Pod(pod.clone()));
    }

    fn pod_deleted(&self, cx: &mut EventContext<'_>, pod: &Arc<PodInfo>) {
        cx.state.index.remove(&ObjectRef::Pod(pod.clone()));
    }

    fn pod_updated(&self, cx: &mut EventContext<'_>, old: &Arc<PodInfo>, new: &Arc<PodInfo>) {
        self.pod_deleted(cx, old);
        self.pod_added(cx, new);
    }
}

impl ServiceHandler for IndexMaintainer {
    fn service_added(&self, cx: &mut EventContext<'_>, service: &Arc<ServiceInfo>) {
        cx.state.index.add(ObjectRef::Service(service.clone()));
    }

    fn service_deleted(&self, cx: &mut EventContext<'_>, service: &Arc<ServiceInfo>) {
        cx.state.index.remove(&ObjectRef::Service(service.clone()));
    }

    fn service_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<ServiceInfo>,
        new: &Arc<ServiceInfo>,
    ) {
        self.service_deleted(cx, old);
        self.service_added(cx, new);
    }
}

impl WorkloadHandler for IndexMaintainer {
    fn workload_added(&self, cx: &mut EventContext<'_>, workload: &Arc<WorkloadInfo>) {
        cx.state.index.add(ObjectRef::Workload(workload.clone()));
    }

    fn workload_deleted(&self, cx: &mut EventContext<'_>, workload: &Arc<WorkloadInfo>) {
        cx.state.index.remove(&ObjectRef::Workload(workload.clone()));
    }

    fn workload_updated(
        &self,
        cx: &mut EventContext<'_>,
        old: &Arc<WorkloadInfo>,
        new: &Arc<WorkloadInfo>,
    ) {
        self.workload_deleted(cx, old);
        self.workload_added(cx, new);
    }
}
