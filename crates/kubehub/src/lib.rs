//! kubetink kubehub: the managed-object client and its kube-rs backend.
//!
//! `create` reports `AlreadyExists`, `get`/`delete` report `NotFound`; both are
//! distinct error kinds. [`ManagedObjectClient::ensure`] is the idempotent create every
//! provisioner goes through, so the "already exists is fine" rule lives here only.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config, Resource,
};
use kubetink_core::{ManagedObject, ObjectKey, ObjectKind};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod memory;

pub use memory::{Call, MemoryObjectClient, ReadOutcome};

/// Field manager recorded on every object this crate creates.
pub const FIELD_MANAGER: &str = "kubetink";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),
    #[error("{0} not found")]
    NotFound(ObjectKey),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0} is namespaced; a namespace is required")]
    MissingNamespace(ObjectKind),
    #[error("kube api: {0}")]
    Kube(#[source] kube::Error),
    #[error("{key}: {message}")]
    Rejected { key: ObjectKey, message: String },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists(_))
    }

    fn from_kube(err: kube::Error, key: &ObjectKey) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => ClientError::AlreadyExists(key.clone()),
            kube::Error::Api(ae) if ae.code == 404 => ClientError::NotFound(key.clone()),
            _ => ClientError::Kube(err),
        }
    }
}

/// Result of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyPresent,
}

/// Typed access to the control plane for the kinds the pipeline manages.
#[async_trait::async_trait]
pub trait ManagedObjectClient: Send + Sync {
    async fn create(&self, obj: &ManagedObject) -> Result<(), ClientError>;
    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject, ClientError>;
    async fn list(&self, kind: ObjectKind, namespace: Option<&str>) -> Result<Vec<ManagedObject>, ClientError>;
    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError>;

    /// Create `obj`, treating an existing object with the same identity as success.
    async fn ensure(&self, obj: &ManagedObject) -> Result<EnsureOutcome, ClientError> {
        match self.create(obj).await {
            Ok(()) => Ok(EnsureOutcome::Created),
            Err(ClientError::AlreadyExists(_)) => Ok(EnsureOutcome::AlreadyPresent),
            Err(e) => Err(e),
        }
    }
}

/// Run `fut` unless `ctx` is already cancelled; abort it as soon as `ctx` is.
pub async fn cancellable<T, F>(ctx: &CancellationToken, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    if ctx.is_cancelled() {
        return Err(ClientError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(ClientError::Cancelled),
        res = fut => res,
    }
}

/// Where to find cluster credentials. Both unset means in-cluster or `$KUBECONFIG` inference.
#[derive(Debug, Clone, Default)]
pub struct KubeClientOptions {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
}

pub async fn get_kube_client(opts: &KubeClientOptions) -> Result<Client> {
    let kco = KubeConfigOptions { context: opts.context.clone(), ..Default::default() };
    let config = match (&opts.kubeconfig, &opts.context) {
        (Some(path), _) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kc, &kco).await.context("loading kubeconfig")?
        }
        (None, Some(_)) => Config::from_kubeconfig(&kco).await.context("loading kubeconfig context")?,
        (None, None) => Config::infer().await.context("inferring kube config")?,
    };
    Client::try_from(config).context("building kube client")
}

/// [`ManagedObjectClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeObjectClient {
    client: Client,
}

impl KubeObjectClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    fn namespaced<K>(&self, kind: ObjectKind, namespace: Option<&str>) -> Result<Api<K>, ClientError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let ns = namespace.ok_or(ClientError::MissingNamespace(kind))?;
        Ok(Api::namespaced(self.client.clone(), ns))
    }
}

async fn create_in<K>(api: Api<K>, obj: &K, key: &ObjectKey) -> Result<(), ClientError>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    let pp = PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..Default::default() };
    api.create(&pp, obj).await.map(drop).map_err(|e| ClientError::from_kube(e, key))
}

async fn get_in<K>(api: Api<K>, key: &ObjectKey, wrap: fn(K) -> ManagedObject) -> Result<ManagedObject, ClientError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.get(&key.name).await.map(wrap).map_err(|e| ClientError::from_kube(e, key))
}

async fn list_in<K>(api: Api<K>, wrap: fn(K) -> ManagedObject) -> Result<Vec<ManagedObject>, ClientError>
where
    K: Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default()).await.map_err(ClientError::Kube)?;
    Ok(list.items.into_iter().map(wrap).collect())
}

async fn delete_in<K>(api: Api<K>, key: &ObjectKey) -> Result<(), ClientError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.delete(&key.name, &DeleteParams::default()).await.map(drop).map_err(|e| ClientError::from_kube(e, key))
}

// Expands `$body` once per kind with `$api` bound to the typed Api and `$wrap`
// to the matching ManagedObject constructor.
macro_rules! with_api {
    ($self:ident, $kind:expr, $ns:expr, |$api:ident, $wrap:ident| $body:expr) => {
        match $kind {
            ObjectKind::Namespace => { let $api: Api<Namespace> = $self.cluster(); let $wrap: fn(Namespace) -> ManagedObject = ManagedObject::Namespace; $body }
            ObjectKind::ClusterRole => { let $api: Api<ClusterRole> = $self.cluster(); let $wrap: fn(ClusterRole) -> ManagedObject = ManagedObject::ClusterRole; $body }
            ObjectKind::ClusterRoleBinding => { let $api: Api<ClusterRoleBinding> = $self.cluster(); let $wrap: fn(ClusterRoleBinding) -> ManagedObject = ManagedObject::ClusterRoleBinding; $body }
            ObjectKind::ServiceAccount => { let $api: Api<ServiceAccount> = $self.namespaced($kind, $ns)?; let $wrap: fn(ServiceAccount) -> ManagedObject = ManagedObject::ServiceAccount; $body }
            ObjectKind::Role => { let $api: Api<Role> = $self.namespaced($kind, $ns)?; let $wrap: fn(Role) -> ManagedObject = ManagedObject::Role; $body }
            ObjectKind::RoleBinding => { let $api: Api<RoleBinding> = $self.namespaced($kind, $ns)?; let $wrap: fn(RoleBinding) -> ManagedObject = ManagedObject::RoleBinding; $body }
            ObjectKind::Service => { let $api: Api<Service> = $self.namespaced($kind, $ns)?; let $wrap: fn(Service) -> ManagedObject = ManagedObject::Service; $body }
            ObjectKind::ConfigMap => { let $api: Api<ConfigMap> = $self.namespaced($kind, $ns)?; let $wrap: fn(ConfigMap) -> ManagedObject = ManagedObject::ConfigMap; $body }
            ObjectKind::Workload => { let $api: Api<Deployment> = $self.namespaced($kind, $ns)?; let $wrap: fn(Deployment) -> ManagedObject = ManagedObject::Workload; $body }
        }
    };
}

#[async_trait::async_trait]
impl ManagedObjectClient for KubeObjectClient {
    async fn create(&self, obj: &ManagedObject) -> Result<(), ClientError> {
        let key = obj.key();
        let ns = key.namespace.as_deref();
        debug!(object = %key, "create");
        counter!("kube_create_total", 1u64);
        match obj {
            ManagedObject::Namespace(o) => create_in(self.cluster(), o, &key).await,
            ManagedObject::ClusterRole(o) => create_in(self.cluster(), o, &key).await,
            ManagedObject::ClusterRoleBinding(o) => create_in(self.cluster(), o, &key).await,
            ManagedObject::ServiceAccount(o) => create_in(self.namespaced(key.kind, ns)?, o, &key).await,
            ManagedObject::Role(o) => create_in(self.namespaced(key.kind, ns)?, o, &key).await,
            ManagedObject::RoleBinding(o) => create_in(self.namespaced(key.kind, ns)?, o, &key).await,
            ManagedObject::Service(o) => create_in(self.namespaced(key.kind, ns)?, o, &key).await,
            ManagedObject::ConfigMap(o) => create_in(self.namespaced(key.kind, ns)?, o, &key).await,
            ManagedObject::Workload(o) => create_in(self.namespaced(key.kind, ns)?, o, &key).await,
        }
    }

    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject, ClientError> {
        with_api!(self, key.kind, key.namespace.as_deref(), |api, wrap| get_in(api, key, wrap).await)
    }

    async fn list(&self, kind: ObjectKind, namespace: Option<&str>) -> Result<Vec<ManagedObject>, ClientError> {
        with_api!(self, kind, namespace, |api, wrap| list_in(api, wrap).await)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        debug!(object = %key, "delete");
        with_api!(self, key.kind, key.namespace.as_deref(), |api, _wrap| delete_in(api, key).await)
    }
}
